//! Round trips through the transport: optimistic apply, await the remote,
//! then confirm or roll back. Reconciliation does not depend on the caller
//! staying around; a torn-down view may drop the future at any point.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use eventboard_core::{CollectionView, Entity, EntityId, EntityKey, Fields};
use eventboard_storage::CacheStore;

use crate::config::CachePolicy;
use crate::error::EngineError;
use crate::pending::{PendingCreate, PendingDelete};
use crate::reconcile;
use crate::task;
use crate::transport::{Page, RemoteError, Transport};
use crate::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Loaded { added: usize, has_more: bool },
    /// Another load for this collection is still running.
    InProgress,
    /// No continuation token left.
    Exhausted,
}

/// Marks a page load of one collection as in flight. Dropped before the
/// page is folded in (the caller's future went away mid-fetch), it clears
/// the view's refreshing flag.
struct LoadGuard<'a, S: CacheStore, T: Transport> {
    engine: &'a Engine<S, T>,
    collection: String,
    settled: bool,
}

impl<S: CacheStore, T: Transport> Drop for LoadGuard<'_, S, T> {
    fn drop(&mut self) {
        if !self.settled {
            debug!("load of {} abandoned mid-fetch", self.collection);
            self.engine.clear_refreshing(&self.collection);
        }
        self.engine.lock_loading().remove(&self.collection);
    }
}

impl<S, T> Engine<S, T>
where
    S: CacheStore + Send + 'static,
    T: Transport + 'static,
{
    /// Optimistic create. The mutation and its confirm or rollback run on
    /// their own task, so dropping this future never strands the
    /// placeholder. Must be called within a Tokio runtime.
    pub async fn create(
        self: &Arc<Self>,
        collection: &str,
        operation: &str,
        fields: Fields,
    ) -> Result<Entity, EngineError> {
        let pending = self.begin_optimistic_create(collection, fields);
        let key = pending.key();
        let engine = Arc::clone(self);
        let op = operation.to_string();
        let (reply, result) = oneshot::channel();
        task::spawn(async move {
            let settled = engine.settle_create(&op, pending).await;
            if reply.send(settled).is_err() {
                debug!("{} settled after its caller went away", op);
            }
        });

        result.await.map_err(|_| EngineError::Abandoned {
            operation: operation.to_string(),
            key,
        })?
    }

    /// Optimistic delete, reconciled on its own task like [`Engine::create`].
    pub async fn delete(
        self: &Arc<Self>,
        collection: &str,
        operation: &str,
        entity_id: &EntityId,
    ) -> Result<(), EngineError> {
        let pending = self.optimistic_delete(collection, entity_id);
        let engine = Arc::clone(self);
        let op = operation.to_string();
        let (reply, result) = oneshot::channel();
        task::spawn(async move {
            let settled = engine.settle_delete(&op, pending).await;
            if reply.send(settled).is_err() {
                debug!("{} settled after its caller went away", op);
            }
        });

        result.await.map_err(|_| EngineError::Abandoned {
            operation: operation.to_string(),
            key: EntityKey::Confirmed(entity_id.clone()),
        })?
    }
}

impl<S: CacheStore, T: Transport> Engine<S, T> {
    async fn settle_create(
        &self,
        operation: &str,
        pending: PendingCreate,
    ) -> Result<Entity, EngineError> {
        match self.transport.mutate(operation, pending.fields()).await {
            Ok(confirmed) if confirmed.is_pending() => {
                warn!("{} answered {} without a remote id", operation, pending.local_id());
                self.rollback_create(&pending);
                Err(EngineError::RemoteFailure {
                    operation: operation.to_string(),
                    key: pending.key(),
                    source: RemoteError::InvalidResponse {
                        operation: operation.to_string(),
                        reason: "entity carries no remote id".into(),
                    },
                })
            }
            Ok(confirmed) => {
                info!("{} confirmed {} as {}", operation, pending.local_id(), confirmed.key);
                self.confirm_create(&pending, confirmed.clone());
                Ok(confirmed)
            }
            Err(source) => {
                warn!("{} failed, rolling back {}: {}", operation, pending.local_id(), source);
                self.rollback_create(&pending);
                Err(EngineError::RemoteFailure {
                    operation: operation.to_string(),
                    key: pending.key(),
                    source,
                })
            }
        }
    }

    async fn settle_delete(&self, operation: &str, pending: PendingDelete) -> Result<(), EngineError> {
        let entity_id = pending.entity_id().clone();
        let args = Fields::new().with("id", entity_id.as_str());

        match self.transport.mutate(operation, &args).await {
            Ok(_) => {
                info!("{} confirmed for {}", operation, entity_id);
                self.confirm_delete(pending);
                Ok(())
            }
            Err(source) => {
                warn!("{} failed, restoring {}: {}", operation, entity_id, source);
                self.rollback_delete(pending);
                Err(EngineError::RemoteFailure {
                    operation: operation.to_string(),
                    key: EntityKey::Confirmed(entity_id),
                    source,
                })
            }
        }
    }

    /// Create a child (e.g. a comment) and merge it into the cached parent.
    /// A later subscription echo of the same child is absorbed as a duplicate.
    pub async fn add_child(
        &self,
        parent_id: &EntityId,
        relation: &str,
        operation: &str,
        fields: Fields,
    ) -> Result<Entity, EngineError> {
        let child = self
            .transport
            .mutate(operation, &fields)
            .await
            .map_err(|source| EngineError::RemoteFailure {
                operation: operation.to_string(),
                key: EntityKey::Confirmed(parent_id.clone()),
                source,
            })?;
        let child = match child.parent {
            Some(_) => child,
            None => child.with_parent(parent_id.clone()),
        };

        let outcome = self.merge_pushed_update(parent_id, child.clone(), relation);
        debug!("{} on {}: {:?}", operation, parent_id, outcome);
        Ok(child)
    }

    // ========================================================================
    // Pagination
    // ========================================================================

    /// Reload the first page. Placeholders still in flight survive the reload.
    pub async fn refresh(&self, collection: &str) -> Result<PageOutcome, EngineError> {
        let Some(guard) = self.begin_load(collection) else {
            return Ok(PageOutcome::InProgress);
        };
        let result = self
            .transport
            .fetch_page(collection, self.config.page_size, None)
            .await;
        self.finish_page(guard, result, true)
    }

    /// Append the next page, skipping ids already cached.
    pub async fn load_next_page(&self, collection: &str) -> Result<PageOutcome, EngineError> {
        let Some(view) = self.collection(collection) else {
            return self.refresh(collection).await;
        };
        if self.is_loading(collection) {
            return Ok(PageOutcome::InProgress);
        }
        let Some(token) = view.continuation_token.filter(|t| !t.is_empty()) else {
            return Ok(PageOutcome::Exhausted);
        };
        let Some(guard) = self.begin_load(collection) else {
            return Ok(PageOutcome::InProgress);
        };

        let result = self
            .transport
            .fetch_page(collection, self.config.page_size, Some(&token))
            .await;
        self.finish_page(guard, result, false)
    }

    /// Whether a refresh or next-page load of `collection` is running.
    pub fn is_loading(&self, collection: &str) -> bool {
        self.lock_loading().contains(collection)
    }

    /// Claim `collection` for a load and flag its view, creating the view if
    /// needed. `None` if a load is already running.
    fn begin_load(&self, collection: &str) -> Option<LoadGuard<'_, S, T>> {
        if !self.lock_loading().insert(collection.to_string()) {
            return None;
        }
        let guard = LoadGuard {
            engine: self,
            collection: collection.to_string(),
            settled: false,
        };

        let mut store = self.lock_store();
        match store.get(collection) {
            Ok(view) => {
                let mut view = view.unwrap_or_default();
                view.is_refreshing = true;
                if let Err(e) = store.set(collection, view) {
                    error!("marking {} as refreshing failed: {}", collection, e);
                }
            }
            Err(e) => error!("reading {} before load failed: {}", collection, e),
        }
        drop(store);
        Some(guard)
    }

    fn clear_refreshing(&self, collection: &str) {
        let result = self.lock_store().update(collection, |mut view| {
            view.is_refreshing = false;
            view
        });
        if let Err(e) = result {
            error!("clearing refresh flag on {} failed: {}", collection, e);
        }
    }

    fn finish_page(
        &self,
        mut guard: LoadGuard<'_, S, T>,
        result: Result<Page, RemoteError>,
        reset: bool,
    ) -> Result<PageOutcome, EngineError> {
        guard.settled = true;
        let collection = guard.collection.as_str();
        let mut store = self.lock_store();
        let view = match store.get(collection) {
            Ok(view) => view.unwrap_or_default(),
            Err(e) => {
                error!("reading {} after load failed: {}", collection, e);
                CollectionView::default()
            }
        };

        let page = match result {
            Ok(page) => page,
            Err(source) => {
                let mut view = view;
                view.is_refreshing = false;
                if let Err(e) = store.set(collection, view) {
                    error!("clearing refresh flag on {} failed: {}", collection, e);
                }
                warn!("loading {} failed: {}", collection, source);
                return Err(EngineError::Remote(source));
            }
        };

        let has_more = page.continuation_token.as_deref().is_some_and(|t| !t.is_empty());
        let (view, added) = reconcile::merge_page(view, page.entities, page.continuation_token, reset);
        debug!("{} loaded {} new entities (reset: {})", collection, added, reset);
        if let Err(e) = store.set(collection, view) {
            error!("storing page for {} failed: {}", collection, e);
        }
        Ok(PageOutcome::Loaded { added, has_more })
    }

    // ========================================================================
    // Single entity
    // ========================================================================

    pub async fn fetch_entity(
        &self,
        id: &EntityId,
        policy: CachePolicy,
    ) -> Result<Option<Entity>, EngineError> {
        match policy {
            CachePolicy::ReturnCacheDataDontFetch => Ok(self.entity(id)),
            CachePolicy::FetchIgnoringCacheData => self.fetch_and_store(id).await,
            CachePolicy::ReturnCacheDataElseFetch => match self.entity(id) {
                Some(entity) => Ok(Some(entity)),
                None => self.fetch_and_store(id).await,
            },
        }
    }

    async fn fetch_and_store(&self, id: &EntityId) -> Result<Option<Entity>, EngineError> {
        let fetched = self.transport.fetch_entity(id).await?;
        match &fetched {
            Some(entity) => {
                if let Err(e) = self.lock_store().put_entity(entity.clone()) {
                    error!("caching fetched {} failed: {}", id, e);
                }
            }
            None => debug!("{} not found remotely", id),
        }
        Ok(fetched)
    }
}
