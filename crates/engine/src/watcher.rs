use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, info, warn};

use eventboard_core::{Entity, EntityId, EntityKey, Fields, SubscriptionId};
use eventboard_storage::CacheStore;

use crate::error::EngineError;
use crate::transport::{PushListener, RemoteError, Transport};
use crate::{Engine, Outcome};

#[derive(Default)]
struct WatchState {
    active: AtomicBool,
    merged: AtomicUsize,
    last_error: Mutex<Option<RemoteError>>,
}

/// Live subscription that merges pushed children into one cached parent.
///
/// Cancellation is explicit: it stops a remote stream, so dropping the
/// watcher alone does not cancel it.
pub struct RelationWatcher<T: Transport> {
    subscription: SubscriptionId,
    parent_id: EntityId,
    relation: String,
    transport: Arc<T>,
    state: Arc<WatchState>,
    cancelled: bool,
}

impl<S, T> Engine<S, T>
where
    S: CacheStore + Send + 'static,
    T: Transport + 'static,
{
    /// Subscribe to `feed` and merge each pushed child into `parent_id`'s
    /// `relation`. Stream errors are recorded on the watcher and leave the
    /// cache untouched.
    pub async fn watch_relation(
        self: &Arc<Self>,
        feed: &str,
        args: &Fields,
        parent_id: &EntityId,
        relation: &str,
    ) -> Result<RelationWatcher<T>, EngineError> {
        let state = Arc::new(WatchState::default());
        state.active.store(true, Ordering::Release);

        let listener: PushListener = {
            let engine: Weak<Self> = Arc::downgrade(self);
            let state = state.clone();
            let parent_id = parent_id.clone();
            let relation = relation.to_string();
            Box::new(move |event: Result<Entity, RemoteError>| {
                if !state.active.load(Ordering::Acquire) {
                    debug!("push for {} after cancel ignored", parent_id);
                    return;
                }
                let Some(engine) = engine.upgrade() else {
                    debug!("engine gone; push for {} ignored", parent_id);
                    return;
                };
                match event {
                    Ok(child) => {
                        if engine.merge_pushed_update(&parent_id, child, &relation) == Outcome::Applied {
                            state.merged.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(e) => {
                        warn!("subscription error on {}.{}: {}", parent_id, relation, e);
                        *state.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                    }
                }
            })
        };

        let subscription = self
            .transport
            .subscribe(feed, args, listener)
            .await
            .map_err(|source| EngineError::RemoteFailure {
                operation: feed.to_string(),
                key: EntityKey::Confirmed(parent_id.clone()),
                source,
            })?;
        info!("watching {}.{} via {} ({})", parent_id, relation, feed, subscription);

        Ok(RelationWatcher {
            subscription,
            parent_id: parent_id.clone(),
            relation: relation.to_string(),
            transport: self.transport.clone(),
            state,
            cancelled: false,
        })
    }
}

impl<T: Transport> RelationWatcher<T> {
    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription
    }

    pub fn parent_id(&self) -> &EntityId {
        &self.parent_id
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Acquire)
    }

    /// Pushed children merged so far (duplicates and misses excluded).
    pub fn merged_count(&self) -> usize {
        self.state.merged.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<RemoteError> {
        self.state
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop merging and cancel the remote subscription.
    pub fn cancel(mut self) {
        self.state.active.store(false, Ordering::Release);
        self.transport.cancel(self.subscription);
        self.cancelled = true;
        info!("cancelled subscription {} for {}", self.subscription, self.parent_id);
    }
}

impl<T: Transport> Drop for RelationWatcher<T> {
    fn drop(&mut self) {
        if !self.cancelled {
            warn!(
                "watcher for {}.{} dropped without cancel; subscription {} stays open",
                self.parent_id, self.relation, self.subscription
            );
        }
    }
}
