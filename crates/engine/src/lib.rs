pub mod config;
pub mod error;
pub mod flows;
pub mod pending;
pub mod reconcile;
mod task;
pub mod transport;
pub mod watcher;

pub use config::{CachePolicy, EngineConfig};
pub use error::EngineError;
pub use flows::PageOutcome;
pub use pending::{PendingCreate, PendingDelete};
pub use reconcile::Comparator;
pub use transport::{Page, PushListener, RemoteError, Transport};
pub use watcher::RelationWatcher;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use eventboard_core::{CollectionView, Entity, EntityId, EntityKey, Fields, LocalId};
use eventboard_storage::{CacheStore, StorageError};

use crate::reconcile::Restored;

/// Result of a cache-side reconciliation step. None of these is an error:
/// cache operations degrade to a no-op instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// The target was cached but nothing needed to change.
    Unchanged,
    /// The target view or entity is not cached.
    CacheMiss,
    /// A pushed child was already present in the parent's relation.
    DuplicateDelivery,
    /// The cache store itself failed; logged and skipped.
    StoreFault,
}

/// Optimistic reconciliation engine over a cache store and a remote transport.
///
/// All cache writes go through one mutex that is held only for a single
/// read-modify-write and never across an `.await`, so independent mutations
/// interleave only at the points where they touch the cache.
pub struct Engine<S, T> {
    store: Mutex<S>,
    transport: Arc<T>,
    config: EngineConfig,
    orders: Mutex<HashMap<String, Comparator>>,
    /// Collections with a page load in flight. Kept in memory only, so a
    /// refreshing flag left in a persisted view never blocks a load.
    loading: Mutex<HashSet<String>>,
}

impl<S: CacheStore, T: Transport> Engine<S, T> {
    pub fn new(store: S, transport: T, config: EngineConfig) -> Self {
        Self {
            store: Mutex::new(store),
            transport: Arc::new(transport),
            config,
            orders: Mutex::new(HashMap::new()),
            loading: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Keep `collection` sorted by `cmp` instead of appending at the tail.
    pub fn set_order<F>(&self, collection: &str, cmp: F)
    where
        F: Fn(&Entity, &Entity) -> Ordering + Send + Sync + 'static,
    {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(collection.to_string(), Arc::new(cmp));
    }

    fn order_for(&self, collection: &str) -> Option<Comparator> {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .cloned()
    }

    fn lock_store(&self) -> MutexGuard<'_, S> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_loading(&self) -> MutexGuard<'_, HashSet<String>> {
        self.loading.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the store under the write lock.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.lock_store())
    }

    pub fn collection(&self, name: &str) -> Option<CollectionView> {
        match self.lock_store().get(name) {
            Ok(view) => view,
            Err(e) => {
                error!("reading collection {} failed: {}", name, e);
                None
            }
        }
    }

    pub fn entity(&self, id: &EntityId) -> Option<Entity> {
        match self.lock_store().get_entity(id) {
            Ok(entity) => entity,
            Err(e) => {
                error!("reading entity {} failed: {}", id, e);
                None
            }
        }
    }

    /// Apply a pure view transition. `apply` reports whether it changed anything.
    fn reconcile<F>(&self, collection: &str, apply: F) -> Outcome
    where
        F: FnOnce(CollectionView) -> (CollectionView, bool),
    {
        let mut changed = false;
        let result = self.lock_store().update(collection, |view| {
            let (next, did_change) = apply(view);
            changed = did_change;
            next
        });
        match result {
            Ok(true) if changed => Outcome::Applied,
            Ok(true) => Outcome::Unchanged,
            Ok(false) => Outcome::CacheMiss,
            Err(e) => store_fault(collection, &e),
        }
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Append a pending placeholder built from `fields` to `collection`.
    /// Skipped silently when the view is not cached; the handle records that.
    pub fn begin_optimistic_create(&self, collection: &str, fields: Fields) -> PendingCreate {
        let local_id = LocalId::generate(&self.config.pending_prefix);
        let placeholder = Entity::pending(local_id.clone(), fields.clone());
        let order = self.order_for(collection);

        let outcome = self.reconcile(collection, |view| {
            reconcile::append_placeholder(view, placeholder, order.as_ref())
        });
        let applied = outcome == Outcome::Applied;
        if applied {
            debug!("placeholder {} added to {}", local_id, collection);
        } else {
            debug!("optimistic create on {} skipped: {:?}", collection, outcome);
        }
        PendingCreate::new(collection, local_id, fields, applied)
    }

    /// Swap the placeholder for the authoritative entity. Idempotent on the
    /// confirmed id.
    pub fn confirm_create(&self, pending: &PendingCreate, confirmed: Entity) -> Outcome {
        if confirmed.is_pending() {
            warn!(
                "confirmation for {} carries no remote id; dropping placeholder",
                pending.local_id()
            );
            return self.rollback_create(pending);
        }

        let order = self.order_for(pending.collection());
        let outcome = self.reconcile(pending.collection(), |view| {
            reconcile::splice_confirmed(view, pending.local_id(), confirmed, order.as_ref())
        });
        if outcome == Outcome::CacheMiss {
            debug!(
                "{} not cached; confirmation of {} not reconciled",
                pending.collection(),
                pending.local_id()
            );
        }
        outcome
    }

    /// Remove the placeholder after a failed mutation. Idempotent.
    pub fn rollback_create(&self, pending: &PendingCreate) -> Outcome {
        self.reconcile(pending.collection(), |view| {
            reconcile::remove_placeholder(view, pending.local_id())
        })
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Remove `entity_id` from the view, keeping it for a possible rollback.
    pub fn optimistic_delete(&self, collection: &str, entity_id: &EntityId) -> PendingDelete {
        let key = EntityKey::Confirmed(entity_id.clone());
        let mut retained = None;
        let outcome = self.reconcile(collection, |view| {
            let (view, taken) = reconcile::take_entity(view, &key);
            let changed = taken.is_some();
            retained = taken;
            (view, changed)
        });
        if outcome != Outcome::Applied {
            debug!("optimistic delete of {} from {} skipped: {:?}", entity_id, collection, outcome);
        }
        PendingDelete::new(collection, entity_id.clone(), retained)
    }

    /// The delete is final: drop the retained copy and evict the entity
    /// everywhere it is still cached.
    pub fn confirm_delete(&self, pending: PendingDelete) -> Outcome {
        let had_copy = pending.removed().is_some();
        match self.lock_store().remove_entity(pending.entity_id()) {
            Ok(evicted) if evicted || had_copy => Outcome::Applied,
            Ok(_) => Outcome::CacheMiss,
            Err(e) => store_fault(pending.collection(), &e),
        }
    }

    /// Put the removed entity back, at its original index when possible.
    pub fn rollback_delete(&self, pending: PendingDelete) -> Outcome {
        let collection = pending.collection().to_string();
        let entity_id = pending.entity_id().clone();
        let Some(retained) = pending.into_retained() else {
            return Outcome::CacheMiss;
        };

        let mut placement = None;
        let outcome = self.reconcile(&collection, |view| {
            let (view, restored) = reconcile::restore_entity(view, retained);
            placement = Some(restored);
            (view, restored != Restored::AlreadyPresent)
        });
        match (outcome, placement) {
            (Outcome::Applied, Some(Restored::AtTail)) => {
                warn!(
                    "{} changed shape since {} was removed; restored at tail",
                    collection, entity_id
                );
            }
            (Outcome::CacheMiss, _) => {
                warn!("{} no longer cached; {} cannot be restored", collection, entity_id);
            }
            _ => {}
        }
        outcome
    }

    // ========================================================================
    // Pushed updates
    // ========================================================================

    /// Merge a child delivered out-of-band into its cached parent's relation.
    /// Delivery may repeat; a child already present is skipped.
    pub fn merge_pushed_update(&self, parent_id: &EntityId, child: Entity, relation: &str) -> Outcome {
        let mut store = self.lock_store();
        let parent = match store.get_entity(parent_id) {
            Ok(Some(parent)) => parent,
            Ok(None) => {
                info!(
                    "dropping pushed {} for {}: parent not cached",
                    child.key, parent_id
                );
                return Outcome::CacheMiss;
            }
            Err(e) => return store_fault(parent_id.as_str(), &e),
        };

        let (parent, appended) = reconcile::attach_child(parent, relation, child.clone());
        if !appended {
            debug!("duplicate delivery of {} on {}.{}", child.key, parent_id, relation);
            return Outcome::DuplicateDelivery;
        }

        let written = store.put_entity(parent).and_then(|()| store.put_entity(child));
        match written {
            Ok(()) => Outcome::Applied,
            Err(e) => store_fault(parent_id.as_str(), &e),
        }
    }
}

fn store_fault(target: &str, e: &StorageError) -> Outcome {
    error!("cache store failed on {}: {}", target, e);
    Outcome::StoreFault
}
