use eventboard_core::{CollectionView, Entity, EntityId};

use crate::error::StorageError;

/// Local, synchronous cache of named list queries plus an entity index keyed
/// by remote id.
///
/// Implementations normalize on write: `set` indexes every confirmed entity
/// of the view, keeping relations the indexed record has and the view's copy
/// lacks; `put_entity` patches every cached view holding that id;
/// `remove_entity` drops it from the index and from every view.
pub trait CacheStore {
    fn get(&self, collection: &str) -> Result<Option<CollectionView>, StorageError>;

    fn set(&mut self, collection: &str, view: CollectionView) -> Result<(), StorageError>;

    /// Drop a cached view. Returns whether it was present.
    fn evict(&mut self, collection: &str) -> Result<bool, StorageError>;

    fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>, StorageError>;

    fn put_entity(&mut self, entity: Entity) -> Result<(), StorageError>;

    fn remove_entity(&mut self, id: &EntityId) -> Result<bool, StorageError>;

    /// Read-modify-write one view. Returns false without writing when the
    /// view is not cached.
    fn update<F>(&mut self, collection: &str, apply: F) -> Result<bool, StorageError>
    where
        F: FnOnce(CollectionView) -> CollectionView,
    {
        match self.get(collection)? {
            Some(view) => {
                self.set(collection, apply(view))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
