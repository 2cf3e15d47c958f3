use std::collections::HashMap;

use eventboard_core::{CollectionView, Entity, EntityId, EntityKey};

use crate::error::StorageError;
use crate::traits::CacheStore;

#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    collections: HashMap<String, CollectionView>,
    entities: HashMap<EntityId, Entity>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, collection: &str) -> Result<Option<CollectionView>, StorageError> {
        Ok(self.collections.get(collection).cloned())
    }

    fn set(&mut self, collection: &str, mut view: CollectionView) -> Result<(), StorageError> {
        let normalized: Vec<Entity> = view
            .entities()
            .iter()
            .filter_map(|entity| {
                let cached = self.entities.get(entity.id()?);
                Some(match cached {
                    Some(cached) => entity.clone().inherit_relations(cached),
                    None => entity.clone(),
                })
            })
            .collect();
        for entity in normalized {
            view.replace(entity.clone());
            if let Some(id) = entity.id().cloned() {
                self.entities.insert(id, entity);
            }
        }
        self.collections.insert(collection.to_string(), view);
        Ok(())
    }

    fn evict(&mut self, collection: &str) -> Result<bool, StorageError> {
        Ok(self.collections.remove(collection).is_some())
    }

    fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>, StorageError> {
        Ok(self.entities.get(id).cloned())
    }

    fn put_entity(&mut self, entity: Entity) -> Result<(), StorageError> {
        let Some(id) = entity.id().cloned() else {
            // Placeholders live only inside views.
            return Ok(());
        };
        for view in self.collections.values_mut() {
            view.replace(entity.clone());
        }
        self.entities.insert(id, entity);
        Ok(())
    }

    fn remove_entity(&mut self, id: &EntityId) -> Result<bool, StorageError> {
        let key = EntityKey::Confirmed(id.clone());
        for view in self.collections.values_mut() {
            view.remove(&key);
        }
        Ok(self.entities.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventboard_core::Fields;

    #[test]
    fn set_keeps_relations_the_page_did_not_select() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = MemoryCacheStore::new();
        let comment = Entity::confirmed("cm-1", Fields::new().with("content", "hi"));
        let event = Entity::confirmed("event-1", Fields::new().with("name", "Picnic"));
        store.set("events", CollectionView::new(vec![event.clone()]))?;
        store.put_entity(event.clone().with_relation("comments", vec![comment.clone()]))?;

        store.set("events", CollectionView::new(vec![event]))?;

        let indexed = store
            .get_entity(&EntityId::from("event-1"))?
            .ok_or("event not indexed")?;
        assert_eq!(indexed.relation("comments"), &[comment.clone()]);
        let view = store.get("events")?.ok_or("view missing")?;
        assert_eq!(view.entities()[0].relation("comments"), &[comment]);
        Ok(())
    }
}
