use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::CoreError;
use crate::ids::EntityKey;

/// Cached, ordered, paginated result of a list query.
///
/// Entity keys are unique within a view. Mutations go through the methods
/// below so the invariant holds; `entities` is read-only from outside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionView {
    entities: Vec<Entity>,
    pub continuation_token: Option<String>,
    pub is_refreshing: bool,
}

impl CollectionView {
    /// Build a view from a page of entities. Later duplicates are dropped.
    pub fn new(entities: Vec<Entity>) -> Self {
        let mut view = Self::default();
        for entity in entities {
            view.push(entity);
        }
        view
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn into_entities(self) -> Vec<Entity> {
        self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn position(&self, key: &EntityKey) -> Option<usize> {
        self.entities.iter().position(|e| &e.key == key)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.position(key).is_some()
    }

    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.entities.iter().find(|e| &e.key == key)
    }

    pub fn keys(&self) -> Vec<EntityKey> {
        self.entities.iter().map(|e| e.key.clone()).collect()
    }

    pub fn key_set(&self) -> HashSet<EntityKey> {
        self.entities.iter().map(|e| e.key.clone()).collect()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.is_pending())
    }

    /// Append at the tail. Returns false (and leaves the view untouched) when
    /// the key is already present.
    pub fn push(&mut self, entity: Entity) -> bool {
        if self.contains(&entity.key) {
            return false;
        }
        self.entities.push(entity);
        true
    }

    /// Insert at `index` (clamped to the length). Returns false on duplicate key.
    pub fn insert(&mut self, index: usize, entity: Entity) -> bool {
        if self.contains(&entity.key) {
            return false;
        }
        let index = index.min(self.entities.len());
        self.entities.insert(index, entity);
        true
    }

    /// Replace the entity with the same key in place. Returns false if absent.
    pub fn replace(&mut self, entity: Entity) -> bool {
        match self.entities.iter_mut().find(|e| e.key == entity.key) {
            Some(slot) => {
                *slot = entity;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &EntityKey) -> Option<(usize, Entity)> {
        let index = self.position(key)?;
        Some((index, self.entities.remove(index)))
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
