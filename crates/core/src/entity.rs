use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field_value::{FieldValue, Fields};
use crate::ids::{EntityId, EntityKey, LocalId};

/// A remote-owned record as last seen by the local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub key: EntityKey,
    pub fields: Fields,
    /// One-to-many relations, e.g. an event's `comments`.
    pub relations: BTreeMap<String, Vec<Entity>>,
    /// Parent this entity belongs to. A relation only; the parent does not own it.
    pub parent: Option<EntityId>,
}

impl Entity {
    pub fn confirmed(id: impl Into<EntityId>, fields: Fields) -> Self {
        Self {
            key: EntityKey::Confirmed(id.into()),
            fields,
            relations: BTreeMap::new(),
            parent: None,
        }
    }

    pub fn pending(local_id: LocalId, fields: Fields) -> Self {
        Self {
            key: EntityKey::Pending(local_id),
            fields,
            relations: BTreeMap::new(),
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<EntityId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_relation(mut self, name: impl Into<String>, children: Vec<Entity>) -> Self {
        self.relations.insert(name.into(), children);
        self
    }

    /// Copy over relations `cached` holds that this copy does not carry. A
    /// list query that does not select a relation leaves it untouched.
    pub fn inherit_relations(mut self, cached: &Entity) -> Self {
        for (name, children) in &cached.relations {
            self.relations
                .entry(name.clone())
                .or_insert_with(|| children.clone());
        }
        self
    }

    pub fn id(&self) -> Option<&EntityId> {
        match &self.key {
            EntityKey::Confirmed(id) => Some(id),
            EntityKey::Pending(_) => None,
        }
    }

    pub fn local_id(&self) -> Option<&LocalId> {
        match &self.key {
            EntityKey::Pending(local_id) => Some(local_id),
            EntityKey::Confirmed(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.key.is_pending()
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Children under `name`, empty when the relation was never populated.
    pub fn relation(&self, name: &str) -> &[Entity] {
        self.relations.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
