use eventboard_core::{Entity, EntityId, EntityKey, Fields, LocalId};

use crate::reconcile::Retained;

/// Correlates an optimistic create with its later confirm or rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCreate {
    collection: String,
    local_id: LocalId,
    fields: Fields,
    applied: bool,
}

impl PendingCreate {
    pub(crate) fn new(collection: &str, local_id: LocalId, fields: Fields, applied: bool) -> Self {
        Self {
            collection: collection.to_string(),
            local_id,
            fields,
            applied,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn local_id(&self) -> &LocalId {
        &self.local_id
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::Pending(self.local_id.clone())
    }

    /// Field values the placeholder was built from; also what gets sent to
    /// the remote mutation.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// False when the view was not cached and the optimistic write was skipped.
    pub fn was_applied(&self) -> bool {
        self.applied
    }
}

/// Holds a removed entity until its delete is confirmed or rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelete {
    collection: String,
    entity_id: EntityId,
    retained: Option<Retained>,
}

impl PendingDelete {
    pub(crate) fn new(collection: &str, entity_id: EntityId, retained: Option<Retained>) -> Self {
        Self {
            collection: collection.to_string(),
            entity_id,
            retained,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn removed(&self) -> Option<&Entity> {
        self.retained.as_ref().map(|r| &r.entity)
    }

    pub fn original_index(&self) -> Option<usize> {
        self.retained.as_ref().map(|r| r.index)
    }

    pub(crate) fn into_retained(self) -> Option<Retained> {
        self.retained
    }
}
