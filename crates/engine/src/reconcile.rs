//! Side-effect-free merge steps. Each takes a cached value and returns the
//! next one; the engine hands them to the cache store to apply.

use std::cmp::Ordering;
use std::sync::Arc;

use eventboard_core::{CollectionView, Entity, EntityKey, LocalId};

/// Caller-supplied ordering for a collection. Without one, new entities go to
/// the tail.
pub type Comparator = Arc<dyn Fn(&Entity, &Entity) -> Ordering + Send + Sync>;

/// An entity taken out of a view, with enough context to put it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retained {
    pub index: usize,
    pub entity: Entity,
    pub before: Option<EntityKey>,
    pub after: Option<EntityKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restored {
    AtIndex,
    /// The view changed shape since removal; appended instead.
    AtTail,
    AlreadyPresent,
}

/// Insert without disturbing existing entities. Returns false on duplicate key.
pub fn place(view: &mut CollectionView, entity: Entity, order: Option<&Comparator>) -> bool {
    match order {
        None => view.push(entity),
        Some(cmp) => {
            let index = view
                .entities()
                .partition_point(|existing| cmp(existing, &entity) != Ordering::Greater);
            view.insert(index, entity)
        }
    }
}

pub fn append_placeholder(
    mut view: CollectionView,
    placeholder: Entity,
    order: Option<&Comparator>,
) -> (CollectionView, bool) {
    let placed = place(&mut view, placeholder, order);
    (view, placed)
}

/// Drop the placeholder and add the confirmed entity. If the confirmed id is
/// already present (second confirm, or a refresh got there first) it is
/// replaced in place instead of added again.
pub fn splice_confirmed(
    mut view: CollectionView,
    local_id: &LocalId,
    confirmed: Entity,
    order: Option<&Comparator>,
) -> (CollectionView, bool) {
    let removed = view.remove(&EntityKey::Pending(local_id.clone())).is_some();
    let changed = match view.get(&confirmed.key) {
        Some(existing) if *existing == confirmed => false,
        Some(_) => view.replace(confirmed),
        None => place(&mut view, confirmed, order),
    };
    (view, removed || changed)
}

pub fn remove_placeholder(mut view: CollectionView, local_id: &LocalId) -> (CollectionView, bool) {
    let removed = view.remove(&EntityKey::Pending(local_id.clone())).is_some();
    (view, removed)
}

pub fn take_entity(mut view: CollectionView, key: &EntityKey) -> (CollectionView, Option<Retained>) {
    let Some((index, entity)) = view.remove(key) else {
        return (view, None);
    };
    let before = index
        .checked_sub(1)
        .and_then(|i| view.entities().get(i))
        .map(|e| e.key.clone());
    let after = view.entities().get(index).map(|e| e.key.clone());
    let retained = Retained {
        index,
        entity,
        before,
        after,
    };
    (view, Some(retained))
}

/// Put a retained entity back at its original index when its neighbours are
/// unchanged, otherwise at the tail.
pub fn restore_entity(mut view: CollectionView, retained: Retained) -> (CollectionView, Restored) {
    if view.contains(&retained.entity.key) {
        return (view, Restored::AlreadyPresent);
    }

    let entities = view.entities();
    let before = retained
        .index
        .checked_sub(1)
        .and_then(|i| entities.get(i))
        .map(|e| &e.key);
    let after = entities.get(retained.index).map(|e| &e.key);
    let same_shape = retained.index <= entities.len()
        && before == retained.before.as_ref()
        && after == retained.after.as_ref();

    if same_shape {
        view.insert(retained.index, retained.entity);
        (view, Restored::AtIndex)
    } else {
        view.push(retained.entity);
        (view, Restored::AtTail)
    }
}

/// Append `child` to the parent's `relation`, skipping if a child with the
/// same key is already there. Returns whether it was appended.
pub fn attach_child(mut parent: Entity, relation: &str, child: Entity) -> (Entity, bool) {
    let children = parent.relations.entry(relation.to_string()).or_default();
    if children.iter().any(|c| c.key == child.key) {
        return (parent, false);
    }
    children.push(child);
    (parent, true)
}

/// Fold a fetched page into a view. With `reset`, confirmed entities are
/// replaced by the page and in-flight placeholders are carried over at the
/// tail; otherwise entities not already present are appended. Clears the
/// refreshing flag and stores the page's continuation token.
pub fn merge_page(
    view: CollectionView,
    page: Vec<Entity>,
    continuation_token: Option<String>,
    reset: bool,
) -> (CollectionView, usize) {
    let (mut next, carried) = if reset {
        let placeholders: Vec<Entity> = view.pending().cloned().collect();
        (CollectionView::default(), placeholders)
    } else {
        (view, Vec::new())
    };

    let mut added = 0;
    for entity in page {
        if next.push(entity) {
            added += 1;
        }
    }
    for placeholder in carried {
        next.push(placeholder);
    }

    next.continuation_token = continuation_token;
    next.is_refreshing = false;
    (next, added)
}
