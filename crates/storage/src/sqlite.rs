use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use eventboard_core::{CollectionView, Entity, EntityId, EntityKey};

use crate::error::StorageError;
use crate::traits::CacheStore;

/// Cache store persisted to SQLite. Views and entities are stored as
/// MessagePack blobs; every write runs inside one SQLite transaction.
pub struct SqliteCacheStore {
    conn: Connection,
}

impl SqliteCacheStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        debug!("opened sqlite cache at {}", path);
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn read_view(conn: &Connection, name: &str) -> Result<Option<CollectionView>, StorageError> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT view FROM collections WHERE name = ?1",
            rusqlite::params![name],
            |row| row.get(0),
        )
        .optional()?;
    match blob {
        Some(bytes) => Ok(Some(CollectionView::from_msgpack(&bytes)?)),
        None => Ok(None),
    }
}

fn read_all_views(conn: &Connection) -> Result<Vec<(String, CollectionView)>, StorageError> {
    let mut stmt = conn.prepare("SELECT name, view FROM collections")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
    })?;

    let mut views = Vec::new();
    for row in rows {
        let (name, bytes) = row?;
        views.push((name, CollectionView::from_msgpack(&bytes)?));
    }
    Ok(views)
}

fn write_view(conn: &Connection, name: &str, view: &CollectionView) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO collections (name, view) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET view = excluded.view,
             updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)",
        rusqlite::params![name, view.to_msgpack()?],
    )?;
    Ok(())
}

fn write_entity(conn: &Connection, id: &EntityId, entity: &Entity) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO entities (entity_id, record) VALUES (?1, ?2)
         ON CONFLICT(entity_id) DO UPDATE SET record = excluded.record,
             updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)",
        rusqlite::params![id.as_str(), entity.to_msgpack()?],
    )?;
    Ok(())
}

fn read_entity(conn: &Connection, id: &EntityId) -> Result<Option<Entity>, StorageError> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT record FROM entities WHERE entity_id = ?1",
            rusqlite::params![id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    match blob {
        Some(bytes) => Ok(Some(Entity::from_msgpack(&bytes)?)),
        None => Ok(None),
    }
}

/// Write a view and index its confirmed entities. Relations the view's copy
/// lacks are carried over from the indexed record.
fn store_view(conn: &Connection, name: &str, mut view: CollectionView) -> Result<(), StorageError> {
    let ids: Vec<EntityId> = view.entities().iter().filter_map(|e| e.id().cloned()).collect();
    for id in ids {
        let key = EntityKey::Confirmed(id.clone());
        let Some(entity) = view.get(&key).cloned() else {
            continue;
        };
        let entity = match read_entity(conn, &id)? {
            Some(cached) => entity.inherit_relations(&cached),
            None => entity,
        };
        write_entity(conn, &id, &entity)?;
        view.replace(entity);
    }
    write_view(conn, name, &view)
}

impl CacheStore for SqliteCacheStore {
    fn get(&self, collection: &str) -> Result<Option<CollectionView>, StorageError> {
        read_view(&self.conn, collection)
    }

    fn set(&mut self, collection: &str, view: CollectionView) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        store_view(&tx, collection, view)?;
        tx.commit()?;
        Ok(())
    }

    fn evict(&mut self, collection: &str) -> Result<bool, StorageError> {
        let removed = self.conn.execute(
            "DELETE FROM collections WHERE name = ?1",
            rusqlite::params![collection],
        )?;
        Ok(removed > 0)
    }

    fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>, StorageError> {
        read_entity(&self.conn, id)
    }

    fn put_entity(&mut self, entity: Entity) -> Result<(), StorageError> {
        let Some(id) = entity.id().cloned() else {
            return Ok(());
        };
        let tx = self.conn.transaction()?;
        write_entity(&tx, &id, &entity)?;
        // Decodes every cached view. Fine for a handful of list queries; an
        // entity-to-view index would be needed if views grow large.
        for (name, mut view) in read_all_views(&tx)? {
            if view.replace(entity.clone()) {
                write_view(&tx, &name, &view)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn remove_entity(&mut self, id: &EntityId) -> Result<bool, StorageError> {
        let key = EntityKey::Confirmed(id.clone());
        let tx = self.conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM entities WHERE entity_id = ?1",
            rusqlite::params![id.as_str()],
        )?;
        for (name, mut view) in read_all_views(&tx)? {
            if view.remove(&key).is_some() {
                write_view(&tx, &name, &view)?;
            }
        }
        tx.commit()?;
        Ok(removed > 0)
    }

    fn update<F>(&mut self, collection: &str, apply: F) -> Result<bool, StorageError>
    where
        F: FnOnce(CollectionView) -> CollectionView,
    {
        let tx = self.conn.transaction()?;
        let Some(view) = read_view(&tx, collection)? else {
            return Ok(false);
        };
        store_view(&tx, collection, apply(view))?;
        tx.commit()?;
        Ok(true)
    }
}
