use std::sync::Arc;

use tempfile::TempDir;

use eventboard_core::{CollectionView, Entity, EntityId, Fields};
use eventboard_engine::{Engine, EngineConfig};
use eventboard_storage::{CacheStore, MemoryCacheStore, SqliteCacheStore, StorageError};

use crate::remote::{Route, TestRemote};

pub const EVENTS: &str = "events";
pub const COMMENTS: &str = "comments";
pub const CREATE_EVENT: &str = "createEvent";
pub const DELETE_EVENT: &str = "deleteEvent";
pub const COMMENT_ON_EVENT: &str = "commentOnEvent";
pub const EVENT_COMMENTS_FEED: &str = "subscribeToEventComments";

/// Fields of a new event, all non-empty as the add-event form requires.
pub fn event_fields(name: &str) -> Fields {
    Fields::new()
        .with("name", name)
        .with("when", "Saturday 10am")
        .with("where", "Riverside Park")
        .with("description", format!("{name} for everyone"))
}

pub fn event(id: &str) -> Entity {
    Entity::confirmed(id, event_fields(id))
}

pub fn comment(id: &str, event_id: &str, content: &str) -> Entity {
    Entity::confirmed(
        id,
        Fields::new()
            .with("eventId", event_id)
            .with("content", content),
    )
    .with_parent(event_id)
}

/// Keys of a view as plain strings, for compact assertions.
pub fn keys(view: &CollectionView) -> Vec<String> {
    view.entities().iter().map(|e| e.key.to_string()).collect()
}

/// A remote wired with the event board's mutations and subscription feed.
pub fn events_remote() -> TestRemote {
    let remote = TestRemote::new();
    remote
        .route(
            CREATE_EVENT,
            Route::Create {
                collection: EVENTS.into(),
                id_prefix: "event-".into(),
            },
        )
        .route(
            DELETE_EVENT,
            Route::Delete {
                collection: EVENTS.into(),
            },
        )
        .route(
            COMMENT_ON_EVENT,
            Route::AddChild {
                parent_field: "eventId".into(),
                relation: COMMENTS.into(),
                id_prefix: "comment-".into(),
                feed: EVENT_COMMENTS_FEED.into(),
            },
        );
    remote
}

/// Engine plus a handle on its scripted remote.
pub struct TestClient<S: CacheStore = MemoryCacheStore> {
    pub engine: Arc<Engine<S, TestRemote>>,
    pub remote: TestRemote,
    /// Keeps an on-disk cache alive for the client's lifetime.
    _dir: Option<TempDir>,
}

impl TestClient<MemoryCacheStore> {
    pub fn new() -> Self {
        let remote = events_remote();
        let engine = Engine::new(MemoryCacheStore::new(), remote.clone(), EngineConfig::default());
        Self {
            engine: Arc::new(engine),
            remote,
            _dir: None,
        }
    }
}

impl Default for TestClient<MemoryCacheStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl TestClient<SqliteCacheStore> {
    /// Client whose cache lives in a SQLite file under a temp directory.
    pub fn on_disk() -> Result<Self, Box<dyn std::error::Error>> {
        let config = EngineConfig::default();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(config.database_file());
        let store = SqliteCacheStore::open(&path.to_string_lossy())?;
        let remote = events_remote();
        let engine = Engine::new(store, remote.clone(), config);
        Ok(Self {
            engine: Arc::new(engine),
            remote,
            _dir: Some(dir),
        })
    }
}

impl<S: CacheStore> TestClient<S> {
    /// Put `ids` on the server and in the cached `events` view.
    pub fn seed_events(&self, ids: &[&str]) -> Result<(), StorageError> {
        let events: Vec<Entity> = ids.iter().map(|id| event(id)).collect();
        self.remote.seed(EVENTS, events.clone());
        self.engine
            .with_store(|store| store.set(EVENTS, CollectionView::new(events)))
    }

    pub fn events(&self) -> Option<CollectionView> {
        self.engine.collection(EVENTS)
    }

    pub fn cached(&self, id: &str) -> Option<Entity> {
        self.engine.entity(&EntityId::from(id))
    }

    /// Yield to background reconciliation until `done` holds, giving up
    /// after a bounded number of turns.
    pub async fn settle(&self, done: impl Fn(&Self) -> bool) -> bool {
        for _ in 0..100 {
            if done(self) {
                return true;
            }
            tokio::task::yield_now().await;
        }
        done(self)
    }
}
