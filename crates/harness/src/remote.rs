use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Notify, oneshot};
use tracing::debug;

use eventboard_core::{Entity, EntityId, EntityKey, Fields, LocalId, SubscriptionId};
use eventboard_engine::{Page, PushListener, RemoteError, Transport};

/// What the scripted server does for a mutation name.
#[derive(Debug, Clone)]
pub enum Route {
    /// Assign `<id_prefix><n>` and append to `collection`.
    Create { collection: String, id_prefix: String },
    /// Remove the entity named by the `id` field from `collection`.
    Delete { collection: String },
    /// Create a child of the entity named by `parent_field`, add it to the
    /// parent's `relation` and push it to subscribers of `feed`.
    AddChild {
        parent_field: String,
        relation: String,
        id_prefix: String,
        feed: String,
    },
    /// Accept the mutation but answer without assigning a remote id.
    Unidentified,
}

type SharedListener = Arc<dyn Fn(Result<Entity, RemoteError>) + Send + Sync>;

struct Subscriber {
    feed: String,
    args: Fields,
    listener: SharedListener,
}

impl Subscriber {
    fn matches(&self, feed: &str, entity: &Entity) -> bool {
        self.feed == feed && self.args.iter().all(|(k, v)| entity.fields.get(k) == Some(v))
    }
}

struct HeldMutation {
    operation: String,
    fields: Fields,
    reply: oneshot::Sender<Result<Entity, RemoteError>>,
}

#[derive(Default)]
struct RemoteState {
    routes: HashMap<String, Route>,
    collections: BTreeMap<String, Vec<Entity>>,
    next_id: u64,
    failures: HashMap<String, VecDeque<RemoteError>>,
    subscribe_failure: Option<RemoteError>,
    stalled_pages: HashSet<String>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    hold: bool,
    held: Vec<HeldMutation>,
    calls: Vec<String>,
}

impl RemoteState {
    fn find(&self, id: &EntityId) -> Option<&Entity> {
        let key = EntityKey::Confirmed(id.clone());
        self.collections.values().flatten().find(|e| e.key == key)
    }

    fn find_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        let key = EntityKey::Confirmed(id.clone());
        self.collections.values_mut().flatten().find(|e| e.key == key)
    }

    fn mint(&mut self, prefix: &str) -> EntityId {
        self.next_id += 1;
        EntityId::new(format!("{prefix}{}", self.next_id))
    }

    /// Run a mutation against server state. Returns the result plus any
    /// pushes to deliver once the state lock is released.
    fn apply(
        &mut self,
        operation: &str,
        fields: &Fields,
    ) -> (Result<Entity, RemoteError>, Vec<(SharedListener, Entity)>) {
        let rejected = |reason: &str| RemoteError::Rejected {
            operation: operation.to_string(),
            reason: reason.to_string(),
        };
        let Some(route) = self.routes.get(operation).cloned() else {
            return (Err(rejected("unknown operation")), Vec::new());
        };

        match route {
            Route::Create {
                collection,
                id_prefix,
            } => {
                let id = self.mint(&id_prefix);
                let entity = Entity::confirmed(id, fields.clone());
                self.collections
                    .entry(collection)
                    .or_default()
                    .push(entity.clone());
                (Ok(entity), Vec::new())
            }
            Route::Delete { collection } => {
                let Some(id) = fields.text("id").map(EntityId::from) else {
                    return (Err(rejected("missing id")), Vec::new());
                };
                let key = EntityKey::Confirmed(id);
                let items = self.collections.entry(collection).or_default();
                match items.iter().position(|e| e.key == key) {
                    Some(index) => (Ok(items.remove(index)), Vec::new()),
                    None => (Err(rejected("no such entity")), Vec::new()),
                }
            }
            Route::AddChild {
                parent_field,
                relation,
                id_prefix,
                feed,
            } => {
                let Some(parent_id) = fields.text(&parent_field).map(EntityId::from) else {
                    return (Err(rejected("missing parent")), Vec::new());
                };
                if self.find(&parent_id).is_none() {
                    return (Err(rejected("no such parent")), Vec::new());
                }
                let id = self.mint(&id_prefix);
                let child = Entity::confirmed(id, fields.clone()).with_parent(parent_id.clone());
                if let Some(parent) = self.find_mut(&parent_id) {
                    parent
                        .relations
                        .entry(relation)
                        .or_default()
                        .push(child.clone());
                }
                let pushes = self
                    .subscribers
                    .values()
                    .filter(|s| s.matches(&feed, &child))
                    .map(|s| (s.listener.clone(), child.clone()))
                    .collect();
                (Ok(child), pushes)
            }
            Route::Unidentified => (
                Ok(Entity::pending(LocalId::new("unassigned"), fields.clone())),
                Vec::new(),
            ),
        }
    }
}

/// Scripted in-memory server. Clones share state, so a test can keep one
/// handle while the engine owns another.
#[derive(Clone, Default)]
pub struct TestRemote {
    state: Arc<Mutex<RemoteState>>,
    held_changed: Arc<Notify>,
}

impl TestRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn route(&self, operation: &str, route: Route) -> &Self {
        self.state().routes.insert(operation.to_string(), route);
        self
    }

    /// Replace the server-side contents of `collection`.
    pub fn seed(&self, collection: &str, entities: Vec<Entity>) {
        self.state().collections.insert(collection.to_string(), entities);
    }

    pub fn server_collection(&self, collection: &str) -> Vec<Entity> {
        self.state()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn server_entity(&self, id: &EntityId) -> Option<Entity> {
        self.state().find(id).cloned()
    }

    /// Make the next mutation named `operation` (or the next page fetch of
    /// the collection with that name) fail with `error`. Queues stack.
    pub fn fail_next(&self, operation: &str, error: RemoteError) {
        self.state()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Make the next page fetch of `collection` never answer.
    pub fn stall_next_page(&self, collection: &str) {
        self.state().stalled_pages.insert(collection.to_string());
    }

    pub fn fail_subscriptions(&self, error: RemoteError) {
        self.state().subscribe_failure = Some(error);
    }

    /// Park every subsequent mutation until [`TestRemote::release`] is called.
    pub fn hold_mutations(&self) {
        self.state().hold = true;
    }

    pub fn held_count(&self) -> usize {
        self.state().held.len()
    }

    pub async fn wait_for_held(&self, count: usize) {
        loop {
            if self.held_count() >= count {
                return;
            }
            self.held_changed.notified().await;
        }
    }

    /// Answer the parked mutation at `index` (in arrival order). `Some(error)`
    /// fails it; `None` executes it against server state.
    pub fn release(&self, index: usize, failure: Option<RemoteError>) {
        let held = {
            let mut state = self.state();
            if index >= state.held.len() {
                return;
            }
            state.held.remove(index)
        };
        let result = match failure {
            Some(error) => Err(error),
            None => self.execute(&held.operation, &held.fields),
        };
        if held.reply.send(result).is_err() {
            debug!("caller of held {} went away", held.operation);
        }
    }

    /// Deliver a pushed entity to every subscriber of `feed` whose arguments
    /// match its fields.
    pub fn push(&self, feed: &str, entity: Entity) -> usize {
        let listeners: Vec<SharedListener> = self
            .state()
            .subscribers
            .values()
            .filter(|s| s.matches(feed, &entity))
            .map(|s| s.listener.clone())
            .collect();
        for listener in &listeners {
            listener(Ok(entity.clone()));
        }
        listeners.len()
    }

    pub fn push_error(&self, feed: &str, error: RemoteError) {
        let listeners: Vec<SharedListener> = self
            .state()
            .subscribers
            .values()
            .filter(|s| s.feed == feed)
            .map(|s| s.listener.clone())
            .collect();
        for listener in listeners {
            listener(Err(error.clone()));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }

    /// Mutation names in the order they reached the server.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn execute(&self, operation: &str, fields: &Fields) -> Result<Entity, RemoteError> {
        let (result, pushes) = self.state().apply(operation, fields);
        for (listener, entity) in pushes {
            listener(Ok(entity));
        }
        result
    }
}

#[async_trait]
impl Transport for TestRemote {
    async fn mutate(&self, operation: &str, fields: &Fields) -> Result<Entity, RemoteError> {
        let parked = {
            let mut state = self.state();
            state.calls.push(operation.to_string());
            if let Some(error) = state
                .failures
                .get_mut(operation)
                .and_then(VecDeque::pop_front)
            {
                return Err(error);
            }
            if state.hold {
                let (reply, parked) = oneshot::channel();
                state.held.push(HeldMutation {
                    operation: operation.to_string(),
                    fields: fields.clone(),
                    reply,
                });
                Some(parked)
            } else {
                None
            }
        };

        match parked {
            Some(parked) => {
                self.held_changed.notify_one();
                parked
                    .await
                    .map_err(|_| RemoteError::Unavailable("held mutation dropped".into()))?
            }
            None => self.execute(operation, fields),
        }
    }

    async fn fetch_page(
        &self,
        collection: &str,
        limit: usize,
        continuation: Option<&str>,
    ) -> Result<Page, RemoteError> {
        let offset = match continuation {
            None => 0,
            Some(token) => token
                .strip_prefix("offset:")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| RemoteError::Rejected {
                    operation: format!("list {collection}"),
                    reason: format!("bad continuation token {token}"),
                })?,
        };
        if let Some(error) = self
            .state()
            .failures
            .get_mut(collection)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        let stalled = self.state().stalled_pages.remove(collection);
        if stalled {
            std::future::pending::<()>().await;
        }

        let items = self.server_collection(collection);
        let end = (offset + limit).min(items.len());
        let entities = items.get(offset..end).map(<[Entity]>::to_vec).unwrap_or_default();
        let continuation_token = (end < items.len()).then(|| format!("offset:{end}"));
        Ok(Page {
            entities,
            continuation_token,
        })
    }

    async fn fetch_entity(&self, id: &EntityId) -> Result<Option<Entity>, RemoteError> {
        Ok(self.server_entity(id))
    }

    async fn subscribe(
        &self,
        feed: &str,
        args: &Fields,
        on_event: PushListener,
    ) -> Result<SubscriptionId, RemoteError> {
        let mut state = self.state();
        if let Some(error) = state.subscribe_failure.clone() {
            return Err(error);
        }
        let id = SubscriptionId::new();
        state.subscribers.insert(
            id,
            Subscriber {
                feed: feed.to_string(),
                args: args.clone(),
                listener: Arc::from(on_event),
            },
        );
        Ok(id)
    }

    fn cancel(&self, subscription: SubscriptionId) {
        self.state().subscribers.remove(&subscription);
    }
}

