use async_trait::async_trait;
use thiserror::Error;

use eventboard_core::{Entity, EntityId, Fields, SubscriptionId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("{operation} rejected: {reason}")]
    Rejected { operation: String, reason: String },

    #[error("{operation} answered with an unusable entity: {reason}")]
    InvalidResponse { operation: String, reason: String },

    #[error("subscription stream closed")]
    StreamClosed,
}

/// One page of a list query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub entities: Vec<Entity>,
    pub continuation_token: Option<String>,
}

/// Receives every event of a live subscription, including stream-level errors.
pub type PushListener = Box<dyn Fn(Result<Entity, RemoteError>) + Send + Sync>;

/// Remote side of the engine. Retries and timeouts, if any, live here.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn mutate(&self, operation: &str, fields: &Fields) -> Result<Entity, RemoteError>;

    async fn fetch_page(
        &self,
        collection: &str,
        limit: usize,
        continuation: Option<&str>,
    ) -> Result<Page, RemoteError>;

    async fn fetch_entity(&self, id: &EntityId) -> Result<Option<Entity>, RemoteError>;

    async fn subscribe(
        &self,
        feed: &str,
        args: &Fields,
        on_event: PushListener,
    ) -> Result<SubscriptionId, RemoteError>;

    /// Stop a live subscription. Unknown ids are ignored.
    fn cancel(&self, subscription: SubscriptionId);
}
