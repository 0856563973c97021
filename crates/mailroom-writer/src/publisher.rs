//! Downstream change notifications.
//!
//! Every successful write emits one message per downstream consumer (the
//! search indexer, and access control for resources that carry
//! permissions). Publication is strictly best-effort: messages are handed
//! to a worker pool sized to the batch and never delay or fail the write
//! that produced them.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use mailroom_core::{storage::BoxFuture, Result};

/// What happened to the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// Resource came into existence.
    Created,
    /// Mutable fields changed.
    Updated,
    /// Resource removed.
    Deleted,
}

/// Consumer a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTarget {
    /// Search-indexer queue.
    Indexer,
    /// Access-control queue.
    AccessControl,
}

/// One change notification.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeMessage {
    /// Addressed consumer.
    pub target: ChangeTarget,
    /// What happened.
    pub action: ChangeAction,
    /// Resource collection name (`services`, `mailing-lists`, `members`).
    pub resource: &'static str,
    /// UID of the affected entity.
    pub uid: String,
    /// Entity snapshot after the change (empty object for deletes).
    pub body: Value,
}

/// Sink for change notifications.
///
/// Implementations must be cheap to call; slow transports should buffer
/// internally.
pub trait EventPublisher: Send + Sync + 'static {
    /// Delivers one message.
    fn publish(&self, message: ChangeMessage) -> BoxFuture<'_, Result<()>>;
}

/// Publisher that drops every message, for deployments without queues.
#[derive(Debug, Default, Clone)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _message: ChangeMessage) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Fans a batch of messages out to detached worker tasks.
///
/// One task per message; delivery failures are logged and otherwise
/// ignored. Returns as soon as the tasks are spawned so publication never
/// extends the caller's write latency.
pub fn dispatch(publisher: &Arc<dyn EventPublisher>, messages: Vec<ChangeMessage>) {
    for message in messages {
        let publisher = publisher.clone();
        tokio::spawn(async move {
            let resource = message.resource;
            let uid = message.uid.clone();
            if let Err(err) = publisher.publish(message).await {
                warn!(resource, uid, error = %err, "change notification dropped");
            }
        });
    }
}
