use async_trait::async_trait;
use thiserror::Error;

use crate::types::Template;

/// Errors surfaced by a delivery gateway.
///
/// The scheduler treats every variant as retryable when it comes from
/// `send`; for `delete` and `pin` they only become cleanup warnings.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The platform rejected the request (bad payload, missing rights, ...).
    #[error("Rejected by platform: {0}")]
    Rejected(String),

    /// Network or transport-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The chat id could not be turned into a platform recipient.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// A stored message id is not a valid platform message id.
    #[error("Invalid message id: {0}")]
    InvalidMessageId(String),

    /// The template uses something the gateway cannot deliver.
    #[error("Unsupported template: {0}")]
    Unsupported(String),

    /// Any other platform error.
    #[error("Platform error: {0}")]
    Platform(String),
}

/// Outbound side of the engine: the remote channel platform.
///
/// Implementations must be `Send + Sync`; the dispatch loop calls them from
/// many worker tasks at once.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Stable lowercase identifier, used in logs (e.g. `"telegram"`).
    fn name(&self) -> &str;

    /// Deliver `template` to `chat_id`, returning the remote message id.
    async fn send(&self, chat_id: &str, template: &Template) -> Result<String, DeliveryError>;

    /// Delete a previously delivered message.
    ///
    /// Deleting a message that is already gone must return `Ok(())`.
    async fn delete(&self, chat_id: &str, message_id: &str) -> Result<(), DeliveryError>;

    /// Pin a delivered message in its chat.
    async fn pin(&self, chat_id: &str, message_id: &str) -> Result<(), DeliveryError>;
}
