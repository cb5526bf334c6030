pub mod client;
pub mod fetched_message;

use async_trait::async_trait;

use crate::error::AppResult;
use fetched_message::FetchedMessage;

/// Read side of a user's mailbox. The live implementation talks to the
/// Gmail REST API; tests substitute an in-memory one.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Unread messages not yet carrying the processed label, oldest first.
    async fn fetch_unprocessed(&self, max_results: u32) -> AppResult<Vec<FetchedMessage>>;

    /// Marks the message as handled on the remote side so later fetches
    /// skip it.
    async fn mark_processed(&self, message_id: &str) -> AppResult<()>;
}
