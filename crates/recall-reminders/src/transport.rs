//! Outbound notification transport.

use async_trait::async_trait;

use crate::{ActionPayload, TransportError};

/// Delivers messages and acknowledges button taps.
///
/// The engine never retries; failures are surfaced to the caller.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Send `text` to `chat_id`, optionally with inline actions.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        actions: Option<&ActionPayload>,
    ) -> Result<(), TransportError>;

    /// Acknowledge a callback, optionally showing `text` to the user.
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError>;
}
