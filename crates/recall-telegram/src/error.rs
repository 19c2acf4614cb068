//! Error types for the Telegram client.

use thiserror::Error;

/// Errors that can occur when talking to the Bot API.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The API answered with `"ok": false`.
    #[error("Telegram API error {code}: {description}")]
    Api { code: i64, description: String },

    /// Too many requests.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited { retry_after_secs: Option<u64> },

    /// Response did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
