//! Telegram Bot API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use recall_reminders::{ActionPayload, NotificationTransport, TransportError};

use crate::TelegramError;
use crate::types::{
    AnswerCallbackQueryRequest, ApiResponse, GetUpdatesRequest, Message, SendMessageRequest,
    Update,
};

/// Public Bot API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Extra time allowed on top of a long-poll timeout before the HTTP request gives up.
const LONG_POLL_GRACE_SECS: u64 = 10;

/// Client for the Telegram Bot API.
pub struct TelegramClient {
    http: Client,
    api_url: String,
    token: String,
}

impl TelegramClient {
    /// Create a client against the public Bot API.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_url(token, DEFAULT_API_URL)
    }

    /// Create a client against a custom API root (local Bot API server, tests).
    pub fn with_api_url(token: impl Into<String>, api_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    /// Send a text message, optionally with an inline keyboard.
    #[tracing::instrument(skip(self, text, reply_markup))]
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<&ActionPayload>,
    ) -> Result<Message, TelegramError> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "HTML",
            disable_notification: false,
            reply_markup,
        };
        self.call("sendMessage", &request, None).await
    }

    /// Acknowledge an inline button tap.
    #[tracing::instrument(skip(self))]
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<bool, TelegramError> {
        let request = AnswerCallbackQueryRequest {
            callback_query_id,
            text,
        };
        self.call("answerCallbackQuery", &request, None).await
    }

    /// Long-poll for callback queries.
    ///
    /// `offset` should be one past the last seen `update_id`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        let request = GetUpdatesRequest {
            offset,
            timeout: timeout_secs,
            allowed_updates: &["callback_query"],
        };
        let timeout = Duration::from_secs(timeout_secs + LONG_POLL_GRACE_SECS);
        self.call("getUpdates", &request, Some(timeout)).await
    }

    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<T, TelegramError> {
        let mut request = self.http.post(self.method_url(method)).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        // Error text would otherwise carry the URL, and with it the bot token
        let response = request
            .send()
            .await
            .map_err(|e| TelegramError::Http(e.without_url()))?;
        let result = self.handle_response(response).await;

        match &result {
            Ok(_) => debug!(method, "Bot API call succeeded"),
            Err(e) => warn!(method, error = %e, "Bot API call failed"),
        }
        result
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, TelegramError> {
        let status = response.status();
        let header_retry_after: Option<u64> = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());

        let text = response.text().await.map_err(|e| {
            TelegramError::InvalidResponse(format!(
                "request failed ({}): failed to read response: {}",
                status,
                e.without_url()
            ))
        })?;

        let parsed: Result<ApiResponse<T>, _> = serde_json::from_str(&text);

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body_retry_after = parsed
                .as_ref()
                .ok()
                .and_then(|r| r.parameters.as_ref())
                .and_then(|p| p.retry_after);
            return Err(TelegramError::RateLimited {
                retry_after_secs: body_retry_after.or(header_retry_after),
            });
        }

        let envelope = match parsed {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => {
                return Err(TelegramError::InvalidResponse(format!(
                    "request failed ({}): {}",
                    status, text
                )));
            }
        };

        if !envelope.ok {
            return Err(TelegramError::Api {
                code: envelope.error_code.unwrap_or(i64::from(status.as_u16())),
                description: envelope
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            });
        }

        envelope
            .result
            .ok_or_else(|| TelegramError::InvalidResponse("missing result".to_string()))
    }
}

#[async_trait]
impl NotificationTransport for TelegramClient {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        actions: Option<&ActionPayload>,
    ) -> Result<(), TransportError> {
        TelegramClient::send_message(self, chat_id, text, actions).await?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        self.answer_callback_query(callback_id, text).await?;
        Ok(())
    }
}
