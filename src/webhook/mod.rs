//! Outbound contract with the message-processing webhook.
//!
//! The session manager talks to the webhook only through the
//! [`MessageProcessor`] trait; [`WebhookClient`] is the HTTP implementation.
//!
//! # Wire format
//!
//! ```text
//! POST <webhook url>
//! Content-Type: application/json
//!
//! { "message": "...", "metadata": { "module": "...", "ageGroup": "6-8", "timestamp": "..." } }
//! ```
//!
//! A successful answer is a JSON object whose `response` string becomes the
//! assistant reply.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::chat::AgeGroup;
use crate::error::ChatError;

/// Body sent to the webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRequest {
    pub message: String,
    pub metadata: RequestMetadata,
}

/// Context sent alongside each message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    pub module: String,
    pub age_group: AgeGroup,
    pub timestamp: DateTime<Utc>,
}

impl WebhookRequest {
    #[must_use]
    pub fn new(message: impl Into<String>, module: impl Into<String>, age_group: AgeGroup) -> Self {
        Self {
            message: message.into(),
            metadata: RequestMetadata {
                module: module.into(),
                age_group,
                timestamp: Utc::now(),
            },
        }
    }
}

/// Something that turns a user message into an assistant reply.
#[async_trait]
pub trait MessageProcessor: Send + Sync + std::fmt::Debug {
    /// Process one message and return the reply text.
    async fn process(&self, request: &WebhookRequest) -> Result<String, ChatError>;
}

/// Extract the reply from a webhook response body.
///
/// Only `response` is accepted. Some deployments answer with `reply`
/// instead; those bodies are rejected with a warning so the mismatch gets
/// fixed on the workflow side.
pub fn extract_reply(body: &serde_json::Value) -> Result<String, ChatError> {
    match body.get("response").and_then(serde_json::Value::as_str) {
        Some(reply) if !reply.trim().is_empty() => Ok(reply.to_string()),
        Some(_) => Err(ChatError::MissingReply),
        None => {
            if body.get("reply").is_some() {
                tracing::warn!(
                    name: "webhook.reply_field_mismatch",
                    "Webhook answered with `reply`; expected `response`"
                );
            }
            Err(ChatError::MissingReply)
        }
    }
}

/// HTTP client for the webhook.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    url: Url,
    http: reqwest::Client,
}

impl WebhookClient {
    /// Build a client with the given request timeout.
    pub fn new(url: Url, timeout: Duration) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url, http })
    }

    /// Create a client with a custom reqwest client.
    #[must_use]
    pub fn with_client(url: Url, http: reqwest::Client) -> Self {
        Self { url, http }
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl MessageProcessor for WebhookClient {
    async fn process(&self, request: &WebhookRequest) -> Result<String, ChatError> {
        tracing::debug!(
            name: "webhook.request",
            url = %self.url,
            module = %request.metadata.module,
            age_group = %request.metadata.age_group,
            "Posting message to webhook"
        );

        let response = self
            .http
            .post(self.url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let body: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| ChatError::MalformedResponse(e.to_string()))?;
        extract_reply(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_layout() {
        let req = WebhookRequest::new("hola", "matematicas", AgeGroup::ThreeToFive);
        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value["message"], "hola");
        assert_eq!(value["metadata"]["module"], "matematicas");
        assert_eq!(value["metadata"]["ageGroup"], "3-5");
        assert!(value["metadata"]["timestamp"].is_string());
    }

    #[test]
    fn test_extract_reply() {
        assert_eq!(
            extract_reply(&json!({ "response": "¡Claro!" })).unwrap(),
            "¡Claro!"
        );
        assert!(matches!(
            extract_reply(&json!({ "reply": "¡Claro!" })),
            Err(ChatError::MissingReply)
        ));
        assert!(matches!(
            extract_reply(&json!({ "response": 42 })),
            Err(ChatError::MissingReply)
        ));
        assert!(matches!(
            extract_reply(&json!({ "response": "" })),
            Err(ChatError::MissingReply)
        ));
        assert!(matches!(
            extract_reply(&json!({ "response": "  \n " })),
            Err(ChatError::MissingReply)
        ));
        assert!(matches!(
            extract_reply(&json!([])),
            Err(ChatError::MissingReply)
        ));
    }
}
