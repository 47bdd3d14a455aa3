//! Chat message model.
//!
//! These are the records kept in a session's log and written to session
//! storage. Field names follow the camelCase layout the widget persists, so
//! histories written by either side stay readable.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Greeting seeded into an empty log.
#[must_use]
pub fn greeting_for(module: &str) -> String {
    format!(
        "¡Hola! Soy tu asistente de aprendizaje. Estoy aquí para ayudarte con el módulo de {module}. ¿En qué puedo ayudarte hoy?"
    )
}

/// Apology appended when a request to the webhook fails.
pub const APOLOGY_MESSAGE: &str =
    "Lo siento, ha ocurrido un error al procesar tu mensaje. Por favor, inténtalo de nuevo más tarde.";

/// Audience band used to tailor content and greetings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeGroup {
    #[serde(rename = "3-5")]
    ThreeToFive,
    #[default]
    #[serde(rename = "6-8")]
    SixToEight,
    #[serde(rename = "9-12")]
    NineToTwelve,
}

impl AgeGroup {
    /// All bands, youngest first.
    pub const ALL: [AgeGroup; 3] = [Self::ThreeToFive, Self::SixToEight, Self::NineToTwelve];

    /// Wire identifier (`3-5`, `6-8`, `9-12`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ThreeToFive => "3-5",
            Self::SixToEight => "6-8",
            Self::NineToTwelve => "9-12",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::ThreeToFive => "3-5 años",
            Self::SixToEight => "6-8 años",
            Self::NineToTwelve => "9-12 años",
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a recognized age group.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown age group `{0}` (expected 3-5, 6-8 or 9-12)")]
pub struct UnknownAgeGroup(pub String);

impl FromStr for AgeGroup {
    type Err = UnknownAgeGroup;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|group| group.as_str() == s.trim())
            .ok_or_else(|| UnknownAgeGroup(s.to_string()))
    }
}

/// Role of the message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// Optional context attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Topic namespace the message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_group: Option<AgeGroup>,
    /// Set on synthesized failure replies.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    /// Send time, recorded on user messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Any other keys, preserved as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MessageMetadata {
    /// Metadata carrying the chat context.
    #[must_use]
    pub fn context(module: impl Into<String>, age_group: AgeGroup) -> Self {
        Self {
            module: Some(module.into()),
            age_group: Some(age_group),
            ..Self::default()
        }
    }

    /// Mark as a synthesized failure reply.
    #[must_use]
    pub fn with_error(mut self) -> Self {
        self.is_error = true;
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A single entry in a chat log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl ChatMessage {
    /// Create a message with a fresh id and the current time.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// The greeting that opens a fresh log.
    #[must_use]
    pub fn greeting(module: &str, age_group: AgeGroup) -> Self {
        Self::assistant(greeting_for(module))
            .with_metadata(MessageMetadata::context(module, age_group))
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Whether this is a synthesized failure reply.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.metadata.as_ref().is_some_and(|m| m.is_error)
    }
}
