//! Per-session key/value storage.
//!
//! Storage is a flat string-to-string map, the same shape as the browser's
//! local storage that the chat widget writes to. Two slots matter:
//!
//! - `chatSessionId`: the session identifier, created once per store.
//! - `chatHistory_<session id>`: the persisted [`ChatHistory`] as JSON.
//!
//! # Backends
//!
//! - [`MemoryStore`]: process-local, for tests and ephemeral sessions
//! - [`FileStore`]: one file per key under a directory
//!
//! # Example
//!
//! ```rust
//! use educador_chat::storage::{MemoryStore, SessionId};
//!
//! let store = MemoryStore::new();
//! let first = SessionId::load_or_create(&store).unwrap();
//! let again = SessionId::load_or_create(&store).unwrap();
//! assert_eq!(first, again);
//! ```

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::ChatMessage;
use crate::error::StorageError;

/// Key holding the session identifier.
pub const SESSION_ID_KEY: &str = "chatSessionId";

/// Prefix of the key holding a session's history.
pub const HISTORY_KEY_PREFIX: &str = "chatHistory_";

/// Synchronous string key/value store.
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Read a value. Missing keys are `Ok(None)`.
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a value. Deleting a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// Opaque identifier of one persisted chat log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh identifier: `session_<unix millis>_<9 chars>`.
    #[must_use]
    pub fn generate() -> Self {
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
        Self(format!("session_{}_{suffix}", Utc::now().timestamp_millis()))
    }

    /// Return the identifier stored in `store`, creating and storing one if
    /// the slot is empty.
    pub fn load_or_create(store: &dyn KeyValueStore) -> Result<Self, StorageError> {
        if let Some(existing) = store.get_item(SESSION_ID_KEY)? {
            if !existing.trim().is_empty() {
                return Ok(Self(existing));
            }
        }

        let id = Self::generate();
        store.set_item(SESSION_ID_KEY, id.as_str())?;
        tracing::debug!(name: "session.id.created", session_id = %id, "Created chat session id");
        Ok(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage key of this session's history.
    #[must_use]
    pub fn history_key(&self) -> String {
        format!("{HISTORY_KEY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Persisted layout of a session's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistory {
    pub messages: Vec<ChatMessage>,
    pub last_updated: DateTime<Utc>,
}

/// Load the persisted log for `session`.
///
/// A missing slot, an empty log and an unreadable payload all yield
/// `Ok(None)`; the latter is logged.
pub fn load_history(
    store: &dyn KeyValueStore,
    session: &SessionId,
) -> Result<Option<Vec<ChatMessage>>, StorageError> {
    let key = session.history_key();
    let Some(raw) = store.get_item(&key)? else {
        return Ok(None);
    };

    match serde_json::from_str::<ChatHistory>(&raw) {
        Ok(history) if history.messages.is_empty() => Ok(None),
        Ok(history) => Ok(Some(history.messages)),
        Err(e) => {
            tracing::warn!(
                name: "session.history.malformed",
                key = %key,
                error = %e,
                "Ignoring unreadable chat history"
            );
            Ok(None)
        }
    }
}

/// Write the full log for `session`, stamping `lastUpdated` with now.
pub fn save_history(
    store: &dyn KeyValueStore,
    session: &SessionId,
    messages: &[ChatMessage],
) -> Result<(), StorageError> {
    let history = ChatHistory {
        messages: messages.to_vec(),
        last_updated: Utc::now(),
    };
    let raw = serde_json::to_string(&history)?;
    store.set_item(&session.history_key(), &raw)
}

/// Delete the persisted log for `session`.
pub fn remove_history(store: &dyn KeyValueStore, session: &SessionId) -> Result<(), StorageError> {
    store.remove_item(&session.history_key())
}
