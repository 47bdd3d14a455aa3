//! Agente Educador chat
//!
//! Session manager for the learning assistant's chat widget: keeps the
//! ordered message log of one (module, age group) conversation, persists it
//! per session, and forwards user messages to the message-processing
//! webhook.
//!
//! # Modules
//!
//! - [`chat`]: Message model and age groups
//! - [`config`]: Layered configuration (defaults, YAML, env, CLI)
//! - [`error`]: Error taxonomy
//! - [`session`]: The chat session manager
//! - [`storage`]: Per-session key/value storage and persisted history
//! - [`webhook`]: Outbound webhook contract and HTTP client

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]

pub mod chat;
pub mod config;
pub mod error;
pub mod session;
pub mod storage;
pub mod webhook;

pub use chat::{AgeGroup, ChatMessage, MessageMetadata, MessageRole};
pub use error::{ChatError, ConfigError, StorageError};
pub use session::{ChatSession, SendOutcome, SessionContext};
