//! Chat session management.
//!
//! A [`ChatSession`] owns the ordered message log of one chat widget,
//! persists it to session storage after every append, and performs the
//! request/response cycle with the message-processing webhook.
//!
//! # Architecture
//!
//! - [`ChatSession`]: the log, loading state and last error
//! - [`SessionContext`]: session id, storage and processor, passed in
//!   explicitly so sessions can be tested in isolation
//! - [`ChatSettings`]: retention cap and reply ordering
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use educador_chat::chat::AgeGroup;
//! use educador_chat::session::{ChatSession, ChatSettings, SessionContext};
//! use educador_chat::storage::{MemoryStore, SessionId};
//! use educador_chat::webhook::WebhookClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let url = "http://localhost:5678/webhook/chat".parse()?;
//! let ctx = SessionContext {
//!     session_id: SessionId::load_or_create(&*store)?,
//!     store,
//!     processor: Arc::new(WebhookClient::new(url, Duration::from_secs(10))?),
//!     settings: ChatSettings::default(),
//! };
//!
//! let session = ChatSession::initialize(ctx, "ciencia", AgeGroup::SixToEight);
//! session.send_message("¿Cómo respiran los peces?", None).await;
//! for message in session.messages() {
//!     println!("{:?}: {}", message.role, message.content);
//! }
//! # Ok(())
//! # }
//! ```

mod manager;

pub use manager::{
    ChatSession, ChatSettings, DEFAULT_MAX_MESSAGES, DeliveryOrder, SendOutcome, SessionContext,
};
