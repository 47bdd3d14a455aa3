//! Chat session: message log, persistence and the webhook round trip.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::chat::{APOLOGY_MESSAGE, AgeGroup, ChatMessage, MessageMetadata};
use crate::error::ChatError;
use crate::storage::{self, KeyValueStore, SessionId};
use crate::webhook::{MessageProcessor, WebhookRequest};

/// Default cap on retained messages.
pub const DEFAULT_MAX_MESSAGES: usize = 100;

/// Order in which replies to concurrent sends enter the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOrder {
    /// Replies are appended as soon as they arrive.
    #[default]
    Arrival,
    /// Replies are held until every earlier send has settled, so they
    /// enter the log in the order their messages were sent.
    SendOrder,
}

/// Tunables for a chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    /// Oldest messages are dropped beyond this count. `None` keeps all.
    pub max_messages: Option<usize>,
    pub delivery_order: DeliveryOrder,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_messages: Some(DEFAULT_MAX_MESSAGES),
            delivery_order: DeliveryOrder::default(),
        }
    }
}

/// Everything a session needs from its surroundings.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub store: Arc<dyn KeyValueStore>,
    pub processor: Arc<dyn MessageProcessor>,
    pub settings: ChatSettings,
}

/// Result of a [`ChatSession::send_message`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Input was blank; nothing happened.
    Skipped,
    /// The webhook replied and the reply is in the log.
    Replied,
    /// The request failed and an apology is in the log.
    Failed,
    /// The reply (or apology) is held behind an earlier send and will be
    /// appended once that send settles. Only under [`DeliveryOrder::SendOrder`].
    Queued,
    /// The session was closed or cleared before the reply landed.
    Discarded,
}

/// A single chat widget's conversation.
///
/// Cloning is cheap and yields a handle to the same session, so a send can
/// run on another task while the caller keeps observing state.
#[derive(Debug, Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    id: SessionId,
    store: Arc<dyn KeyValueStore>,
    processor: Arc<dyn MessageProcessor>,
    settings: ChatSettings,
    state: RwLock<SessionState>,
    /// Cancelled when the session is closed.
    lifetime: CancellationToken,
}

#[derive(Debug)]
struct SessionState {
    messages: Vec<ChatMessage>,
    module: String,
    age_group: AgeGroup,
    last_error: Option<Arc<ChatError>>,
    in_flight: usize,
    /// Bumped by every clear; replies from older generations are dropped.
    generation: u64,
    next_seq: u64,
    next_delivery: u64,
    /// Replies waiting for earlier sends to settle. `None` marks a send
    /// that settled without a reply.
    pending: BTreeMap<u64, Option<ChatMessage>>,
}

impl ChatSession {
    /// Restore the persisted log for the context's session, or start a new
    /// one with a greeting for `module`.
    pub fn initialize(ctx: SessionContext, module: impl Into<String>, age_group: AgeGroup) -> Self {
        let module = module.into();
        let restored = match storage::load_history(ctx.store.as_ref(), &ctx.session_id) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(
                    name: "session.history.load_failed",
                    session_id = %ctx.session_id,
                    error = %e,
                    "Failed to load chat history"
                );
                None
            }
        };

        let mut messages = match restored {
            Some(messages) => {
                tracing::info!(
                    name: "session.restored",
                    session_id = %ctx.session_id,
                    count = messages.len(),
                    "Restored chat history"
                );
                messages
            }
            None => vec![ChatMessage::greeting(&module, age_group)],
        };
        trim_to(&mut messages, ctx.settings.max_messages);

        Self {
            inner: Arc::new(SessionInner {
                id: ctx.session_id,
                store: ctx.store,
                processor: ctx.processor,
                settings: ctx.settings,
                state: RwLock::new(SessionState {
                    messages,
                    module,
                    age_group,
                    last_error: None,
                    in_flight: 0,
                    generation: 0,
                    next_seq: 0,
                    next_delivery: 0,
                    pending: BTreeMap::new(),
                }),
                lifetime: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Snapshot of the log in insertion order.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.read().messages.clone()
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.read().messages.len()
    }

    /// Whether any send is awaiting its reply.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.read().in_flight > 0
    }

    /// The error behind the most recent failed send, if not yet cleared.
    #[must_use]
    pub fn last_error(&self) -> Option<Arc<ChatError>> {
        self.read().last_error.clone()
    }

    #[must_use]
    pub fn module(&self) -> String {
        self.read().module.clone()
    }

    #[must_use]
    pub fn age_group(&self) -> AgeGroup {
        self.read().age_group
    }

    /// Switch the default module for later sends and greetings.
    pub fn set_module(&self, module: impl Into<String>) {
        self.write().module = module.into();
    }

    pub fn set_age_group(&self, age_group: AgeGroup) {
        self.write().age_group = age_group;
    }

    /// Stop accepting replies. In-flight requests are abandoned and nothing
    /// they return touches the log.
    pub fn close(&self) {
        self.inner.lifetime.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lifetime.is_cancelled()
    }

    /// Reset the log to a fresh greeting and delete the persisted copy.
    pub fn clear_messages(&self) {
        let mut state = self.write();
        let greeting = ChatMessage::greeting(&state.module, state.age_group);
        state.messages = vec![greeting];
        state.last_error = None;
        state.generation += 1;
        state.pending.clear();
        state.next_delivery = state.next_seq;

        if let Err(e) = storage::remove_history(self.inner.store.as_ref(), &self.inner.id) {
            tracing::warn!(
                name: "session.history.remove_failed",
                session_id = %self.inner.id,
                error = %e,
                "Failed to remove chat history"
            );
        }
        drop(state);
        tracing::info!(name: "session.cleared", session_id = %self.inner.id, "Chat history cleared");
    }

    /// Send `content` to the webhook and record the exchange.
    ///
    /// Blank input is ignored. Otherwise the user message is appended before
    /// the request is issued, and exactly one reply (or apology) follows
    /// unless the session is closed or cleared in the meantime.
    pub async fn send_message(&self, content: &str, module: Option<&str>) -> SendOutcome {
        let content = content.trim();
        if content.is_empty() {
            return SendOutcome::Skipped;
        }

        let (request, reply_metadata, mut flight) = {
            let mut state = self.write();
            if self.is_closed() {
                return SendOutcome::Discarded;
            }
            let module = module.map_or_else(|| state.module.clone(), str::to_string);
            let age_group = state.age_group;
            let request = WebhookRequest::new(content, module.clone(), age_group);

            let user = ChatMessage::user(content).with_metadata(
                MessageMetadata::context(module.clone(), age_group)
                    .with_timestamp(request.metadata.timestamp),
            );
            self.append(&mut state, user);

            state.in_flight += 1;
            state.last_error = None;
            let seq = state.next_seq;
            state.next_seq += 1;
            let flight = InFlight {
                session: self,
                seq,
                generation: state.generation,
                settled: false,
            };
            (request, MessageMetadata::context(module, age_group), flight)
        };

        tracing::info!(
            name: "session.send",
            session_id = %self.inner.id,
            seq = flight.seq,
            module = %request.metadata.module,
            "Sending chat message"
        );

        let result = tokio::select! {
            () = self.inner.lifetime.cancelled() => Err(ChatError::Cancelled),
            result = self.inner.processor.process(&request) => result,
        };

        match result {
            Ok(reply) => {
                let message = ChatMessage::assistant(reply).with_metadata(reply_metadata);
                flight.settle(Some(message), None).outcome(SendOutcome::Replied)
            }
            Err(ChatError::Cancelled) => {
                flight.settle(None, None);
                SendOutcome::Discarded
            }
            Err(e) => {
                tracing::error!(
                    name: "session.send.failed",
                    session_id = %self.inner.id,
                    seq = flight.seq,
                    error = %e,
                    "Chat message failed"
                );
                let apology = ChatMessage::assistant(APOLOGY_MESSAGE)
                    .with_metadata(reply_metadata.with_error());
                flight.settle(Some(apology), Some(e)).outcome(SendOutcome::Failed)
            }
        }
    }

    /// Push a message, enforce the cap and persist the whole log.
    fn append(&self, state: &mut SessionState, message: ChatMessage) {
        state.messages.push(message);
        trim_to(&mut state.messages, self.inner.settings.max_messages);

        let saved =
            storage::save_history(self.inner.store.as_ref(), &self.inner.id, &state.messages);
        if let Err(e) = saved {
            tracing::warn!(
                name: "session.history.save_failed",
                session_id = %self.inner.id,
                error = %e,
                "Failed to save chat history"
            );
        }
    }

    /// Append buffered replies whose turn has come.
    fn flush_pending(&self, state: &mut SessionState) {
        while let Some(ready) = state.pending.remove(&state.next_delivery) {
            state.next_delivery += 1;
            if let Some(message) = ready {
                self.append(state, message);
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn trim_to(messages: &mut Vec<ChatMessage>, max: Option<usize>) {
    if let Some(max) = max {
        if messages.len() > max {
            let excess = messages.len() - max;
            messages.drain(..excess);
        }
    }
}

/// What happened to a settled send's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Appended,
    Buffered,
    Dropped,
}

impl Delivery {
    fn outcome(self, appended: SendOutcome) -> SendOutcome {
        match self {
            Self::Appended => appended,
            Self::Buffered => SendOutcome::Queued,
            Self::Dropped => SendOutcome::Discarded,
        }
    }
}

/// One outstanding send. Settling it (explicitly, or by drop when the send
/// future is abandoned) releases the loading flag exactly once.
struct InFlight<'a> {
    session: &'a ChatSession,
    seq: u64,
    generation: u64,
    settled: bool,
}

impl InFlight<'_> {
    /// Release the loading flag and hand the reply to the log.
    fn settle(&mut self, reply: Option<ChatMessage>, error: Option<ChatError>) -> Delivery {
        if self.settled {
            return Delivery::Dropped;
        }
        self.settled = true;

        let session = self.session;
        let mut state = session.write();
        state.in_flight = state.in_flight.saturating_sub(1);

        if session.is_closed() || state.generation != self.generation {
            return Delivery::Dropped;
        }
        if reply.is_none() {
            // Fill the sequence slot so later replies are not held back.
            if session.inner.settings.delivery_order == DeliveryOrder::SendOrder {
                state.pending.insert(self.seq, None);
                session.flush_pending(&mut state);
            }
            return Delivery::Dropped;
        }
        if let Some(e) = error {
            state.last_error = Some(Arc::new(e));
        }

        match session.inner.settings.delivery_order {
            DeliveryOrder::Arrival => {
                if let Some(message) = reply {
                    session.append(&mut state, message);
                }
                Delivery::Appended
            }
            DeliveryOrder::SendOrder => {
                state.pending.insert(self.seq, reply);
                session.flush_pending(&mut state);
                if state.next_delivery > self.seq {
                    Delivery::Appended
                } else {
                    Delivery::Buffered
                }
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.settle(None, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::MessageRole;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl MessageProcessor for Echo {
        async fn process(&self, request: &WebhookRequest) -> Result<String, ChatError> {
            Ok(format!("eco: {}", request.message))
        }
    }

    #[derive(Debug)]
    struct Broken;

    #[async_trait]
    impl MessageProcessor for Broken {
        async fn process(&self, _request: &WebhookRequest) -> Result<String, ChatError> {
            Err(ChatError::Status {
                status: 502,
                body: "bad gateway".into(),
            })
        }
    }

    fn context(store: &MemoryStore, processor: Arc<dyn MessageProcessor>) -> SessionContext {
        SessionContext {
            session_id: SessionId::from("test-session"),
            store: Arc::new(store.clone()),
            processor,
            settings: ChatSettings::default(),
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = MemoryStore::new();
        let session = ChatSession::initialize(
            context(&store, Arc::new(Echo)),
            "ciencia",
            AgeGroup::NineToTwelve,
        );

        assert_eq!(session.message_count(), 1);
        assert!(session.messages()[0].content.contains("ciencia"));

        let outcome = session.send_message("  ¿Por qué el cielo es azul?  ", None).await;
        assert_eq!(outcome, SendOutcome::Replied);
        assert!(!session.is_loading());

        let messages = session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, MessageRole::User);
        assert_eq!(messages[1].content, "¿Por qué el cielo es azul?");
        assert_eq!(messages[2].role, MessageRole::Assistant);
        assert_eq!(messages[2].content, "eco: ¿Por qué el cielo es azul?");

        let metadata = messages[1].metadata.as_ref().unwrap();
        assert_eq!(metadata.module.as_deref(), Some("ciencia"));
        assert_eq!(metadata.age_group, Some(AgeGroup::NineToTwelve));
        assert!(metadata.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_module_override_is_per_message() {
        let store = MemoryStore::new();
        let session = ChatSession::initialize(
            context(&store, Arc::new(Echo)),
            "general",
            AgeGroup::SixToEight,
        );

        session.send_message("hola", Some("historia")).await;
        let messages = session.messages();
        for message in &messages[1..] {
            let metadata = message.metadata.as_ref().unwrap();
            assert_eq!(metadata.module.as_deref(), Some("historia"));
        }
        assert_eq!(session.module(), "general");
    }

    #[tokio::test]
    async fn test_failure_records_error() {
        let store = MemoryStore::new();
        let session = ChatSession::initialize(
            context(&store, Arc::new(Broken)),
            "general",
            AgeGroup::SixToEight,
        );

        let outcome = session.send_message("hola", None).await;
        assert_eq!(outcome, SendOutcome::Failed);
        assert!(!session.is_loading());

        let last = session.messages().pop().unwrap();
        assert!(last.is_error());
        assert_eq!(last.content, APOLOGY_MESSAGE);
        assert!(matches!(
            session.last_error().as_deref(),
            Some(ChatError::Status { status: 502, .. })
        ));

        session.clear_messages();
        assert!(session.last_error().is_none());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_sends() {
        let store = MemoryStore::new();
        let session = ChatSession::initialize(
            context(&store, Arc::new(Echo)),
            "general",
            AgeGroup::SixToEight,
        );

        session.close();
        assert_eq!(session.send_message("hola", None).await, SendOutcome::Discarded);
        assert_eq!(session.message_count(), 1);
        assert!(!session.is_loading());
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_history_starts_fresh() {
        let store = MemoryStore::new();
        let id = SessionId::from("test-session");
        store.set_item(&id.history_key(), "{\"messages\": [oops").unwrap();

        let session = ChatSession::initialize(
            context(&store, Arc::new(Echo)),
            "arte",
            AgeGroup::ThreeToFive,
        );

        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::Assistant);
        assert!(messages[0].content.contains("arte"));
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn test_queued_reply_is_appended_when_earlier_send_settles() {
        let store = MemoryStore::new();
        let mut ctx = context(&store, Arc::new(Echo));
        ctx.settings.delivery_order = DeliveryOrder::SendOrder;
        let session = ChatSession::initialize(ctx, "general", AgeGroup::SixToEight);

        // Hold sequence slot 0 open the way a pending send would.
        let mut earlier = {
            let mut state = session.write();
            state.in_flight += 1;
            state.next_seq += 1;
            InFlight {
                session: &session,
                seq: 0,
                generation: state.generation,
                settled: false,
            }
        };

        assert_eq!(session.send_message("hola", None).await, SendOutcome::Queued);
        assert_eq!(session.message_count(), 2);

        assert_eq!(earlier.settle(None, None), Delivery::Dropped);
        assert_eq!(session.messages().last().unwrap().content, "eco: hola");
        assert!(!session.is_loading());
    }

    #[test]
    fn test_trim_to_drops_oldest() {
        let mut messages: Vec<ChatMessage> =
            (0..5).map(|i| ChatMessage::user(i.to_string())).collect();
        trim_to(&mut messages, Some(3));
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["2", "3", "4"]);

        trim_to(&mut messages, None);
        assert_eq!(messages.len(), 3);
    }
}
