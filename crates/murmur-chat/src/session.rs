//! Chat session: wires the store, composer and collaborators together

use futures::StreamExt;
use murmur_core::{ChatTarget, FinishReason, Message, MessageId, MessageMetadata, ThreadId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    composer::{RichDocument, SendBlocker, check_send},
    error::{Error, Result},
    interaction::{BranchContext, ChatAction, ChatInteractionState},
    pairing::{MessagePair, pair_messages},
    store::ChatStore,
    threads::{ThreadStore, ThreadSummary, derive_title},
    transport::{ChatEvent, ChatTransport, SendRequest},
};

/// Session configuration
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Model, agent or gateway new messages go to
    pub target: Option<ChatTarget>,
}

impl SessionConfig {
    pub fn with_target(mut self, target: ChatTarget) -> Self {
        self.target = Some(target);
        self
    }
}

/// Result of [`ChatSession::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing was sent
    Blocked(SendBlocker),
    /// The response finished or was stopped
    Completed { finish_reason: FinishReason },
}

/// The error shown in the session banner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub message: String,
    /// Whether offering "retry" makes sense
    pub retryable: bool,
}

impl From<&Error> for LastError {
    fn from(error: &Error) -> Self {
        Self {
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// A cloneable handle for stopping a response from outside the session.
#[derive(Clone)]
pub struct SessionHandle {
    cancel: Arc<Mutex<CancellationToken>>,
}

impl SessionHandle {
    fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Stop the response currently streaming
    pub fn stop(&self) {
        self.cancel.lock().cancel();
    }

    /// Whether the current response has been stopped
    pub fn is_stopped(&self) -> bool {
        self.cancel.lock().is_cancelled()
    }

    /// Swap in a fresh token for a new response
    fn reset(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }
}

/// One open conversation and the composer attached to it
pub struct ChatSession {
    config: SessionConfig,
    store: ChatStore,
    thread_id: Option<ThreadId>,
    messages: Vec<Message>,
    transport: Arc<dyn ChatTransport>,
    threads: Arc<dyn ThreadStore>,
    event_tx: broadcast::Sender<ChatEvent>,
    handle: SessionHandle,
    last_error: Option<LastError>,
}

impl ChatSession {
    /// Create a session on an unsaved draft thread
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn ChatTransport>,
        threads: Arc<dyn ThreadStore>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            store: ChatStore::new(),
            thread_id: None,
            messages: vec![],
            transport,
            threads,
            event_tx,
            handle: SessionHandle::new(),
            last_error: None,
        }
    }

    /// Load an existing thread
    pub async fn open_thread(&mut self, id: &ThreadId) -> Result<()> {
        let messages = self.threads.messages(id).await?;
        tracing::debug!("Opened thread {} with {} messages", id, messages.len());
        self.thread_id = Some(id.clone());
        self.messages = messages;
        self.last_error = None;
        self.store.dispatch(ChatAction::Reset);
        Ok(())
    }

    /// Start over on an unsaved draft thread
    pub fn new_thread(&mut self) {
        self.thread_id = None;
        self.messages.clear();
        self.last_error = None;
        self.store.dispatch(ChatAction::Reset);
    }

    /// Id of the open thread, if it has been created
    pub fn thread_id(&self) -> Option<&ThreadId> {
        self.thread_id.as_ref()
    }

    /// Messages of the open thread
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Pairs for rendering, recomputed from the current messages
    pub fn pairs(&self) -> Vec<MessagePair<'_>> {
        pair_messages(&self.messages)
    }

    /// Replace the draft
    pub fn set_input(&mut self, text: impl Into<String>) {
        self.store.dispatch(ChatAction::set_input(text));
    }

    /// Current interaction state
    pub fn state(&self) -> Arc<ChatInteractionState> {
        self.store.state()
    }

    /// Direct access to the store, for dispatching and draining its queue
    pub fn store_mut(&mut self) -> &mut ChatStore {
        &mut self.store
    }

    /// Subscribe to streamed response events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.event_tx.subscribe()
    }

    /// Get a cloneable handle for stopping responses
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Select where new messages go
    pub fn set_target(&mut self, target: Option<ChatTarget>) {
        self.config.target = target;
    }

    pub fn target(&self) -> Option<&ChatTarget> {
        self.config.target.as_ref()
    }

    /// Error from the last failed operation
    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    pub fn dismiss_error(&mut self) {
        self.last_error = None;
    }

    /// Whether the draft could be sent right now
    pub fn check_send(&mut self) -> std::result::Result<(), SendBlocker> {
        self.store.process_pending();
        let state = self.store.state();
        let document = RichDocument::from_markup(&state.input_value);
        check_send(&state, self.config.target.as_ref(), &document)
    }

    /// Send the draft and stream the response.
    ///
    /// A blocked send changes nothing. Otherwise the draft is cleared, an
    /// active edit is finished, and the user message is saved to the thread
    /// before the transport is called. When saving fails the draft and the
    /// edit are put back.
    pub async fn send(&mut self) -> Result<SendOutcome> {
        if let Err(blocker) = self.check_send() {
            tracing::debug!("Send blocked: {}", blocker);
            return Ok(SendOutcome::Blocked(blocker));
        }
        let Some(target) = self.config.target.clone() else {
            return Ok(SendOutcome::Blocked(SendBlocker::NoTarget));
        };

        let state = self.store.state();
        let draft = state.input_value.clone();
        let branch = state.branch_context.clone();
        let document = RichDocument::from_markup(&draft);
        if branch.is_some() {
            self.store.dispatch(ChatAction::ClearBranch);
        }
        self.store.dispatch(ChatAction::ClearFinishReason);
        self.store.dispatch(ChatAction::SetPendingSubmit { pending: true });
        self.store.dispatch(ChatAction::set_input(""));
        self.last_error = None;

        let result = match self.save_user_message(&document).await {
            Ok(turn) => self.stream_reply(target, turn).await,
            Err(e) => {
                if let Some(context) = branch {
                    self.store.dispatch(ChatAction::StartBranch(context));
                }
                self.store.dispatch(ChatAction::set_input(draft));
                Err(e)
            }
        };

        let finish_reason = match &result {
            Ok(reason) => *reason,
            Err(e) => {
                tracing::warn!("Send failed: {}", e);
                self.last_error = Some(LastError::from(e));
                FinishReason::Error
            }
        };
        self.store.dispatch(ChatAction::SetFinishReason {
            reason: finish_reason,
        });
        self.store.dispatch(ChatAction::SetPendingSubmit { pending: false });

        result.map(|finish_reason| SendOutcome::Completed { finish_reason })
    }

    /// Create the thread if needed and save the user message. The local
    /// message list only grows once the store has it.
    async fn save_user_message(&mut self, document: &RichDocument) -> Result<Turn> {
        let text = document.to_plain_text();

        let thread_id = match &self.thread_id {
            Some(id) => id.clone(),
            None => {
                let thread = self.threads.create_thread(Some(derive_title(&text))).await?;
                tracing::debug!("Created thread {} ({})", thread.id, thread.title);
                self.thread_id = Some(thread.id.clone());
                thread.id
            }
        };

        let message = user_message(text, document);
        self.threads
            .append_message(&thread_id, message.clone())
            .await?;

        let history = self.messages.clone();
        self.messages.push(message.clone());
        Ok(Turn {
            thread_id,
            history,
            message,
        })
    }

    /// Stream the reply to a saved user message.
    ///
    /// The last assistant message is saved with the finish reason, also when
    /// the response is stopped or fails part way.
    async fn stream_reply(&mut self, target: ChatTarget, turn: Turn) -> Result<FinishReason> {
        let Turn {
            thread_id,
            history,
            message,
        } = turn;

        let cancel = self.handle.reset();
        let request = SendRequest {
            thread_id: thread_id.clone(),
            target,
            history,
            message,
        };
        let mut stream = match self.transport.send(request, cancel.clone()).await {
            Ok(stream) => stream,
            // Stopped before the response opened
            Err(murmur_core::Error::Aborted) => return Ok(FinishReason::Other),
            Err(e) => return Err(e.into()),
        };

        let mut finish_reason = None;
        let mut failure = None;
        let mut last: Option<Message> = None;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Response stopped");
                    break;
                }
                event = stream.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let _ = self.event_tx.send(event.clone());

            match event {
                ChatEvent::MessageStart { message } | ChatEvent::MessageUpdate { message } => {
                    self.upsert_local(message.clone());
                    last = Some(message);
                }
                ChatEvent::MessageEnd { message } => {
                    self.upsert_local(message.clone());
                    self.threads
                        .upsert_message(&thread_id, message.clone())
                        .await?;
                    last = Some(message);
                }
                ChatEvent::Finish { reason } => {
                    finish_reason = Some(reason);
                }
                ChatEvent::Error { message } => {
                    failure = Some(Error::Stream(message));
                    break;
                }
            }
        }

        let reason = match (&failure, finish_reason) {
            (Some(_), _) => FinishReason::Error,
            (None, Some(reason)) => reason,
            (None, None) => {
                if !cancel.is_cancelled() {
                    tracing::warn!("Response ended without a finish reason");
                }
                FinishReason::Other
            }
        };

        if let Some(mut message) = last {
            message
                .metadata
                .get_or_insert_with(MessageMetadata::default)
                .finish_reason = Some(reason);
            self.upsert_local(message.clone());
            if let Err(e) = self.threads.upsert_message(&thread_id, message).await {
                if failure.is_none() {
                    return Err(e.into());
                }
                tracing::warn!("Failed to save partial reply: {}", e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(reason),
        }
    }

    fn upsert_local(&mut self, message: Message) {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => self.messages.push(message),
        }
    }

    /// Start editing an earlier user message.
    ///
    /// The thread is forked just before the message, the session switches to
    /// the fork, and the draft is pre-filled with the message's text. On
    /// failure the session stays where it was and the error is recorded.
    pub async fn edit_message(&mut self, message_id: &MessageId) -> Result<ThreadSummary> {
        let (branch, messages, context) = match self.fork_before(message_id).await {
            Ok(fork) => fork,
            Err(e) => {
                tracing::warn!("Edit failed: {}", e);
                self.last_error = Some(LastError::from(&e));
                return Err(e);
            }
        };
        tracing::debug!("Editing message {} on branch {}", message_id, branch.id);

        let text = context.original_message_text.clone();
        self.store.dispatch(ChatAction::StartBranch(context));
        self.store.dispatch(ChatAction::set_input(text));
        self.messages = messages;
        self.thread_id = Some(branch.id.clone());
        Ok(branch)
    }

    /// Fork the open thread before a user message and load the fork
    async fn fork_before(
        &self,
        message_id: &MessageId,
    ) -> Result<(ThreadSummary, Vec<Message>, BranchContext)> {
        let thread_id = self
            .thread_id
            .clone()
            .ok_or(murmur_core::Error::NoActiveThread)?;
        let message = self
            .messages
            .iter()
            .find(|m| &m.id == message_id)
            .ok_or_else(|| murmur_core::Error::MessageNotFound(message_id.to_string()))?;
        if !message.is_user() {
            return Err(murmur_core::Error::NotEditable(message_id.to_string()).into());
        }
        let context = BranchContext {
            original_thread_id: thread_id.clone(),
            original_message_id: message_id.clone(),
            original_message_text: message.text(),
        };

        let branch = self.threads.branch_thread(&thread_id, message_id).await?;
        let messages = self.threads.messages(&branch.id).await?;
        Ok((branch, messages, context))
    }

    /// Abandon an edit. The session stays on the current thread.
    pub fn cancel_edit(&mut self) {
        self.store.dispatch(ChatAction::ClearBranch);
        self.store.dispatch(ChatAction::set_input(""));
    }
}

/// A saved user message waiting for its reply
struct Turn {
    thread_id: ThreadId,
    history: Vec<Message>,
    message: Message,
}

/// Build the user message for a draft, keeping the document when it has
/// structure beyond plain text.
fn user_message(text: String, document: &RichDocument) -> Message {
    let message = Message::user(text);
    if document.mentions().is_empty() && document.attachments().is_empty() {
        return message;
    }
    let metadata = MessageMetadata {
        document: serde_json::to_value(document).ok(),
        ..message.metadata.clone().unwrap_or_default()
    };
    message.with_metadata(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threads::{InMemoryThreadStore, PageRequest, ThreadPage};
    use crate::transcript::render_pair;
    use crate::transport::ChatEventStream;
    use async_trait::async_trait;
    use murmur_core::Part;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// What the scripted transport does for one send
    #[derive(Clone)]
    enum Script {
        Reply(&'static str, FinishReason),
        StreamError(&'static str),
        Refuse,
        Abort,
        /// Emit a partial message, then wait to be stopped
        Hang(&'static str),
    }

    struct MockTransport {
        scripts: Mutex<Vec<Script>>,
        requests: Mutex<Vec<SendRequest>>,
    }

    impl MockTransport {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts),
                requests: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl ChatTransport for MockTransport {
        async fn send(
            &self,
            request: SendRequest,
            cancel: CancellationToken,
        ) -> murmur_core::Result<ChatEventStream> {
            self.requests.lock().push(request);
            let script = {
                let mut scripts = self.scripts.lock();
                if scripts.is_empty() {
                    Script::Reply("ok", FinishReason::Stop)
                } else {
                    scripts.remove(0)
                }
            };

            let stream: ChatEventStream = match script {
                Script::Refuse => {
                    return Err(murmur_core::Error::transport("503 service unavailable"));
                }
                Script::Abort => return Err(murmur_core::Error::Aborted),
                Script::Reply(text, reason) => Box::pin(async_stream::stream! {
                    let mut message = Message::assistant_empty();
                    yield ChatEvent::MessageStart { message: message.clone() };
                    message.parts.push(Part::text(text));
                    yield ChatEvent::MessageUpdate { message: message.clone() };
                    yield ChatEvent::MessageEnd { message };
                    yield ChatEvent::Finish { reason };
                }),
                Script::StreamError(text) => Box::pin(async_stream::stream! {
                    yield ChatEvent::MessageStart { message: Message::assistant_empty() };
                    yield ChatEvent::Error { message: text.to_string() };
                }),
                Script::Hang(text) => Box::pin(async_stream::stream! {
                    let message = Message::assistant(vec![Part::text(text)]);
                    yield ChatEvent::MessageStart { message };
                    cancel.cancelled().await;
                }),
            };
            Ok(stream)
        }
    }

    fn target() -> ChatTarget {
        ChatTarget::Model {
            provider: "test".into(),
            model: "echo".into(),
        }
    }

    fn session(
        scripts: Vec<Script>,
    ) -> (ChatSession, Arc<MockTransport>, Arc<InMemoryThreadStore>) {
        let transport = MockTransport::new(scripts);
        let threads = Arc::new(InMemoryThreadStore::new());
        let session = ChatSession::new(
            SessionConfig::default().with_target(target()),
            transport.clone(),
            threads.clone(),
        );
        (session, transport, threads)
    }

    /// Thread store that can be told to fail writes, or reads of every
    /// thread but one
    #[derive(Default)]
    struct FailingThreads {
        inner: InMemoryThreadStore,
        fail_appends: AtomicBool,
        readable_only: Mutex<Option<ThreadId>>,
    }

    impl FailingThreads {
        fn check_read(&self, id: &ThreadId) -> murmur_core::Result<()> {
            match &*self.readable_only.lock() {
                Some(readable) if readable != id => {
                    Err(std::io::Error::other("read failed").into())
                }
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl ThreadStore for FailingThreads {
        async fn create_thread(&self, title: Option<String>) -> murmur_core::Result<ThreadSummary> {
            self.inner.create_thread(title).await
        }

        async fn thread(&self, id: &ThreadId) -> murmur_core::Result<ThreadSummary> {
            self.inner.thread(id).await
        }

        async fn list_threads(&self, page: PageRequest) -> murmur_core::Result<ThreadPage> {
            self.inner.list_threads(page).await
        }

        async fn messages(&self, id: &ThreadId) -> murmur_core::Result<Vec<Message>> {
            self.check_read(id)?;
            self.inner.messages(id).await
        }

        async fn append_message(&self, id: &ThreadId, message: Message) -> murmur_core::Result<()> {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("disk full").into());
            }
            self.inner.append_message(id, message).await
        }

        async fn upsert_message(&self, id: &ThreadId, message: Message) -> murmur_core::Result<()> {
            self.inner.upsert_message(id, message).await
        }

        async fn branch_thread(
            &self,
            source: &ThreadId,
            at: &MessageId,
        ) -> murmur_core::Result<ThreadSummary> {
            self.inner.branch_thread(source, at).await
        }
    }

    fn failing_session(threads: Arc<FailingThreads>) -> (ChatSession, Arc<MockTransport>) {
        let transport = MockTransport::new(vec![]);
        let session = ChatSession::new(
            SessionConfig::default().with_target(target()),
            transport.clone(),
            threads,
        );
        (session, transport)
    }

    #[tokio::test]
    async fn test_send_creates_thread_and_streams_reply() {
        let (mut session, transport, threads) =
            session(vec![Script::Reply("hello back", FinishReason::Stop)]);
        let mut events = session.subscribe();

        session.set_input("Hello there\nsecond line");
        let outcome = session.send().await.unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Completed {
                finish_reason: FinishReason::Stop
            }
        );

        let thread_id = session.thread_id().cloned().unwrap();
        assert_eq!(threads.thread(&thread_id).await.unwrap().title, "Hello there");

        let pairs = session.pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].user.text(), "Hello there\nsecond line");
        assert_eq!(pairs[0].assistant.unwrap().text(), "hello back");

        // Persisted too
        assert_eq!(threads.messages(&thread_id).await.unwrap().len(), 2);

        let state = session.state();
        assert_eq!(state.input_value, "");
        assert!(!state.pending_submit);
        assert_eq!(state.finish_reason, Some(FinishReason::Stop));

        let request = transport.requests.lock()[0].clone();
        assert!(request.history.is_empty());
        assert_eq!(request.target, target());

        assert!(matches!(
            events.try_recv().unwrap(),
            ChatEvent::MessageStart { .. }
        ));
    }

    #[tokio::test]
    async fn test_second_send_carries_history() {
        let (mut session, transport, _) = session(vec![]);
        session.set_input("one");
        session.send().await.unwrap();
        session.set_input("two");
        session.send().await.unwrap();

        let requests = transport.requests.lock();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].history.len(), 2);
        assert_eq!(requests[0].thread_id, requests[1].thread_id);
        assert_eq!(session.pairs().len(), 2);
    }

    #[tokio::test]
    async fn test_blocked_sends_have_no_side_effects() {
        let (mut session, transport, _) = session(vec![]);

        session.set_input("   ");
        assert_eq!(
            session.send().await.unwrap(),
            SendOutcome::Blocked(SendBlocker::EmptyDraft)
        );

        session.set_target(None);
        session.set_input("hi");
        assert_eq!(
            session.send().await.unwrap(),
            SendOutcome::Blocked(SendBlocker::NoTarget)
        );

        session.set_target(Some(target()));
        session
            .store_mut()
            .dispatch(ChatAction::SetPendingSubmit { pending: true });
        assert_eq!(
            session.send().await.unwrap(),
            SendOutcome::Blocked(SendBlocker::Pending)
        );

        assert!(transport.requests.lock().is_empty());
        assert!(session.thread_id().is_none());
        assert_eq!(session.state().input_value, "hi");
    }

    #[tokio::test]
    async fn test_queued_actions_count_before_send() {
        let (mut session, transport, _) = session(vec![]);
        let handle = session.store_mut().handle();
        handle.dispatch(ChatAction::set_input("queued draft"));

        let outcome = session.send().await.unwrap();
        assert!(matches!(outcome, SendOutcome::Completed { .. }));
        assert_eq!(
            transport.requests.lock()[0].message.text(),
            "queued draft"
        );
    }

    #[tokio::test]
    async fn test_transport_refusal_sets_error() {
        let (mut session, _, _) = session(vec![Script::Refuse]);
        session.set_input("hi");
        let err = session.send().await.unwrap_err();
        assert!(err.is_retryable());

        let state = session.state();
        assert!(!state.pending_submit);
        assert_eq!(state.finish_reason, Some(FinishReason::Error));

        let banner = session.last_error().unwrap();
        assert!(banner.retryable);
        assert!(banner.message.contains("503"));

        // The user message stays so it can be retried
        assert_eq!(session.pairs().len(), 1);
        assert!(session.pairs()[0].is_pending());

        session.dismiss_error();
        assert!(session.last_error().is_none());
    }

    #[tokio::test]
    async fn test_abort_before_stream_is_not_an_error() {
        let (mut session, _, _) = session(vec![Script::Abort]);
        session.set_input("hi");
        let outcome = session.send().await.unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Completed {
                finish_reason: FinishReason::Other
            }
        );
        assert!(session.last_error().is_none());
        assert!(!session.state().pending_submit);
    }

    #[tokio::test]
    async fn test_stream_error_sets_error() {
        let (mut session, _, threads) = session(vec![Script::StreamError("model overloaded")]);
        session.set_input("hi");
        let err = session.send().await.unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
        assert_eq!(session.state().finish_reason, Some(FinishReason::Error));
        assert!(session.last_error().unwrap().retryable);

        // The partial reply is saved as well as shown
        let thread_id = session.thread_id().cloned().unwrap();
        let stored = threads.messages(&thread_id).await.unwrap();
        assert_eq!(stored, session.messages());
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].finish_reason(), Some(FinishReason::Error));
    }

    #[tokio::test]
    async fn test_finish_reason_needing_attention_is_recorded() {
        let (mut session, _, threads) =
            session(vec![Script::Reply("cut off", FinishReason::Length)]);
        session.set_input("write a novel");
        session.send().await.unwrap();
        let reason = session.state().finish_reason.unwrap();
        assert_eq!(reason, FinishReason::Length);
        assert!(reason.needs_attention());

        // The reply carries the reason into the transcript
        let thread_id = session.thread_id().cloned().unwrap();
        let stored = threads.messages(&thread_id).await.unwrap();
        assert_eq!(stored[1].finish_reason(), Some(FinishReason::Length));
        let pairs = session.pairs();
        assert!(render_pair(&pairs[0]).contains("(response ended: length)"));
    }

    #[tokio::test]
    async fn test_failed_save_keeps_draft() {
        let threads = Arc::new(FailingThreads::default());
        threads.fail_appends.store(true, Ordering::SeqCst);
        let (mut session, transport) = failing_session(threads.clone());

        session.set_input("important draft");
        let err = session.send().await.unwrap_err();
        assert!(matches!(err, Error::Core(murmur_core::Error::Io(_))));

        // Nothing is shown that the thread does not hold
        assert!(session.messages().is_empty());
        assert!(session.pairs().is_empty());
        let thread_id = session.thread_id().cloned().unwrap();
        assert!(threads.messages(&thread_id).await.unwrap().is_empty());
        assert!(transport.requests.lock().is_empty());

        let state = session.state();
        assert_eq!(state.input_value, "important draft");
        assert!(!state.pending_submit);
        assert_eq!(state.finish_reason, Some(FinishReason::Error));
        assert!(session.last_error().unwrap().message.contains("disk full"));

        // Retrying once the store recovers sends the same draft
        threads.fail_appends.store(false, Ordering::SeqCst);
        session.send().await.unwrap();
        assert_eq!(session.pairs().len(), 1);
        assert_eq!(
            transport.requests.lock()[0].message.text(),
            "important draft"
        );
    }

    #[tokio::test]
    async fn test_failed_save_keeps_edit_in_progress() {
        let threads = Arc::new(FailingThreads::default());
        let source = threads
            .inner
            .with_thread("t", vec![Message::user("q").with_id("u1")]);
        let (mut session, _) = failing_session(threads.clone());
        session.open_thread(&source.id).await.unwrap();
        let branch = session.edit_message(&MessageId::from("u1")).await.unwrap();

        threads.fail_appends.store(true, Ordering::SeqCst);
        session.set_input("q, reworded");
        session.send().await.unwrap_err();

        let state = session.state();
        assert!(state.is_branching());
        assert_eq!(state.input_value, "q, reworded");
        assert_eq!(session.thread_id(), Some(&branch.id));
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_stop_keeps_partial_reply() {
        let (mut session, _, threads) = session(vec![Script::Hang("partial")]);
        let handle = session.handle();
        let mut events = session.subscribe();

        session.set_input("long question");
        let stopper = tokio::spawn(async move {
            // Wait for the response to start before stopping it
            let _ = events.recv().await;
            handle.stop();
        });

        let outcome = session.send().await.unwrap();
        stopper.await.unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Completed {
                finish_reason: FinishReason::Other
            }
        );
        assert!(session.handle().is_stopped());
        assert!(!session.state().pending_submit);

        let thread_id = session.thread_id().cloned().unwrap();
        let stored = threads.messages(&thread_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].text(), "partial");
    }

    #[tokio::test]
    async fn test_mentions_are_kept_in_metadata() {
        let (mut session, transport, _) = session(vec![]);
        session.set_input("ask @alice about [[file:f1|notes.md]]");
        session.send().await.unwrap();
        let message = transport.requests.lock()[0].message.clone();
        let document = message.metadata.unwrap().document.unwrap();
        let document: RichDocument = serde_json::from_value(document).unwrap();
        assert_eq!(document.mentions(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_edit_message_forks_thread() {
        let (mut session, _, threads) = session(vec![]);
        let source = threads.with_thread(
            "trip",
            vec![
                Message::user("plan a trip").with_id("u1"),
                Message::assistant(vec![Part::text("where to?")]).with_id("a1"),
                Message::user("Lisbon").with_id("u2"),
                Message::assistant(vec![Part::text("great")]).with_id("a2"),
            ],
        );
        session.open_thread(&source.id).await.unwrap();

        let branch = session.edit_message(&MessageId::from("u2")).await.unwrap();
        assert_eq!(branch.branched_from.as_ref(), Some(&source.id));
        assert_eq!(session.thread_id(), Some(&branch.id));
        assert_eq!(session.messages().len(), 2);

        let state = session.state();
        assert_eq!(state.input_value, "Lisbon");
        let context = state.branch_context.clone().unwrap();
        assert_eq!(context.original_thread_id, source.id);
        assert_eq!(context.original_message_id, MessageId::from("u2"));
        assert_eq!(context.original_message_text, "Lisbon");

        // Sending the edit finishes the branch
        session.set_input("Porto");
        session.send().await.unwrap();
        assert!(!session.state().is_branching());
        let pairs = session.pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].user.text(), "Porto");

        // The source thread is untouched
        assert_eq!(threads.messages(&source.id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_edit_rejects_assistant_and_unknown_messages() {
        let (mut session, _, threads) = session(vec![]);
        let source = threads.with_thread(
            "t",
            vec![
                Message::user("q").with_id("u1"),
                Message::assistant(vec![Part::text("a")]).with_id("a1"),
            ],
        );

        let err = session.edit_message(&MessageId::from("u1")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Core(murmur_core::Error::NoActiveThread)
        ));

        session.open_thread(&source.id).await.unwrap();
        let err = session.edit_message(&MessageId::from("a1")).await.unwrap_err();
        assert!(matches!(err, Error::Core(murmur_core::Error::NotEditable(_))));
        let err = session.edit_message(&MessageId::from("zz")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Core(murmur_core::Error::MessageNotFound(_))
        ));
        assert!(!session.state().is_branching());
    }

    #[tokio::test]
    async fn test_failed_fork_load_leaves_session_on_source() {
        let threads = Arc::new(FailingThreads::default());
        let source = threads.inner.with_thread(
            "t",
            vec![Message::user("q1").with_id("u1"), Message::user("q2").with_id("u2")],
        );
        *threads.readable_only.lock() = Some(source.id.clone());
        let (mut session, _) = failing_session(threads.clone());
        session.open_thread(&source.id).await.unwrap();

        let err = session.edit_message(&MessageId::from("u2")).await.unwrap_err();
        assert!(matches!(err, Error::Core(murmur_core::Error::Io(_))));

        let state = session.state();
        assert!(!state.is_branching());
        assert_eq!(state.input_value, "");
        assert_eq!(session.thread_id(), Some(&source.id));
        assert_eq!(session.messages().len(), 2);
        assert!(session.last_error().unwrap().message.contains("read failed"));
    }

    #[tokio::test]
    async fn test_cancel_edit_clears_branch_and_draft() {
        let (mut session, _, threads) = session(vec![]);
        let source = threads.with_thread("t", vec![Message::user("q").with_id("u1")]);
        session.open_thread(&source.id).await.unwrap();
        let branch = session.edit_message(&MessageId::from("u1")).await.unwrap();

        session.cancel_edit();
        let state = session.state();
        assert!(!state.is_branching());
        assert_eq!(state.input_value, "");
        assert_eq!(session.thread_id(), Some(&branch.id));
    }

    #[tokio::test]
    async fn test_open_and_new_thread_reset_state() {
        let (mut session, _, threads) = session(vec![]);
        let source = threads.with_thread("t", vec![Message::user("q").with_id("u1")]);

        session.set_input("draft");
        session.open_thread(&source.id).await.unwrap();
        assert_eq!(session.state().input_value, "");
        assert_eq!(session.pairs().len(), 1);

        session.new_thread();
        assert!(session.thread_id().is_none());
        assert!(session.messages().is_empty());

        let err = session.open_thread(&ThreadId::from("missing")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Core(murmur_core::Error::ThreadNotFound(_))
        ));
    }
}
