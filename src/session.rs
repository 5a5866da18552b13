//! Conversation session: one capture, one chat.
//!
//! The history is append-only. Only the first user turn may carry the image;
//! later turns are text and rely on the image staying in context. Each
//! session allows a single outstanding request, streaming or not: starting a
//! new one cancels the previous one before its request goes out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::capture::CapturedImage;
use crate::llm::prompts::CHAT_SYSTEM_PROMPT;
use crate::llm::{ChatBackend, ChatClient, ImageDetail, LlmError, Message, Role, StreamStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("An image is already attached to this conversation; send text-only turns instead")]
    AlreadyAttached,
}

/// One row of the visible transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub has_image: bool,
    /// The assistant turn shows an error instead of a reply.
    pub failed: bool,
}

/// Ordered messages in send order, system preamble first.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    /// A history holding only the system preamble.
    pub fn initialize() -> Self {
        Self {
            messages: vec![Message::system(CHAT_SYSTEM_PROMPT)],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Never true: the preamble is always present.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_user_turn(&self) -> bool {
        self.messages.iter().any(|m| m.role() == Role::User)
    }

    pub fn has_image(&self) -> bool {
        self.image().is_some()
    }

    /// The screenshot carried by the first user turn.
    pub fn image(&self) -> Option<&CapturedImage> {
        self.messages.iter().find_map(Message::image)
    }

    /// Text of the newest assistant reply, skipping error turns.
    pub fn last_reply(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role() == Role::Assistant && !m.is_failed())
            .map(Message::text)
    }

    /// Append the opening user turn with the screenshot attached.
    pub fn attach_first_user_turn(
        &mut self,
        prompt: &str,
        image: CapturedImage,
    ) -> Result<(), SessionError> {
        if self.has_user_turn() {
            return Err(SessionError::AlreadyAttached);
        }
        log::info!(
            "[SESSION] First turn with {}x{} image ({} bytes)",
            image.width(),
            image.height(),
            image.png_bytes().len()
        );
        self.messages
            .push(Message::user_with_image(prompt, image, ImageDetail::default()));
        Ok(())
    }

    /// Append a text-only user turn.
    pub fn append_user_turn(&mut self, prompt: &str) {
        self.messages.push(Message::user(prompt));
    }

    pub fn push_assistant(&mut self, message: Message) {
        debug_assert_eq!(message.role(), Role::Assistant);
        self.messages.push(message);
    }

    /// What gets sent to the model: everything except failed turns.
    pub fn request_messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| !m.is_failed())
            .cloned()
            .collect()
    }

    /// Transcript rows, without the system preamble.
    pub fn turns(&self) -> Vec<Turn> {
        self.messages
            .iter()
            .filter(|m| m.role() != Role::System)
            .map(|m| Turn {
                role: m.role(),
                text: m.text(),
                has_image: m.image().is_some(),
                failed: m.is_failed(),
            })
            .collect()
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::initialize()
    }
}

/// How a streaming reply ended.
#[derive(Debug)]
pub enum StreamOutcome {
    /// Full reply, now appended to the history.
    Completed(String),
    /// Superseded by a newer request or cancelled explicitly. Holds whatever
    /// text arrived first; nothing was appended.
    Cancelled(String),
    /// The request failed; an error turn was appended in its place.
    Failed(LlmError),
}

struct ActiveRequest {
    id: u64,
    cancel: CancellationToken,
}

/// History plus the request plumbing for one capture-chat workflow.
///
/// Methods take `&self`; locks are never held across an await, so a new
/// streaming request can be started while a previous one is still reading.
pub struct ConversationSession<B = ChatClient> {
    backend: Arc<B>,
    model: Option<String>,
    history: Mutex<ConversationHistory>,
    pending_image: Mutex<Option<CapturedImage>>,
    active: Mutex<Option<ActiveRequest>>,
    next_request_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<B: ChatBackend> ConversationSession<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            model: None,
            history: Mutex::new(ConversationHistory::initialize()),
            pending_image: Mutex::new(None),
            active: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Session whose first submitted prompt will carry `image`.
    pub fn with_image(backend: Arc<B>, image: CapturedImage) -> Self {
        let session = Self::new(backend);
        *lock(&session.pending_image) = Some(image);
        session
    }

    /// Per-session model override.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn history(&self) -> ConversationHistory {
        lock(&self.history).clone()
    }

    pub fn turns(&self) -> Vec<Turn> {
        lock(&self.history).turns()
    }

    pub fn pending_image(&self) -> Option<CapturedImage> {
        lock(&self.pending_image).clone()
    }

    pub fn has_user_turn(&self) -> bool {
        lock(&self.history).has_user_turn()
    }

    /// The conversation's screenshot, sent or still pending.
    pub fn captured_image(&self) -> Option<CapturedImage> {
        let history = lock(&self.history);
        match history.image() {
            Some(image) => Some(image.clone()),
            None => lock(&self.pending_image).clone(),
        }
    }

    pub fn last_reply(&self) -> Option<String> {
        lock(&self.history).last_reply()
    }

    pub fn attach_first_user_turn(
        &self,
        prompt: &str,
        image: CapturedImage,
    ) -> Result<(), SessionError> {
        lock(&self.history).attach_first_user_turn(prompt, image)
    }

    pub fn append_user_turn(&self, prompt: &str) {
        lock(&self.history).append_user_turn(prompt);
    }

    /// Replace the image the first turn will carry. Fails once a user turn
    /// has been sent, since the history can hold only one image.
    pub fn set_pending_image(&self, image: CapturedImage) -> Result<(), SessionError> {
        let history = lock(&self.history);
        if history.has_user_turn() {
            return Err(SessionError::AlreadyAttached);
        }
        log::info!("[SESSION] Pending image replaced ({}x{})", image.width(), image.height());
        *lock(&self.pending_image) = Some(image);
        Ok(())
    }

    /// Add the user's prompt to the history. The first prompt takes the
    /// pending image, if any. Returns `false` for a blank prompt.
    pub fn submit_prompt(&self, prompt: &str) -> Result<bool, SessionError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Ok(false);
        }

        let mut history = lock(&self.history);
        if !history.has_user_turn() {
            if let Some(image) = lock(&self.pending_image).take() {
                history.attach_first_user_turn(prompt, image)?;
                return Ok(true);
            }
        }
        history.append_user_turn(prompt);
        Ok(true)
    }

    /// Non-streaming reply. The reply, or an error turn, is appended.
    ///
    /// A newer request on this session cancels this one: it then returns
    /// `LlmError::Cancelled` and appends nothing.
    pub async fn request_assistant_reply(&self) -> Result<String, LlmError> {
        let (id, cancel) = self.begin_request();
        let messages = lock(&self.history).request_messages();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            result = self.backend.complete(&messages, self.model.as_deref()) => result,
        };
        self.end_request(id);

        if cancel.is_cancelled() {
            log::info!("[SESSION] Request {} superseded", id);
            return Err(LlmError::Cancelled);
        }

        match result {
            Ok(reply) => {
                lock(&self.history).push_assistant(Message::assistant(reply.clone()));
                Ok(reply)
            }
            Err(e) => {
                log::error!("[SESSION] Reply failed: {}", e);
                lock(&self.history).push_assistant(Message::assistant_error(e.display_text()));
                Err(e)
            }
        }
    }

    /// Streaming reply. Deltas reach `on_delta` in arrival order; on success
    /// the joined text is appended as one assistant turn and `on_completed`
    /// runs with it.
    pub async fn request_assistant_reply_streaming<D, C>(
        &self,
        mut on_delta: D,
        on_completed: C,
    ) -> StreamOutcome
    where
        D: FnMut(&str) + Send,
        C: FnOnce(&str),
    {
        let (id, cancel) = self.begin_request();
        let messages = lock(&self.history).request_messages();

        let mut reply = String::new();
        let result = self
            .backend
            .complete_streaming(
                &messages,
                self.model.as_deref(),
                |delta: &str| {
                    reply.push_str(delta);
                    on_delta(delta);
                },
                &cancel,
            )
            .await;
        self.end_request(id);

        if cancel.is_cancelled() {
            log::info!("[SESSION] Stream {} superseded after {} chars", id, reply.len());
            return StreamOutcome::Cancelled(reply);
        }

        match result {
            Ok(StreamStatus::Completed) => {
                lock(&self.history).push_assistant(Message::assistant(reply.clone()));
                on_completed(&reply);
                StreamOutcome::Completed(reply)
            }
            Ok(StreamStatus::Cancelled) => StreamOutcome::Cancelled(reply),
            Err(e) => {
                log::error!("[SESSION] Stream {} failed: {}", id, e);
                lock(&self.history).push_assistant(Message::assistant_error(e.display_text()));
                StreamOutcome::Failed(e)
            }
        }
    }

    /// Cancel the outstanding request, if there is one.
    pub fn cancel_active(&self) {
        if let Some(previous) = lock(&self.active).take() {
            log::info!("[SESSION] Cancelling request {}", previous.id);
            previous.cancel.cancel();
        }
    }

    /// A request, streaming or not, is outstanding.
    pub fn is_streaming(&self) -> bool {
        lock(&self.active).is_some()
    }

    fn begin_request(&self) -> (u64, CancellationToken) {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let previous = lock(&self.active).replace(ActiveRequest {
            id,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            log::info!("[SESSION] Request {} replaces request {}", id, previous.id);
            previous.cancel.cancel();
        }
        (id, cancel)
    }

    fn end_request(&self, id: u64) {
        let mut active = lock(&self.active);
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
        }
    }
}

impl<B> Drop for ConversationSession<B> {
    fn drop(&mut self) {
        if let Some(active) = lock(&self.active).take() {
            active.cancel.cancel();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, RgbaImage};
    use std::collections::VecDeque;

    pub(crate) enum Script {
        Reply(Vec<&'static str>),
        Fail(LlmError),
        /// Emit the deltas, then wait until cancelled. Non-streaming calls
        /// never answer.
        Hang(Vec<&'static str>),
    }

    /// Replies from a queue and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedBackend {
        scripts: Mutex<VecDeque<Script>>,
        pub(crate) seen: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn next(&self, messages: &[Message]) -> Script {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.scripts
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted reply left")
        }
    }

    impl ChatBackend for ScriptedBackend {
        async fn complete(&self, messages: &[Message], _model: Option<&str>) -> Result<String, LlmError> {
            match self.next(messages) {
                Script::Reply(parts) => Ok(parts.concat()),
                Script::Fail(e) => Err(e),
                Script::Hang(_) => std::future::pending().await,
            }
        }

        async fn complete_streaming<F>(
            &self,
            messages: &[Message],
            _model: Option<&str>,
            mut on_delta: F,
            cancel: &CancellationToken,
        ) -> Result<StreamStatus, LlmError>
        where
            F: FnMut(&str) + Send,
        {
            match self.next(messages) {
                Script::Reply(parts) => {
                    for part in parts {
                        if cancel.is_cancelled() {
                            return Ok(StreamStatus::Cancelled);
                        }
                        on_delta(part);
                    }
                    Ok(StreamStatus::Completed)
                }
                Script::Fail(e) => Err(e),
                Script::Hang(parts) => {
                    for part in parts {
                        on_delta(part);
                    }
                    cancel.cancelled().await;
                    Ok(StreamStatus::Cancelled)
                }
            }
        }
    }

    pub(crate) fn tiny_image() -> CapturedImage {
        CapturedImage::encode(&DynamicImage::ImageRgba8(RgbaImage::new(10, 10))).unwrap()
    }

    #[test]
    fn initialized_history_has_only_preamble() {
        let history = ConversationHistory::initialize();
        assert_eq!(history.len(), 1);
        assert_eq!(history.messages()[0].role(), Role::System);
        assert_eq!(history.messages()[0].text(), CHAT_SYSTEM_PROMPT);
        assert!(history.turns().is_empty());
    }

    #[test]
    fn second_attach_is_rejected() {
        let mut history = ConversationHistory::initialize();
        history.attach_first_user_turn("Describe this", tiny_image()).unwrap();
        assert_eq!(history.len(), 2);

        let err = history.attach_first_user_turn("again", tiny_image()).unwrap_err();
        assert_eq!(err, SessionError::AlreadyAttached);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn attach_after_text_turn_is_rejected() {
        let mut history = ConversationHistory::initialize();
        history.append_user_turn("no image yet");
        assert_eq!(
            history.attach_first_user_turn("late", tiny_image()),
            Err(SessionError::AlreadyAttached)
        );
        assert!(!history.has_image());
    }

    #[test]
    fn submit_uses_pending_image_once() {
        let session = ConversationSession::with_image(ScriptedBackend::new(vec![]), tiny_image());
        assert!(!session.submit_prompt("   ").unwrap());
        assert!(session.submit_prompt(" What is this? ").unwrap());
        assert!(session.submit_prompt("More").unwrap());

        let turns = session.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "What is this?");
        assert!(turns[0].has_image);
        assert!(!turns[1].has_image);
        assert!(session.pending_image().is_none());
    }

    #[test]
    fn pending_image_locked_after_first_turn() {
        let session = ConversationSession::new(ScriptedBackend::new(vec![]));
        session.set_pending_image(tiny_image()).unwrap();
        session.set_pending_image(tiny_image()).unwrap();
        session.submit_prompt("hi").unwrap();
        assert_eq!(
            session.set_pending_image(tiny_image()),
            Err(SessionError::AlreadyAttached)
        );
    }

    #[tokio::test]
    async fn last_reply_skips_error_turns() {
        let backend = ScriptedBackend::new(vec![
            Script::Reply(vec!["first answer"]),
            Script::Fail(LlmError::Transport("reset".into())),
        ]);
        let session = ConversationSession::with_image(backend, tiny_image());
        assert!(session.last_reply().is_none());
        assert_eq!(session.captured_image().map(|i| i.width()), Some(10));

        session.submit_prompt("one").unwrap();
        session.request_assistant_reply().await.unwrap();
        session.submit_prompt("two").unwrap();
        assert!(session.request_assistant_reply().await.is_err());

        assert_eq!(session.last_reply().as_deref(), Some("first answer"));
        assert!(session.pending_image().is_none());
        assert_eq!(session.captured_image().map(|i| i.height()), Some(10));
    }

    #[tokio::test]
    async fn non_streaming_reply_is_appended() {
        let backend = ScriptedBackend::new(vec![Script::Reply(vec!["It is ", "a chart."])]);
        let session = ConversationSession::with_image(backend.clone(), tiny_image());
        session.submit_prompt("Describe this").unwrap();

        let reply = session.request_assistant_reply().await.unwrap();
        assert_eq!(reply, "It is a chart.");
        let history = session.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history.messages()[2], Message::assistant("It is a chart."));
        assert_eq!(backend.seen.lock().unwrap()[0].len(), 2);
    }

    #[tokio::test]
    async fn streaming_deltas_in_order_then_completed() {
        let backend = ScriptedBackend::new(vec![Script::Reply(vec!["A", "B", "C"])]);
        let session = ConversationSession::new(backend);
        session.submit_prompt("go").unwrap();

        let mut seen = Vec::new();
        let mut completed = None;
        let outcome = session
            .request_assistant_reply_streaming(
                |d| seen.push(d.to_string()),
                |full| completed = Some(full.to_string()),
            )
            .await;

        assert!(matches!(outcome, StreamOutcome::Completed(ref s) if s == "ABC"));
        assert_eq!(seen, vec!["A", "B", "C"]);
        assert_eq!(completed.as_deref(), Some("ABC"));
        assert_eq!(session.turns().last().unwrap().text, "ABC");
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn failure_becomes_error_turn_and_is_not_resent() {
        let backend = ScriptedBackend::new(vec![
            Script::Fail(LlmError::Remote {
                status: 429,
                body: "slow down".into(),
            }),
            Script::Reply(vec!["ok"]),
        ]);
        let session = ConversationSession::new(backend.clone());
        session.submit_prompt("first").unwrap();

        let outcome = session.request_assistant_reply_streaming(|_| {}, |_| {}).await;
        assert!(matches!(outcome, StreamOutcome::Failed(LlmError::Remote { status: 429, .. })));

        let turns = session.turns();
        assert_eq!(turns.len(), 2);
        assert!(turns[1].failed);
        assert_eq!(turns[1].text, "Error: API error 429: slow down");

        session.submit_prompt("second").unwrap();
        let outcome = session.request_assistant_reply_streaming(|_| {}, |_| {}).await;
        assert!(matches!(outcome, StreamOutcome::Completed(_)));

        let second_request = &backend.seen.lock().unwrap()[1];
        assert_eq!(second_request.len(), 3);
        assert!(second_request.iter().all(|m| !m.is_failed()));
    }

    #[tokio::test]
    async fn auth_error_text_is_verbatim() {
        let message = "OPENAI_API_KEY environment variable is not set.";
        let backend = ScriptedBackend::new(vec![Script::Fail(LlmError::Auth(message.into()))]);
        let session = ConversationSession::new(backend);
        session.submit_prompt("hi").unwrap();

        assert!(session.request_assistant_reply().await.is_err());
        assert_eq!(session.turns()[1].text, message);
    }

    #[tokio::test]
    async fn new_stream_cancels_previous() {
        let backend = ScriptedBackend::new(vec![
            Script::Hang(vec!["par"]),
            Script::Reply(vec!["B"]),
        ]);
        let session = ConversationSession::new(backend);
        session.submit_prompt("q").unwrap();

        let mut first_completed = false;
        let mut second_completed = false;
        let (first, second) = tokio::join!(
            session.request_assistant_reply_streaming(|_| {}, |_| first_completed = true),
            session.request_assistant_reply_streaming(|_| {}, |_| second_completed = true),
        );

        assert!(matches!(first, StreamOutcome::Cancelled(ref s) if s == "par"));
        assert!(matches!(second, StreamOutcome::Completed(ref s) if s == "B"));
        assert!(!first_completed);
        assert!(second_completed);

        let turns = session.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].text, "B");
    }

    #[tokio::test]
    async fn streaming_request_supersedes_non_streaming_one() {
        let backend = ScriptedBackend::new(vec![
            Script::Hang(vec!["slow reply"]),
            Script::Reply(vec!["fast"]),
        ]);
        let session = ConversationSession::new(backend);
        session.submit_prompt("q").unwrap();

        let (slow, fast) = tokio::join!(
            session.request_assistant_reply(),
            session.request_assistant_reply_streaming(|_| {}, |_| {}),
        );

        assert!(matches!(slow, Err(LlmError::Cancelled)));
        assert!(matches!(fast, StreamOutcome::Completed(ref s) if s == "fast"));
        let turns: Vec<(Role, String)> = session
            .turns()
            .into_iter()
            .map(|t| (t.role, t.text))
            .collect();
        assert_eq!(
            turns,
            vec![(Role::User, "q".to_string()), (Role::Assistant, "fast".to_string())]
        );
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn non_streaming_request_supersedes_stream() {
        let backend = ScriptedBackend::new(vec![
            Script::Hang(vec!["par"]),
            Script::Reply(vec!["done"]),
        ]);
        let session = ConversationSession::new(backend);
        session.submit_prompt("q").unwrap();

        let (first, second) = tokio::join!(
            session.request_assistant_reply_streaming(|_| {}, |_| {}),
            session.request_assistant_reply(),
        );

        assert!(matches!(first, StreamOutcome::Cancelled(ref s) if s == "par"));
        assert_eq!(second.unwrap(), "done");
        assert_eq!(session.turns().len(), 2);
    }

    #[test]
    fn pending_image_never_outlives_first_turn() {
        for _ in 0..200 {
            let session = ConversationSession::new(ScriptedBackend::new(vec![]));
            std::thread::scope(|scope| {
                scope.spawn(|| {
                    let _ = session.set_pending_image(tiny_image());
                });
                scope.spawn(|| {
                    session.submit_prompt("hi").unwrap();
                });
            });
            assert!(session.has_user_turn());
            assert!(session.pending_image().is_none());
        }
    }

    #[tokio::test]
    async fn explicit_cancel_appends_nothing() {
        let backend = ScriptedBackend::new(vec![Script::Hang(vec!["x"])]);
        let session = ConversationSession::new(backend);
        session.submit_prompt("q").unwrap();

        let (outcome, _) = tokio::join!(
            session.request_assistant_reply_streaming(|_| {}, |_| {}),
            async { session.cancel_active() },
        );
        assert!(matches!(outcome, StreamOutcome::Cancelled(_)));
        assert_eq!(session.history().len(), 2);
    }
}
