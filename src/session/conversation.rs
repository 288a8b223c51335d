//! The conversation orchestrator.
//!
//! [`ConversationSession`] wires the access gate, context loader, classifier,
//! apology detector, moderation state machine, generative model and renderer
//! around one [`Session`]. Display state lives in listeners; this type only
//! emits [`SessionEvent`]s.
//!
//! A turn is split in two. [`ConversationSession::begin`] runs synchronously:
//! it checks the preconditions, claims the in-flight flag and records the
//! user message. [`Turn::run`] then does the slow part (classification,
//! apology check, transition, generation) under an abort handle so
//! [`ConversationSession::cancel`] can stop it at any suspension point.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{AbortHandle, AbortRegistration, Abortable};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::state::{ContextState, Message, Role, Session, SharedSession};
use crate::access::{AccessGate, Credential, CredentialPool};
use crate::config::ChatConfig;
use crate::context::{ContextLoader, ContextReady, ContextSource};
use crate::errors::{
    ConfigError, ContextLoadError, GenerationError, UnlockError, GENERATION_FAILURE_TEXT,
};
use crate::events::{BotMessageKind, EventEmitter, SessionEvent, SessionListener};
use crate::llms::{GeminiClient, GenerativeModel};
use crate::moderation::{
    ApologyDetector, ApologyStrategy, KeywordApologyDetector, Mode, ModelApologyDetector,
    ModerationPolicy, ModerationStateMachine, RudenessClassifier, TurnSignals, Verdict,
    APOLOGY_ACKNOWLEDGMENT, DEFAULT_CLASSIFIER_TIMEOUT,
};
use crate::render::{HtmlEscapeRenderer, Renderer};
use crate::utilities::prompts::PromptTemplates;

/// Shown (and recorded, in mentor mode) when the model answers with nothing.
pub const EMPTY_REPLY_TEXT: &str = "No response—let’s try that again with focus.";

/// Shown when the user stops a turn.
pub const CANCELLED_TEXT: &str = "Stopped by user—let’s regroup and proceed.";

/// Why a message was not admitted as a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendRejected {
    #[error("message is empty")]
    EmptyMessage,

    #[error("a reply is already being generated")]
    GenerationInFlight,

    #[error("access has not been granted")]
    AccessNotGranted,

    #[error("context is still loading")]
    ContextLoading,

    #[error("context is not loaded")]
    ContextUnavailable,
}

impl SendRejected {
    /// Fixed notice for the user, or `None` when the send is silently ignored.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::EmptyMessage | Self::GenerationInFlight => None,
            Self::AccessNotGranted => {
                Some("Submit a valid passkey first—discipline starts with access.")
            }
            Self::ContextLoading => Some("Hold on—context’s still loading. Patience is a virtue."),
            Self::ContextUnavailable => {
                Some("Context didn’t load—check the file. We can’t proceed without structure.")
            }
        }
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered. `reply` is the raw text (fallback text if empty).
    Replied { verdict: Verdict, reply: String },
    /// An apology reset roast mode; no model call was made.
    Acknowledged,
    /// [`ConversationSession::cancel`] stopped the turn; nothing was recorded.
    Cancelled,
    /// The generation call failed; history is unchanged.
    Failed(GenerationError),
}

/// Serializable view of the session for UIs.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub access_granted: bool,
    pub context: &'static str,
    pub generation_in_flight: bool,
    pub mode: Mode,
    pub rude_count: u32,
    pub history: Vec<Message>,
}

// ----------------------------------------------------------------------------
// ConversationSession
// ----------------------------------------------------------------------------

/// One chat session and its collaborators. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    session: SharedSession,
    gate: Arc<AccessGate>,
    loader: Arc<ContextLoader>,
    classifier: Arc<RudenessClassifier>,
    apology: Arc<dyn ApologyDetector>,
    machine: ModerationStateMachine,
    model: Arc<dyn GenerativeModel>,
    templates: Arc<PromptTemplates>,
    renderer: Arc<dyn Renderer>,
    events: EventEmitter,
}

impl ConversationSession {
    pub fn builder(
        gate: AccessGate,
        source: Arc<dyn ContextSource>,
        model: Arc<dyn GenerativeModel>,
    ) -> ConversationSessionBuilder {
        ConversationSessionBuilder {
            gate,
            source,
            model,
            templates: PromptTemplates::default(),
            classifier_timeout: DEFAULT_CLASSIFIER_TIMEOUT,
            apology_strategy: ApologyStrategy::default(),
            policy: ModerationPolicy::default(),
            renderer: Arc::new(HtmlEscapeRenderer),
        }
    }

    /// Assemble a session against the Gemini API from `config`.
    pub fn from_config(config: &ChatConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = CredentialPool::from_encoded(&config.credentials)?;
        let gate = AccessGate::new(&config.passkey_sha256, pool)?;
        let source = config.context.build(config.request_timeout())?;
        let model = GeminiClient::new(&config.model, &config.api_base_url, config.request_timeout())?
            .with_max_retries(config.max_retries);
        log::info!(
            "chat session: model={} apology={:?} context={}",
            config.model,
            config.apology_strategy,
            source.describe()
        );
        Ok(Self::builder(gate, source, Arc::new(model))
            .with_templates(PromptTemplates::new(config.persona.clone()))
            .with_classifier_timeout(config.classifier_timeout())
            .with_apology_strategy(config.apology_strategy)
            .with_policy(config.moderation)
            .build())
    }

    /// Register a listener for every event this session emits.
    pub fn subscribe(&self, listener: Arc<dyn SessionListener>) {
        self.events.subscribe(listener);
    }

    /// The underlying state, for inspection.
    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let s = self.session.lock();
        SessionSnapshot {
            id: s.id(),
            access_granted: s.access_granted(),
            context: s.context().as_str(),
            generation_in_flight: s.generation_in_flight(),
            mode: s.moderation().mode(),
            rude_count: s.moderation().rude_count(),
            history: s.history().to_vec(),
        }
    }

    // ---- access and context ----

    /// Submit the passkey and, once accepted, load the context document.
    pub async fn unlock(&self, secret: &str) -> Result<ContextReady, UnlockError> {
        let verified = {
            let mut s = self.session.lock();
            self.gate.verify(&mut s, secret)
        };
        match verified {
            Ok(()) => self.events.emit(SessionEvent::AccessGranted),
            Err(e) => {
                self.events.emit(SessionEvent::AccessDenied {
                    message: e.user_message().to_string(),
                });
                return Err(e.into());
            }
        }
        Ok(self.load_context().await?)
    }

    /// Load the context document. Reports progress through events.
    ///
    /// A load while one is running, or after one succeeded, does nothing.
    pub async fn load_context(&self) -> Result<ContextReady, ContextLoadError> {
        let will_load = {
            let s = self.session.lock();
            s.access_granted()
                && matches!(s.context(), ContextState::Unloaded | ContextState::Unavailable)
        };
        if will_load {
            self.events.emit(SessionEvent::ContextLoading);
        }

        match self.loader.load(&self.session).await {
            Ok(ready) => {
                self.events.emit(SessionEvent::ContextLoaded {
                    suggestions: ready.suggestions.clone(),
                });
                self.say(BotMessageKind::Confirmation, &ready.confirmation);
                Ok(ready)
            }
            Err(e) if e.is_noop() => {
                log::debug!("context load skipped: {}", e);
                Err(e)
            }
            Err(e) => {
                self.events.emit(SessionEvent::ContextFailed {
                    message: e.user_message().to_string(),
                });
                Err(e)
            }
        }
    }

    // ---- turns ----

    /// Admit `message` as a new turn.
    ///
    /// Empty messages and messages sent while a turn is in flight are
    /// ignored. Then, in order: access must be granted, the context must not
    /// be loading, and it must be loaded. Rejections with a notice emit it as
    /// a bot message. On success the user message is already in history.
    pub fn begin(&self, message: &str) -> Result<Turn, SendRejected> {
        let admitted = self.admit(message);
        if let Err(rejected) = &admitted {
            log::debug!("send rejected: {}", rejected);
            if let Some(text) = rejected.user_message() {
                self.say(BotMessageKind::Notice, text);
            }
        }
        admitted
    }

    fn admit(&self, message: &str) -> Result<Turn, SendRejected> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SendRejected::EmptyMessage);
        }

        let (abort, registration) = AbortHandle::new_pair();
        let (id, credential, context) = {
            let mut s = self.session.lock();
            if s.generation_in_flight() {
                return Err(SendRejected::GenerationInFlight);
            }
            let credential = s
                .credential()
                .cloned()
                .ok_or(SendRejected::AccessNotGranted)?;
            let context = match s.context() {
                ContextState::Loading => return Err(SendRejected::ContextLoading),
                ContextState::Loaded(text) => Arc::clone(text),
                ContextState::Unloaded | ContextState::Unavailable => {
                    return Err(SendRejected::ContextUnavailable)
                }
            };
            let id = s
                .claim_generation(abort)
                .ok_or(SendRejected::GenerationInFlight)?;
            s.push_message(Message::new(Role::User, message));
            (id, credential, context)
        };

        self.events.emit(SessionEvent::UserMessage {
            content: message.to_string(),
        });
        Ok(Turn {
            conversation: self.clone(),
            id,
            message: message.to_string(),
            credential,
            context,
            registration: Some(registration),
        })
    }

    /// Admit and run a turn to completion.
    pub async fn send(&self, message: &str) -> Result<TurnOutcome, SendRejected> {
        Ok(self.begin(message)?.run().await)
    }

    /// Stop the turn in flight. No-op (returns `false`) when idle.
    ///
    /// The flag is cleared immediately; whatever the turn produces afterwards
    /// is discarded and history keeps only the user message.
    pub fn cancel(&self) -> bool {
        let aborted = self.session.lock().abort_generation();
        if aborted {
            log::info!("generation cancelled by user");
            self.events.emit(SessionEvent::Cancelled {
                message: CANCELLED_TEXT.to_string(),
            });
            self.events.emit(SessionEvent::GenerationFinished);
        }
        aborted
    }

    /// Empty history and reset moderation. No-op while a turn is in flight.
    pub fn clear(&self) -> bool {
        {
            let mut s = self.session.lock();
            if s.generation_in_flight() {
                return false;
            }
            s.reset_conversation();
        }
        log::info!("conversation cleared");
        self.events.emit(SessionEvent::Cleared);
        true
    }

    fn say(&self, kind: BotMessageKind, raw: &str) {
        self.events.emit(SessionEvent::BotMessage {
            kind,
            raw: raw.to_string(),
            markup: self.renderer.render(raw),
        });
    }
}

// ----------------------------------------------------------------------------
// Builder
// ----------------------------------------------------------------------------

/// Collaborator overrides for [`ConversationSession`].
pub struct ConversationSessionBuilder {
    gate: AccessGate,
    source: Arc<dyn ContextSource>,
    model: Arc<dyn GenerativeModel>,
    templates: PromptTemplates,
    classifier_timeout: Duration,
    apology_strategy: ApologyStrategy,
    policy: ModerationPolicy,
    renderer: Arc<dyn Renderer>,
}

impl ConversationSessionBuilder {
    pub fn with_templates(mut self, templates: PromptTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_classifier_timeout(mut self, timeout: Duration) -> Self {
        self.classifier_timeout = timeout;
        self
    }

    pub fn with_apology_strategy(mut self, strategy: ApologyStrategy) -> Self {
        self.apology_strategy = strategy;
        self
    }

    pub fn with_policy(mut self, policy: ModerationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn build(self) -> ConversationSession {
        let templates = Arc::new(self.templates);
        let classifier = RudenessClassifier::new(Arc::clone(&self.model), Arc::clone(&templates))
            .with_timeout(self.classifier_timeout);
        let apology: Arc<dyn ApologyDetector> = match self.apology_strategy {
            ApologyStrategy::Keyword => Arc::new(KeywordApologyDetector),
            ApologyStrategy::Model => Arc::new(ModelApologyDetector::new(
                Arc::clone(&self.model),
                Arc::clone(&templates),
                self.classifier_timeout,
            )),
        };
        let loader = ContextLoader::new(self.source, Arc::clone(&self.model), Arc::clone(&templates));
        ConversationSession {
            session: Session::new().shared(),
            gate: Arc::new(self.gate),
            loader: Arc::new(loader),
            classifier: Arc::new(classifier),
            apology,
            machine: ModerationStateMachine::new(self.policy),
            model: self.model,
            templates,
            renderer: self.renderer,
            events: EventEmitter::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Turn
// ----------------------------------------------------------------------------

/// An admitted turn that holds the in-flight flag.
///
/// Dropping it without running (or mid-run) releases the flag.
#[derive(Debug)]
pub struct Turn {
    conversation: ConversationSession,
    id: u64,
    message: String,
    credential: Credential,
    context: Arc<str>,
    registration: Option<AbortRegistration>,
}

impl Turn {
    /// The trimmed user message this turn answers.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Classify, check for an apology, transition, then generate.
    pub async fn run(mut self) -> TurnOutcome {
        let Some(registration) = self.registration.take() else {
            return TurnOutcome::Cancelled;
        };
        self.conversation.events.emit(SessionEvent::GenerationStarted);
        match Abortable::new(self.process(), registration).await {
            Ok(outcome) => outcome,
            Err(_aborted) => {
                log::debug!("turn {} aborted", self.id);
                TurnOutcome::Cancelled
            }
        }
    }

    async fn process(&self) -> TurnOutcome {
        let c = &self.conversation;
        let rudeness = c.classifier.classify(&self.message, &self.credential).await;
        let apology = c.apology.is_apology(&self.message, &self.credential).await;

        let (transition, history) = {
            let mut s = c.session.lock();
            if !s.holds_generation(self.id) {
                return TurnOutcome::Cancelled;
            }
            let transition = c
                .machine
                .transition(s.moderation_mut(), TurnSignals { rudeness, apology });
            let history = match transition.verdict {
                Verdict::Mentor => s.history().to_vec(),
                Verdict::Roast | Verdict::Acknowledge => Vec::new(),
            };
            (transition, history)
        };
        if transition.mode_changed() {
            c.events.emit(SessionEvent::ModeChanged {
                from: transition.from,
                to: transition.to,
                rude_count: transition.rude_count,
            });
        }

        let prompt = match transition.verdict {
            Verdict::Acknowledge => {
                if !c.session.lock().release_generation(self.id) {
                    return TurnOutcome::Cancelled;
                }
                c.say(BotMessageKind::Acknowledgment, APOLOGY_ACKNOWLEDGMENT);
                c.events.emit(SessionEvent::GenerationFinished);
                return TurnOutcome::Acknowledged;
            }
            Verdict::Roast => c.templates.roast(&self.message),
            Verdict::Mentor => c.templates.mentor(&self.context, &history, &self.message),
        };

        let result = match prompt {
            Ok(prompt) => c.model.generate(&prompt, &self.credential).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(reply) => {
                let reply = if reply.trim().is_empty() {
                    EMPTY_REPLY_TEXT.to_string()
                } else {
                    reply
                };
                {
                    let mut s = c.session.lock();
                    if !s.release_generation(self.id) {
                        log::debug!("turn {} finished after cancel; reply discarded", self.id);
                        return TurnOutcome::Cancelled;
                    }
                    if transition.verdict.records_reply() {
                        s.push_message(Message::new(Role::Assistant, reply.clone()));
                    }
                }
                let kind = match transition.verdict {
                    Verdict::Roast => BotMessageKind::Roast,
                    _ => BotMessageKind::Reply,
                };
                c.say(kind, &reply);
                c.events.emit(SessionEvent::GenerationFinished);
                TurnOutcome::Replied {
                    verdict: transition.verdict,
                    reply,
                }
            }
            Err(e) => {
                log::error!("generation failed: {}", e);
                if !c.session.lock().release_generation(self.id) {
                    return TurnOutcome::Cancelled;
                }
                c.say(BotMessageKind::Error, GENERATION_FAILURE_TEXT);
                c.events.emit(SessionEvent::GenerationFinished);
                TurnOutcome::Failed(e)
            }
        }
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        self.conversation.session.lock().release_generation(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::sha256_hex;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    const PASSKEY: &str = "open sesame";
    // "Lab safety first"
    const CONTEXT_B64: &str = "TGFiIHNhZmV0eSBmaXJzdA==";

    #[derive(Debug)]
    struct StaticSource(Result<String, ContextLoadError>);

    #[async_trait]
    impl ContextSource for StaticSource {
        async fn fetch(&self) -> Result<String, ContextLoadError> {
            self.0.clone()
        }

        fn describe(&self) -> String {
            "static".to_string()
        }
    }

    /// Answers each prompt kind from a fixed script and records what it saw.
    #[derive(Debug)]
    struct ScriptedModel {
        mentor: Result<String, GenerationError>,
        block_mentor: bool,
        mentor_started: Notify,
        stall_confirmation: AtomicBool,
        calls: Mutex<Vec<&'static str>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Self {
            Self {
                mentor: Ok(reply.to_string()),
                block_mentor: false,
                mentor_started: Notify::new(),
                stall_confirmation: AtomicBool::new(false),
                calls: Mutex::new(Vec::new()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing(error: GenerationError) -> Self {
            Self {
                mentor: Err(error),
                ..Self::replying("")
            }
        }

        fn blocking() -> Self {
            Self {
                block_mentor: true,
                ..Self::replying("never")
            }
        }

        fn count(&self, kind: &str) -> usize {
            self.calls.lock().iter().filter(|k| **k == kind).count()
        }
    }

    #[async_trait]
    impl GenerativeModel for ScriptedModel {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &str, _: &Credential) -> Result<String, GenerationError> {
            self.prompts.lock().push(prompt.to_string());
            let kind = if prompt.starts_with("Rate the following message") {
                "rudeness"
            } else if prompt.starts_with("Does the following message") {
                "apology"
            } else if prompt.starts_with("Generate a short confirmation") {
                "confirmation"
            } else if prompt.starts_with("Given the following context") {
                "suggestions"
            } else if prompt.starts_with("The user said:") {
                "roast"
            } else {
                "mentor"
            };
            self.calls.lock().push(kind);
            match kind {
                "rudeness" if prompt.contains("idiot") => Ok("9".into()),
                "rudeness" => Ok("1".into()),
                "apology" => Ok("no".into()),
                "confirmation" if self.stall_confirmation.load(Ordering::SeqCst) => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
                "confirmation" => Ok("We are good to go!".into()),
                "suggestions" => Ok("Q1?\nQ2?".into()),
                "roast" => Ok("Roast reply".into()),
                _ if self.block_mentor => {
                    self.mentor_started.notify_one();
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
                _ => self.mentor.clone(),
            }
        }
    }

    fn conversation(model: Arc<ScriptedModel>, source: Result<&str, ContextLoadError>) -> ConversationSession {
        let pool = CredentialPool::from_encoded(&["a2V5"]).unwrap();
        let gate = AccessGate::new(&sha256_hex(PASSKEY), pool).unwrap();
        ConversationSession::builder(
            gate,
            Arc::new(StaticSource(source.map(str::to_string))),
            model,
        )
        .build()
    }

    async fn ready(model: Arc<ScriptedModel>) -> ConversationSession {
        let c = conversation(model, Ok(CONTEXT_B64));
        c.unlock(PASSKEY).await.unwrap();
        c
    }

    fn record_events(c: &ConversationSession) -> Arc<Mutex<Vec<SessionEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        c.subscribe(Arc::new(move |e: &SessionEvent| sink.lock().push(e.clone())));
        seen
    }

    #[tokio::test]
    async fn test_send_before_unlock_is_rejected() {
        let model = Arc::new(ScriptedModel::replying("hi"));
        let c = conversation(Arc::clone(&model), Ok(CONTEXT_B64));
        let events = record_events(&c);
        assert_eq!(c.send("hello").await.unwrap_err(), SendRejected::AccessNotGranted);
        assert!(c.snapshot().history.is_empty());
        assert!(model.calls.lock().is_empty());
        assert!(matches!(
            &events.lock()[0],
            SessionEvent::BotMessage { kind: BotMessageKind::Notice, raw, .. }
                if raw.starts_with("Submit a valid passkey first")
        ));
    }

    #[tokio::test]
    async fn test_wrong_passkey() {
        let model = Arc::new(ScriptedModel::replying("hi"));
        let c = conversation(model, Ok(CONTEXT_B64));
        let events = record_events(&c);
        let err = c.unlock("wrong").await.unwrap_err();
        assert!(matches!(err, UnlockError::Access(_)));
        assert!(!c.snapshot().access_granted);
        assert!(matches!(events.lock()[0], SessionEvent::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn test_unlock_loads_context() {
        let model = Arc::new(ScriptedModel::replying("hi"));
        let c = conversation(Arc::clone(&model), Ok(CONTEXT_B64));
        let events = record_events(&c);
        let ready = c.unlock(PASSKEY).await.unwrap();
        assert_eq!(ready.suggestions, vec!["Q1?", "Q2?"]);
        let snapshot = c.snapshot();
        assert!(snapshot.access_granted);
        assert_eq!(snapshot.context, "loaded");

        let events = events.lock();
        assert_eq!(events[0], SessionEvent::AccessGranted);
        assert_eq!(events[1], SessionEvent::ContextLoading);
        assert!(matches!(events[2], SessionEvent::ContextLoaded { .. }));
        assert!(matches!(
            events[3],
            SessionEvent::BotMessage { kind: BotMessageKind::Confirmation, .. }
        ));
    }

    #[tokio::test]
    async fn test_context_404_blocks_send_before_classifier() {
        let model = Arc::new(ScriptedModel::replying("hi"));
        let c = conversation(
            Arc::clone(&model),
            Err(ContextLoadError::Status { status: 404 }),
        );
        let err = c.unlock(PASSKEY).await.unwrap_err();
        assert_eq!(err, UnlockError::Context(ContextLoadError::Status { status: 404 }));
        assert_eq!(c.snapshot().context, "unavailable");

        assert_eq!(c.send("hello").await.unwrap_err(), SendRejected::ContextUnavailable);
        assert_eq!(model.count("rudeness"), 0);
        assert!(c.snapshot().history.is_empty());
    }

    #[tokio::test]
    async fn test_mentor_reply_is_recorded() {
        let model = Arc::new(ScriptedModel::replying("## Start with safety goggles"));
        let c = ready(Arc::clone(&model)).await;
        let events = record_events(&c);

        let outcome = c.send("  How do I plan a lab?  ").await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Replied {
                verdict: Verdict::Mentor,
                reply: "## Start with safety goggles".into()
            }
        );
        let snapshot = c.snapshot();
        assert!(!snapshot.generation_in_flight);
        assert_eq!(snapshot.history.len(), 2);
        assert_eq!(snapshot.history[0].content(), "How do I plan a lab?");
        assert_eq!(snapshot.history[1].role(), Role::Assistant);

        let mentor_prompt = model.prompts.lock().last().cloned().unwrap();
        assert!(mentor_prompt.starts_with("Context: Lab safety first"));
        assert!(mentor_prompt.contains("User: How do I plan a lab?\n"));
        assert!(mentor_prompt.contains("Current Input: How do I plan a lab?"));

        let events = events.lock();
        assert_eq!(events[0], SessionEvent::UserMessage { content: "How do I plan a lab?".into() });
        assert_eq!(events[1], SessionEvent::GenerationStarted);
        assert!(matches!(
            &events[2],
            SessionEvent::BotMessage { kind: BotMessageKind::Reply, markup, .. } if markup == "## Start with safety goggles"
        ));
        assert_eq!(events[3], SessionEvent::GenerationFinished);
    }

    #[tokio::test]
    async fn test_rude_streak_then_apology() {
        let model = Arc::new(ScriptedModel::replying("Mentor reply"));
        let c = ready(Arc::clone(&model)).await;
        let events = record_events(&c);

        let mut modes = Vec::new();
        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(c.send("you idiot").await.unwrap());
            modes.push(c.snapshot().mode);
        }
        outcomes.push(c.send("I'm sorry").await.unwrap());
        modes.push(c.snapshot().mode);

        assert_eq!(
            modes,
            vec![
                Mode::Normal,
                Mode::Normal,
                Mode::Normal,
                Mode::Roast,
                Mode::Roast,
                Mode::Normal
            ]
        );
        assert_eq!(c.snapshot().rude_count, 0);
        assert_eq!(outcomes[5], TurnOutcome::Acknowledged);
        assert!(matches!(
            &outcomes[3],
            TurnOutcome::Replied { verdict: Verdict::Roast, .. }
        ));

        // Three mentor replies recorded; roast replies and the acknowledgment are not.
        let history = c.snapshot().history;
        assert_eq!(history.len(), 6 + 3);
        assert!(history.iter().all(|m| m.content() != "Roast reply"));
        assert!(history.iter().all(|m| m.content() != APOLOGY_ACKNOWLEDGMENT));

        // The apology turn made no generation call.
        assert_eq!(model.count("mentor"), 3);
        assert_eq!(model.count("roast"), 2);
        assert_eq!(model.count("rudeness"), 6);

        let mode_changes: Vec<_> = events
            .lock()
            .iter()
            .filter(|e| matches!(e, SessionEvent::ModeChanged { .. }))
            .cloned()
            .collect();
        assert_eq!(
            mode_changes,
            vec![
                SessionEvent::ModeChanged {
                    from: Mode::Normal,
                    to: Mode::Roast,
                    rude_count: 4
                },
                SessionEvent::ModeChanged {
                    from: Mode::Roast,
                    to: Mode::Normal,
                    rude_count: 0
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_reply_uses_fallback() {
        let model = Arc::new(ScriptedModel::replying("   "));
        let c = ready(model).await;
        let outcome = c.send("hello").await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Replied {
                verdict: Verdict::Mentor,
                reply: EMPTY_REPLY_TEXT.into()
            }
        );
        assert_eq!(c.snapshot().history[1].content(), EMPTY_REPLY_TEXT);
    }

    #[tokio::test]
    async fn test_generation_failure_leaves_history() {
        let model = Arc::new(ScriptedModel::failing(GenerationError::Status {
            status: 500,
            body: "boom".into(),
        }));
        let c = ready(model).await;
        let events = record_events(&c);
        let outcome = c.send("hello").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Failed(GenerationError::Status { status: 500, .. })));

        let snapshot = c.snapshot();
        assert_eq!(snapshot.history.len(), 1);
        assert!(!snapshot.generation_in_flight);
        assert!(events.lock().iter().any(|e| matches!(
            e,
            SessionEvent::BotMessage { kind: BotMessageKind::Error, raw, .. } if raw == GENERATION_FAILURE_TEXT
        )));
    }

    #[tokio::test]
    async fn test_second_send_while_in_flight_is_ignored() {
        let model = Arc::new(ScriptedModel::replying("hi"));
        let c = ready(Arc::clone(&model)).await;
        let turn = c.begin("first").unwrap();
        assert!(c.snapshot().generation_in_flight);
        assert_eq!(c.begin("second").unwrap_err(), SendRejected::GenerationInFlight);
        assert_eq!(c.snapshot().history.len(), 1);
        assert!(!c.clear());

        turn.run().await;
        assert!(!c.snapshot().generation_in_flight);
        assert_eq!(model.count("mentor"), 1);
    }

    #[tokio::test]
    async fn test_dropped_turn_releases_flag() {
        let c = ready(Arc::new(ScriptedModel::replying("hi"))).await;
        let turn = c.begin("first").unwrap();
        drop(turn);
        assert!(!c.snapshot().generation_in_flight);
        assert!(c.begin("second").is_ok());
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_noop() {
        let c = ready(Arc::new(ScriptedModel::replying("hi"))).await;
        let events = record_events(&c);
        assert!(!c.cancel());
        assert!(events.lock().is_empty());
        c.send("hello").await.unwrap();
        assert!(!c.cancel());
        assert_eq!(c.snapshot().history.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_during_generation_discards_reply() {
        let model = Arc::new(ScriptedModel::blocking());
        let c = ready(Arc::clone(&model)).await;
        let events = record_events(&c);

        let turn = c.begin("explain titration").unwrap();
        let handle = tokio::spawn(turn.run());
        model.mentor_started.notified().await;

        assert!(c.cancel());
        assert!(!c.snapshot().generation_in_flight);
        assert_eq!(handle.await.unwrap(), TurnOutcome::Cancelled);

        let snapshot = c.snapshot();
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(snapshot.history[0].content(), "explain titration");
        assert!(events.lock().iter().any(|e| matches!(
            e,
            SessionEvent::Cancelled { message } if message == CANCELLED_TEXT
        )));

        // Session is interactive again.
        assert!(!c.cancel());
        assert!(c.begin("next").is_ok());
    }

    #[tokio::test]
    async fn test_clear_resets_history_and_moderation() {
        let c = ready(Arc::new(ScriptedModel::replying("hi"))).await;
        for _ in 0..4 {
            c.send("you idiot").await.unwrap();
        }
        assert_eq!(c.snapshot().mode, Mode::Roast);

        assert!(c.clear());
        let snapshot = c.snapshot();
        assert!(snapshot.history.is_empty());
        assert_eq!(snapshot.mode, Mode::Normal);
        assert_eq!(snapshot.rude_count, 0);
        assert!(snapshot.access_granted);
        assert_eq!(snapshot.context, "loaded");
    }

    #[tokio::test]
    async fn test_empty_message_is_ignored_silently() {
        let c = ready(Arc::new(ScriptedModel::replying("hi"))).await;
        let events = record_events(&c);
        assert_eq!(c.send("   ").await.unwrap_err(), SendRejected::EmptyMessage);
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_model_apology_strategy() {
        let model = Arc::new(ScriptedModel::replying("hi"));
        let pool = CredentialPool::from_encoded(&["a2V5"]).unwrap();
        let gate = AccessGate::new(&sha256_hex(PASSKEY), pool).unwrap();
        let c = ConversationSession::builder(
            gate,
            Arc::new(StaticSource(Ok(CONTEXT_B64.to_string()))),
            Arc::clone(&model) as Arc<dyn GenerativeModel>,
        )
        .with_apology_strategy(ApologyStrategy::Model)
        .build();
        c.unlock(PASSKEY).await.unwrap();
        c.send("sorry").await.unwrap();
        assert_eq!(model.count("apology"), 1);
    }

    #[tokio::test]
    async fn test_unlock_dropped_mid_load_recovers() {
        let model = Arc::new(ScriptedModel::replying("Mentor reply"));
        model.stall_confirmation.store(true, Ordering::SeqCst);
        let c = conversation(Arc::clone(&model), Ok(CONTEXT_B64));

        let task = tokio::spawn({
            let c = c.clone();
            async move { c.unlock(PASSKEY).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(c.snapshot().context, "loading");
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert!(c.snapshot().access_granted);
        assert_eq!(c.snapshot().context, "unavailable");
        assert_eq!(c.send("hello").await.unwrap_err(), SendRejected::ContextUnavailable);

        model.stall_confirmation.store(false, Ordering::SeqCst);
        let ready = c.load_context().await.unwrap();
        assert_eq!(ready.confirmation, "We are good to go!");
        assert!(matches!(c.send("hello").await, Ok(TurnOutcome::Replied { .. })));
    }
}
