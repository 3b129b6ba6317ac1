//! Session management
//!
//! The `SessionController` belongs to the interactive task. It owns the
//! conversation and the capture state; nothing else mutates them.
//!
//! # Architecture
//! Remote calls (capture pipeline, chat) run on background tasks. They report
//! back only by sending a `SessionEvent` on an unbounded channel, which the
//! interactive task drains and hands to `SessionController::apply`.
//! Every event carries the id of the session it was issued for; events for a
//! session that has since been reset are dropped.
//!
//! At most one remote request is in flight per session, so events are applied
//! in the order their requests were issued.

use crate::capture::{
    CaptureCoordinator, CaptureReport, CaptureState, FallbackDecision, FallbackPrompt,
};
use crate::chat::{ChatClient, ChatFailure};
use crate::conversation::{ConversationError, ConversationState, Turn};
use crate::frame::Frame;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Identifies one page session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Message from a background task to the interactive task
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// The capture pipeline needs a yes/no answer
    DecisionRequested {
        session: SessionId,
        prompt: FallbackPrompt,
        reply: oneshot::Sender<bool>,
    },
    CaptureFinished {
        session: SessionId,
        report: CaptureReport,
    },
    ChatFinished {
        session: SessionId,
        result: Result<Turn, ChatFailure>,
    },
}

impl SessionEvent {
    fn session(&self) -> SessionId {
        match self {
            SessionEvent::DecisionRequested { session, .. }
            | SessionEvent::CaptureFinished { session, .. }
            | SessionEvent::ChatFinished { session, .. } => *session,
        }
    }
}

/// What applying an event changed
#[derive(Debug)]
pub(crate) enum Applied {
    /// Capture finished; `turns` were appended
    Capture {
        status: &'static str,
        turns: Vec<Turn>,
    },
    /// The assistant turn answering the last user turn
    Reply(Turn),
    /// The user must answer `prompt` by sending on `reply`
    Decision {
        prompt: FallbackPrompt,
        reply: oneshot::Sender<bool>,
    },
    /// The event targeted a session that is no longer active
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Capture,
    Chat,
}

/// State of the active page
struct Session {
    id: SessionId,
    conversation: ConversationState,
    capture_state: CaptureState,
    pending: Option<Pending>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            conversation: ConversationState::new(),
            capture_state: CaptureState::Idle,
            pending: None,
        }
    }

    fn is_fresh(&self) -> bool {
        self.capture_state == CaptureState::Idle && self.conversation.turns().is_empty()
    }
}

/// Owns the active session and starts background work for it
pub(crate) struct SessionController {
    session: Session,
    next_id: u64,
    coordinator: Arc<CaptureCoordinator>,
    chat: Arc<ChatClient>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionController {
    /// Create a controller and the receiver its background tasks report to
    pub fn new(
        coordinator: Arc<CaptureCoordinator>,
        chat: Arc<ChatClient>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let controller = Self {
            session: Session::new(SessionId(1)),
            next_id: 2,
            coordinator,
            chat,
            events,
        };
        (controller, receiver)
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.session.conversation
    }

    pub fn capture_state(&self) -> CaptureState {
        self.session.capture_state
    }

    pub fn is_busy(&self) -> bool {
        self.session.pending.is_some()
    }

    /// Discard the active session and start an empty one
    pub fn reset(&mut self) -> SessionId {
        let id = SessionId(self.next_id);
        self.next_id += 1;
        info!(previous = %self.session.id, new = %id, "Starting new session");
        self.session = Session::new(id);
        id
    }

    /// Start processing a captured frame
    ///
    /// A session that already holds a page is replaced by a new one first.
    pub fn capture(&mut self, frame: Frame) -> Result<SessionId, SessionError> {
        if self.is_busy() {
            return Err(SessionError::Busy);
        }
        if !self.session.is_fresh() {
            self.reset();
        }

        let session = self.session.id;
        self.session.capture_state = CaptureState::Extracting;
        self.session.pending = Some(Pending::Capture);

        let coordinator = self.coordinator.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let decision = ChannelDecision {
                session,
                events: events.clone(),
            };
            let report = coordinator.process(frame, &decision).await;
            if events
                .send(SessionEvent::CaptureFinished { session, report })
                .is_err()
            {
                debug!(%session, "Event receiver closed, dropping capture result");
            }
        });

        info!(%session, "Capture started");
        Ok(session)
    }

    /// Append a user turn and ask the chat service for a reply
    pub fn send(&mut self, text: &str) -> Result<Turn, SessionError> {
        if self.is_busy() {
            return Err(SessionError::Busy);
        }
        let turn = self.session.conversation.append_user(text)?.clone();

        let session = self.session.id;
        let snapshot = self.session.conversation.clone();
        self.session.pending = Some(Pending::Chat);

        let chat = self.chat.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = chat.complete(&snapshot).await;
            if events
                .send(SessionEvent::ChatFinished { session, result })
                .is_err()
            {
                debug!(%session, "Event receiver closed, dropping chat result");
            }
        });

        Ok(turn)
    }

    /// Apply an event from a background task
    pub fn apply(&mut self, event: SessionEvent) -> Applied {
        if event.session() != self.session.id {
            warn!(
                event_session = %event.session(),
                active = %self.session.id,
                "Discarding result for an inactive session"
            );
            // Dropping a decision reply makes the pipeline treat it as "no"
            return Applied::Stale;
        }

        match event {
            SessionEvent::DecisionRequested { prompt, reply, .. } => {
                Applied::Decision { prompt, reply }
            }
            SessionEvent::CaptureFinished { report, .. } => self.apply_capture(report),
            SessionEvent::ChatFinished { result, .. } => {
                self.session.pending = None;
                let content = match result {
                    Ok(turn) => turn.content,
                    Err(failure) => {
                        warn!(error = %failure.error(), "Chat failed");
                        failure.to_assistant_message()
                    }
                };
                Applied::Reply(self.session.conversation.append_assistant(content).clone())
            }
        }
    }

    fn apply_capture(&mut self, report: CaptureReport) -> Applied {
        self.session.pending = None;
        self.session.capture_state = report.final_state();

        if let Some(grounding) = report.grounding {
            if let Err(e) = self.session.conversation.initialize(grounding) {
                warn!("Ignoring grounding text: {}", e);
            }
        }

        let turns = report
            .notices
            .into_iter()
            .map(|notice| self.session.conversation.append_assistant(notice).clone())
            .collect();

        info!(session = %self.session.id, outcome = ?report.outcome, "Capture finished");
        Applied::Capture {
            status: report.outcome.status(),
            turns,
        }
    }
}

/// Fallback decision answered by the interactive task
struct ChannelDecision {
    session: SessionId,
    events: mpsc::UnboundedSender<SessionEvent>,
}

#[async_trait]
impl FallbackDecision for ChannelDecision {
    async fn offer_scene_description(&self, prompt: FallbackPrompt) -> bool {
        let (reply, answer) = oneshot::channel();
        let request = SessionEvent::DecisionRequested {
            session: self.session,
            prompt,
            reply,
        };
        if self.events.send(request).is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }
}

/// Session errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum SessionError {
    #[error("Still working on the previous request, please wait")]
    Busy,

    #[error(transparent)]
    Conversation(#[from] ConversationError),
}
