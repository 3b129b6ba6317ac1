//! Capture-to-understanding pipeline
//!
//! Turns one captured frame into the grounding text for a discussion:
//!
//! ```text
//! Idle -> Extracting -> TextFound ------------------------------> Grounded
//!                    -> EmptyTextDeciding -------+-- declined --> Grounded
//!                    -> ExtractionFailedDeciding +-- accepted --> DescribingScene -> Grounded | Idle
//! ```
//!
//! Whether to fall back to a scene description is asked through an injected
//! `FallbackDecision`, so the coordinator never talks to a UI directly.
//! Extraction and description run on their own tasks; a panic in either is
//! caught here and turned into an ordinary failure outcome.

pub(crate) mod messages;

use crate::conversation::GroundingText;
use crate::error::ServiceError;
use crate::extraction::{ExtractionResult, TextExtractor};
use crate::frame::Frame;
use crate::scene::SceneDescriber;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

/// Pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureState {
    Idle,
    Extracting,
    TextFound,
    EmptyTextDeciding,
    ExtractionFailedDeciding,
    DescribingScene,
    Grounded,
}

/// Question put to the user before falling back to a scene description
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FallbackPrompt {
    /// The service answered but found no text
    NoText,
    /// Extraction never succeeded
    ExtractionFailed { reason: String },
}

impl fmt::Display for FallbackPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackPrompt::NoText => write!(
                f,
                "No text detected in the image. I can try to describe the scene. Do you want to try?"
            ),
            FallbackPrompt::ExtractionFailed { reason } => write!(
                f,
                "I couldn't read text from the image ({}). I can try to describe the scene. Do you want to try?",
                reason
            ),
        }
    }
}

/// Yes/no answer to a fallback offer
#[async_trait]
pub(crate) trait FallbackDecision: Send + Sync {
    async fn offer_scene_description(&self, prompt: FallbackPrompt) -> bool;
}

/// How a capture ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureOutcome {
    TextFound,
    SceneDescribed,
    /// The user declined the scene fallback
    Declined,
    /// The scene pipeline crashed
    DescriptionFailed,
}

impl CaptureOutcome {
    /// Short status line for the UI
    pub fn status(&self) -> &'static str {
        match self {
            CaptureOutcome::TextFound => "Text extracted",
            CaptureOutcome::SceneDescribed => "Scene described",
            CaptureOutcome::Declined => "No text found",
            CaptureOutcome::DescriptionFailed => "Scene description failed",
        }
    }
}

/// Result of processing one frame
#[derive(Debug, Clone)]
pub(crate) struct CaptureReport {
    pub outcome: CaptureOutcome,
    /// Set only when there is something to discuss
    pub grounding: Option<GroundingText>,
    /// Assistant turns to show, in order
    pub notices: Vec<String>,
    /// Every state entered, starting with `Extracting`
    pub states: Vec<CaptureState>,
}

impl CaptureReport {
    pub fn final_state(&self) -> CaptureState {
        self.states.last().copied().unwrap_or(CaptureState::Idle)
    }
}

/// Records state transitions while a frame is processed
struct Transitions {
    states: Vec<CaptureState>,
}

impl Transitions {
    fn start() -> Self {
        let mut transitions = Self { states: Vec::new() };
        transitions.enter(CaptureState::Extracting);
        transitions
    }

    fn enter(&mut self, state: CaptureState) {
        info!(from = ?self.states.last(), to = ?state, "Capture state changed");
        self.states.push(state);
    }

    fn finish(
        mut self,
        state: CaptureState,
        outcome: CaptureOutcome,
        grounding: Option<GroundingText>,
        notices: Vec<String>,
    ) -> CaptureReport {
        self.enter(state);
        CaptureReport {
            outcome,
            grounding,
            notices,
            states: self.states,
        }
    }
}

/// Orchestrates extraction and the scene fallback
pub(crate) struct CaptureCoordinator {
    extractor: Arc<TextExtractor>,
    describer: Arc<SceneDescriber>,
}

impl CaptureCoordinator {
    pub fn new(extractor: Arc<TextExtractor>, describer: Arc<SceneDescriber>) -> Self {
        Self {
            extractor,
            describer,
        }
    }

    /// Process one frame into a grounding text and the assistant turns to show
    ///
    /// The frame is released when this returns, whatever the outcome.
    pub async fn process(&self, frame: Frame, decision: &dyn FallbackDecision) -> CaptureReport {
        let frame = Arc::new(frame);
        let mut transitions = Transitions::start();

        let prompt = match self.extract(frame.clone()).await {
            ExtractionResult::Text(text) => {
                transitions.enter(CaptureState::TextFound);
                let notice = messages::text_found(&text);
                return transitions.finish(
                    CaptureState::Grounded,
                    CaptureOutcome::TextFound,
                    Some(GroundingText::new(text)),
                    vec![notice],
                );
            }
            ExtractionResult::Empty => {
                transitions.enter(CaptureState::EmptyTextDeciding);
                FallbackPrompt::NoText
            }
            ExtractionResult::Failed(e) => {
                transitions.enter(CaptureState::ExtractionFailedDeciding);
                FallbackPrompt::ExtractionFailed {
                    reason: e.to_string(),
                }
            }
        };

        if !decision.offer_scene_description(prompt).await {
            info!("Scene description declined");
            return transitions.finish(
                CaptureState::Grounded,
                CaptureOutcome::Declined,
                None,
                vec![messages::NO_TEXT_APOLOGY.to_string()],
            );
        }

        transitions.enter(CaptureState::DescribingScene);
        match self.describe(frame).await {
            Some(description) => {
                let grounding =
                    GroundingText::new(format!("{}{}", messages::SCENE_PREFIX, description));
                transitions.finish(
                    CaptureState::Grounded,
                    CaptureOutcome::SceneDescribed,
                    Some(grounding),
                    vec![
                        messages::scene_described(&description),
                        messages::SCENE_INVITATION.to_string(),
                    ],
                )
            }
            None => transitions.finish(
                CaptureState::Idle,
                CaptureOutcome::DescriptionFailed,
                None,
                vec![messages::SCENE_FAILED.to_string()],
            ),
        }
    }

    async fn extract(&self, frame: Arc<Frame>) -> ExtractionResult {
        let extractor = self.extractor.clone();
        match tokio::spawn(async move { extractor.extract(&frame).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!("Text extraction task aborted: {}", e);
                ExtractionResult::Failed(ServiceError::Aborted(e.to_string()))
            }
        }
    }

    async fn describe(&self, frame: Arc<Frame>) -> Option<String> {
        let describer = self.describer.clone();
        match tokio::spawn(async move { describer.describe(&frame).await }).await {
            Ok(description) => Some(description),
            Err(e) => {
                error!("Scene description task aborted: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Fixed answer to every fallback offer, remembering each prompt
    pub(crate) struct ScriptedDecision {
        answer: bool,
        prompts: Mutex<Vec<FallbackPrompt>>,
    }

    impl ScriptedDecision {
        pub fn new(answer: bool) -> Self {
            Self {
                answer,
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn prompts(&self) -> Vec<FallbackPrompt> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FallbackDecision for ScriptedDecision {
        async fn offer_scene_description(&self, prompt: FallbackPrompt) -> bool {
            self.prompts.lock().unwrap().push(prompt);
            self.answer
        }
    }
}
