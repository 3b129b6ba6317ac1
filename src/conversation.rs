//! Conversation state for one page
//!
//! An append-only log of turns anchored by the page's grounding text.
//! The grounding text is set once per session; user turns are refused until
//! it is.

use chrono::{DateTime, Local};
use std::fmt;
use tracing::debug;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    User,
    Assistant,
}

impl Role {
    /// Role name on the chat wire format
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "You"),
            Role::Assistant => write!(f, "AI"),
        }
    }
}

/// One message in the conversation
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Local::now(),
        }
    }
}

/// Text (or scene description) the discussion is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GroundingText(String);

impl GroundingText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Turns plus grounding for the active session
#[derive(Debug, Clone, Default)]
pub(crate) struct ConversationState {
    grounding: Option<GroundingText>,
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the grounding text; only allowed once per session
    pub fn initialize(&mut self, grounding: GroundingText) -> Result<(), ConversationError> {
        if self.grounding.is_some() {
            return Err(ConversationError::AlreadyGrounded);
        }
        debug!(chars = grounding.as_str().chars().count(), "Conversation grounded");
        self.grounding = Some(grounding);
        Ok(())
    }

    /// Append a user turn
    ///
    /// Refused when the session has no grounding text or the input is blank.
    pub fn append_user(&mut self, text: &str) -> Result<&Turn, ConversationError> {
        if self.grounding.is_none() {
            return Err(ConversationError::NotGrounded);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(ConversationError::EmptyInput);
        }
        Ok(self.push(Turn::new(Role::User, text)))
    }

    /// Append an assistant turn. Always succeeds.
    pub fn append_assistant(&mut self, content: impl Into<String>) -> &Turn {
        self.push(Turn::new(Role::Assistant, content))
    }

    fn push(&mut self, turn: Turn) -> &Turn {
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    pub fn grounding(&self) -> Option<&GroundingText> {
        self.grounding.as_ref()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Clear grounding and turns together
    pub fn reset(&mut self) {
        self.grounding = None;
        self.turns.clear();
    }
}

/// Conversation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum ConversationError {
    #[error("No page has been read yet. Capture a page first.")]
    NotGrounded,

    #[error("Message is empty")]
    EmptyInput,

    #[error("This page already has grounding text")]
    AlreadyGrounded,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grounded() -> ConversationState {
        let mut state = ConversationState::new();
        state
            .initialize(GroundingText::new("It was the best of times"))
            .unwrap();
        state
    }

    #[test]
    fn test_user_turn_requires_grounding() {
        let mut state = ConversationState::new();
        assert_eq!(
            state.append_user("What does it mean?"),
            Err(ConversationError::NotGrounded)
        );
        assert!(state.turns().is_empty());
    }

    #[test]
    fn test_blank_user_turn_rejected() {
        let mut state = grounded();
        assert_eq!(state.append_user("   \n"), Err(ConversationError::EmptyInput));
        assert!(state.turns().is_empty());
    }

    #[test]
    fn test_user_turn_trimmed() {
        let mut state = grounded();
        let turn = state.append_user("  Who wrote this? ").unwrap();
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.content, "Who wrote this?");
    }

    #[test]
    fn test_assistant_always_appends_one_turn() {
        let mut state = ConversationState::new();
        state.append_assistant("I encountered an error: API Error 500: boom");
        assert_eq!(state.turns().len(), 1);
        state.append_assistant("second");
        assert_eq!(state.turns().len(), 2);
        assert_eq!(state.turns()[1].role, Role::Assistant);
    }

    #[test]
    fn test_grounding_set_once() {
        let mut state = grounded();
        assert_eq!(
            state.initialize(GroundingText::new("other")),
            Err(ConversationError::AlreadyGrounded)
        );
        assert_eq!(
            state.grounding().map(GroundingText::as_str),
            Some("It was the best of times")
        );
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut state = grounded();
        state.append_user("hello").unwrap();
        state.append_assistant("hi");
        state.reset();

        assert!(state.grounding().is_none());
        assert!(state.turns().is_empty());
        assert_eq!(state.append_user("hello"), Err(ConversationError::NotGrounded));
    }

    #[test]
    fn test_turns_keep_order() {
        let mut state = grounded();
        state.append_assistant("intro");
        state.append_user("question").unwrap();
        state.append_assistant("answer");
        let contents: Vec<_> = state.turns().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["intro", "question", "answer"]);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::User.to_string(), "You");
        assert_eq!(Role::Assistant.to_string(), "AI");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }
}
