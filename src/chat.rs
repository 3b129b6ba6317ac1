//! Chat Completions client for discussing the captured page.
//!
//! Each user turn sends the whole conversation: a fixed system prompt, a
//! synthetic turn carrying the grounding text, then every turn of the
//! session in order. Failures come back as `ChatFailure`, whose message is
//! shown as an assistant turn so the conversation can carry on.

use crate::config::{ChatConfig, Credentials};
use crate::conversation::{ConversationState, Role, Turn};
use crate::error::ServiceError;
use crate::transport::{HttpRequest, HttpTransport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument};
use zeroize::Zeroize;

/// System prompt for the discussion companion
const SYSTEM_PROMPT: &str = "You are a thoughtful book discussion companion. Help users explore and understand the text they have captured. Ask insightful questions, provide analysis, and engage in meaningful dialogue about the content.";

/// Client for the remote Chat Completions API.
pub(crate) struct ChatClient {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    api_key: Option<String>,
}

/// Request body for the Chat Completions API.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

/// Message in the request.
#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Response from the Chat Completions API.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// A chat call that produced no assistant reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChatFailure(ServiceError);

impl ChatFailure {
    pub fn error(&self) -> &ServiceError {
        &self.0
    }

    /// Plain-language message shown in the conversation
    pub fn to_assistant_message(&self) -> String {
        match &self.0 {
            ServiceError::RemoteRejected { status, body } => {
                format!("I encountered an error: API Error {}: {}", status, body)
            }
            ServiceError::ServiceUnavailable { status } => {
                format!("I encountered an error: API Error {}", status)
            }
            ServiceError::Transport { .. } | ServiceError::Aborted(_) => {
                "I couldn't connect to the AI service (connection error). Please check your API key and internet connection.".to_string()
            }
            ServiceError::CredentialMissing(_) => {
                "I couldn't reach the AI service: no API key is configured.".to_string()
            }
            ServiceError::InvalidResponse(_) | ServiceError::Encoding(_) => {
                "I received an unreadable response from the AI service.".to_string()
            }
        }
    }
}

impl fmt::Display for ChatFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ServiceError> for ChatFailure {
    fn from(error: ServiceError) -> Self {
        Self(error)
    }
}

/// Synthetic user turn that hands the grounding text to the model
fn grounding_message(grounding: &str) -> String {
    format!(
        "Here is the text from the book page:\n\n{}\n\nNow let's discuss it.",
        grounding
    )
}

impl ChatClient {
    pub fn new(
        config: &ChatConfig,
        credentials: &Credentials,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            transport,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key: credentials.chat_api_key().map(str::to_string),
        }
    }

    /// Build the request for the conversation as it stands.
    ///
    /// The newest user turn is expected to be the last turn of `state`.
    fn build_request(&self, state: &ConversationState) -> ChatCompletionRequest {
        let grounding = state.grounding().map(|g| g.as_str()).unwrap_or_default();
        let mut messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: Role::User.as_str().to_string(),
                content: grounding_message(grounding),
            },
        ];
        messages.extend(state.turns().iter().map(|turn| ChatMessage {
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
        }));

        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Ask the model for the next assistant turn.
    ///
    /// One request, no retries.
    #[instrument(skip_all, fields(turns = state.turns().len()))]
    pub async fn complete(&self, state: &ConversationState) -> Result<Turn, ChatFailure> {
        let Some(api_key) = self.api_key.as_deref() else {
            error!("No chat API key configured");
            return Err(ServiceError::CredentialMissing("chat").into());
        };

        let body = serde_json::to_value(self.build_request(state))
            .map_err(|e| ServiceError::Encoding(e.to_string()))?;

        info!(model = %self.model, "Contacting chat service");
        let reply = self
            .transport
            .post_json(HttpRequest {
                url: &self.endpoint,
                bearer: api_key,
                body,
                timeout: None,
            })
            .await
            .map_err(|e| {
                error!("Chat request failed: {}", e);
                ChatFailure::from(e)
            })?;

        info!(status = reply.status, "Chat service responded");
        if !reply.is_success() {
            error!(status = reply.status, body = %reply.body, "Chat service rejected request");
            return Err(ServiceError::RemoteRejected {
                status: reply.status,
                body: reply.body,
            }
            .into());
        }

        let response: ChatCompletionResponse =
            serde_json::from_str(&reply.body).map_err(|e| {
                ServiceError::InvalidResponse(format!("Failed to parse chat response: {}", e))
            })?;
        let content = Self::extract_text(&response)?;
        Ok(Turn::new(Role::Assistant, content))
    }

    /// Extract text from the response structure.
    fn extract_text(response: &ChatCompletionResponse) -> Result<String, ServiceError> {
        response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| ServiceError::InvalidResponse("No choices in chat response".into()))
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        // Clear API key from memory
        if let Some(key) = self.api_key.as_mut() {
            key.zeroize();
        }
    }
}
