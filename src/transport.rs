//! HTTP transport shared by the OCR, caption, and chat clients

use crate::error::ServiceError;
use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// One JSON POST to a remote service
#[derive(Debug, Clone)]
pub(crate) struct HttpRequest<'a> {
    pub url: &'a str,
    pub bearer: &'a str,
    pub body: serde_json::Value,
    /// Per-request timeout; `None` uses the client's default
    pub timeout: Option<Duration>,
}

/// Raw reply: status code and body text
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub(crate) trait HttpTransport: Send + Sync {
    /// Send a request. Only timeouts and connection failures are errors;
    /// any HTTP status is returned as a reply.
    async fn post_json(&self, request: HttpRequest<'_>) -> Result<HttpReply, ServiceError>;
}

/// reqwest-backed transport
pub(crate) struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(&self, request: HttpRequest<'_>) -> Result<HttpReply, ServiceError> {
        let mut builder = self
            .client
            .post(request.url)
            .header("Authorization", format!("Bearer {}", request.bearer))
            .header("Content-Type", "application/json")
            .json(&request.body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(&e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::from_reqwest(&e))?;
        debug!(url = request.url, status, body_len = body.len(), "HTTP reply");
        Ok(HttpReply { status, body })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport for service tests

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// A request as the scripted transport saw it
    #[derive(Debug, Clone)]
    pub(crate) struct RecordedRequest {
        pub url: String,
        pub bearer: String,
        pub body: serde_json::Value,
        pub timeout: Option<Duration>,
        pub at: Instant,
    }

    /// Replays queued replies in order and records every request.
    /// Once the queue is empty it keeps answering with the fallback.
    pub(crate) struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<HttpReply, ServiceError>>>,
        fallback: Result<HttpReply, ServiceError>,
        requests: Mutex<Vec<RecordedRequest>>,
    }

    impl ScriptedTransport {
        pub fn new(replies: Vec<Result<HttpReply, ServiceError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback: Ok(reply(500, "script exhausted")),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Answer every request the same way
        pub fn always(response: Result<HttpReply, ServiceError>) -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                fallback: response,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn post_json(&self, request: HttpRequest<'_>) -> Result<HttpReply, ServiceError> {
            self.requests.lock().unwrap().push(RecordedRequest {
                url: request.url.to_string(),
                bearer: request.bearer.to_string(),
                body: request.body,
                timeout: request.timeout,
                at: Instant::now(),
            });
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    pub(crate) fn reply(status: u16, body: &str) -> HttpReply {
        HttpReply {
            status,
            body: body.to_string(),
        }
    }

    pub(crate) fn timeout_error() -> ServiceError {
        ServiceError::Transport {
            timed_out: true,
            message: "operation timed out".to_string(),
        }
    }
}
