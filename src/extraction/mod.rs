//! Text extraction via the remote OCR/vision service
//!
//! Sends one frame to the service and recovers the page text. The service
//! answers with a warm-up status while its model loads; those replies are
//! retried according to the configured `RetryPolicy`.

mod messages;

pub(crate) use messages::{parse_generated_text, VisionRequest};

use crate::config::{Credentials, OcrConfig, RetryPolicy};
use crate::error::ServiceError;
use crate::frame::{Frame, TempEncoding};
use crate::transport::{HttpRequest, HttpTransport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroize;

/// Outcome of one extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExtractionResult {
    /// Non-empty text, trimmed
    Text(String),
    /// The service answered but produced no usable text
    Empty,
    /// No successful response
    Failed(ServiceError),
}

/// Client for the OCR/vision service
pub(crate) struct TextExtractor {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
    instruction: String,
    token: Option<String>,
    timeout: Duration,
    policy: RetryPolicy,
    /// Where the transient PNG encoding is written
    scratch_dir: PathBuf,
}

impl TextExtractor {
    pub fn new(
        config: &OcrConfig,
        credentials: &Credentials,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            transport,
            endpoint: config.endpoint.clone(),
            instruction: config.instruction.clone(),
            token: credentials.vision_api_token().map(str::to_string),
            timeout: config.timeout(),
            policy: RetryPolicy::from(&config.retry),
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Replace the retry policy
    #[cfg(test)]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Write transient encodings to `dir` instead of the system temp dir
    #[cfg(test)]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Extract the text on a frame
    ///
    /// Never returns an error: every failure is folded into
    /// `ExtractionResult::Failed`.
    #[instrument(skip_all, fields(width = frame.width(), height = frame.height()))]
    pub async fn extract(&self, frame: &Frame) -> ExtractionResult {
        let Some(token) = self.token.as_deref() else {
            warn!("No OCR token configured, skipping text extraction");
            return ExtractionResult::Failed(ServiceError::CredentialMissing("OCR"));
        };

        // Dropped on every return path below, which deletes the file
        let encoding = match TempEncoding::create(frame, &self.scratch_dir) {
            Ok(encoding) => encoding,
            Err(e) => {
                warn!("Failed to encode frame for OCR: {}", e);
                return ExtractionResult::Failed(ServiceError::Encoding(e.to_string()));
            }
        };
        debug!(path = %encoding.path().display(), bytes = encoding.bytes().len(), "Frame encoded");
        let body = match serde_json::to_value(VisionRequest::new(
            encoding.bytes(),
            Some(&self.instruction),
        )) {
            Ok(body) => body,
            Err(e) => return ExtractionResult::Failed(ServiceError::Encoding(e.to_string())),
        };

        let mut last_error: Option<ServiceError> = None;

        for attempt in 1..=self.policy.max_attempts {
            let request = HttpRequest {
                url: &self.endpoint,
                bearer: token,
                body: body.clone(),
                timeout: Some(self.timeout),
            };

            let wait_before_retry = match self.transport.post_json(request).await {
                Ok(reply) if reply.is_success() => {
                    if attempt > 1 {
                        info!(attempt, "OCR request succeeded after retry");
                    }
                    return Self::classify(&reply.body);
                }
                Ok(reply) if self.policy.is_retryable(reply.status) => {
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        status = reply.status,
                        "OCR model is warming up"
                    );
                    last_error = Some(ServiceError::ServiceUnavailable {
                        status: reply.status,
                    });
                    true
                }
                Ok(reply) => {
                    warn!(attempt, status = reply.status, "OCR request rejected");
                    last_error = Some(ServiceError::RemoteRejected {
                        status: reply.status,
                        body: reply.body,
                    });
                    false
                }
                Err(e) => {
                    warn!(attempt, error = %e, "OCR request failed");
                    last_error = Some(e);
                    true
                }
            };

            if wait_before_retry && attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.backoff).await;
            }
        }

        let error = last_error.unwrap_or_else(|| {
            ServiceError::InvalidResponse("No OCR attempts were made".to_string())
        });
        warn!(error = %error, "Text extraction failed after all attempts");
        ExtractionResult::Failed(error)
    }

    fn classify(body: &str) -> ExtractionResult {
        match parse_generated_text(body) {
            Some(text) if !text.trim().is_empty() => {
                let text = text.trim().to_string();
                info!(chars = text.chars().count(), "Extracted text from frame");
                ExtractionResult::Text(text)
            }
            Some(_) => ExtractionResult::Empty,
            None => {
                warn!("OCR response carried no text field");
                ExtractionResult::Empty
            }
        }
    }
}

impl Drop for TextExtractor {
    fn drop(&mut self) {
        if let Some(token) = self.token.as_mut() {
            token.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::test_frame;
    use crate::transport::testing::{reply, timeout_error, ScriptedTransport};
    use crate::transport::{HttpReply, HttpTransport};
    use async_trait::async_trait;
    use rand::Rng;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    fn credentials() -> Credentials {
        Credentials {
            chat_api_key: None,
            vision_api_token: Some("hf_test".to_string()),
        }
    }

    fn extractor(transport: Arc<ScriptedTransport>) -> TextExtractor {
        TextExtractor::new(&OcrConfig::default(), &credentials(), transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_on_first_attempt() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(reply(
            200,
            r#"[{"generated_text": "  Chapter One\n"}]"#,
        ))]));
        let result = extractor(transport.clone()).extract(&test_frame()).await;

        assert_eq!(result, ExtractionResult::Text("Chapter One".to_string()));
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].bearer, "hf_test");
        assert_eq!(requests[0].timeout, Some(Duration::from_secs(60)));
        assert!(requests[0].body["image"].as_str().is_some());
        assert!(requests[0].body["instruction"].as_str().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_up_then_success_waits_between_attempts() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(reply(503, r#"{"error": "Model is currently loading"}"#)),
            Ok(reply(503, r#"{"error": "Model is currently loading"}"#)),
            Ok(reply(200, r#"{"text": "Page text"}"#)),
        ]));
        let result = extractor(transport.clone()).extract(&test_frame()).await;

        assert_eq!(result, ExtractionResult::Text("Page text".to_string()));
        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        for pair in requests.windows(2) {
            let gap = pair[1].at - pair[0].at;
            assert!(gap >= Duration::from_secs(10), "gap was {:?}", gap);
            assert!(gap < Duration::from_secs(11), "gap was {:?}", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_fail_without_extra_requests() {
        let transport = Arc::new(ScriptedTransport::always(Ok(reply(503, "loading"))));
        let result = extractor(transport.clone()).extract(&test_frame()).await;

        assert_eq!(
            result,
            ExtractionResult::Failed(ServiceError::ServiceUnavailable { status: 503 })
        );
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_failures_share_attempt_budget() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(timeout_error()),
            Ok(reply(500, "boom")),
            Ok(reply(503, "loading")),
            Ok(reply(200, r#"{"text": "too late"}"#)),
        ]));
        let result = extractor(transport.clone()).extract(&test_frame()).await;

        assert_eq!(
            result,
            ExtractionResult::Failed(ServiceError::ServiceUnavailable { status: 503 })
        );
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_status_retries_without_backoff() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(reply(500, "boom")),
            Ok(reply(200, r#"{"output": "second try"}"#)),
        ]));
        let result = extractor(transport.clone()).extract(&test_frame()).await;

        assert_eq!(result, ExtractionResult::Text("second try".to_string()));
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].at - requests[0].at < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_whitespace_text_is_empty() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(reply(
            200,
            r#"[{"generated_text": " \n\t "}]"#,
        ))]));
        let result = extractor(transport).extract(&test_frame()).await;
        assert_eq!(result, ExtractionResult::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_success_is_empty() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(reply(200, "<html>"))]));
        let result = extractor(transport).extract(&test_frame()).await;
        assert_eq!(result, ExtractionResult::Empty);
    }

    #[tokio::test]
    async fn test_missing_token_fails_fast() {
        let transport = Arc::new(ScriptedTransport::always(Ok(reply(200, "{}"))));
        let extractor = TextExtractor::new(
            &OcrConfig::default(),
            &Credentials::default(),
            transport.clone(),
        );
        let result = extractor.extract(&test_frame()).await;

        assert_eq!(
            result,
            ExtractionResult::Failed(ServiceError::CredentialMissing("OCR"))
        );
        assert!(transport.requests().is_empty());
    }

    /// Counts the files in a scratch directory each time a request goes out
    struct ScratchWatch {
        dir: PathBuf,
        inner: ScriptedTransport,
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl HttpTransport for ScratchWatch {
        async fn post_json(&self, request: HttpRequest<'_>) -> Result<HttpReply, ServiceError> {
            self.seen.lock().unwrap().push(file_count(&self.dir));
            self.inner.post_json(request).await
        }
    }

    fn file_count(dir: &Path) -> usize {
        fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    fn scratch_dir() -> PathBuf {
        let suffix: u64 = rand::thread_rng().gen();
        let dir = std::env::temp_dir().join(format!("pagetalk-test-{:016x}", suffix));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    async fn extract_watched(inner: ScriptedTransport) -> (ExtractionResult, Vec<usize>, usize) {
        let dir = scratch_dir();
        let watch = Arc::new(ScratchWatch {
            dir: dir.clone(),
            inner,
            seen: Mutex::new(Vec::new()),
        });
        let extractor = TextExtractor::new(&OcrConfig::default(), &credentials(), watch.clone())
            .with_scratch_dir(&dir);

        let result = extractor.extract(&test_frame()).await;
        let left = file_count(&dir);
        let seen = watch.seen.lock().unwrap().clone();
        fs::remove_dir_all(&dir).unwrap();
        (result, seen, left)
    }

    #[tokio::test(start_paused = true)]
    async fn test_encoding_removed_after_exhausted_attempts() {
        let (result, seen, left) =
            extract_watched(ScriptedTransport::always(Ok(reply(503, "loading")))).await;

        assert_eq!(
            result,
            ExtractionResult::Failed(ServiceError::ServiceUnavailable { status: 503 })
        );
        assert_eq!(seen, vec![1, 1, 1]);
        assert_eq!(left, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_encoding_removed_after_text_found() {
        let (result, seen, left) = extract_watched(ScriptedTransport::new(vec![Ok(reply(
            200,
            r#"{"text": "Page text"}"#,
        ))]))
        .await;

        assert_eq!(result, ExtractionResult::Text("Page text".to_string()));
        assert_eq!(seen, vec![1]);
        assert_eq!(left, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_policy_is_honoured() {
        let transport = Arc::new(ScriptedTransport::always(Ok(reply(429, "slow down"))));
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_millis(250),
            retryable_statuses: vec![429],
        };
        let result = extractor(transport.clone())
            .with_policy(policy)
            .extract(&test_frame())
            .await;

        assert_eq!(
            result,
            ExtractionResult::Failed(ServiceError::ServiceUnavailable { status: 429 })
        );
        let requests = transport.requests();
        assert_eq!(requests.len(), 5);
        assert!(requests[1].at - requests[0].at >= Duration::from_millis(250));
    }
}
