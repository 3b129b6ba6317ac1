//! Scene description fallback
//!
//! When a page yields no text the user can ask for a caption of the image
//! instead. The caption backend is built lazily on first use and reused.
//! A failed build is remembered: every later call returns the
//! "not available" sentinel without trying again.

use crate::config::{CaptionConfig, Credentials};
use crate::error::ServiceError;
use crate::extraction::{parse_generated_text, VisionRequest};
use crate::frame::Frame;
use crate::transport::{HttpRequest, HttpTransport};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use zeroize::Zeroize;

/// Returned by every call once the backend failed to load
pub(crate) const UNAVAILABLE_SENTINEL: &str = "Scene description model not available";

/// Produces one caption for one frame
#[async_trait]
pub(crate) trait CaptionBackend: Send + Sync {
    async fn caption(&self, frame: &Frame) -> Result<String, ServiceError>;
}

type Loader = Box<dyn Fn() -> Result<Arc<dyn CaptionBackend>, String> + Send + Sync>;

/// Lazily loaded scene captioner
pub(crate) struct SceneDescriber {
    loader: Loader,
    backend: OnceCell<Result<Arc<dyn CaptionBackend>, String>>,
}

impl SceneDescriber {
    /// Create a describer whose backend is built by `loader` on first use
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn CaptionBackend>, String> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            backend: OnceCell::new(),
        }
    }

    /// Describer backed by the remote caption service
    pub fn remote(
        config: &CaptionConfig,
        credentials: &Credentials,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let endpoint = config.endpoint.clone();
        let token = credentials.vision_api_token().map(str::to_string);
        Self::new(move || {
            let token = token
                .clone()
                .ok_or_else(|| ServiceError::CredentialMissing("caption").to_string())?;
            let backend: Arc<dyn CaptionBackend> = Arc::new(RemoteCaptioner {
                transport: transport.clone(),
                endpoint: endpoint.clone(),
                token,
            });
            Ok(backend)
        })
    }

    fn backend(&self) -> Result<&Arc<dyn CaptionBackend>, &str> {
        self.backend
            .get_or_init(|| {
                info!("Loading scene description backend");
                let loaded = (self.loader)();
                match &loaded {
                    Ok(_) => info!("Scene description backend loaded"),
                    Err(e) => error!("Failed to load scene description backend: {}", e),
                }
                loaded
            })
            .as_ref()
            .map_err(String::as_str)
    }

    /// Describe a frame
    ///
    /// Never fails: load and per-call failures come back as sentinel text.
    #[instrument(skip_all)]
    pub async fn describe(&self, frame: &Frame) -> String {
        let backend = match self.backend() {
            Ok(backend) => backend,
            Err(_) => return UNAVAILABLE_SENTINEL.to_string(),
        };

        match backend.caption(frame).await {
            Ok(caption) => {
                info!(caption = %caption, "Scene described");
                caption
            }
            Err(e) => {
                warn!("Scene description failed: {}", e);
                format!("Unable to describe scene: {}", e)
            }
        }
    }
}

/// Caption backend calling the remote caption service
struct RemoteCaptioner {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
    token: String,
}

#[async_trait]
impl CaptionBackend for RemoteCaptioner {
    async fn caption(&self, frame: &Frame) -> Result<String, ServiceError> {
        let png = frame
            .encode_png()
            .map_err(|e| ServiceError::Encoding(e.to_string()))?;
        let body = serde_json::to_value(VisionRequest::new(&png, None))
            .map_err(|e| ServiceError::Encoding(e.to_string()))?;

        let reply = self
            .transport
            .post_json(HttpRequest {
                url: &self.endpoint,
                bearer: &self.token,
                body,
                timeout: None,
            })
            .await?;

        if !reply.is_success() {
            return Err(ServiceError::RemoteRejected {
                status: reply.status,
                body: reply.body,
            });
        }

        parse_generated_text(&reply.body)
            .map(|caption| caption.trim().to_string())
            .filter(|caption| !caption.is_empty())
            .ok_or_else(|| ServiceError::InvalidResponse("No caption in response".to_string()))
    }
}

impl Drop for RemoteCaptioner {
    fn drop(&mut self) {
        self.token.zeroize();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Caption backend returning a fixed caption
    pub(crate) struct FixedCaption(pub &'static str);

    #[async_trait]
    impl CaptionBackend for FixedCaption {
        async fn caption(&self, _frame: &Frame) -> Result<String, ServiceError> {
            Ok(self.0.to_string())
        }
    }

    pub(crate) fn fixed_describer(caption: &'static str) -> SceneDescriber {
        SceneDescriber::new(move || {
            let backend: Arc<dyn CaptionBackend> = Arc::new(FixedCaption(caption));
            Ok(backend)
        })
    }
}
