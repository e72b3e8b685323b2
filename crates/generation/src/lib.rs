/// Generation API client
///
/// Image generation, image editing, and asynchronous video tasks against the
/// Ark API, plus the poll loop that drives a video task to completion.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use models::GeneratedVideo;

pub mod client;
pub mod error;
pub mod media;
pub mod poller;
pub mod wire;

pub use client::GenerationClient;
pub use error::{GenerationError, Result, AUTH_ERROR_MESSAGE};
pub use poller::{poll_task, simulated_progress, PollConfig};
pub use wire::{
    EditImageRequest, GenerateImageRequest, ResponseFormat, VideoContent, VideoTaskRequest,
    VideoTaskStatus,
};

pub const DEFAULT_API_BASE: &str = "https://ark.cn-beijing.volces.com";

/// Prompt used when an image-to-video request comes without one.
pub const DEFAULT_IMAGE_TO_VIDEO_PROMPT: &str = "animate this image into a video";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Scheme and host of the API, or of a forwarding proxy
    pub base_url: String,

    /// Bearer token
    pub api_key: String,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
        }
    }

    /// With API endpoint
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// Anything that can report the current state of a video task.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn query_task(&self, task_id: &str) -> Result<VideoTaskStatus>;
}

/// The generation operations the rest of the system depends on.
#[async_trait]
pub trait GenerationApi: Send + Sync {
    async fn generate_image(&self, request: &GenerateImageRequest) -> Result<models::GeneratedImage>;

    async fn edit_image(&self, request: &EditImageRequest) -> Result<models::GeneratedImage>;

    /// Submit a video task and return its id.
    async fn create_video_task(&self, request: &VideoTaskRequest) -> Result<String>;

    /// Current state of a task, status already normalized.
    async fn query_video_task(&self, task_id: &str) -> Result<VideoTaskStatus>;

    async fn text_to_video(&self, prompt: &str, model: &str) -> Result<GeneratedVideo> {
        let task_id = self
            .create_video_task(&VideoTaskRequest::text_to_video(model, prompt))
            .await?;
        let mut video = GeneratedVideo::pending(task_id);
        video.original_prompt = Some(prompt.to_string());
        Ok(video)
    }

    /// `image` may be a URL, a proxy URL, a data URI, or a local path.
    async fn image_to_video(&self, image: &str, prompt: &str, model: &str) -> Result<GeneratedVideo> {
        let resolved = media::resolve_image_input(image).await?;
        let prompt = match prompt.trim() {
            "" => DEFAULT_IMAGE_TO_VIDEO_PROMPT,
            trimmed => trimmed,
        };
        let task_id = self
            .create_video_task(&VideoTaskRequest::image_to_video(model, resolved, prompt))
            .await?;
        let mut video = GeneratedVideo::pending(task_id);
        video.original_prompt = Some(prompt.to_string());
        video.original_image_source_url = Some(media::to_original_url(image));
        Ok(video)
    }
}

#[async_trait]
impl<T: GenerationApi + ?Sized> TaskSource for T {
    async fn query_task(&self, task_id: &str) -> Result<VideoTaskStatus> {
        self.query_video_task(task_id).await
    }
}

/// Builds an API handle for a given key. The key can change at runtime, so
/// callers connect per operation.
pub trait Connector: Send + Sync {
    fn connect(&self, api_key: &str) -> Result<Arc<dyn GenerationApi>>;
}

/// Connects to the real HTTP API (directly or through the proxy).
#[derive(Debug, Clone)]
pub struct HttpConnector {
    base_url: String,
}

impl HttpConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

impl Connector for HttpConnector {
    fn connect(&self, api_key: &str) -> Result<Arc<dyn GenerationApi>> {
        let config = ClientConfig::new(api_key).with_base_url(self.base_url.clone());
        Ok(Arc::new(GenerationClient::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config() {
        let config = ClientConfig::new("key-123").with_base_url("http://127.0.0.1:3001");
        assert_eq!(config.api_key, "key-123");
        assert_eq!(config.base_url, "http://127.0.0.1:3001");
        assert_eq!(ClientConfig::new("k").base_url, DEFAULT_API_BASE);
    }

    #[test]
    fn test_connector_rejects_empty_key() {
        let connector = HttpConnector::default();
        assert!(matches!(
            connector.connect(""),
            Err(GenerationError::MissingApiKey)
        ));
        assert!(connector.connect("abc").is_ok());
    }
}
