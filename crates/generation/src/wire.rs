/// Request and response shapes of the generation API.
///
/// Public request types carry optional knobs; the private `*Body` types are what
/// actually goes over the wire once defaults are applied.
use models::{GeneratedImage, VideoPatch, VideoStatus};
use serde::{Deserialize, Serialize};

pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
pub const DEFAULT_GUIDANCE_SCALE: f32 = 3.0;
pub const DEFAULT_EDIT_GUIDANCE_SCALE: f32 = 5.5;
/// Size sentinel the edit endpoint requires.
pub const ADAPTIVE_SIZE: &str = "adaptive";
/// Edits carry a random seed below this bound so identical edits are not served from cache.
pub const EDIT_SEED_BOUND: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Url,
    B64Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateImageRequest {
    pub model: String,
    pub prompt: String,
    pub response_format: Option<ResponseFormat>,
    pub size: Option<String>,
    pub guidance_scale: Option<f32>,
    pub watermark: Option<bool>,
}

impl GenerateImageRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            response_format: None,
            size: None,
            guidance_scale: None,
            watermark: None,
        }
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn with_guidance_scale(mut self, scale: f32) -> Self {
        self.guidance_scale = Some(scale);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_watermark(mut self, watermark: bool) -> Self {
        self.watermark = Some(watermark);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditImageRequest {
    pub model: String,
    /// URL or data URI of the image being edited.
    pub image: String,
    pub prompt: String,
    pub response_format: Option<ResponseFormat>,
    pub guidance_scale: Option<f32>,
    pub watermark: Option<bool>,
}

impl EditImageRequest {
    pub fn new(
        model: impl Into<String>,
        image: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            image: image.into(),
            prompt: prompt.into(),
            response_format: None,
            guidance_scale: None,
            watermark: None,
        }
    }

    pub fn with_guidance_scale(mut self, scale: f32) -> Self {
        self.guidance_scale = Some(scale);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }
}

/// One element of a video task's content list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VideoContent {
    Text { text: String },
    Image { image: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoTaskRequest {
    pub model: String,
    pub content: Vec<VideoContent>,
}

impl VideoTaskRequest {
    pub fn text_to_video(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            content: vec![VideoContent::Text {
                text: prompt.into(),
            }],
        }
    }

    /// Image first, then the optional prompt.
    pub fn image_to_video(model: impl Into<String>, image: impl Into<String>, prompt: &str) -> Self {
        let mut content = vec![VideoContent::Image {
            image: image.into(),
        }];
        let prompt = prompt.trim();
        if !prompt.is_empty() {
            content.push(VideoContent::Text {
                text: prompt.to_string(),
            });
        }
        Self {
            model: model.into(),
            content,
        }
    }
}

/// Normalized view of a task query.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTaskStatus {
    pub task_id: String,
    pub status: VideoStatus,
    pub video_url: Option<String>,
    pub progress: Option<u8>,
    pub error_message: Option<String>,
}

impl VideoTaskStatus {
    /// Patch carrying the terminal fields of this status.
    pub fn to_patch(&self) -> VideoPatch {
        VideoPatch {
            status: Some(self.status),
            video_url: self.video_url.clone(),
            progress: None,
            error_message: self.error_message.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ImageBody<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<&'a str>,
    pub response_format: ResponseFormat,
    pub size: &'a str,
    pub guidance_scale: f32,
    pub watermark: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ImagesResponse {
    #[serde(default)]
    pub data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaskCreatedResponse {
    pub task_id: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TaskQueryResponse {
    pub status: Option<String>,
    pub task_status: Option<String>,
    pub content: Option<serde_json::Value>,
    pub video_url: Option<String>,
    pub output: Option<serde_json::Value>,
    pub progress: Option<f64>,
    pub error_message: Option<String>,
    pub message: Option<String>,
    pub error: Option<ErrorDetail>,
}

fn nested_video_url(field: &Option<serde_json::Value>) -> Option<String> {
    field
        .as_ref()
        .and_then(|v| v.get("video_url"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

impl TaskQueryResponse {
    pub fn into_status(self, task_id: &str) -> VideoTaskStatus {
        let raw = self
            .status
            .as_deref()
            .or(self.task_status.as_deref())
            .unwrap_or("pending");
        let video_url = nested_video_url(&self.content)
            .or_else(|| self.video_url.clone())
            .or_else(|| nested_video_url(&self.output));
        let error_message = self
            .error_message
            .or(self.message)
            .or_else(|| self.error.and_then(|e| e.message));
        VideoTaskStatus {
            task_id: task_id.to_string(),
            status: VideoStatus::from_provider(raw),
            video_url,
            progress: self.progress.map(|p| p.clamp(0.0, 100.0) as u8),
            error_message,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: Option<ErrorDetail>,
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorDetail {
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(value: serde_json::Value) -> VideoTaskStatus {
        serde_json::from_value::<TaskQueryResponse>(value)
            .unwrap()
            .into_status("cgt-1")
    }

    #[test]
    fn content_tags_serialize_flat() {
        let request = VideoTaskRequest::image_to_video("m", "https://x/a.png", "  pan left ");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json["content"],
            json!([
                {"type": "image", "image": "https://x/a.png"},
                {"type": "text", "text": "pan left"}
            ])
        );
    }

    #[test]
    fn image_to_video_without_prompt_has_only_image() {
        let request = VideoTaskRequest::image_to_video("m", "data:image/png;base64,AA", "   ");
        assert_eq!(request.content.len(), 1);
        assert!(matches!(request.content[0], VideoContent::Image { .. }));
    }

    #[test]
    fn video_url_precedence_is_content_then_root_then_output() {
        let all = query(json!({
            "status": "succeeded",
            "content": {"video_url": "content"},
            "video_url": "root",
            "output": {"video_url": "output"}
        }));
        assert_eq!(all.video_url.as_deref(), Some("content"));
        assert_eq!(all.status, VideoStatus::Completed);

        let root = query(json!({"status": "running", "video_url": "root", "output": {"video_url": "output"}}));
        assert_eq!(root.video_url.as_deref(), Some("root"));
        assert_eq!(root.status, VideoStatus::Processing);

        let output = query(json!({"task_status": "processing", "output": {"video_url": "output"}}));
        assert_eq!(output.video_url.as_deref(), Some("output"));
    }

    #[test]
    fn missing_status_defaults_to_pending() {
        let status = query(json!({}));
        assert_eq!(status.status, VideoStatus::Pending);
        assert_eq!(status.task_id, "cgt-1");
        assert!(status.video_url.is_none());
    }

    #[test]
    fn error_message_falls_back_to_message() {
        let status = query(json!({"status": "failed", "message": "content rejected", "progress": 140.0}));
        assert_eq!(status.error_message.as_deref(), Some("content rejected"));
        assert_eq!(status.progress, Some(100));
    }

    #[test]
    fn image_body_omits_absent_fields() {
        let body = ImageBody {
            model: "m",
            prompt: "p",
            image: None,
            response_format: ResponseFormat::B64Json,
            size: DEFAULT_IMAGE_SIZE,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            watermark: false,
            seed: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["response_format"], "b64_json");
        assert!(json.get("image").is_none());
        assert!(json.get("seed").is_none());
    }
}
