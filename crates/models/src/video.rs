use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ModelError;

/// Canonical task status. The provider's `succeeded` has no variant of its own:
/// it is folded into `Completed` by [`VideoStatus::from_provider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl VideoStatus {
    /// Normalize a raw provider status. Unknown values are treated as still pending.
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => VideoStatus::Pending,
            "processing" | "running" => VideoStatus::Processing,
            "completed" | "succeeded" => VideoStatus::Completed,
            "failed" | "cancelled" | "canceled" => VideoStatus::Failed,
            other => {
                tracing::warn!(target: "models", "unrecognized task status {other:?}, treating as pending");
                VideoStatus::Pending
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Completed | VideoStatus::Failed)
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parse of a stored (already canonical) status.
impl FromStr for VideoStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VideoStatus::Pending),
            "processing" => Ok(VideoStatus::Processing),
            "completed" => Ok(VideoStatus::Completed),
            "failed" => Ok(VideoStatus::Failed),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedVideo {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_prompt: Option<String>,
    #[serde(rename = "original_image_url", default, skip_serializing_if = "Option::is_none")]
    pub original_image_source_url: Option<String>,
    pub status: VideoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: i64,
}

impl GeneratedVideo {
    pub fn pending(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            video_url: None,
            original_prompt: None,
            original_image_source_url: None,
            status: VideoStatus::Pending,
            progress: None,
            error_message: None,
            created_at: crate::now_millis(),
        }
    }

    /// Merge the fields present in `patch`.
    pub fn apply(&mut self, patch: &VideoPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(url) = &patch.video_url {
            self.video_url = Some(url.clone());
        }
        if let Some(progress) = patch.progress {
            self.progress = Some(progress.min(100));
        }
        if let Some(message) = &patch.error_message {
            self.error_message = Some(message.clone());
        }
    }
}

/// Partial update of a video, keyed externally by task id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoPatch {
    pub status: Option<VideoStatus>,
    pub video_url: Option<String>,
    pub progress: Option<u8>,
    pub error_message: Option<String>,
}

impl VideoPatch {
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.video_url.is_none()
            && self.progress.is_none()
            && self.error_message.is_none()
    }
}

/// Persisted form of a video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRecord {
    pub id: String,
    pub created_at: i64,
    pub video: GeneratedVideo,
}

impl VideoRecord {
    pub fn into_video(self) -> GeneratedVideo {
        self.video
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeded_normalizes_to_completed() {
        assert_eq!(VideoStatus::from_provider("succeeded"), VideoStatus::Completed);
        assert_eq!(VideoStatus::from_provider("SUCCEEDED"), VideoStatus::Completed);
        assert_eq!(VideoStatus::from_provider("running"), VideoStatus::Processing);
        assert_eq!(VideoStatus::from_provider("queued"), VideoStatus::Pending);
        assert_eq!(VideoStatus::from_provider("cancelled"), VideoStatus::Failed);
        assert_eq!(VideoStatus::from_provider("whatever"), VideoStatus::Pending);
    }

    #[test]
    fn stored_status_parse_is_strict() {
        assert_eq!("completed".parse::<VideoStatus>(), Ok(VideoStatus::Completed));
        assert!("succeeded".parse::<VideoStatus>().is_err());
    }

    #[test]
    fn apply_merges_only_present_fields() {
        let mut video = GeneratedVideo::pending("t-1");
        video.original_prompt = Some("waves".into());
        video.apply(&VideoPatch::progress(40));
        assert_eq!(video.progress, Some(40));
        assert_eq!(video.status, VideoStatus::Pending);

        video.apply(&VideoPatch {
            status: Some(VideoStatus::Completed),
            video_url: Some("https://cdn/v.mp4".into()),
            ..Default::default()
        });
        assert_eq!(video.status, VideoStatus::Completed);
        assert_eq!(video.progress, Some(40));
        assert_eq!(video.original_prompt.as_deref(), Some("waves"));
        assert_eq!(video.video_url.as_deref(), Some("https://cdn/v.mp4"));
    }

    #[test]
    fn terminal_states() {
        assert!(VideoStatus::Completed.is_terminal());
        assert!(VideoStatus::Failed.is_terminal());
        assert!(!VideoStatus::Processing.is_terminal());
        assert!(!VideoStatus::Pending.is_terminal());
    }
}
