use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ModelError;

/// Top-level activity selector. Drives which flow runs and which model is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WorkMode {
    #[default]
    TextToImage,
    ImageToImage,
    TextToVideo,
    ImageToVideo,
}

impl WorkMode {
    pub const ALL: [WorkMode; 4] = [
        WorkMode::TextToImage,
        WorkMode::ImageToImage,
        WorkMode::TextToVideo,
        WorkMode::ImageToVideo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkMode::TextToImage => "text-to-image",
            WorkMode::ImageToImage => "image-to-image",
            WorkMode::TextToVideo => "text-to-video",
            WorkMode::ImageToVideo => "image-to-video",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, WorkMode::TextToVideo | WorkMode::ImageToVideo)
    }
}

impl fmt::Display for WorkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| ModelError::UnknownWorkMode(s.to_string()))
    }
}

/// An image model offered by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageModel {
    pub id: String,
    pub name: String,
    /// Identifier sent on the wire as `model`.
    pub value: String,
    #[serde(rename = "type")]
    pub kind: WorkMode,
}

/// A video model offered by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoModel {
    pub id: String,
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub kind: WorkMode,
}

fn entry(id: &str, name: &str, kind: WorkMode) -> (String, String, String, WorkMode) {
    (id.to_string(), name.to_string(), id.to_string(), kind)
}

pub fn default_image_models() -> Vec<ImageModel> {
    [
        entry(
            "doubao-seedream-3-0-t2i-250415",
            "Doubao SeedDream 3.0 (text to image)",
            WorkMode::TextToImage,
        ),
        entry(
            "doubao-seededit-3-0-i2i-250628",
            "Doubao SeedEdit 3.0 (image edit)",
            WorkMode::ImageToImage,
        ),
    ]
    .into_iter()
    .map(|(id, name, value, kind)| ImageModel { id, name, value, kind })
    .collect()
}

pub fn default_video_models() -> Vec<VideoModel> {
    [entry(
        "doubao-seedance-1-0-pro-250528",
        "Doubao SeedDance 1.0 Pro (video)",
        WorkMode::TextToVideo,
    )]
    .into_iter()
    .map(|(id, name, value, kind)| VideoModel { id, name, value, kind })
    .collect()
}
