use models::{
    default_image_models, default_video_models, GeneratedImage, GeneratedVideo, ImageModel,
    VideoModel, VideoPatch, WorkMode,
};
use uuid::Uuid;

use crate::preferences::Preferences;

pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
pub const DEFAULT_GUIDANCE_SCALE: f32 = 3.0;

/// Whether an in-memory entry has reached the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// Write scheduled, not yet finished.
    Pending,
    Synced,
    Failed(String),
    /// No record store configured.
    Local,
}

#[derive(Debug, Clone)]
pub struct HistoryEntry<T> {
    pub key: Uuid,
    pub item: T,
    pub sync: SyncState,
}

impl<T> HistoryEntry<T> {
    pub fn new(item: T, sync: SyncState) -> Self {
        Self {
            key: Uuid::new_v4(),
            item,
            sync,
        }
    }
}

/// Everything the front end reads. Lists are newest first.
#[derive(Debug, Clone)]
pub struct StudioState {
    pub api_key: String,
    pub prompt: String,
    pub image_models: Vec<ImageModel>,
    pub selected_model: ImageModel,
    pub video_models: Vec<VideoModel>,
    pub selected_video_model: VideoModel,
    pub image_size: String,
    pub guidance_scale: f32,
    pub is_generating: bool,
    pub is_generating_video: bool,
    pub images: Vec<HistoryEntry<GeneratedImage>>,
    pub videos: Vec<HistoryEntry<GeneratedVideo>>,
    pub is_settings_open: bool,
    pub is_history_expanded: bool,
    pub work_mode: WorkMode,
    pub selected_image_for_edit: Option<GeneratedImage>,
    /// URL, proxy URL, data URI or local path of the image to animate.
    pub selected_image_for_video: Option<String>,
}

impl Default for StudioState {
    fn default() -> Self {
        let image_models = default_image_models();
        let video_models = default_video_models();
        let selected_model = image_models
            .first()
            .cloned()
            .unwrap_or_else(fallback_image_model);
        let selected_video_model = video_models
            .first()
            .cloned()
            .unwrap_or_else(fallback_video_model);
        Self {
            api_key: String::new(),
            prompt: String::new(),
            image_models,
            selected_model,
            video_models,
            selected_video_model,
            image_size: DEFAULT_IMAGE_SIZE.to_string(),
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            is_generating: false,
            is_generating_video: false,
            images: Vec::new(),
            videos: Vec::new(),
            is_settings_open: false,
            is_history_expanded: true,
            work_mode: WorkMode::default(),
            selected_image_for_edit: None,
            selected_image_for_video: None,
        }
    }
}

fn fallback_image_model() -> ImageModel {
    ImageModel {
        id: String::new(),
        name: String::new(),
        value: String::new(),
        kind: WorkMode::TextToImage,
    }
}

fn fallback_video_model() -> VideoModel {
    VideoModel {
        id: String::new(),
        name: String::new(),
        value: String::new(),
        kind: WorkMode::TextToVideo,
    }
}

impl StudioState {
    /// Switch mode and pick the first model of the matching kind. Without a
    /// match the current selection stays.
    pub fn set_work_mode(&mut self, mode: WorkMode) {
        self.work_mode = mode;
        if mode.is_video() {
            if let Some(model) = self.video_models.iter().find(|m| m.kind == mode) {
                self.selected_video_model = model.clone();
            }
        } else if let Some(model) = self.image_models.iter().find(|m| m.kind == mode) {
            self.selected_model = model.clone();
        }
    }

    pub fn find_image_model(&self, id: &str) -> Option<&ImageModel> {
        self.image_models.iter().find(|m| m.id == id)
    }

    pub fn find_video_model(&self, id: &str) -> Option<&VideoModel> {
        self.video_models.iter().find(|m| m.id == id)
    }

    /// Model used for edits: the selection when it is an edit model, otherwise
    /// the first edit model in the catalog.
    pub fn edit_model(&self) -> &ImageModel {
        if self.selected_model.kind == WorkMode::ImageToImage {
            return &self.selected_model;
        }
        self.image_models
            .iter()
            .find(|m| m.kind == WorkMode::ImageToImage)
            .unwrap_or(&self.selected_model)
    }

    pub fn preferences(&self) -> Preferences {
        Preferences {
            api_key: self.api_key.clone(),
            selected_model: self.selected_model.clone(),
            image_size: self.image_size.clone(),
            guidance_scale: self.guidance_scale,
            is_history_expanded: self.is_history_expanded,
            work_mode: self.work_mode,
            selected_video_model: self.selected_video_model.clone(),
        }
    }

    pub fn apply_preferences(&mut self, prefs: Preferences) {
        self.api_key = prefs.api_key;
        self.selected_model = prefs.selected_model;
        self.image_size = prefs.image_size;
        self.guidance_scale = prefs.guidance_scale;
        self.is_history_expanded = prefs.is_history_expanded;
        self.work_mode = prefs.work_mode;
        self.selected_video_model = prefs.selected_video_model;
    }

    pub fn video(&self, task_id: &str) -> Option<&GeneratedVideo> {
        self.videos
            .iter()
            .map(|e| &e.item)
            .find(|v| v.task_id == task_id)
    }

    /// Merge `patch` into the video for `task_id`; returns the merged value.
    pub fn apply_video_patch(&mut self, task_id: &str, patch: &VideoPatch) -> Option<GeneratedVideo> {
        let entry = self
            .videos
            .iter_mut()
            .find(|e| e.item.task_id == task_id)?;
        entry.item.apply(patch);
        Some(entry.item.clone())
    }

    pub(crate) fn mark_image(&mut self, key: Uuid, sync: SyncState) {
        if let Some(entry) = self.images.iter_mut().find(|e| e.key == key) {
            entry.sync = sync;
        }
    }

    pub(crate) fn mark_video(&mut self, task_id: &str, sync: SyncState) {
        if let Some(entry) = self.videos.iter_mut().find(|e| e.item.task_id == task_id) {
            entry.sync = sync;
        }
    }
}
