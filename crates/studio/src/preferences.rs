/// User preferences that survive restarts.
///
/// Only the fields of [`Preferences`] are written; prompts, flags and history
/// never are. The file keeps the `{"state": {...}, "version": 0}` envelope.
use models::{ImageModel, VideoModel, WorkMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::state::StudioState;
use crate::StudioError;

pub const PREFERENCES_FILE: &str = "text-to-image-storage.json";
const SNAPSHOT_VERSION: u32 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub api_key: String,
    pub selected_model: ImageModel,
    pub image_size: String,
    pub guidance_scale: f32,
    pub is_history_expanded: bool,
    pub work_mode: WorkMode,
    pub selected_video_model: VideoModel,
}

impl Default for Preferences {
    fn default() -> Self {
        StudioState::default().preferences()
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    state: Preferences,
    #[serde(default)]
    version: u32,
}

#[derive(Debug, Clone)]
pub struct PreferencesStore {
    path: PathBuf,
}

impl PreferencesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(PREFERENCES_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Preferences>, StudioError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .map_err(|err| StudioError::Preferences(err.to_string()))?;
        let snapshot: Snapshot = serde_json::from_str(&raw)
            .map_err(|err| StudioError::Preferences(err.to_string()))?;
        Ok(Some(snapshot.state))
    }

    /// Stored preferences, or defaults when the file is missing or unreadable.
    pub fn load_or_default(&self) -> Preferences {
        match self.load() {
            Ok(Some(prefs)) => prefs,
            Ok(None) => Preferences::default(),
            Err(err) => {
                warn!(target: "studio", "ignoring preferences at {:?}: {err}", self.path);
                Preferences::default()
            }
        }
    }

    pub fn save(&self, prefs: &Preferences) -> Result<(), StudioError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|err| StudioError::Preferences(err.to_string()))?;
        }
        let snapshot = Snapshot {
            state: prefs.clone(),
            version: SNAPSHOT_VERSION,
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|err| StudioError::Preferences(err.to_string()))?;
        fs::write(&self.path, json).map_err(|err| StudioError::Preferences(err.to_string()))?;
        debug!(target: "studio", "saved preferences to {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_holds_only_allowlisted_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::in_dir(dir.path());

        let mut state = StudioState::default();
        state.api_key = "sk-1".into();
        state.prompt = "not persisted".into();
        state.guidance_scale = 7.5;
        state.set_work_mode(WorkMode::ImageToImage);
        store.save(&state.preferences()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 0);
        assert_eq!(raw["state"]["apiKey"], "sk-1");
        assert_eq!(raw["state"]["workMode"], "image-to-image");
        assert_eq!(raw["state"]["selectedModel"]["type"], "image-to-image");
        let keys: Vec<&String> = raw["state"].as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 7);
        assert!(raw["state"].get("prompt").is_none());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, state.preferences());
    }

    #[test]
    fn missing_or_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::in_dir(dir.path());
        assert_eq!(store.load().unwrap(), None);
        assert_eq!(store.load_or_default(), Preferences::default());

        fs::write(store.path(), "{not json").unwrap();
        assert!(store.load().is_err());
        assert_eq!(store.load_or_default(), Preferences::default());
    }

    #[test]
    fn partial_snapshot_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::in_dir(dir.path());
        fs::write(store.path(), r#"{"state":{"apiKey":"k"},"version":0}"#).unwrap();
        let prefs = store.load().unwrap().unwrap();
        assert_eq!(prefs.api_key, "k");
        assert_eq!(prefs.image_size, "1024x1024");
        assert!(prefs.is_history_expanded);
    }
}
