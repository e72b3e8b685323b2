/// Session state and generation flows
///
/// `Studio` owns the in-memory session (settings, prompt, history lists), keeps
/// preferences on disk, mirrors history to the record store, and runs the
/// image, edit and video flows against a [`Connector`].
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use generation::{Connector, GenerationError, PollConfig};
use history::{Collection, HistoryDb, HistoryError};
use models::{GeneratedImage, GeneratedVideo, VideoPatch, VideoStatus, WorkMode};

mod flows;
pub mod preferences;
pub mod state;

pub use preferences::{Preferences, PreferencesStore, PREFERENCES_FILE};
pub use state::{HistoryEntry, StudioState, SyncState};

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("no API key configured")]
    MissingApiKey,

    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("edit instruction is empty")]
    EmptyInstruction,

    #[error("no image selected")]
    NoImageSelected,

    #[error("not available in {0} mode")]
    WrongMode(WorkMode),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("a generation is already running")]
    AlreadyRunning,

    #[error("video generation failed: {0}")]
    VideoFailed(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("preferences: {0}")]
    Preferences(String),
}

pub type Result<T> = std::result::Result<T, StudioError>;

#[derive(Debug, Clone, PartialEq)]
pub enum StudioEvent {
    /// Credentials are missing or were rejected.
    OpenSettings,
    VideoProgress { task_id: String, progress: u8 },
    VideoFinished { task_id: String, status: VideoStatus },
    /// A history write did not reach the store. The in-memory entry is kept.
    SyncFailed { what: String, reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct StudioConfig {
    /// Holds the record store and the preferences file.
    pub data_dir: Option<PathBuf>,
    pub poll: PollConfig,
}

impl StudioConfig {
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(history::app_data_dir)
    }
}

pub struct Studio {
    state: Arc<RwLock<StudioState>>,
    connector: Arc<dyn Connector>,
    store: Option<Arc<Mutex<HistoryDb>>>,
    preferences: Option<PreferencesStore>,
    poll: PollConfig,
    tx_events: Sender<StudioEvent>,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl Studio {
    /// In-memory studio without store or preferences file.
    pub fn new(connector: Arc<dyn Connector>) -> (Self, Receiver<StudioEvent>) {
        let (tx_events, rx_events) = unbounded();
        let studio = Self {
            state: Arc::new(RwLock::new(StudioState::default())),
            connector,
            store: None,
            preferences: None,
            poll: PollConfig::default(),
            tx_events,
            pending_writes: Mutex::new(Vec::new()),
        };
        (studio, rx_events)
    }

    /// Open the store and preferences under the configured data directory and
    /// load both. A store that cannot be opened is logged and skipped.
    pub fn open(config: StudioConfig, connector: Arc<dyn Connector>) -> (Self, Receiver<StudioEvent>) {
        let dir = config.data_dir();
        let (studio, rx_events) = Self::new(connector);
        let mut studio = studio
            .with_poll_config(config.poll)
            .with_preferences(PreferencesStore::in_dir(&dir));
        match HistoryDb::open_or_create(&dir.join(history::DB_FILE_NAME)) {
            Ok(db) => studio = studio.with_store(db),
            Err(err) => warn!(target: "studio", "history disabled: {err}"),
        }
        studio.load_history();
        info!(target: "studio", "opened studio in {:?}", dir);
        (studio, rx_events)
    }

    pub fn with_store(mut self, db: HistoryDb) -> Self {
        self.store = Some(Arc::new(Mutex::new(db)));
        self
    }

    /// Attach a preferences file and apply what it holds.
    pub fn with_preferences(mut self, store: PreferencesStore) -> Self {
        let prefs = store.load_or_default();
        self.state.write().apply_preferences(prefs);
        self.preferences = Some(store);
        self
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn poll_config(&self) -> PollConfig {
        self.poll
    }

    pub fn store(&self) -> Option<Arc<Mutex<HistoryDb>>> {
        self.store.clone()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> StudioState {
        self.state.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&StudioState) -> R) -> R {
        f(&*self.state.read())
    }

    fn emit(&self, event: StudioEvent) {
        let _ = self.tx_events.send(event);
    }

    fn save_preferences(&self) {
        let Some(store) = &self.preferences else {
            return;
        };
        let prefs = self.state.read().preferences();
        if let Err(err) = store.save(&prefs) {
            warn!(target: "studio", "failed to save preferences: {err}");
        }
    }

    /// Update state and persist preferences.
    fn update_preferences(&self, f: impl FnOnce(&mut StudioState)) {
        f(&mut *self.state.write());
        self.save_preferences();
    }

    pub fn set_api_key(&self, key: &str) {
        self.update_preferences(|s| s.api_key = key.trim().to_string());
    }

    pub fn set_image_size(&self, size: &str) {
        self.update_preferences(|s| s.image_size = size.to_string());
    }

    pub fn set_guidance_scale(&self, scale: f32) {
        self.update_preferences(|s| s.guidance_scale = scale);
    }

    pub fn set_history_expanded(&self, expanded: bool) {
        self.update_preferences(|s| s.is_history_expanded = expanded);
    }

    pub fn set_work_mode(&self, mode: WorkMode) {
        self.update_preferences(|s| s.set_work_mode(mode));
    }

    pub fn select_image_model(&self, id: &str) -> Result<()> {
        let model = self
            .read(|s| s.find_image_model(id).cloned())
            .ok_or_else(|| StudioError::UnknownModel(id.to_string()))?;
        self.update_preferences(|s| s.selected_model = model);
        Ok(())
    }

    pub fn select_video_model(&self, id: &str) -> Result<()> {
        let model = self
            .read(|s| s.find_video_model(id).cloned())
            .ok_or_else(|| StudioError::UnknownModel(id.to_string()))?;
        self.update_preferences(|s| s.selected_video_model = model);
        Ok(())
    }

    /// Session-only image settings; preferences on disk are left alone.
    pub fn override_image_settings(&self, size: Option<&str>, guidance_scale: Option<f32>) {
        let mut state = self.state.write();
        if let Some(size) = size {
            state.image_size = size.to_string();
        }
        if let Some(scale) = guidance_scale {
            state.guidance_scale = scale;
        }
    }

    pub fn set_prompt(&self, prompt: &str) {
        self.state.write().prompt = prompt.to_string();
    }

    pub fn set_settings_open(&self, open: bool) {
        self.state.write().is_settings_open = open;
    }

    pub fn select_image_for_edit(&self, image: Option<GeneratedImage>) {
        self.state.write().selected_image_for_edit = image;
    }

    pub fn select_image_for_video(&self, image: Option<String>) {
        self.state.write().selected_image_for_video = image;
    }

    /// Replace both history lists with the store contents.
    pub fn load_history(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let loaded = {
            let db = store.lock();
            db.list_images().and_then(|images| Ok((images, db.list_videos()?)))
        };
        match loaded {
            Ok((images, videos)) => {
                let mut state = self.state.write();
                state.images = images
                    .into_iter()
                    .map(|r| HistoryEntry::new(r.into_image(), SyncState::Synced))
                    .collect();
                state.videos = videos
                    .into_iter()
                    .map(|r| HistoryEntry::new(r.into_video(), SyncState::Synced))
                    .collect();
                debug!(
                    target: "studio",
                    "loaded {} images and {} videos",
                    state.images.len(),
                    state.videos.len()
                );
            }
            Err(err) => warn!(target: "studio", "failed to load history: {err}"),
        }
    }

    /// Prepend to the in-memory list and write to the store in the background.
    pub fn add_generated_image(&self, image: GeneratedImage) -> Uuid {
        let sync = self.initial_sync();
        let entry = HistoryEntry::new(image.clone(), sync);
        let key = entry.key;
        self.state.write().images.insert(0, entry);

        if let Some(store) = self.store.clone() {
            let state = self.state.clone();
            let tx_events = self.tx_events.clone();
            self.spawn_write(move || {
                // Store lock is held across the check so a concurrent clear
                // either skips this write or deletes it afterwards.
                let db = store.lock();
                if !state.read().images.iter().any(|e| e.key == key) {
                    debug!(target: "studio", "image {key} removed before it was stored");
                    return;
                }
                let result = db.save_image(&image).map(|_| ());
                drop(db);
                let sync = sync_result(&tx_events, "image", result);
                state.write().mark_image(key, sync);
            });
        }
        key
    }

    pub fn add_generated_video(&self, video: GeneratedVideo) -> Uuid {
        let sync = self.initial_sync();
        let task_id = video.task_id.clone();
        let entry = HistoryEntry::new(video, sync);
        let key = entry.key;
        self.state.write().videos.insert(0, entry);
        self.persist_video(task_id);
        key
    }

    /// Merge `patch` in memory. Terminal updates are also written to the store.
    pub fn update_video(&self, task_id: &str, patch: &VideoPatch) -> Option<GeneratedVideo> {
        let merged = self.state.write().apply_video_patch(task_id, patch);
        if merged.is_none() {
            debug!(target: "studio", "update for unknown task {task_id}");
        }
        if patch.status.map_or(false, |s| s.is_terminal()) {
            self.persist_video(task_id.to_string());
        }
        merged
    }

    pub fn clear_images(&self) {
        self.state.write().images.clear();
        self.clear_store(Collection::Images);
    }

    pub fn clear_videos(&self) {
        self.state.write().videos.clear();
        self.clear_store(Collection::Videos);
    }

    fn clear_store(&self, collection: Collection) {
        if let Some(store) = &self.store {
            if let Err(err) = store.lock().clear(collection) {
                warn!(target: "studio", "failed to clear {collection:?}: {err}");
            }
        }
    }

    /// Wait for every background store write started so far.
    pub async fn flush(&self) {
        let handles = std::mem::take(&mut *self.pending_writes.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(target: "studio", "history write task failed: {err}");
            }
        }
    }

    fn initial_sync(&self) -> SyncState {
        if self.store.is_some() {
            SyncState::Pending
        } else {
            SyncState::Local
        }
    }

    /// Write the current in-memory version of a video. Whichever write runs
    /// last stores the latest state.
    fn persist_video(&self, task_id: String) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let state = self.state.clone();
        let tx_events = self.tx_events.clone();
        self.spawn_write(move || {
            let db = store.lock();
            let Some(video) = state.read().video(&task_id).cloned() else {
                return;
            };
            let result = write_video(&db, &video);
            drop(db);
            let sync = sync_result(&tx_events, &format!("video {task_id}"), result);
            state.write().mark_video(&task_id, sync);
        });
    }

    fn spawn_write(&self, write: impl FnOnce() + Send + 'static) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let handle = runtime.spawn_blocking(write);
                let mut pending = self.pending_writes.lock();
                pending.retain(|h| !h.is_finished());
                pending.push(handle);
            }
            Err(_) => write(),
        }
    }
}

fn write_video(db: &HistoryDb, video: &GeneratedVideo) -> std::result::Result<(), HistoryError> {
    let patch = VideoPatch {
        status: Some(video.status),
        video_url: video.video_url.clone(),
        progress: video.progress,
        error_message: video.error_message.clone(),
    };
    if !db.update_video_by_task_id(&video.task_id, &patch)? {
        db.save_video(video)?;
    }
    Ok(())
}

fn sync_result(
    tx_events: &Sender<StudioEvent>,
    what: &str,
    result: std::result::Result<(), HistoryError>,
) -> SyncState {
    match result {
        Ok(()) => SyncState::Synced,
        Err(err) => {
            warn!(target: "studio", "failed to store {what}: {err}");
            let reason = err.to_string();
            let _ = tx_events.send(StudioEvent::SyncFailed {
                what: what.to_string(),
                reason: reason.clone(),
            });
            SyncState::Failed(reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoConnector;

    impl Connector for NoConnector {
        fn connect(&self, _api_key: &str) -> generation::Result<Arc<dyn generation::GenerationApi>> {
            Err(GenerationError::MissingApiKey)
        }
    }

    #[test]
    fn failed_write_is_reported_not_rolled_back() {
        let (tx, rx) = unbounded();
        let sync = sync_result(
            &tx,
            "image",
            Err(HistoryError::UnsupportedVersion {
                found: 9,
                supported: 3,
            }),
        );
        assert!(matches!(sync, SyncState::Failed(_)));
        assert!(matches!(
            rx.try_recv(),
            Ok(StudioEvent::SyncFailed { ref what, .. }) if what == "image"
        ));
    }

    #[test]
    fn writes_run_inline_outside_a_runtime() {
        let (studio, _) = Studio::new(Arc::new(NoConnector));
        let studio = studio.with_store(HistoryDb::open_in_memory().unwrap());
        studio.add_generated_image(GeneratedImage::default());
        studio.add_generated_video(GeneratedVideo::pending("cgt-1"));

        let state = studio.snapshot();
        assert_eq!(state.images[0].sync, SyncState::Synced);
        assert_eq!(state.videos[0].sync, SyncState::Synced);
        assert_eq!(studio.store().unwrap().lock().count(Collection::Videos).unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn clear_wins_over_in_flight_image_writes() {
        let (studio, _) = Studio::new(Arc::new(NoConnector));
        let studio = studio.with_store(HistoryDb::open_in_memory().unwrap());
        for round in 0..50 {
            studio.add_generated_image(GeneratedImage {
                url: Some(format!("https://cdn.example/{round}.png")),
                ..Default::default()
            });
            studio.clear_images();
            studio.flush().await;
        }
        assert!(studio.snapshot().images.is_empty());
        assert_eq!(studio.store().unwrap().lock().count(Collection::Images).unwrap(), 0);
    }

    #[test]
    fn entries_without_store_stay_local() {
        let (studio, _) = Studio::new(Arc::new(NoConnector));
        studio.add_generated_image(GeneratedImage::default());
        assert_eq!(studio.snapshot().images[0].sync, SyncState::Local);
    }

    #[test]
    fn unknown_model_is_rejected() {
        let (studio, _) = Studio::new(Arc::new(NoConnector));
        assert!(matches!(
            studio.select_video_model("nope"),
            Err(StudioError::UnknownModel(_))
        ));
        studio.select_video_model("doubao-seedance-1-0-pro-250528").unwrap();
    }
}
