use std::sync::Arc;
use tracing::{info, warn};

use generation::{
    media, poll_task, EditImageRequest, GenerateImageRequest, GenerationApi, GenerationError,
    PollConfig,
};
use models::{EditSession, GeneratedImage, GeneratedVideo, VideoStatus, WorkMode};

use crate::{Result, Studio, StudioError, StudioEvent};

const VIDEO_FAILED_MESSAGE: &str = "video generation failed";

impl Studio {
    fn request_settings(&self) {
        self.state.write().is_settings_open = true;
        self.emit(StudioEvent::OpenSettings);
    }

    /// Convert a generation error, asking for settings when credentials are at fault.
    fn surface(&self, err: GenerationError) -> StudioError {
        match err {
            GenerationError::MissingApiKey => {
                self.request_settings();
                StudioError::MissingApiKey
            }
            err if err.is_auth() => {
                self.request_settings();
                StudioError::Generation(err)
            }
            err => StudioError::Generation(err),
        }
    }

    fn api(&self) -> Result<Arc<dyn GenerationApi>> {
        let key = self.read(|s| s.api_key.trim().to_string());
        if key.is_empty() {
            self.request_settings();
            return Err(StudioError::MissingApiKey);
        }
        self.connector.connect(&key).map_err(|err| self.surface(err))
    }

    /// Generate one image from the current prompt and settings.
    pub async fn generate_image(&self) -> Result<GeneratedImage> {
        let api = self.api()?;
        let (request, prompt) = {
            let mut state = self.state.write();
            let prompt = state.prompt.trim().to_string();
            if prompt.is_empty() {
                return Err(StudioError::EmptyPrompt);
            }
            if state.is_generating {
                return Err(StudioError::AlreadyRunning);
            }
            state.is_generating = true;
            let request = GenerateImageRequest::new(state.selected_model.value.clone(), prompt.clone())
                .with_size(state.image_size.clone())
                .with_guidance_scale(state.guidance_scale);
            (request, prompt)
        };

        let result = api.generate_image(&request).await;
        self.state.write().is_generating = false;

        let image = result
            .map_err(|err| self.surface(err))?
            .with_original_prompt(prompt);
        info!(target: "studio", "image generated with {}", request.model);
        self.add_generated_image(image.clone());
        self.state.write().prompt.clear();
        Ok(image)
    }

    /// Edit the current version of `session` and append the result to it.
    pub async fn edit_image(&self, session: &mut EditSession, instruction: &str) -> Result<GeneratedImage> {
        let api = self.api()?;
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(StudioError::EmptyInstruction);
        }
        let current = session.current().cloned().ok_or(StudioError::NoImageSelected)?;
        let source = match (&current.url, &current.base64_data) {
            (Some(url), _) => media::resolve_image_input(url)
                .await
                .map_err(|err| self.surface(err))?,
            (None, Some(b64)) => media::decode_base64(b64)
                .and_then(|bytes| media::data_uri(&bytes))
                .map_err(|err| self.surface(err))?,
            (None, None) => return Err(StudioError::NoImageSelected),
        };
        let request = self.read(|s| {
            EditImageRequest::new(s.edit_model().value.clone(), source, instruction)
                .with_guidance_scale(s.guidance_scale)
        });

        let result = api
            .edit_image(&request)
            .await
            .map_err(|err| self.surface(err))?;
        let edited = current.edited(result, instruction);
        session.push(edited.clone());
        self.add_generated_image(edited.clone());
        Ok(edited)
    }

    /// Create a video task for the current mode and follow it to the end.
    pub async fn generate_video(&self) -> Result<GeneratedVideo> {
        let api = self.api()?;
        let (mode, prompt, image, model) = {
            let mut state = self.state.write();
            let mode = state.work_mode;
            let prompt = state.prompt.trim().to_string();
            let image = state.selected_image_for_video.clone();
            match mode {
                WorkMode::TextToVideo if prompt.is_empty() => return Err(StudioError::EmptyPrompt),
                WorkMode::ImageToVideo if image.is_none() => {
                    return Err(StudioError::NoImageSelected)
                }
                WorkMode::TextToVideo | WorkMode::ImageToVideo => {}
                other => return Err(StudioError::WrongMode(other)),
            }
            if state.is_generating_video {
                return Err(StudioError::AlreadyRunning);
            }
            state.is_generating_video = true;
            (mode, prompt, image, state.selected_video_model.value.clone())
        };

        let result = self
            .run_video(api.as_ref(), mode, &prompt, image.as_deref(), &model)
            .await;
        self.state.write().is_generating_video = false;
        result
    }

    async fn run_video(
        &self,
        api: &dyn GenerationApi,
        mode: WorkMode,
        prompt: &str,
        image: Option<&str>,
        model: &str,
    ) -> Result<GeneratedVideo> {
        let created = match image {
            Some(image) if mode == WorkMode::ImageToVideo => {
                api.image_to_video(image, prompt, model).await
            }
            _ => api.text_to_video(prompt, model).await,
        };
        let video = created.map_err(|err| self.surface(err))?;
        let task_id = video.task_id.clone();
        info!(target: "studio", "video task {task_id} created");
        self.add_generated_video(video);

        let poll = self.poll;
        let finished = self.track_video(api, &task_id, &poll).await?;
        match finished.status {
            VideoStatus::Completed => {
                let mut state = self.state.write();
                state.prompt.clear();
                if mode == WorkMode::ImageToVideo {
                    state.selected_image_for_video = None;
                }
                Ok(finished)
            }
            _ => Err(StudioError::VideoFailed(
                finished
                    .error_message
                    .unwrap_or_else(|| VIDEO_FAILED_MESSAGE.to_string()),
            )),
        }
    }

    /// Poll an existing task again, e.g. after an earlier poll ran out of attempts.
    /// Unknown tasks are added to the history first.
    pub async fn resume_video(&self, task_id: &str, poll: &PollConfig) -> Result<GeneratedVideo> {
        let api = self.api()?;
        if self.read(|s| s.video(task_id).is_none()) {
            self.add_generated_video(GeneratedVideo::pending(task_id));
        }
        self.track_video(api.as_ref(), task_id, poll).await
    }

    /// Poll until terminal, mirroring progress into the record. On poll
    /// failure the record keeps its last status.
    async fn track_video(
        &self,
        api: &dyn GenerationApi,
        task_id: &str,
        poll: &PollConfig,
    ) -> Result<GeneratedVideo> {
        let status = poll_task(api, task_id, poll, |progress| {
            self.update_video(task_id, &models::VideoPatch::progress(progress));
            self.emit(StudioEvent::VideoProgress {
                task_id: task_id.to_string(),
                progress,
            });
        })
        .await
        .map_err(|err| {
            warn!(target: "studio", "polling {task_id} stopped: {err}");
            self.surface(err)
        })?;

        let patch = status.to_patch();
        let finished = self.update_video(task_id, &patch).unwrap_or_else(|| {
            let mut video = GeneratedVideo::pending(task_id);
            video.apply(&patch);
            video
        });
        self.emit(StudioEvent::VideoFinished {
            task_id: task_id.to_string(),
            status: finished.status,
        });
        info!(target: "studio", "video task {task_id} finished as {}", finished.status);
        Ok(finished)
    }
}
