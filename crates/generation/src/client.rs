/// HTTP client for the Ark generation API.
///
/// Image generation and editing share one endpoint; video generation is an
/// asynchronous task that is created once and then queried by id.
use async_trait::async_trait;
use models::GeneratedImage;
use rand::Rng;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{GenerationError, Result};
use crate::wire::{
    EditImageRequest, ErrorBody, GenerateImageRequest, ImageBody, ImagesResponse,
    TaskCreatedResponse, TaskQueryResponse, VideoTaskRequest, VideoTaskStatus, ADAPTIVE_SIZE,
    DEFAULT_EDIT_GUIDANCE_SCALE, DEFAULT_GUIDANCE_SCALE, DEFAULT_IMAGE_SIZE, EDIT_SEED_BOUND,
};
use crate::{ClientConfig, GenerationApi};

const IMAGES_PATH: &str = "/api/v3/images/generations";
const TASKS_PATH: &str = "/api/v3/contents/generations/tasks";

/// Which call failed; selects the generic fallback error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Generate,
    Edit,
    CreateTask,
    QueryTask,
}

impl Operation {
    fn fallback(self) -> GenerationError {
        match self {
            Operation::Generate => GenerationError::GenerationFailed,
            Operation::Edit => GenerationError::EditFailed,
            Operation::CreateTask => GenerationError::TaskCreationFailed,
            Operation::QueryTask => GenerationError::QueryFailed,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Operation::Generate => "generate image",
            Operation::Edit => "edit image",
            Operation::CreateTask => "create video task",
            Operation::QueryTask => "query video task",
        }
    }
}

/// Map a non-success response onto the error taxonomy.
fn classify_failure(op: Operation, status: StatusCode, body: &str) -> GenerationError {
    if status == StatusCode::UNAUTHORIZED {
        return GenerationError::Auth;
    }
    if op == Operation::QueryTask && status == StatusCode::NOT_FOUND {
        return GenerationError::TaskNotFound;
    }
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    if let Some(message) = parsed.error.and_then(|e| e.message) {
        return GenerationError::Api(message);
    }
    if op == Operation::QueryTask {
        if let Some(message) = parsed.message {
            return GenerationError::Api(message);
        }
    }
    op.fallback()
}

pub struct GenerationClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GenerationClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api_key = config.api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(GenerationError::MissingApiKey);
        }
        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Shared transport for downloads of generated assets.
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        op: Operation,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|err| {
                warn!(target: "generation", "{} request failed: {err}", op.label());
                op.fallback()
            })?;
        let status = response.status();
        let body = response.text().await.map_err(|err| {
            warn!(target: "generation", "{} response unreadable: {err}", op.label());
            op.fallback()
        })?;
        debug!(target: "generation", "{} -> {}", op.label(), status);
        if !status.is_success() {
            warn!(target: "generation", "{} rejected with {}: {}", op.label(), status, body);
            return Err(classify_failure(op, status, &body));
        }
        serde_json::from_str(&body).map_err(|err| {
            warn!(target: "generation", "{} returned invalid JSON: {err}", op.label());
            op.fallback()
        })
    }

    async fn post_images(&self, op: Operation, body: &ImageBody<'_>) -> Result<GeneratedImage> {
        let response: ImagesResponse = self
            .send(op, self.client.post(self.url(IMAGES_PATH)).json(body))
            .await?;
        response.data.into_iter().next().ok_or_else(|| {
            warn!(target: "generation", "{} returned no images", op.label());
            op.fallback()
        })
    }
}

#[async_trait]
impl GenerationApi for GenerationClient {
    async fn generate_image(&self, request: &GenerateImageRequest) -> Result<GeneratedImage> {
        info!(target: "generation", "generating image with {}", request.model);
        let body = ImageBody {
            model: &request.model,
            prompt: &request.prompt,
            image: None,
            response_format: request.response_format.unwrap_or_default(),
            size: request.size.as_deref().unwrap_or(DEFAULT_IMAGE_SIZE),
            guidance_scale: request.guidance_scale.unwrap_or(DEFAULT_GUIDANCE_SCALE),
            watermark: request.watermark.unwrap_or(false),
            seed: None,
        };
        self.post_images(Operation::Generate, &body).await
    }

    async fn edit_image(&self, request: &EditImageRequest) -> Result<GeneratedImage> {
        info!(target: "generation", "editing image with {}", request.model);
        let seed = rand::thread_rng().gen_range(0..EDIT_SEED_BOUND);
        let body = ImageBody {
            model: &request.model,
            prompt: &request.prompt,
            image: Some(&request.image),
            response_format: request.response_format.unwrap_or_default(),
            size: ADAPTIVE_SIZE,
            guidance_scale: request.guidance_scale.unwrap_or(DEFAULT_EDIT_GUIDANCE_SCALE),
            watermark: request.watermark.unwrap_or(false),
            seed: Some(seed),
        };
        self.post_images(Operation::Edit, &body).await
    }

    async fn create_video_task(&self, request: &VideoTaskRequest) -> Result<String> {
        let response: TaskCreatedResponse = self
            .send(
                Operation::CreateTask,
                self.client.post(self.url(TASKS_PATH)).json(request),
            )
            .await?;
        let task_id = response
            .task_id
            .or(response.id)
            .filter(|id| !id.is_empty())
            .ok_or(GenerationError::TaskCreationFailed)?;
        info!(target: "generation", "created video task {task_id}");
        Ok(task_id)
    }

    async fn query_video_task(&self, task_id: &str) -> Result<VideoTaskStatus> {
        let url = format!("{}/{}", self.url(TASKS_PATH), task_id);
        let response: TaskQueryResponse = self
            .send(Operation::QueryTask, self.client.get(url))
            .await?;
        let status = response.into_status(task_id);
        debug!(target: "generation", "task {task_id} is {}", status.status);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_always_maps_to_auth() {
        for op in [
            Operation::Generate,
            Operation::Edit,
            Operation::CreateTask,
            Operation::QueryTask,
        ] {
            let err = classify_failure(op, StatusCode::UNAUTHORIZED, r#"{"error":{"message":"x"}}"#);
            assert!(matches!(err, GenerationError::Auth));
        }
    }

    #[test]
    fn provider_message_is_passed_through() {
        let err = classify_failure(
            Operation::Generate,
            StatusCode::BAD_REQUEST,
            r#"{"error":{"code":"InputTextSensitive","message":"prompt rejected"}}"#,
        );
        assert_eq!(err.to_string(), "prompt rejected");
    }

    #[test]
    fn fallback_depends_on_operation() {
        let gateway = StatusCode::BAD_GATEWAY;
        assert!(matches!(
            classify_failure(Operation::Generate, gateway, "<html>"),
            GenerationError::GenerationFailed
        ));
        assert!(matches!(
            classify_failure(Operation::Edit, gateway, ""),
            GenerationError::EditFailed
        ));
        assert!(matches!(
            classify_failure(Operation::CreateTask, gateway, "{}"),
            GenerationError::TaskCreationFailed
        ));
        assert!(matches!(
            classify_failure(Operation::QueryTask, gateway, "{}"),
            GenerationError::QueryFailed
        ));
    }

    #[test]
    fn not_found_only_special_for_queries() {
        assert!(matches!(
            classify_failure(Operation::QueryTask, StatusCode::NOT_FOUND, ""),
            GenerationError::TaskNotFound
        ));
        assert!(matches!(
            classify_failure(Operation::Generate, StatusCode::NOT_FOUND, ""),
            GenerationError::GenerationFailed
        ));
    }

    #[test]
    fn root_message_only_used_for_queries() {
        let body = r#"{"message":"task expired"}"#;
        assert_eq!(
            classify_failure(Operation::QueryTask, StatusCode::BAD_REQUEST, body).to_string(),
            "task expired"
        );
        assert!(matches!(
            classify_failure(Operation::Edit, StatusCode::BAD_REQUEST, body),
            GenerationError::EditFailed
        ));
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = GenerationClient::new(ClientConfig::new("   ")).err().unwrap();
        assert!(matches!(err, GenerationError::MissingApiKey));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client =
            GenerationClient::new(ClientConfig::new("k").with_base_url("http://localhost:3001/"))
                .unwrap();
        assert_eq!(client.url(IMAGES_PATH), "http://localhost:3001/api/v3/images/generations");
    }
}
