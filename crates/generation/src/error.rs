use thiserror::Error;

/// Message shown for any rejected credential.
pub const AUTH_ERROR_MESSAGE: &str = "invalid API key, please check your settings";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("an API key is required, configure one in settings")]
    MissingApiKey,

    #[error("{}", AUTH_ERROR_MESSAGE)]
    Auth,

    /// Business error reported by the provider, passed through verbatim.
    #[error("{0}")]
    Api(String),

    #[error("image generation failed, please try again later")]
    GenerationFailed,

    #[error("image edit failed, please try again later")]
    EditFailed,

    #[error("failed to create the video generation task, please try again later")]
    TaskCreationFailed,

    #[error("failed to query the task status, please try again later")]
    QueryFailed,

    #[error("task does not exist or has expired")]
    TaskNotFound,

    #[error("video generation timed out after {attempts} attempts, check back later")]
    PollTimeout { attempts: u32 },

    #[error("image conversion failed: {0}")]
    InvalidImage(String),

    #[error("download failed: {0}")]
    Download(String),
}

impl GenerationError {
    pub fn is_auth(&self) -> bool {
        matches!(self, GenerationError::Auth | GenerationError::MissingApiKey)
    }
}

pub type Result<T> = std::result::Result<T, GenerationError>;
