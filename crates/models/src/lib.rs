use thiserror::Error;

mod catalog;
pub use catalog::*;
mod image;
pub use image::*;
mod video;
pub use video::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown work mode: {0}")]
    UnknownWorkMode(String),
    #[error("unknown video status: {0}")]
    UnknownStatus(String),
}

/// Milliseconds since the Unix epoch, the timestamp unit used for history.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
