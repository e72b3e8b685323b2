/// Video task polling.
///
/// The provider reports no real progress, so the value handed to
/// `on_progress` is a display approximation derived from the attempt count.
use std::time::Duration;
use tracing::{debug, info, warn};

use models::VideoStatus;

use crate::error::{GenerationError, Result};
use crate::wire::VideoTaskStatus;
use crate::TaskSource;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl PollConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Approximate progress while a task is processing: 12, 14, ... capped at 90.
pub fn simulated_progress(attempt: u32) -> u8 {
    attempt.saturating_mul(2).saturating_add(10).min(90) as u8
}

/// Query `task_id` until it reaches a terminal status.
///
/// Query errors are retried within the same attempt budget; an error on the
/// final attempt is returned as is. Running out of attempts without a terminal
/// status yields [`GenerationError::PollTimeout`].
pub async fn poll_task<S, F>(
    source: &S,
    task_id: &str,
    config: &PollConfig,
    mut on_progress: F,
) -> Result<VideoTaskStatus>
where
    S: TaskSource + ?Sized,
    F: FnMut(u8) + Send,
{
    info!(
        target: "poller",
        "polling task {task_id}: up to {} attempts every {:?}",
        config.max_attempts,
        config.interval
    );
    for attempt in 1..=config.max_attempts {
        debug!(target: "poller", "task {task_id} attempt {attempt}/{}", config.max_attempts);
        match source.query_task(task_id).await {
            Ok(status) => {
                match status.status {
                    VideoStatus::Processing => on_progress(simulated_progress(attempt)),
                    VideoStatus::Completed => on_progress(100),
                    _ => {}
                }
                if status.status.is_terminal() {
                    info!(target: "poller", "task {task_id} finished as {}", status.status);
                    return Ok(status);
                }
            }
            Err(err) => {
                warn!(target: "poller", "task {task_id} attempt {attempt} failed: {err}");
                if attempt >= config.max_attempts {
                    return Err(err);
                }
            }
        }
        if attempt < config.max_attempts {
            tokio::time::sleep(config.interval).await;
        }
    }
    warn!(target: "poller", "task {task_id} still running after {} attempts", config.max_attempts);
    Err(GenerationError::PollTimeout {
        attempts: config.max_attempts,
    })
}
