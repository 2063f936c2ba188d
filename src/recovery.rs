use crate::camera::CameraController;
use crate::config::CameraConfig;
use crate::error::CameraError;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Retry policy for device reconnection
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl RecoveryConfig {
    pub fn from_camera_config(config: &CameraConfig) -> Self {
        Self {
            max_retries: config.max_reconnect_attempts,
            base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Reconnects the camera with bounded exponential backoff
pub struct CameraRecovery {
    config: RecoveryConfig,
    attempts: u32,
}

impl CameraRecovery {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Calculate delay for retry with exponential backoff
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry_count.min(16));
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reconnect until success or the retry budget is spent; the last error is returned
    pub async fn recover(&mut self, camera: &mut CameraController) -> Result<(), CameraError> {
        self.attempts = 0;
        let max_retries = self.config.max_retries.max(1);

        loop {
            self.attempts += 1;
            match camera.reconnect().await {
                Ok(()) => {
                    info!("Camera recovered after {} attempt(s)", self.attempts);
                    return Ok(());
                }
                Err(e) if self.attempts >= max_retries => {
                    error!(
                        "Camera recovery gave up after {} attempt(s): {}",
                        self.attempts, e
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(self.attempts - 1);
                    warn!(
                        "Camera reconnect attempt {}/{} failed: {}",
                        self.attempts, max_retries, e
                    );
                    debug!("Waiting {:?} before camera retry", delay);
                    sleep(delay).await;
                }
            }
        }
    }
}
