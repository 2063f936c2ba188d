use super::{CaptureLoop, Command, Flow};
use crate::error::{Result, ScannerError};
use crate::session::FormatId;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Cloneable command sender for the capture loop task
#[derive(Clone)]
pub struct DigitizerHandle {
    commands: mpsc::Sender<Command>,
}

impl DigitizerHandle {
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ScannerError::system("capture loop is not running"))
    }

    /// For callers on blocking threads such as the keyboard reader
    pub fn blocking_send(&self, command: Command) -> Result<()> {
        self.commands
            .blocking_send(command)
            .map_err(|_| ScannerError::system("capture loop is not running"))
    }

    pub async fn start(&self, format: FormatId) -> Result<()> {
        self.send(Command::Start { format }).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(Command::Resume).await
    }

    pub async fn set_counter(&self, value: u64) -> Result<()> {
        self.send(Command::SetCounter(value)).await
    }

    pub async fn change_destination_directory(&self, directory: PathBuf) -> Result<()> {
        self.send(Command::ChangeDestinationDirectory(directory))
            .await
    }

    pub async fn download_pending_raw(&self) -> Result<()> {
        self.send(Command::DownloadPendingRaw).await
    }

    pub async fn discard_pending_raw(&self) -> Result<()> {
        self.send(Command::DiscardPendingRaw).await
    }

    pub async fn toggle_debug_overlay(&self) -> Result<()> {
        self.send(Command::ToggleDebugOverlay).await
    }

    pub async fn shutdown(&self, download_pending: bool) -> Result<()> {
        self.send(Command::Shutdown { download_pending }).await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    #[cfg(test)]
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { commands: tx }, rx)
    }
}

impl CaptureLoop {
    /// Move the loop onto its own task
    pub fn spawn(self, cancel: CancellationToken) -> (DigitizerHandle, JoinHandle<Result<()>>) {
        let capacity = self.config.system.command_queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(self.run(rx, cancel));
        (DigitizerHandle { commands: tx }, task)
    }

    /// Serve commands, scheduled passes, live view and worker completions
    /// until shutdown or cancellation
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut workers = self
            .worker_rx
            .take()
            .ok_or_else(|| ScannerError::system("capture loop already running"))?;
        let live_view_period = self.config.camera.live_view_period();
        info!("Capture loop running");

        loop {
            let capture_at = self.next_capture;
            let preview_at = match live_view_period {
                Some(period) if capture_at.is_none() && self.state.allows_live_view() => {
                    Some(self.last_preview + period)
                }
                _ => None,
            };
            let wake_at = capture_at.or(preview_at);

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Capture loop cancelled");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).await == Flow::Exit {
                            break;
                        }
                    }
                    None => {
                        debug!("All command senders dropped");
                        break;
                    }
                },
                Some(event) = workers.recv() => {
                    if self.handle_worker_event(event).await == Flow::Exit {
                        break;
                    }
                }
                _ = wait_until(wake_at) => {
                    if capture_at.is_some() {
                        self.tick().await;
                    } else {
                        self.refresh_live_view();
                    }
                }
            }
        }

        self.release_devices();
        info!(
            "Capture loop stopped at frame {} with {} RAW file(s) pending",
            self.session.frame_counter,
            self.raw_queue.len()
        );
        Ok(())
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
