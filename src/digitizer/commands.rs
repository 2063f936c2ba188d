use super::types::WorkerEvent;
use super::{CaptureLoop, Command, Flow, LoopState};
use crate::error::{ErrorKind, Result, ScannerError};
use crate::events::ScannerEvent;
use crate::raw_assets::DownloadReport;
use crate::session::{FormatId, FormatProfile};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Upper bound for one operator nudge, about ten frames of 35mm
const MAX_MANUAL_FEED_ROWS: u32 = 240;

impl CaptureLoop {
    /// Apply an operator command; failures are reported on the event bus
    pub async fn handle_command(&mut self, command: Command) -> Flow {
        debug!("Command: {:?}", command);
        let result = match command {
            Command::Start { format } => self.start(format).await,
            Command::Pause => {
                self.pause();
                Ok(())
            }
            Command::Resume => self.resume().await,
            Command::ResumeAfterCleaning => self.resume_after_cleaning().await,
            Command::SetCounter(value) => self.set_counter(value),
            Command::IncrementCounter => {
                let next = self.session.frame_counter + 1;
                self.set_counter(next)
            }
            Command::SetRollNumber(roll) => {
                self.set_roll_number(roll);
                Ok(())
            }
            Command::ChangeDestinationDirectory(path) => {
                self.change_destination_directory(path).await
            }
            Command::DownloadPendingRaw => self.download_pending_raw(),
            Command::DiscardPendingRaw => {
                self.discard_pending_raw();
                Ok(())
            }
            Command::ToggleDebugOverlay => {
                self.toggle_debug_overlay();
                Ok(())
            }
            Command::AdvanceFilm(steps) => self.advance_film(steps),
            Command::RetreatOneUnit => self.retreat_one_unit(),
            Command::LaunchCameraTool => self.launch_camera_tool(),
            Command::Shutdown { download_pending } => return self.shutdown(download_pending),
        };

        if let Err(e) = result {
            error!("Command failed: {}", e);
            self.report_error(&e);
        }
        Flow::Continue
    }

    /// Load the format and begin aligning the current frame
    pub async fn start(&mut self, format: FormatId) -> Result<()> {
        self.ensure_camera_available()?;
        let profile = FormatProfile::resolve(format, &self.config.alignment, self.template.clone())?;

        self.reset_printer()?;
        create_destination(self.template.directory()).await?;

        if !self.camera_mut()?.verify() && !self.restore_camera().await {
            return Err(ScannerError::component("camera", "camera could not be reacquired"));
        }
        if let Err(e) = self.camera_mut()?.clear_residual_images() {
            warn!("Could not clear leftover images: {}", e);
        }

        self.session.begin(profile);
        info!(
            "Digitizing {} from frame {} (session {})",
            format, self.session.frame_counter, self.session.id
        );
        self.status(format!(
            "Digitizing {} from frame {}",
            format, self.session.frame_counter
        ));
        self.set_state(LoopState::Aligning);
        self.schedule_now();
        Ok(())
    }

    /// Idempotent; commands only run between scheduled passes so the pause
    /// takes effect at the next alignment re-entry
    pub fn pause(&mut self) {
        if self.session.paused {
            return;
        }
        self.session.paused = true;
        if self.next_capture.is_some() || self.state == LoopState::Aligning {
            self.enter_paused();
        }
    }

    /// Clear the pause, confirm the camera and re-enter alignment
    pub async fn resume(&mut self) -> Result<()> {
        self.ensure_camera_available()?;
        if self.session.cleaning_required {
            self.status("Cleaning pending; confirm the cleaning to continue");
            return Ok(());
        }
        if self.session.active_format.is_none() {
            self.session.paused = false;
            self.status("Nothing to resume; start a format first");
            return Ok(());
        }

        self.session.paused = false;
        if !self.camera_mut()?.verify() && !self.restore_camera().await {
            return Err(ScannerError::component("camera", "camera could not be reacquired"));
        }

        info!("Resuming at frame {}", self.session.frame_counter);
        self.status(format!("Resuming at frame {}", self.session.frame_counter));
        self.set_state(LoopState::Aligning);
        self.schedule_now();
        Ok(())
    }

    pub async fn resume_after_cleaning(&mut self) -> Result<()> {
        if !self.session.cleaning_required {
            debug!("No cleaning pending");
        }
        self.session.cleaning_required = false;
        self.session.captures_since_cleaning = 0;
        self.resume().await
    }

    pub fn set_counter(&mut self, value: u64) -> Result<()> {
        if self.session.busy {
            return Err(ScannerError::component(
                "counter",
                "cannot change the counter during a capture",
            ));
        }
        self.session.frame_counter = value;
        self.status(format!("Frame counter set to {}", value));
        Ok(())
    }

    pub fn set_roll_number(&mut self, roll: String) {
        info!("Roll number set to '{}'", roll);
        self.session.roll_number = roll;
    }

    pub async fn change_destination_directory(&mut self, directory: PathBuf) -> Result<()> {
        create_destination(&directory).await?;
        self.template = self.template.with_directory(directory.clone());
        if let Some(profile) = self.session.active_format.as_mut() {
            *profile = profile.with_directory(directory.clone());
        }
        self.status(format!("Saving to {}", directory.display()));
        Ok(())
    }

    pub fn toggle_debug_overlay(&mut self) {
        self.session.debug_overlay = !self.session.debug_overlay;
        debug!("Debug overlay {}", if self.session.debug_overlay { "on" } else { "off" });
    }

    pub fn advance_film(&mut self, steps: u32) -> Result<()> {
        self.ensure_idle("advance the film")?;
        if steps > MAX_MANUAL_FEED_ROWS {
            return Err(ScannerError::component(
                "film feed".to_string(),
                format!(
                    "manual feed of {} rows exceeds the {} row limit",
                    steps, MAX_MANUAL_FEED_ROWS
                ),
            ));
        }
        self.actuator.advance(steps)?;
        Ok(())
    }

    pub fn retreat_one_unit(&mut self) -> Result<()> {
        self.ensure_idle("retreat the film")?;
        self.actuator.retreat_one_unit()?;
        Ok(())
    }

    pub fn discard_pending_raw(&mut self) {
        let count = self.raw_queue.len();
        self.raw_queue.clear();
        self.status(format!("Discarded {} pending RAW file(s)", count));
    }

    /// Hand the camera and the RAW queue to a blocking worker
    pub fn download_pending_raw(&mut self) -> Result<()> {
        self.ensure_idle("download RAW files")?;
        if self.raw_queue.is_empty() {
            self.status("No RAW files pending");
            return Ok(());
        }

        let mut camera = self
            .camera
            .take()
            .ok_or_else(|| ScannerError::component("camera", "held by a background task"))?;
        let mut queue = std::mem::take(&mut self.raw_queue);
        let event_bus = Arc::clone(&self.event_bus);
        let worker_tx = self.worker_tx.clone();

        self.resume_state = self.state;
        self.set_state(LoopState::Downloading);
        self.status(format!("Downloading {} RAW file(s)", queue.len()));

        tokio::task::spawn_blocking(move || {
            let result = queue.download_all(&mut camera, |index, total| {
                event_bus.publish(ScannerEvent::DownloadProgress { index, total });
            });
            if worker_tx
                .send(WorkerEvent::DownloadFinished {
                    camera,
                    queue,
                    result,
                })
                .is_err()
            {
                error!("Capture loop gone before the RAW download finished");
            }
        });
        Ok(())
    }

    /// Release the camera and run the external camera program
    pub fn launch_camera_tool(&mut self) -> Result<()> {
        self.ensure_idle("launch the camera tool")?;
        let program = self.config.camera.external_tool.trim().to_string();
        if program.is_empty() {
            return Err(ScannerError::component("camera tool", "no program configured"));
        }

        self.camera_mut()?.release();
        self.resume_state = self.state;
        self.set_state(LoopState::ExternalTool);
        self.status(format!("Camera released to {}", program));

        let worker_tx = self.worker_tx.clone();
        tokio::spawn(async move {
            let result = tokio::process::Command::new(&program).status().await;
            if worker_tx
                .send(WorkerEvent::ToolExited { program, result })
                .is_err()
            {
                error!("Capture loop gone before the camera tool exited");
            }
        });
        Ok(())
    }

    /// Exit, optionally downloading pending RAW files first
    pub fn shutdown(&mut self, download_pending: bool) -> Flow {
        if self.state == LoopState::Downloading {
            // The worker owns the camera until it reports back
            self.exit_after_download = true;
            warn!("Exit requested during RAW download; waiting for the worker");
            return Flow::Continue;
        }

        if self.state == LoopState::ExternalTool {
            self.status("Close the camera tool before exiting");
            return Flow::Continue;
        }

        if download_pending && !self.raw_queue.is_empty() {
            if !self.state.allows_live_view() || self.next_capture.is_some() {
                self.session.paused = true;
                self.enter_paused();
            }
            match self.download_pending_raw() {
                Ok(()) => {
                    self.exit_after_download = true;
                    return Flow::Continue;
                }
                Err(e) => {
                    self.report_error(&e);
                    return Flow::Continue;
                }
            }
        }

        if !self.raw_queue.is_empty() {
            self.raw_queue.clear();
        }
        Flow::Exit
    }

    /// Completion of a background job
    pub(super) async fn handle_worker_event(&mut self, event: WorkerEvent) -> Flow {
        match event {
            WorkerEvent::DownloadFinished {
                camera,
                queue,
                result,
            } => {
                self.camera = Some(camera);
                self.raw_queue = queue;
                let restore = self.resume_state;
                self.set_state(restore);
                self.download_finished(result)
            }
            WorkerEvent::ToolExited { program, result } => {
                match result {
                    Ok(status) => info!("{} exited with {}", program, status),
                    Err(e) => warn!("Could not run {}: {}", program, e),
                }
                let restore = self.resume_state;
                if self.restore_camera().await {
                    self.status("Camera reacquired");
                    self.set_state(restore);
                } else {
                    self.halt(ErrorKind::CameraNotFound);
                }
                Flow::Continue
            }
        }
    }

    fn download_finished(&mut self, result: Result<DownloadReport>) -> Flow {
        match result {
            Ok(report) => {
                let mut text = format!("Downloaded {} RAW file(s)", report.downloaded);
                if !report.missing.is_empty() {
                    text.push_str(&format!(", {} missing", report.missing.len()));
                }
                self.status(text);
                if self.exit_after_download {
                    return Flow::Exit;
                }
            }
            Err(e) => {
                self.exit_after_download = false;
                self.report_error(&e);
                self.status(format!("{} RAW file(s) still pending", self.raw_queue.len()));
            }
        }
        Flow::Continue
    }

    /// Printer reset with one reopen of the device on failure
    fn reset_printer(&mut self) -> Result<()> {
        if let Err(e) = self.actuator.reset() {
            warn!("Printer reset failed ({}); reopening {}", e, self.actuator.describe());
            self.actuator.reconnect()?;
            self.actuator.reset()?;
        }
        Ok(())
    }

    fn ensure_camera_available(&self) -> Result<()> {
        match self.state {
            LoopState::Downloading | LoopState::ExternalTool => Err(ScannerError::component(
                "camera",
                "held by a background task",
            )),
            _ => Ok(()),
        }
    }

    /// Reject operations that would race a scheduled capture or a background job
    fn ensure_idle(&self, action: &str) -> Result<()> {
        if self.state.allows_live_view() && self.next_capture.is_none() {
            Ok(())
        } else {
            Err(ScannerError::component(
                "capture loop".to_string(),
                format!("pause before trying to {}", action),
            ))
        }
    }

    /// Release the camera on the way out
    pub(super) fn release_devices(&mut self) {
        if let Some(camera) = self.camera.as_mut() {
            camera.release();
        }
    }
}

async fn create_destination(directory: &Path) -> Result<()> {
    tokio::fs::create_dir_all(directory)
        .await
        .map_err(|source| ScannerError::Storage {
            path: directory.to_path_buf(),
            source,
        })
}
