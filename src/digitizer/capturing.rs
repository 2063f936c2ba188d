use super::{CaptureLoop, LoopState, TickOutcome};
use crate::error::{CameraError, ErrorKind, Result, ScannerError};
use crate::events::ScannerEvent;
use crate::frame::render_presentation;
use crate::raw_assets::{derive_raw_filename, RAW_EXTENSION};
use crate::session::{CaptureResult, FormatProfile};
use chrono::Local;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

impl CaptureLoop {
    /// Run one scheduled pass: align, capture and save the current frame.
    pub async fn tick(&mut self) -> TickOutcome {
        self.unschedule();

        if self.residue_check_due {
            self.residue_check_due = false;
            self.check_residue();
        }

        if self.session.paused {
            if self.state != LoopState::Paused {
                self.enter_paused();
            }
            return TickOutcome::Paused;
        }
        if self.session.cleaning_required {
            return TickOutcome::CleaningPause;
        }
        let profile = match self.session.active_format.clone() {
            Some(profile) => profile,
            None => {
                self.set_state(LoopState::Idle);
                return TickOutcome::Idle;
            }
        };
        if self.session.busy {
            debug!("Capture already in flight; skipping tick");
            self.schedule_next(Duration::ZERO);
            return TickOutcome::Busy;
        }

        let started = Instant::now();
        let outcome = match self.align_frame(&profile).await {
            Ok(_) => self.capture_frame(&profile).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                self.after_capture();
                if !self.session.cleaning_required {
                    self.set_state(LoopState::Aligning);
                    self.schedule_next(started.elapsed());
                }
                TickOutcome::Captured(result)
            }
            Err(e) => self.handle_frame_error(e, started).await,
        }
    }

    /// Fire the shutter and save the resulting frame; `busy` is held for the whole sequence
    pub(super) async fn capture_frame(&mut self, profile: &FormatProfile) -> Result<CaptureResult> {
        if self.session.busy {
            return Err(ScannerError::component("capture", "capture already in flight"));
        }

        self.set_state(LoopState::Capturing);
        self.session.busy = true;
        let result = self.capture_and_save(profile).await;
        self.session.busy = false;
        result
    }

    async fn capture_and_save(&mut self, profile: &FormatProfile) -> Result<CaptureResult> {
        let counter = self.session.frame_counter;

        let camera = self.camera_mut()?;
        camera.drain_events();
        let token = camera.capture_full()?;
        let remote = camera.await_new_file(&token).await?;

        self.set_state(LoopState::Saving);
        let bytes = self.camera_mut()?.fetch(&remote)?;

        let jpg_path = profile.filename_template.path_for(counter);
        tokio::fs::write(&jpg_path, &bytes)
            .await
            .map_err(|source| ScannerError::Storage {
                path: jpg_path.clone(),
                source,
            })?;
        debug!(
            "Saved {} ({} bytes) as {}",
            remote.path(),
            bytes.len(),
            jpg_path.display()
        );
        self.spawn_presentation(counter, bytes);

        self.camera_mut()?.delete_best_effort(&remote);

        // A failed feed leaves the index unchanged; the retry saves over this JPEG
        self.actuator.advance(profile.advance_step(counter))?;

        let raw_filename = derive_raw_filename(&remote.name);
        self.raw_queue.enqueue(raw_filename.clone(), jpg_path.clone());
        self.session.frame_counter += 1;

        info!("Frame {} saved to {}", counter, jpg_path.display());
        let raw_path = jpg_path.with_extension(RAW_EXTENSION);
        Ok(CaptureResult {
            frame_index: counter,
            jpg_path,
            raw_filename,
            raw_path,
            saved_at: Local::now(),
        })
    }

    /// Decode and orient the saved bytes off the loop task, then announce the frame
    fn spawn_presentation(&self, index: u64, bytes: Vec<u8>) {
        if self.event_bus.subscriber_count() == 0 {
            return;
        }
        let event_bus = Arc::clone(&self.event_bus);
        let transform = self.transform;

        tokio::task::spawn_blocking(move || match render_presentation(&bytes, transform) {
            Ok(image) => {
                event_bus.publish(ScannerEvent::FrameReady {
                    index,
                    image: Arc::new(image),
                    timestamp: SystemTime::now(),
                });
            }
            Err(e) => warn!("Presentation copy of frame {} failed: {}", index, e),
        });
    }

    async fn handle_frame_error(&mut self, error: ScannerError, started: Instant) -> TickOutcome {
        self.report_error(&error);
        let kind = error.kind();

        match error {
            ScannerError::Camera(CameraError::CaptureTimeout { .. }) => {
                warn!(
                    "Frame {} abandoned after capture timeout; retrying",
                    self.session.frame_counter
                );
                let reinit = self
                    .camera_mut()
                    .and_then(|camera| camera.reinit().map_err(ScannerError::from));
                if let Err(e) = reinit {
                    warn!("Camera reinit after timeout failed: {}", e);
                }
                self.set_state(LoopState::Aligning);
                self.schedule_next(started.elapsed());
                TickOutcome::Retrying(kind)
            }
            ScannerError::Camera(e) => {
                if self.restore_camera().await {
                    info!("Camera restored after '{}'; retrying frame", e);
                    self.set_state(LoopState::Aligning);
                    self.schedule_next(started.elapsed());
                    TickOutcome::Retrying(kind)
                } else {
                    self.halt(kind)
                }
            }
            other => {
                error!("Capture loop halted: {}", other);
                self.halt(kind)
            }
        }
    }

    /// Stop automatic capture until the operator resumes
    pub(super) fn halt(&mut self, kind: ErrorKind) -> TickOutcome {
        self.unschedule();
        self.set_state(LoopState::Error(kind));
        TickOutcome::Halted(kind)
    }

    /// Reinit the handle, then fall back to a full reconnect with backoff
    pub(super) async fn restore_camera(&mut self) -> bool {
        let camera = match self.camera.as_mut() {
            Some(camera) => camera,
            None => return false,
        };

        match camera.reinit() {
            Ok(()) => {
                if camera.verify() {
                    return true;
                }
                warn!("Camera no longer reports the configured serial");
            }
            Err(e) => warn!("Camera reinit failed: {}", e),
        }

        match self.recovery.recover(camera).await {
            Ok(()) => true,
            Err(e) => {
                self.report_error(&ScannerError::from(e));
                false
            }
        }
    }
}
