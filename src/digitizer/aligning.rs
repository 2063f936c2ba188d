use super::{CaptureLoop, LoopState};
use crate::alignment::{draw_alignment_overlay, AlignmentDetector, AlignmentSample};
use crate::error::{Result, ScannerError};
use crate::events::ScannerEvent;
use crate::session::FormatProfile;
use image::RgbImage;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::sleep;
use tracing::{debug, info, warn};

impl CaptureLoop {
    /// Feed film until the perforation count for the current frame is reached.
    ///
    /// Returns the number of attempts used. Printer failures abort at once;
    /// preview failures only consume an attempt.
    pub(super) async fn align_frame(&mut self, profile: &FormatProfile) -> Result<u32> {
        self.set_state(LoopState::Aligning);

        let detector = AlignmentDetector::for_profile(profile);
        let max_attempts = self.config.capture.max_alignment_attempts.max(1);
        let step = profile.advance_step(self.session.frame_counter);
        let mut perforations = 0;

        for attempt in 1..=max_attempts {
            let drained = self.camera_mut()?.drain_events();
            if drained > 0 {
                debug!("Dropped {} stale camera event(s)", drained);
            }

            let frame = match self.flushed_preview().await {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(
                        "Alignment attempt {}/{} without preview: {}",
                        attempt, max_attempts, e
                    );
                    continue;
                }
            };

            let sample = detector.evaluate(&frame);
            self.publish_alignment_preview(frame, &detector, &sample);

            if !sample.aligned {
                debug!(
                    "Frame {} not aligned ({} white pixels), advancing {}",
                    self.session.frame_counter, sample.white_pixel_count, step
                );
                self.actuator.advance(step)?;
                continue;
            }

            perforations += 1;

            if self.session.first_frame_pending {
                self.session.first_frame_pending = false;
                info!(
                    "First frame of the {} roll taken as aligned",
                    profile.format
                );
                return Ok(attempt);
            }

            if perforations >= profile.perforations_per_frame {
                debug!(
                    "Frame {} aligned after {} attempt(s)",
                    self.session.frame_counter, attempt
                );
                return Ok(attempt);
            }

            debug!(
                "Perforation {}/{} for frame {}",
                perforations, profile.perforations_per_frame, self.session.frame_counter
            );
            self.actuator.advance(step)?;
        }

        Err(ScannerError::AlignmentFailed {
            frame: self.session.frame_counter,
            attempts: max_attempts,
        })
    }

    /// Take `preview_flush_frames` previews and decode the last one.
    /// Live view lags behind the film position by a few frames.
    async fn flushed_preview(&mut self) -> Result<RgbImage> {
        let frames = self.config.camera.preview_flush_frames.max(1);
        let interval = Duration::from_millis(self.config.camera.preview_flush_interval_ms);

        let mut latest = None;
        for i in 0..frames {
            if i > 0 && !interval.is_zero() {
                sleep(interval).await;
            }
            latest = Some(self.camera_mut()?.capture_preview()?);
        }

        let preview = latest.ok_or_else(|| ScannerError::system("no preview captured"))?;
        Ok(preview.decode()?)
    }

    fn publish_alignment_preview(
        &self,
        mut frame: RgbImage,
        detector: &AlignmentDetector,
        sample: &AlignmentSample,
    ) {
        if self.event_bus.subscriber_count() == 0 {
            return;
        }
        if self.session.debug_overlay {
            draw_alignment_overlay(&mut frame, detector.roi(), sample);
        }
        self.event_bus.publish(ScannerEvent::PreviewReady {
            image: Arc::new(frame),
            white_pixel_count: Some(sample.white_pixel_count),
            timestamp: SystemTime::now(),
        });
    }

    /// One live view frame while no capture is scheduled
    pub(super) fn refresh_live_view(&mut self) {
        self.last_preview = tokio::time::Instant::now();
        if self.session.busy || !self.state.allows_live_view() {
            return;
        }
        if self.event_bus.subscriber_count() == 0 {
            return;
        }

        let camera = match self.camera.as_mut() {
            Some(camera) if camera.is_ready() => camera,
            _ => return,
        };

        let mut image = match camera.capture_preview().and_then(|p| p.decode()) {
            Ok(image) => image,
            Err(e) => {
                debug!("Live view frame skipped: {}", e);
                return;
            }
        };

        let white_pixel_count = match &self.session.active_format {
            Some(profile) if self.session.debug_overlay => {
                let detector = AlignmentDetector::for_profile(profile);
                let sample = detector.evaluate(&image);
                draw_alignment_overlay(&mut image, detector.roi(), &sample);
                Some(sample.white_pixel_count)
            }
            _ => None,
        };

        self.event_bus.publish(ScannerEvent::PreviewReady {
            image: Arc::new(image),
            white_pixel_count,
            timestamp: SystemTime::now(),
        });
    }
}
