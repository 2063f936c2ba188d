use super::{CaptureLoop, LoopState};
use crate::events::ScannerEvent;
use tracing::{debug, info, warn};

impl CaptureLoop {
    /// Bookkeeping after every saved frame
    pub(super) fn after_capture(&mut self) {
        self.session.captures_total += 1;
        self.session.captures_since_cleaning += 1;

        let residue_every = self.config.capture.residue_check_every;
        if residue_every > 0 && self.session.captures_total % residue_every == 0 {
            self.residue_check_due = true;
        }

        let cleaning_every = self.config.capture.cleaning_every;
        if cleaning_every > 0 && self.session.captures_since_cleaning >= cleaning_every {
            self.enter_cleaning_pause();
        }
    }

    fn enter_cleaning_pause(&mut self) {
        let captures = self.session.captures_since_cleaning;
        self.session.cleaning_required = true;
        self.session.captures_since_cleaning = 0;
        self.unschedule();
        self.set_state(LoopState::CleaningPause);
        self.event_bus
            .publish(ScannerEvent::CleaningRequired { captures });
    }

    /// Warn about images the loop failed to delete from the camera
    pub(super) fn check_residue(&mut self) -> usize {
        let camera = match self.camera.as_mut() {
            Some(camera) => camera,
            None => return 0,
        };

        match camera.residual_images() {
            Ok(files) if files.is_empty() => {
                debug!("No leftover images on the camera");
                0
            }
            Ok(files) => {
                let names: Vec<String> = files.iter().map(|f| f.path()).collect();
                warn!(
                    "{} image(s) left on the camera: {}",
                    names.len(),
                    names.join(", ")
                );
                self.status(format!("{} image(s) left on the camera", names.len()));
                names.len()
            }
            Err(e) => {
                warn!("Could not check the camera for leftover images: {}", e);
                0
            }
        }
    }

    /// Apply a pending pause: reset the printer and stop scheduling
    pub(super) fn enter_paused(&mut self) {
        self.unschedule();
        if let Err(e) = self.actuator.reset() {
            warn!("Printer reset on pause failed: {}", e);
        }
        info!("Digitizing paused at frame {}", self.session.frame_counter);
        self.set_state(LoopState::Paused);
    }
}
