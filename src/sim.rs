//! Hardware-free rig: a film strip shared by a mock camera and a printer.
//!
//! The printer moves the strip; the camera shows a bright perforation in its
//! live view whenever one sits under the alignment window.

use crate::camera::MockCameraBackend;
use crate::error::{PrinterError, Result};
use crate::printer::FilmAdvanceActuator;
use crate::session::FormatId;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info};

const PREVIEW_WIDTH: u32 = 320;
const PREVIEW_HEIGHT: u32 = 260;
const FRAME_WIDTH: u32 = 640;
const FRAME_HEIGHT: u32 = 480;

/// Perforation spacing of the simulated strip, in printer rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilmGeometry {
    pub perforation_pitch: u32,
    /// Rows after each perforation during which it is visible in the window
    pub aligned_window: u32,
}

impl FilmGeometry {
    pub fn for_format(format: FormatId) -> Self {
        match format {
            FormatId::ThirtyFive => Self {
                perforation_pitch: 22,
                aligned_window: 6,
            },
            _ => Self {
                perforation_pitch: 50,
                aligned_window: 10,
            },
        }
    }

    pub fn is_aligned(&self, position: u64) -> bool {
        let pitch = self.perforation_pitch.max(1) as u64;
        position % pitch < self.aligned_window as u64
    }
}

#[derive(Debug)]
struct FilmStrip {
    geometry: FilmGeometry,
    position: u64,
}

/// Mock camera and printer sharing one film strip
pub struct SimulatedRig {
    camera: MockCameraBackend,
    film: Arc<Mutex<FilmStrip>>,
}

impl SimulatedRig {
    pub fn new(serial: &str, geometry: FilmGeometry) -> Result<Self> {
        let film = Arc::new(Mutex::new(FilmStrip {
            geometry,
            position: 0,
        }));
        let camera = MockCameraBackend::new(serial);

        let aligned = encode_jpeg(live_view(true))?;
        let misaligned = encode_jpeg(live_view(false))?;
        let strip = Arc::clone(&film);
        camera.set_preview_source(Arc::new(move || {
            let strip = strip.lock();
            if strip.geometry.is_aligned(strip.position) {
                Ok(aligned.clone())
            } else {
                Ok(misaligned.clone())
            }
        }));
        camera.set_capture_image(encode_jpeg(full_frame())?);

        info!(
            "Simulated rig with serial {} (pitch {} rows)",
            serial, geometry.perforation_pitch
        );
        Ok(Self { camera, film })
    }

    /// Camera side of the rig
    pub fn camera(&self) -> MockCameraBackend {
        self.camera.clone()
    }

    /// Printer side of the rig
    pub fn printer(&self) -> SimulatedPrinter {
        SimulatedPrinter {
            film: Arc::clone(&self.film),
        }
    }

    pub fn position(&self) -> u64 {
        self.film.lock().position
    }
}

/// Printer whose feed moves the simulated strip
#[derive(Clone)]
pub struct SimulatedPrinter {
    film: Arc<Mutex<FilmStrip>>,
}

impl FilmAdvanceActuator for SimulatedPrinter {
    fn advance(&mut self, steps: u32) -> std::result::Result<(), PrinterError> {
        let mut film = self.film.lock();
        film.position += steps as u64;
        debug!("Simulated film at row {}", film.position);
        Ok(())
    }

    fn retreat_one_unit(&mut self) -> std::result::Result<(), PrinterError> {
        let mut film = self.film.lock();
        film.position = film.position.saturating_sub(1);
        Ok(())
    }

    fn reset(&mut self) -> std::result::Result<(), PrinterError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "simulated printer".to_string()
    }
}

fn live_view(aligned: bool) -> RgbImage {
    RgbImage::from_fn(PREVIEW_WIDTH, PREVIEW_HEIGHT, |x, y| {
        let perforation = (170..300).contains(&x) && (60..250).contains(&y);
        if aligned && perforation {
            Rgb([255, 255, 255])
        } else {
            Rgb([24, 22, 20])
        }
    })
}

fn full_frame() -> RgbImage {
    RgbImage::from_fn(FRAME_WIDTH, FRAME_HEIGHT, |x, y| {
        Rgb([(x * 255 / FRAME_WIDTH) as u8, (y * 255 / FRAME_HEIGHT) as u8, 128])
    })
}

fn encode_jpeg(image: RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Jpeg(90))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraController;
    use crate::config::ScannerConfig;
    use crate::digitizer::{CaptureLoop, TickOutcome};
    use crate::events::EventBus;
    use tempfile::TempDir;

    #[test]
    fn test_geometry_window() {
        let geometry = FilmGeometry::for_format(FormatId::Sixteen);
        assert!(geometry.is_aligned(0));
        assert!(geometry.is_aligned(9));
        assert!(!geometry.is_aligned(10));
        assert!(geometry.is_aligned(50));
    }

    #[tokio::test]
    async fn test_simulated_roll_is_digitized() {
        let dir = TempDir::new().unwrap();
        let mut config = ScannerConfig::default();
        config.camera.serial = "SIM0001".to_string();
        config.camera.preview_flush_frames = 1;
        config.capture.directory = dir.path().to_string_lossy().into_owned();

        let geometry = FilmGeometry::for_format(FormatId::Sixteen);
        let rig = SimulatedRig::new("SIM0001", geometry).unwrap();
        let mut camera = CameraController::new(Box::new(rig.camera()), &config.camera);
        camera.discover().await.unwrap();
        let bus = Arc::new(EventBus::new(64));
        let mut capture = CaptureLoop::new(config, camera, Box::new(rig.printer()), bus);

        capture.start(FormatId::Sixteen).await.unwrap();
        for _ in 0..3 {
            assert!(matches!(capture.tick().await, TickOutcome::Captured(_)));
        }

        // Post-capture feeds of 10 rows, plus four misaligned feeds before frames 1 and 2
        assert_eq!(rig.position(), 110);
        assert_eq!(capture.session().frame_counter, 3);
    }
}
