mod aligning;
mod capturing;
mod commands;
mod maintenance;
mod runtime;
mod types;

#[cfg(test)]
mod tests;

pub use runtime::DigitizerHandle;
pub use types::{Command, Flow, LoopState, TickOutcome};

use crate::camera::CameraController;
use crate::config::ScannerConfig;
use crate::error::{Result, ScannerError};
use crate::events::{EventBus, ScannerEvent};
use crate::frame::PresentationTransform;
use crate::printer::FilmAdvanceActuator;
use crate::raw_assets::RawAssetQueue;
use crate::recovery::{CameraRecovery, RecoveryConfig};
use crate::session::{DigitizationSession, FilenameTemplate};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use types::WorkerEvent;

/// Frame-by-frame capture and alignment controller.
///
/// Owns the camera, the film actuator and the RAW queue. All device calls happen
/// on the task that owns this value; background workers receive owned data and
/// report back through the worker channel.
pub struct CaptureLoop {
    config: ScannerConfig,
    /// `None` while a download worker holds the camera
    camera: Option<CameraController>,
    actuator: Box<dyn FilmAdvanceActuator>,
    raw_queue: RawAssetQueue,
    session: DigitizationSession,
    state: LoopState,
    event_bus: Arc<EventBus>,
    template: FilenameTemplate,
    transform: PresentationTransform,
    recovery: CameraRecovery,

    next_capture: Option<Instant>,
    last_preview: Instant,
    residue_check_due: bool,
    /// State to restore when a background job completes
    resume_state: LoopState,
    exit_after_download: bool,

    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
    worker_rx: Option<mpsc::UnboundedReceiver<WorkerEvent>>,
}

impl CaptureLoop {
    pub fn new(
        config: ScannerConfig,
        camera: CameraController,
        actuator: Box<dyn FilmAdvanceActuator>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let template =
            FilenameTemplate::new(config.capture.destination(), config.capture.file_prefix());
        let transform = PresentationTransform::from_config(&config.presentation);
        let recovery = CameraRecovery::new(RecoveryConfig::from_camera_config(&config.camera));
        let session = DigitizationSession::new(config.capture.roll_number.clone());
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();

        Self {
            config,
            camera: Some(camera),
            actuator,
            raw_queue: RawAssetQueue::new(),
            session,
            state: LoopState::Idle,
            event_bus,
            template,
            transform,
            recovery,
            next_capture: None,
            last_preview: Instant::now(),
            residue_check_due: false,
            resume_state: LoopState::Idle,
            exit_after_download: false,
            worker_tx,
            worker_rx: Some(worker_rx),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn session(&self) -> &DigitizationSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut DigitizationSession {
        &mut self.session
    }

    pub fn raw_queue(&self) -> &RawAssetQueue {
        &self.raw_queue
    }

    pub fn template(&self) -> &FilenameTemplate {
        &self.template
    }

    /// When the next automatic alignment pass runs, if one is scheduled
    pub fn next_capture(&self) -> Option<Instant> {
        self.next_capture
    }

    pub fn camera(&self) -> Option<&CameraController> {
        self.camera.as_ref()
    }

    fn camera_mut(&mut self) -> Result<&mut CameraController> {
        self.camera
            .as_mut()
            .ok_or_else(|| ScannerError::component("camera", "held by a background task"))
    }

    fn set_state(&mut self, to: LoopState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!("Capture loop {:?} -> {:?}", from, to);
        self.state = to;
        self.event_bus
            .publish(ScannerEvent::StateChanged { from, to });
    }

    fn status(&self, text: impl Into<String>) {
        self.event_bus
            .publish(ScannerEvent::StatusChanged { text: text.into() });
    }

    fn report_error(&self, error: &ScannerError) {
        self.event_bus.publish(ScannerEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        });
    }

    /// Schedule the next alignment pass `max(elapsed + margin, interval)` from now
    fn schedule_next(&mut self, elapsed: std::time::Duration) {
        let delay = (elapsed + self.config.capture.margin()).max(self.config.capture.interval());
        self.next_capture = Some(Instant::now() + delay);
    }

    fn schedule_now(&mut self) {
        self.next_capture = Some(Instant::now());
    }

    fn unschedule(&mut self) {
        self.next_capture = None;
    }
}
