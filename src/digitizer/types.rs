use crate::camera::CameraController;
use crate::error::{ErrorKind, Result};
use crate::raw_assets::{DownloadReport, RawAssetQueue};
use crate::session::{CaptureResult, FormatId};
use std::path::PathBuf;

/// Capture loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Aligning,
    Capturing,
    Saving,
    Paused,
    CleaningPause,
    Error(ErrorKind),
    Downloading,
    ExternalTool,
}

impl LoopState {
    /// States in which no automatic capture is scheduled and the camera is ours
    pub fn allows_live_view(&self) -> bool {
        matches!(
            self,
            LoopState::Idle | LoopState::Paused | LoopState::CleaningPause | LoopState::Error(_)
        )
    }
}

/// Operator commands accepted by the capture loop
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start { format: FormatId },
    Pause,
    Resume,
    ResumeAfterCleaning,
    SetCounter(u64),
    IncrementCounter,
    SetRollNumber(String),
    ChangeDestinationDirectory(PathBuf),
    DownloadPendingRaw,
    DiscardPendingRaw,
    ToggleDebugOverlay,
    /// Manual feed in printer rows
    AdvanceFilm(u32),
    RetreatOneUnit,
    LaunchCameraTool,
    Shutdown { download_pending: bool },
}

/// Result of one scheduled pass of the loop
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Captured(CaptureResult),
    /// A capture was already in flight; nothing changed
    Busy,
    Paused,
    Idle,
    CleaningPause,
    /// The frame was abandoned and the same index is scheduled again
    Retrying(ErrorKind),
    /// The loop stopped until the operator acts
    Halted(ErrorKind),
}

/// Completion messages from background workers
pub(crate) enum WorkerEvent {
    DownloadFinished {
        camera: CameraController,
        queue: RawAssetQueue,
        result: Result<DownloadReport>,
    },
    ToolExited {
        program: String,
        result: std::io::Result<std::process::ExitStatus>,
    },
}

/// Whether the runtime keeps going after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}
