pub mod alignment;
pub mod camera;
pub mod config;
pub mod digitizer;
pub mod error;
pub mod events;
pub mod frame;
pub mod keyboard_input;
pub mod printer;
pub mod raw_assets;
pub mod recovery;
pub mod session;
pub mod sim;

pub use alignment::{evaluate, AlignmentDetector, AlignmentSample};
pub use camera::{CameraBackend, CameraController, CameraDevice, MockCameraBackend};
pub use config::ScannerConfig;
pub use digitizer::{CaptureLoop, Command, DigitizerHandle, LoopState, TickOutcome};
pub use error::{CameraError, ErrorKind, PrinterError, Result, ScannerError};
pub use events::{EventBus, EventFilter, EventReceiver, ScannerEvent};
pub use frame::{PresentationTransform, PreviewFrame};
pub use keyboard_input::KeyboardInputHandler;
pub use printer::{EscPosPrinter, FilmAdvanceActuator};
pub use raw_assets::{PendingRawAsset, RawAssetQueue};
pub use recovery::{CameraRecovery, RecoveryConfig};
pub use session::{CaptureResult, DigitizationSession, FilenameTemplate, FormatId, FormatProfile};
pub use sim::{FilmGeometry, SimulatedRig};
