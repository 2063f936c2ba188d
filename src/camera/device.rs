//! Contract of the native camera bridge.
//!
//! Calls are synchronous and may block for the duration of the USB transfer.

use std::time::Duration;

/// Connection state of a camera handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Initializing,
    Ready,
    Faulted,
}

/// Camera seen on the bus during enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedCamera {
    pub model: String,
    pub port: String,
}

/// Where full captures are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTarget {
    InternalRam,
    MemoryCard,
}

/// Event reported by the camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Timeout,
    FileAdded { folder: String, name: String },
    FolderAdded { folder: String, name: String },
    CaptureComplete,
    Unknown(String),
}

/// Enumerates cameras and opens them by port
pub trait CameraBackend: Send {
    fn autodetect(&mut self) -> Result<Vec<DetectedCamera>, String>;

    fn open(&mut self, camera: &DetectedCamera) -> Result<Box<dyn CameraDevice>, String>;
}

/// One opened camera
pub trait CameraDevice: Send {
    fn init(&mut self) -> Result<(), String>;

    fn exit(&mut self) -> Result<(), String>;

    fn serial_number(&mut self) -> Result<String, String>;

    fn set_capture_target(&mut self, target: CaptureTarget) -> Result<(), String>;

    /// Encoded live-view frame
    fn capture_preview(&mut self) -> Result<Vec<u8>, String>;

    /// Fire the shutter; the image lands in device storage
    fn trigger_capture(&mut self) -> Result<(), String>;

    fn wait_for_event(&mut self, timeout: Duration) -> Result<DeviceEvent, String>;

    fn list_files(&mut self, folder: &str) -> Result<Vec<String>, String>;

    fn list_folders(&mut self, folder: &str) -> Result<Vec<String>, String>;

    fn file_get(&mut self, folder: &str, name: &str) -> Result<Vec<u8>, String>;

    fn file_delete(&mut self, folder: &str, name: &str) -> Result<(), String>;
}
