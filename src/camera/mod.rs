mod controller;
mod device;
mod mock;

pub use controller::{
    CameraController, CameraHandle, CameraTimings, CaptureToken, RemoteFile, JPEG_EXTENSION,
};
pub use device::{
    CameraBackend, CameraDevice, CaptureTarget, ConnectionState, DetectedCamera, DeviceEvent,
};
pub use mock::{MockCameraBackend, MockCameraState, PreviewSource};
