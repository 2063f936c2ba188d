use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScannerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Printer error: {0}")]
    Printer(#[from] PrinterError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Frame {frame} could not be aligned after {attempts} attempts")]
    AlignmentFailed { frame: u64, attempts: u32 },

    #[error("Format {format} has no alignment parameters")]
    UnsupportedFormat { format: String },

    #[error("Failed to store {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("RAW download failed for {file}: {details}")]
    RawDownloadFailed { file: String, details: String },

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Camera bridge errors
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("No camera with serial '{serial}' detected (found: {found})")]
    NotFound { serial: String, found: String },

    #[error("Camera initialization failed: {details}")]
    InitFailed { details: String },

    #[error("Preview capture failed: {details}")]
    PreviewFailed { details: String },

    #[error("No new image appeared on the camera after {waited_ms} ms")]
    CaptureTimeout { waited_ms: u64 },

    #[error("Camera operation '{operation}' failed: {details}")]
    Operation {
        operation: &'static str,
        details: String,
    },

    #[error("Camera image could not be decoded: {details}")]
    Decode { details: String },

    #[error("Camera is not connected")]
    NotConnected,
}

/// Film advance printer errors
#[derive(Error, Debug)]
pub enum PrinterError {
    #[error("No printer device matches '{pattern}'")]
    NotFound { pattern: String },

    #[error("No write access to printer {path}; add the user to the 'lp' group or install a udev rule")]
    PermissionDenied { path: PathBuf },

    #[error("Printer communication failed: {details}")]
    Comm { details: String },
}

/// Operator-facing error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CameraNotFound,
    CameraInitFailed,
    PreviewCaptureFailed,
    CaptureTimeout,
    AlignmentFailed,
    PrinterUnavailable,
    PrinterCommFailed,
    RawDownloadFailed,
    UnsupportedFormat,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CameraNotFound => "camera_not_found",
            ErrorKind::CameraInitFailed => "camera_init_failed",
            ErrorKind::PreviewCaptureFailed => "preview_capture_failed",
            ErrorKind::CaptureTimeout => "capture_timeout",
            ErrorKind::AlignmentFailed => "alignment_failed",
            ErrorKind::PrinterUnavailable => "printer_unavailable",
            ErrorKind::PrinterCommFailed => "printer_comm_failed",
            ErrorKind::RawDownloadFailed => "raw_download_failed",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ScannerError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ScannerError::Camera(e) => e.kind(),
            ScannerError::Printer(e) => e.kind(),
            ScannerError::AlignmentFailed { .. } => ErrorKind::AlignmentFailed,
            ScannerError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            ScannerError::RawDownloadFailed { .. } => ErrorKind::RawDownloadFailed,
            ScannerError::Storage { .. } | ScannerError::Io(_) => ErrorKind::Storage,
            ScannerError::Config(_)
            | ScannerError::Serialization(_)
            | ScannerError::Image(_)
            | ScannerError::System { .. }
            | ScannerError::Component { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the operator can retry the failed action
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::UnsupportedFormat | ErrorKind::Internal
        )
    }
}

impl CameraError {
    pub fn operation<S: Into<String>>(operation: &'static str, details: S) -> Self {
        Self::Operation {
            operation,
            details: details.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CameraError::NotFound { .. } | CameraError::NotConnected => ErrorKind::CameraNotFound,
            CameraError::InitFailed { .. } => ErrorKind::CameraInitFailed,
            CameraError::PreviewFailed { .. } | CameraError::Decode { .. } => {
                ErrorKind::PreviewCaptureFailed
            }
            CameraError::CaptureTimeout { .. } => ErrorKind::CaptureTimeout,
            CameraError::Operation { .. } => ErrorKind::CameraInitFailed,
        }
    }
}

impl PrinterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PrinterError::NotFound { .. } | PrinterError::PermissionDenied { .. } => {
                ErrorKind::PrinterUnavailable
            }
            PrinterError::Comm { .. } => ErrorKind::PrinterCommFailed,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScannerError>;
