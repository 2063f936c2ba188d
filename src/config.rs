use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScannerConfig {
    pub camera: CameraConfig,
    pub printer: PrinterConfig,
    pub capture: CaptureConfig,
    pub alignment: AlignmentConfig,
    #[serde(default)]
    pub presentation: PresentationConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Serial number of the camera assigned to this station
    #[serde(default = "default_camera_serial")]
    pub serial: String,

    /// Hard limit for a captured image to appear on the camera storage
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,

    /// First storage poll interval while waiting for a capture
    #[serde(default = "default_poll_start_ms")]
    pub poll_start_ms: u64,

    /// Upper bound for the storage poll interval
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,

    /// Growth factor applied to the poll interval after each listing
    #[serde(default = "default_poll_growth")]
    pub poll_growth: f64,

    /// Event wait used while awaiting a new file
    #[serde(default = "default_event_wait_ms")]
    pub event_wait_ms: u64,

    /// Event wait used while draining stale events
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Settle time after releasing the camera during reconnect
    #[serde(default = "default_exit_settle_ms")]
    pub exit_settle_ms: u64,

    /// Settle time before initializing the camera during reconnect
    #[serde(default = "default_init_settle_ms")]
    pub init_settle_ms: u64,

    /// Consecutive previews taken per alignment attempt; the last one is evaluated
    #[serde(default = "default_preview_flush_frames")]
    pub preview_flush_frames: u32,

    /// Pause between flushed previews
    #[serde(default = "default_preview_flush_interval_ms")]
    pub preview_flush_interval_ms: u64,

    /// Live view refresh rate while not digitizing (0 disables live view)
    #[serde(default = "default_live_view_fps")]
    pub live_view_fps: u32,

    /// Maximum reconnect attempts before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base delay between reconnect attempts
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Maximum delay between reconnect attempts
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    /// External camera configuration program
    #[serde(default = "default_external_tool")]
    pub external_tool: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PrinterConfig {
    /// Glob used to locate the USB printer device
    #[serde(default = "default_printer_device_glob")]
    pub device_glob: String,

    /// Width in dots of the blank raster used to feed film
    #[serde(default = "default_raster_width")]
    pub raster_width: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    /// Destination directory for saved frames
    #[serde(default = "default_capture_directory")]
    pub directory: String,

    /// Institutional archive prefix
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,

    /// Reference code of the film being digitized
    #[serde(default = "default_reference_code")]
    pub reference_code: String,

    /// Roll number within the reference
    #[serde(default = "default_roll_number")]
    pub roll_number: String,

    /// Minimum spacing between automatic captures
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Margin added to the elapsed time of a step before rescheduling
    #[serde(default = "default_margin_ms")]
    pub margin_ms: u64,

    /// Alignment attempts per frame before giving up
    #[serde(default = "default_max_alignment_attempts")]
    pub max_alignment_attempts: u32,

    /// Captures between checks for images left on the camera
    #[serde(default = "default_residue_check_every")]
    pub residue_check_every: u64,

    /// Captures between mandatory cleaning pauses
    #[serde(default = "default_cleaning_every")]
    pub cleaning_every: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AlignmentConfig {
    #[serde(default = "default_sixteen_mm")]
    pub sixteen_mm: FormatAlignmentConfig,

    #[serde(default = "default_thirty_five_mm")]
    pub thirty_five_mm: FormatAlignmentConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FormatAlignmentConfig {
    /// Region of interest (x0, y0, x1, y1) in preview pixels
    pub roi: (u32, u32, u32, u32),

    /// Gray level at or above which a pixel counts as white
    pub gray_threshold: u8,

    /// White pixel count above which the perforation is aligned
    pub white_pixel_threshold: u32,

    pub perforations_per_frame: u32,

    /// Printer rows per advance, indexed cyclically by frame counter
    pub advance_pattern: Vec<u32>,

    /// Treat the first frame after start as already aligned
    #[serde(default)]
    pub first_frame_exempt: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PresentationConfig {
    /// Rotation applied to the presentation copy only
    pub rotation: Option<Rotation>,

    #[serde(default)]
    pub flip_horizontal: bool,

    #[serde(default)]
    pub flip_vertical: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Pending operator commands
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Rotate90,
    Rotate180,
    Rotate270,
}

impl ScannerConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("filmscan.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let sixteen = default_sixteen_mm();
        let thirty_five = default_thirty_five_mm();

        let mut builder = Config::builder()
            .set_default("camera.serial", default_camera_serial())?
            .set_default("camera.capture_timeout_ms", default_capture_timeout_ms())?
            .set_default("camera.poll_start_ms", default_poll_start_ms())?
            .set_default("camera.poll_max_ms", default_poll_max_ms())?
            .set_default("camera.poll_growth", default_poll_growth())?
            .set_default("camera.event_wait_ms", default_event_wait_ms())?
            .set_default("camera.drain_timeout_ms", default_drain_timeout_ms())?
            .set_default("camera.exit_settle_ms", default_exit_settle_ms())?
            .set_default("camera.init_settle_ms", default_init_settle_ms())?
            .set_default("camera.preview_flush_frames", default_preview_flush_frames())?
            .set_default(
                "camera.preview_flush_interval_ms",
                default_preview_flush_interval_ms(),
            )?
            .set_default("camera.live_view_fps", default_live_view_fps())?
            .set_default(
                "camera.max_reconnect_attempts",
                default_max_reconnect_attempts(),
            )?
            .set_default(
                "camera.reconnect_base_delay_ms",
                default_reconnect_base_delay_ms(),
            )?
            .set_default(
                "camera.reconnect_max_delay_ms",
                default_reconnect_max_delay_ms(),
            )?
            .set_default("camera.external_tool", default_external_tool())?
            .set_default("printer.device_glob", default_printer_device_glob())?
            .set_default("printer.raster_width", default_raster_width())?
            .set_default("capture.directory", default_capture_directory())?
            .set_default("capture.archive_prefix", default_archive_prefix())?
            .set_default("capture.reference_code", default_reference_code())?
            .set_default("capture.roll_number", default_roll_number())?
            .set_default("capture.interval_ms", default_interval_ms())?
            .set_default("capture.margin_ms", default_margin_ms())?
            .set_default(
                "capture.max_alignment_attempts",
                default_max_alignment_attempts(),
            )?
            .set_default("capture.residue_check_every", default_residue_check_every())?
            .set_default("capture.cleaning_every", default_cleaning_every())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "system.command_queue_capacity",
                default_command_queue_capacity() as i64,
            )?;

        for (key, format) in [("sixteen_mm", &sixteen), ("thirty_five_mm", &thirty_five)] {
            builder = builder
                .set_default(
                    format!("alignment.{}.roi", key),
                    vec![format.roi.0, format.roi.1, format.roi.2, format.roi.3],
                )?
                .set_default(
                    format!("alignment.{}.gray_threshold", key),
                    format.gray_threshold as i64,
                )?
                .set_default(
                    format!("alignment.{}.white_pixel_threshold", key),
                    format.white_pixel_threshold,
                )?
                .set_default(
                    format!("alignment.{}.perforations_per_frame", key),
                    format.perforations_per_frame,
                )?
                .set_default(
                    format!("alignment.{}.advance_pattern", key),
                    format.advance_pattern.clone(),
                )?
                .set_default(
                    format!("alignment.{}.first_frame_exempt", key),
                    format.first_frame_exempt,
                )?;
        }

        let settings = builder
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with FILMSCAN_ prefix
            .add_source(
                Environment::with_prefix("FILMSCAN")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: ScannerConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.serial.trim().is_empty() {
            warn!("No camera serial configured; discovery will not match any camera");
        }

        if self.camera.capture_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Camera capture_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.camera.poll_start_ms == 0 || self.camera.poll_max_ms < self.camera.poll_start_ms
        {
            return Err(ConfigError::Message(
                "Camera poll interval must be positive and poll_max_ms >= poll_start_ms"
                    .to_string(),
            ));
        }

        if self.camera.poll_growth < 1.0 {
            return Err(ConfigError::Message(
                "Camera poll_growth must be at least 1.0".to_string(),
            ));
        }

        if self.camera.preview_flush_frames == 0 {
            return Err(ConfigError::Message(
                "Camera preview_flush_frames must be greater than 0".to_string(),
            ));
        }

        if self.printer.raster_width == 0 {
            return Err(ConfigError::Message(
                "Printer raster_width must be greater than 0".to_string(),
            ));
        }

        if self.capture.interval_ms == 0 {
            return Err(ConfigError::Message(
                "Capture interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.capture.max_alignment_attempts == 0 {
            return Err(ConfigError::Message(
                "Capture max_alignment_attempts must be greater than 0".to_string(),
            ));
        }

        if self.capture.residue_check_every == 0 || self.capture.cleaning_every == 0 {
            return Err(ConfigError::Message(
                "Capture maintenance periods must be greater than 0".to_string(),
            ));
        }

        self.alignment.sixteen_mm.validate("sixteen_mm")?;
        self.alignment.thirty_five_mm.validate("thirty_five_mm")?;

        if self.system.event_bus_capacity == 0 || self.system.command_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus and command queue capacities must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl FormatAlignmentConfig {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let (x0, y0, x1, y1) = self.roi;
        if x1 <= x0 || y1 <= y0 {
            return Err(ConfigError::Message(format!(
                "Alignment {} roi must satisfy x0 < x1 and y0 < y1",
                name
            )));
        }

        if self.perforations_per_frame == 0 {
            return Err(ConfigError::Message(format!(
                "Alignment {} perforations_per_frame must be greater than 0",
                name
            )));
        }

        if self.advance_pattern.is_empty() || self.advance_pattern.contains(&0) {
            return Err(ConfigError::Message(format!(
                "Alignment {} advance_pattern must be non-empty with positive steps",
                name
            )));
        }

        Ok(())
    }
}

impl CameraConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn live_view_period(&self) -> Option<Duration> {
        if self.live_view_fps == 0 {
            None
        } else {
            Some(Duration::from_millis(1000 / self.live_view_fps as u64))
        }
    }
}

impl CaptureConfig {
    /// File name prefix shared by every frame of the current reference
    pub fn file_prefix(&self) -> String {
        let reference = self.reference_code.trim();
        if reference.is_empty() {
            self.archive_prefix.clone()
        } else {
            format!("{}-{}", self.archive_prefix, reference)
        }
    }

    pub fn destination(&self) -> PathBuf {
        PathBuf::from(&self.directory)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn margin(&self) -> Duration {
        Duration::from_millis(self.margin_ms)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                serial: default_camera_serial(),
                capture_timeout_ms: default_capture_timeout_ms(),
                poll_start_ms: default_poll_start_ms(),
                poll_max_ms: default_poll_max_ms(),
                poll_growth: default_poll_growth(),
                event_wait_ms: default_event_wait_ms(),
                drain_timeout_ms: default_drain_timeout_ms(),
                exit_settle_ms: default_exit_settle_ms(),
                init_settle_ms: default_init_settle_ms(),
                preview_flush_frames: default_preview_flush_frames(),
                preview_flush_interval_ms: default_preview_flush_interval_ms(),
                live_view_fps: default_live_view_fps(),
                max_reconnect_attempts: default_max_reconnect_attempts(),
                reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
                reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
                external_tool: default_external_tool(),
            },
            printer: PrinterConfig {
                device_glob: default_printer_device_glob(),
                raster_width: default_raster_width(),
            },
            capture: CaptureConfig {
                directory: default_capture_directory(),
                archive_prefix: default_archive_prefix(),
                reference_code: default_reference_code(),
                roll_number: default_roll_number(),
                interval_ms: default_interval_ms(),
                margin_ms: default_margin_ms(),
                max_alignment_attempts: default_max_alignment_attempts(),
                residue_check_every: default_residue_check_every(),
                cleaning_every: default_cleaning_every(),
            },
            alignment: AlignmentConfig {
                sixteen_mm: default_sixteen_mm(),
                thirty_five_mm: default_thirty_five_mm(),
            },
            presentation: PresentationConfig::default(),
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                command_queue_capacity: default_command_queue_capacity(),
            },
        }
    }
}

// Default value functions
fn default_camera_serial() -> String {
    String::new()
}
fn default_capture_timeout_ms() -> u64 {
    8000
}
fn default_poll_start_ms() -> u64 {
    50
}
fn default_poll_max_ms() -> u64 {
    200
}
fn default_poll_growth() -> f64 {
    1.2
}
fn default_event_wait_ms() -> u64 {
    50
}
fn default_drain_timeout_ms() -> u64 {
    10
}
fn default_exit_settle_ms() -> u64 {
    2500
}
fn default_init_settle_ms() -> u64 {
    1500
}
fn default_preview_flush_frames() -> u32 {
    5
}
fn default_preview_flush_interval_ms() -> u64 {
    50
}
fn default_live_view_fps() -> u32 {
    24
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_reconnect_base_delay_ms() -> u64 {
    1000
}
fn default_reconnect_max_delay_ms() -> u64 {
    10_000
}
fn default_external_tool() -> String {
    "entangle".to_string()
}

fn default_printer_device_glob() -> String {
    "/dev/usb/lp*".to_string()
}
fn default_raster_width() -> u32 {
    35
}

fn default_capture_directory() -> String {
    "./captures".to_string()
}
fn default_archive_prefix() -> String {
    "UY-UDELAR-AGU-AIH".to_string()
}
fn default_reference_code() -> String {
    String::new()
}
fn default_roll_number() -> String {
    String::new()
}
fn default_interval_ms() -> u64 {
    50
}
fn default_margin_ms() -> u64 {
    10
}
fn default_max_alignment_attempts() -> u32 {
    100
}
fn default_residue_check_every() -> u64 {
    25
}
fn default_cleaning_every() -> u32 {
    500
}

fn default_sixteen_mm() -> FormatAlignmentConfig {
    FormatAlignmentConfig {
        roi: (200, 160, 290, 240),
        gray_threshold: 245,
        white_pixel_threshold: 2400,
        perforations_per_frame: 1,
        advance_pattern: vec![10],
        first_frame_exempt: false,
    }
}
fn default_thirty_five_mm() -> FormatAlignmentConfig {
    FormatAlignmentConfig {
        roi: (175, 70, 250, 155),
        gray_threshold: 245,
        white_pixel_threshold: 1850,
        perforations_per_frame: 3,
        advance_pattern: vec![22],
        first_frame_exempt: true,
    }
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_command_queue_capacity() -> usize {
    32
}
