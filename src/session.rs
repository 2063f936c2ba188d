use crate::config::{AlignmentConfig, FormatAlignmentConfig};
use crate::error::{Result, ScannerError};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// Film gauge selected by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatId {
    #[serde(rename = "8mm")]
    Eight,
    #[serde(rename = "super8")]
    SuperEight,
    #[serde(rename = "16mm")]
    Sixteen,
    #[serde(rename = "35mm")]
    ThirtyFive,
}

impl FormatId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatId::Eight => "8mm",
            FormatId::SuperEight => "super8",
            FormatId::Sixteen => "16mm",
            FormatId::ThirtyFive => "35mm",
        }
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatId {
    type Err = ScannerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "8mm" | "8" => Ok(FormatId::Eight),
            "super8" | "super-8" | "s8" => Ok(FormatId::SuperEight),
            "16mm" | "16" => Ok(FormatId::Sixteen),
            "35mm" | "35" => Ok(FormatId::ThirtyFive),
            other => Err(ScannerError::UnsupportedFormat {
                format: other.to_string(),
            }),
        }
    }
}

/// Rectangle of the preview where perforation brightness is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionOfInterest {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl RegionOfInterest {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn area(&self) -> u32 {
        self.width() * self.height()
    }
}

impl From<(u32, u32, u32, u32)> for RegionOfInterest {
    fn from((x0, y0, x1, y1): (u32, u32, u32, u32)) -> Self {
        Self::new(x0, y0, x1, y1)
    }
}

/// `{directory}/{prefix}-{counter:05}.jpg`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTemplate {
    directory: PathBuf,
    prefix: String,
}

impl FilenameTemplate {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn file_name(&self, counter: u64) -> String {
        format!("{}-{:05}.jpg", self.prefix, counter)
    }

    pub fn path_for(&self, counter: u64) -> PathBuf {
        self.directory.join(self.file_name(counter))
    }

    pub fn with_directory(&self, directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prefix: self.prefix.clone(),
        }
    }
}

/// Alignment parameters of one film format, fixed for a session
#[derive(Debug, Clone, PartialEq)]
pub struct FormatProfile {
    pub format: FormatId,
    pub roi: RegionOfInterest,
    pub gray_threshold: u8,
    pub white_pixel_threshold: u32,
    pub perforations_per_frame: u32,
    pub advance_pattern: Vec<u32>,
    /// The first frame after `start` is captured on its first aligned perforation
    pub first_frame_exempt: bool,
    pub filename_template: FilenameTemplate,
}

impl FormatProfile {
    /// Build the profile for `format`; formats without alignment parameters are rejected
    pub fn resolve(
        format: FormatId,
        alignment: &AlignmentConfig,
        filename_template: FilenameTemplate,
    ) -> Result<Self> {
        let params = match format {
            FormatId::Sixteen => &alignment.sixteen_mm,
            FormatId::ThirtyFive => &alignment.thirty_five_mm,
            FormatId::Eight | FormatId::SuperEight => {
                return Err(ScannerError::UnsupportedFormat {
                    format: format.to_string(),
                })
            }
        };

        Ok(Self::from_params(format, params, filename_template))
    }

    fn from_params(
        format: FormatId,
        params: &FormatAlignmentConfig,
        filename_template: FilenameTemplate,
    ) -> Self {
        Self {
            format,
            roi: params.roi.into(),
            gray_threshold: params.gray_threshold,
            white_pixel_threshold: params.white_pixel_threshold,
            perforations_per_frame: params.perforations_per_frame.max(1),
            advance_pattern: params.advance_pattern.clone(),
            first_frame_exempt: params.first_frame_exempt,
            filename_template,
        }
    }

    /// Printer rows to feed for the frame at `frame_counter`
    pub fn advance_step(&self, frame_counter: u64) -> u32 {
        if self.advance_pattern.is_empty() {
            return 1;
        }
        let index = (frame_counter % self.advance_pattern.len() as u64) as usize;
        self.advance_pattern[index]
    }

    /// Same profile writing to another directory
    pub fn with_directory(&self, directory: impl Into<PathBuf>) -> Self {
        Self {
            filename_template: self.filename_template.with_directory(directory),
            ..self.clone()
        }
    }
}

/// Mutable run state of the capture loop
#[derive(Debug, Clone)]
pub struct DigitizationSession {
    pub id: Uuid,
    pub frame_counter: u64,
    pub paused: bool,
    /// True exactly while a capture attempt is in flight
    pub busy: bool,
    pub cleaning_required: bool,
    pub active_format: Option<FormatProfile>,
    pub first_frame_pending: bool,
    pub roll_number: String,
    pub debug_overlay: bool,
    pub captures_since_cleaning: u32,
    pub captures_total: u64,
}

impl DigitizationSession {
    pub fn new(roll_number: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            frame_counter: 0,
            paused: false,
            busy: false,
            cleaning_required: false,
            active_format: None,
            first_frame_pending: false,
            roll_number: roll_number.into(),
            debug_overlay: false,
            captures_since_cleaning: 0,
            captures_total: 0,
        }
    }

    /// Load a profile for a fresh run; the frame counter is kept
    pub fn begin(&mut self, profile: FormatProfile) {
        self.id = Uuid::new_v4();
        self.busy = false;
        self.paused = false;
        self.cleaning_required = false;
        self.first_frame_pending = profile.first_frame_exempt;
        self.captures_since_cleaning = 0;
        self.active_format = Some(profile);
    }
}

/// A saved frame
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureResult {
    pub frame_index: u64,
    pub jpg_path: PathBuf,
    /// RAW sidecar name as stored on the camera
    pub raw_filename: String,
    /// Local destination of the RAW sidecar
    pub raw_path: PathBuf,
    pub saved_at: DateTime<Local>,
}
