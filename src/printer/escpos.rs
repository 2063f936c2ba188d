use super::FilmAdvanceActuator;
use crate::config::PrinterConfig;
use crate::error::PrinterError;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// `ESC @`: initialize printer
pub const ESC_RESET: [u8; 2] = [0x1B, 0x40];
/// `ESC J 0xFF`: one reverse-feed unit
pub const ESC_REVERSE_FEED: [u8; 3] = [0x1B, 0x4A, 0xFF];

const GS_RASTER_IMAGE: [u8; 4] = [0x1D, 0x76, 0x30, 0x00];
const LINE_FEED: u8 = 0x0A;
/// Rows per raster block; taller feeds are split
const MAX_RASTER_ROWS: u32 = 960;

/// Blank raster of `rows` lines followed by a line feed
pub fn raster_feed(width_px: u32, rows: u32) -> Vec<u8> {
    let bytes_per_row = (width_px as u64 + 7) / 8;
    let blocks = (rows as u64 + MAX_RASTER_ROWS as u64 - 1) / MAX_RASTER_ROWS as u64;
    let header = GS_RASTER_IMAGE.len() as u64 + 4;
    let mut out = Vec::with_capacity((blocks * header + bytes_per_row * rows as u64 + 1) as usize);

    let mut remaining = rows;
    while remaining > 0 {
        let chunk = remaining.min(MAX_RASTER_ROWS);
        out.extend_from_slice(&GS_RASTER_IMAGE);
        out.extend_from_slice(&(bytes_per_row as u16).to_le_bytes());
        out.extend_from_slice(&(chunk as u16).to_le_bytes());
        out.resize(out.len() + (bytes_per_row * chunk as u64) as usize, 0);
        remaining -= chunk;
    }

    out.push(LINE_FEED);
    out
}

/// First path matching a `dir/name*` style pattern, in sorted order
pub fn locate_device(pattern: &str) -> Option<PathBuf> {
    let pattern_path = Path::new(pattern);
    let dir = pattern_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name_pattern = pattern_path.file_name()?.to_string_lossy().into_owned();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {}", dir.display(), e);
            return None;
        }
    };

    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| wildcard_match(&name_pattern, &entry.file_name().to_string_lossy()))
        .map(|entry| entry.path())
        .collect();
    matches.sort();
    matches.into_iter().next()
}

/// `*` and `?` wildcard matching
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    let (mut p, mut n) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((star_p, star_n)) = star {
            p = star_p + 1;
            n = star_n + 1;
            star = Some((star_p, star_n + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

fn open_for_write(path: &Path) -> Result<fs::File, PrinterError> {
    OpenOptions::new()
        .write(true)
        .append(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => PrinterError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => PrinterError::Comm {
                details: format!("cannot open {}: {}", path.display(), e),
            },
        })
}

/// ESC/POS receipt printer used as a film feed motor
pub struct EscPosPrinter {
    pattern: String,
    path: Option<PathBuf>,
    raster_width: u32,
    sink: Box<dyn Write + Send>,
}

impl EscPosPrinter {
    /// Locate the printer through the configured glob and open it for writing
    pub fn discover(config: &PrinterConfig) -> Result<Self, PrinterError> {
        let path = locate_device(&config.device_glob).ok_or_else(|| PrinterError::NotFound {
            pattern: config.device_glob.clone(),
        })?;
        let file = open_for_write(&path)?;
        info!("Film advance printer opened at {}", path.display());

        Ok(Self {
            pattern: config.device_glob.clone(),
            path: Some(path),
            raster_width: config.raster_width,
            sink: Box::new(file),
        })
    }

    /// Printer over an arbitrary byte sink
    pub fn with_writer(sink: Box<dyn Write + Send>, raster_width: u32) -> Self {
        Self {
            pattern: String::new(),
            path: None,
            raster_width,
            sink,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), PrinterError> {
        self.sink
            .write_all(bytes)
            .and_then(|_| self.sink.flush())
            .map_err(|e| PrinterError::Comm {
                details: e.to_string(),
            })
    }
}

impl FilmAdvanceActuator for EscPosPrinter {
    fn advance(&mut self, steps: u32) -> Result<(), PrinterError> {
        if steps == 0 {
            return Ok(());
        }
        debug!("Advancing film {} rows", steps);
        let payload = raster_feed(self.raster_width, steps);
        self.send(&payload)
    }

    fn retreat_one_unit(&mut self) -> Result<(), PrinterError> {
        debug!("Reverse feeding film one unit");
        self.send(&ESC_REVERSE_FEED)?;
        self.send(&[LINE_FEED])
    }

    fn reset(&mut self) -> Result<(), PrinterError> {
        debug!("Resetting printer");
        self.send(&ESC_RESET)
    }

    fn reconnect(&mut self) -> Result<(), PrinterError> {
        if self.pattern.is_empty() {
            return Ok(());
        }

        let path = locate_device(&self.pattern).ok_or_else(|| PrinterError::NotFound {
            pattern: self.pattern.clone(),
        })?;
        let file = open_for_write(&path)?;
        if self.path.as_deref() != Some(path.as_path()) {
            warn!("Printer moved to {}", path.display());
        }
        info!("Film advance printer reopened at {}", path.display());
        self.sink = Box::new(file);
        self.path = Some(path);
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.path {
            Some(path) => format!("ESC/POS printer at {}", path.display()),
            None => "ESC/POS printer".to_string(),
        }
    }
}
