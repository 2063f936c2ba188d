use crate::camera::CameraController;
use crate::error::{Result, ScannerError};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const RAW_EXTENSION: &str = "CR3";

/// Same stem as `name` with the RAW extension
pub fn derive_raw_filename(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    format!("{}.{}", stem, RAW_EXTENSION)
}

/// RAW sidecar still stored on the camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRawAsset {
    /// Name of the RAW file on the camera
    pub raw_filename: String,
    /// Saved JPEG the RAW belongs to
    pub jpg_path: PathBuf,
}

impl PendingRawAsset {
    /// Local destination: next to the JPEG with the RAW extension
    pub fn local_raw_path(&self) -> PathBuf {
        self.jpg_path.with_extension(RAW_EXTENSION)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: usize,
    /// RAW files that were no longer on the camera
    pub missing: Vec<String>,
}

/// FIFO of RAW sidecars awaiting download
#[derive(Debug, Default)]
pub struct RawAssetQueue {
    pending: VecDeque<PendingRawAsset>,
}

impl RawAssetQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, raw_filename: impl Into<String>, jpg_path: impl Into<PathBuf>) {
        let asset = PendingRawAsset {
            raw_filename: raw_filename.into(),
            jpg_path: jpg_path.into(),
        };
        debug!(
            "Queued RAW {} for {}",
            asset.raw_filename,
            asset.jpg_path.display()
        );
        self.pending.push_back(asset);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingRawAsset> {
        self.pending.iter()
    }

    /// Drop every pending item without downloading
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            warn!("Discarding {} pending RAW file(s)", self.pending.len());
        }
        self.pending.clear();
    }

    /// Download, save and delete every pending RAW in order.
    ///
    /// Stops at the first failure; the failed item and everything after it stay queued.
    /// `progress` receives the 1-based index of each completed item and the total.
    pub fn download_all<F>(
        &mut self,
        camera: &mut CameraController,
        mut progress: F,
    ) -> Result<DownloadReport>
    where
        F: FnMut(usize, usize),
    {
        let total = self.pending.len();
        let mut report = DownloadReport::default();
        info!("Downloading {} RAW file(s)", total);

        for index in 1..=total {
            let asset = match self.pending.front() {
                Some(asset) => asset.clone(),
                None => break,
            };

            let located = camera
                .find_file(Some(&asset.raw_filename), RAW_EXTENSION)
                .map_err(|e| raw_failure(&asset, e))?;

            match located {
                Some(file) => {
                    let bytes = camera.fetch(&file).map_err(|e| raw_failure(&asset, e))?;
                    let destination = asset.local_raw_path();
                    std::fs::write(&destination, &bytes).map_err(|e| raw_failure(&asset, e))?;
                    camera.delete(&file).map_err(|e| raw_failure(&asset, e))?;
                    debug!(
                        "Saved {} ({} bytes) to {}",
                        file.path(),
                        bytes.len(),
                        destination.display()
                    );
                    report.downloaded += 1;
                }
                None => {
                    warn!(
                        "RAW {} for {} is not on the camera; skipping",
                        asset.raw_filename,
                        asset.jpg_path.display()
                    );
                    report.missing.push(asset.raw_filename.clone());
                }
            }

            self.pending.pop_front();
            progress(index, total);
        }

        info!(
            "RAW download finished: {} saved, {} missing",
            report.downloaded,
            report.missing.len()
        );
        Ok(report)
    }
}

fn raw_failure(asset: &PendingRawAsset, error: impl std::fmt::Display) -> ScannerError {
    ScannerError::RawDownloadFailed {
        file: asset.raw_filename.clone(),
        details: error.to_string(),
    }
}
