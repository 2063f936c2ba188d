use super::device::{CameraBackend, CameraDevice, CaptureTarget, ConnectionState, DeviceEvent};
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::PreviewFrame;
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

pub const JPEG_EXTENSION: &str = "jpg";
const STORAGE_ROOT: &str = "/";
const MAX_FOLDER_DEPTH: usize = 8;
const DRAIN_EVENT_LIMIT: usize = 128;

/// Timing policy for camera operations
#[derive(Debug, Clone, PartialEq)]
pub struct CameraTimings {
    pub capture_timeout: Duration,
    pub poll_start: Duration,
    pub poll_max: Duration,
    pub poll_growth: f64,
    pub event_wait: Duration,
    pub drain_timeout: Duration,
    pub exit_settle: Duration,
    pub init_settle: Duration,
}

impl CameraTimings {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            capture_timeout: config.capture_timeout(),
            poll_start: Duration::from_millis(config.poll_start_ms),
            poll_max: Duration::from_millis(config.poll_max_ms),
            poll_growth: config.poll_growth,
            event_wait: Duration::from_millis(config.event_wait_ms),
            drain_timeout: Duration::from_millis(config.drain_timeout_ms),
            exit_settle: Duration::from_millis(config.exit_settle_ms),
            init_settle: Duration::from_millis(config.init_settle_ms),
        }
    }

    /// Next storage poll interval after `current`
    pub fn next_poll_interval(&self, current: Duration) -> Duration {
        let micros = (current.as_micros() as f64 * self.poll_growth).round() as u64;
        Duration::from_micros(micros).min(self.poll_max)
    }
}

/// File on the camera storage
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteFile {
    pub folder: String,
    pub name: String,
}

impl RemoteFile {
    pub fn new(folder: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            name: name.into(),
        }
    }

    pub fn path(&self) -> String {
        join_folder(&self.folder, &self.name)
    }

    pub fn has_extension(&self, extension: &str) -> bool {
        has_extension(&self.name, extension)
    }
}

/// Proof that the shutter was fired
#[derive(Debug, Clone, Copy)]
pub struct CaptureToken {
    pub triggered_at: Instant,
}

/// The opened camera matching the configured serial
pub struct CameraHandle {
    serial: String,
    model: String,
    port: String,
    state: ConnectionState,
    device: Box<dyn CameraDevice>,
}

impl CameraHandle {
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

/// Owns the camera handle and implements discovery, capture and transfer
pub struct CameraController {
    backend: Box<dyn CameraBackend>,
    target_serial: String,
    timings: CameraTimings,
    handle: Option<CameraHandle>,
    last_found_folder: Option<String>,
    preview_sequence: u64,
}

impl CameraController {
    pub fn new(backend: Box<dyn CameraBackend>, config: &CameraConfig) -> Self {
        Self::with_timings(
            backend,
            config.serial.trim(),
            CameraTimings::from_config(config),
        )
    }

    pub fn with_timings(
        backend: Box<dyn CameraBackend>,
        target_serial: impl Into<String>,
        timings: CameraTimings,
    ) -> Self {
        Self {
            backend,
            target_serial: target_serial.into(),
            timings,
            handle: None,
            last_found_folder: None,
            preview_sequence: 0,
        }
    }

    pub fn target_serial(&self) -> &str {
        &self.target_serial
    }

    pub fn timings(&self) -> &CameraTimings {
        &self.timings
    }

    pub fn handle(&self) -> Option<&CameraHandle> {
        self.handle.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.handle
            .as_ref()
            .map(|h| h.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn is_ready(&self) -> bool {
        self.connection_state() == ConnectionState::Ready
    }

    /// Enumerate cameras and open the one whose serial matches the configuration
    pub async fn discover(&mut self) -> Result<&CameraHandle, CameraError> {
        self.discover_with_settle(Duration::ZERO).await
    }

    async fn discover_with_settle(
        &mut self,
        init_settle: Duration,
    ) -> Result<&CameraHandle, CameraError> {
        self.release();

        let mut cameras = self
            .backend
            .autodetect()
            .map_err(|e| CameraError::operation("autodetect", e))?;
        cameras.sort_by(|a, b| a.model.cmp(&b.model).then(a.port.cmp(&b.port)));
        debug!("Detected {} camera(s)", cameras.len());

        let mut other_serials = Vec::new();
        let mut selected: Option<CameraHandle> = None;

        for camera in cameras {
            let mut device = match self.backend.open(&camera) {
                Ok(device) => device,
                Err(e) => {
                    warn!("Cannot open {} on {}: {}", camera.model, camera.port, e);
                    continue;
                }
            };

            // A previous session may still hold the device
            if let Err(e) = device.exit() {
                debug!("Releasing stale session on {} failed: {}", camera.port, e);
            }
            if !init_settle.is_zero() {
                sleep(init_settle).await;
            }
            if let Err(e) = device.init() {
                warn!("Cannot initialize {} on {}: {}", camera.model, camera.port, e);
                continue;
            }

            let serial = match device.serial_number() {
                Ok(serial) => serial.trim().to_string(),
                Err(e) => {
                    warn!("Cannot read serial of {} on {}: {}", camera.model, camera.port, e);
                    close_unused(device.as_mut(), &camera.port);
                    continue;
                }
            };

            if self.target_serial.is_empty() || serial != self.target_serial {
                info!(
                    "Ignoring {} with serial {} (expected '{}')",
                    camera.model, serial, self.target_serial
                );
                other_serials.push(serial);
                close_unused(device.as_mut(), &camera.port);
                continue;
            }

            if selected.is_some() {
                warn!(
                    "Another camera on {} reports serial {}; keeping the first match",
                    camera.port, serial
                );
                close_unused(device.as_mut(), &camera.port);
                continue;
            }

            if let Err(e) = device.set_capture_target(CaptureTarget::MemoryCard) {
                warn!("Cannot set capture target to memory card: {}", e);
            }

            info!(
                "Camera {} (serial {}) ready on {}",
                camera.model, serial, camera.port
            );
            selected = Some(CameraHandle {
                serial,
                model: camera.model,
                port: camera.port,
                state: ConnectionState::Ready,
                device,
            });
        }

        match selected {
            Some(handle) => {
                self.handle = Some(handle);
                self.handle.as_ref().ok_or(CameraError::NotConnected)
            }
            None => {
                let found = if other_serials.is_empty() {
                    "none".to_string()
                } else {
                    other_serials.join(", ")
                };
                error!(
                    "Configured camera '{}' not found (detected: {})",
                    self.target_serial, found
                );
                Err(CameraError::NotFound {
                    serial: self.target_serial.clone(),
                    found,
                })
            }
        }
    }

    /// Full teardown and rediscovery of the configured camera
    pub async fn reconnect(&mut self) -> Result<(), CameraError> {
        info!("Reconnecting camera '{}'", self.target_serial);
        self.release();
        sleep(self.timings.exit_settle).await;
        let init_settle = self.timings.init_settle;
        self.discover_with_settle(init_settle).await.map(|_| ())
    }

    /// Exit and drop the handle so another program can use the camera
    pub fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.device.exit() {
                debug!("Camera exit during release failed: {}", e);
            }
            debug!("Camera {} released", handle.serial);
        }
    }

    /// Exit and init the current handle
    pub fn reinit(&mut self) -> Result<(), CameraError> {
        let handle = self.handle.as_mut().ok_or(CameraError::NotConnected)?;
        handle.state = ConnectionState::Initializing;

        if let Err(e) = handle.device.exit() {
            debug!("Camera exit before reinit failed: {}", e);
        }

        match handle.device.init() {
            Ok(()) => {
                if let Err(e) = handle.device.set_capture_target(CaptureTarget::MemoryCard) {
                    warn!("Cannot set capture target after reinit: {}", e);
                }
                handle.state = ConnectionState::Ready;
                debug!("Camera reinitialized");
                Ok(())
            }
            Err(e) => {
                handle.state = ConnectionState::Faulted;
                Err(CameraError::InitFailed { details: e })
            }
        }
    }

    /// Confirm the handle still answers with the configured serial
    pub fn verify(&mut self) -> bool {
        let target = self.target_serial.clone();
        match self.handle.as_mut() {
            Some(handle) if handle.state == ConnectionState::Ready => {
                match handle.device.serial_number() {
                    Ok(serial) => serial.trim() == target,
                    Err(e) => {
                        debug!("Serial check failed: {}", e);
                        false
                    }
                }
            }
            _ => false,
        }
    }

    fn device_mut(&mut self) -> Result<&mut Box<dyn CameraDevice>, CameraError> {
        self.handle
            .as_mut()
            .map(|h| &mut h.device)
            .ok_or(CameraError::NotConnected)
    }

    /// Live-view frame; a failure triggers one reinit before being reported
    pub fn capture_preview(&mut self) -> Result<PreviewFrame, CameraError> {
        match self.device_mut()?.capture_preview() {
            Ok(data) => {
                self.preview_sequence += 1;
                Ok(PreviewFrame::new(self.preview_sequence, data))
            }
            Err(e) => {
                warn!("Preview capture failed: {}; reinitializing camera", e);
                if let Err(reinit_err) = self.reinit() {
                    warn!("Camera reinit after preview failure failed: {}", reinit_err);
                }
                Err(CameraError::PreviewFailed { details: e })
            }
        }
    }

    /// Fire the shutter
    pub fn capture_full(&mut self) -> Result<CaptureToken, CameraError> {
        self.device_mut()?
            .trigger_capture()
            .map_err(|e| CameraError::operation("trigger_capture", e))?;
        Ok(CaptureToken {
            triggered_at: Instant::now(),
        })
    }

    /// Wait for the JPEG produced by `token`, preferring camera events and
    /// falling back to storage listings with a growing poll interval
    pub async fn await_new_file(&mut self, token: &CaptureToken) -> Result<RemoteFile, CameraError> {
        let started = Instant::now();
        let mut poll = self.timings.poll_start;

        loop {
            let event_wait = self.timings.event_wait;
            match self.device_mut()?.wait_for_event(event_wait) {
                Ok(DeviceEvent::FileAdded { folder, name }) if has_extension(&name, JPEG_EXTENSION) => {
                    debug!(
                        "Camera reported {}/{} {:?} after trigger",
                        folder,
                        name,
                        token.triggered_at.elapsed()
                    );
                    self.last_found_folder = Some(folder.clone());
                    return Ok(RemoteFile { folder, name });
                }
                Ok(DeviceEvent::Timeout) => {}
                Ok(event) => debug!("Ignoring camera event {:?}", event),
                Err(e) => debug!("Waiting for camera event failed: {}", e),
            }

            if started.elapsed() >= self.timings.capture_timeout {
                break;
            }

            sleep(poll).await;
            match self.find_file(None, JPEG_EXTENSION) {
                Ok(Some(file)) => {
                    debug!("Found {} by listing storage", file.path());
                    return Ok(file);
                }
                Ok(None) => {}
                Err(e) => debug!("Listing camera storage failed: {}", e),
            }
            poll = self.timings.next_poll_interval(poll);

            if started.elapsed() >= self.timings.capture_timeout {
                break;
            }
        }

        let waited_ms = started.elapsed().as_millis() as u64;
        warn!("No new image on the camera after {} ms", waited_ms);
        Err(CameraError::CaptureTimeout { waited_ms })
    }

    pub fn fetch(&mut self, file: &RemoteFile) -> Result<Vec<u8>, CameraError> {
        self.device_mut()?
            .file_get(&file.folder, &file.name)
            .map_err(|e| CameraError::operation("file_get", format!("{}: {}", file.path(), e)))
    }

    pub fn delete(&mut self, file: &RemoteFile) -> Result<(), CameraError> {
        self.device_mut()?
            .file_delete(&file.folder, &file.name)
            .map_err(|e| CameraError::operation("file_delete", format!("{}: {}", file.path(), e)))
    }

    /// Delete and log instead of failing
    pub fn delete_best_effort(&mut self, file: &RemoteFile) -> bool {
        match self.delete(file) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not delete {} from the camera: {}", file.path(), e);
                false
            }
        }
    }

    /// Discard queued camera events; returns how many were dropped
    pub fn drain_events(&mut self) -> usize {
        let wait = self.timings.drain_timeout;
        let device = match self.device_mut() {
            Ok(device) => device,
            Err(_) => return 0,
        };

        let mut drained = 0;
        while drained < DRAIN_EVENT_LIMIT {
            match device.wait_for_event(wait) {
                Ok(DeviceEvent::Timeout) => break,
                Ok(event) => {
                    debug!("Discarding stale camera event {:?}", event);
                    drained += 1;
                }
                Err(e) => {
                    debug!("Draining camera events failed: {}", e);
                    break;
                }
            }
        }
        drained
    }

    /// Locate a file by name (case-insensitive) or the newest file with `extension`
    pub fn find_file(
        &mut self,
        name: Option<&str>,
        extension: &str,
    ) -> Result<Option<RemoteFile>, CameraError> {
        if let Some(folder) = self.last_found_folder.clone() {
            match self.device_mut()?.list_files(&folder) {
                Ok(names) => {
                    let candidates = names
                        .into_iter()
                        .map(|n| RemoteFile::new(folder.clone(), n))
                        .collect();
                    if let Some(found) = select_file(candidates, name, extension) {
                        return Ok(Some(found));
                    }
                }
                Err(e) => {
                    debug!("Cached folder {} is gone: {}", folder, e);
                    self.last_found_folder = None;
                }
            }
        }

        let files = self.list_remote(extension)?;
        let found = select_file(files, name, extension);
        if let Some(file) = &found {
            self.last_found_folder = Some(file.folder.clone());
        }
        Ok(found)
    }

    /// All files with `extension` anywhere on the camera storage
    pub fn list_remote(&mut self, extension: &str) -> Result<Vec<RemoteFile>, CameraError> {
        let device = self.device_mut()?;
        let mut files = Vec::new();
        collect_files(device.as_mut(), STORAGE_ROOT, extension, &mut files, 0)
            .map_err(|e| CameraError::operation("list_files", e))?;
        Ok(files)
    }

    /// JPEGs left on the camera
    pub fn residual_images(&mut self) -> Result<Vec<RemoteFile>, CameraError> {
        self.list_remote(JPEG_EXTENSION)
    }

    /// Delete leftover JPEGs; RAW files are kept for download
    pub fn clear_residual_images(&mut self) -> Result<usize, CameraError> {
        let residue = self.residual_images()?;
        let mut deleted = 0;
        for file in &residue {
            if self.delete_best_effort(file) {
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!("Removed {} leftover image(s) from the camera", deleted);
        }
        Ok(deleted)
    }
}

fn collect_files(
    device: &mut dyn CameraDevice,
    folder: &str,
    extension: &str,
    out: &mut Vec<RemoteFile>,
    depth: usize,
) -> Result<(), String> {
    let names = device.list_files(folder)?;
    out.extend(
        names
            .into_iter()
            .filter(|n| has_extension(n, extension))
            .map(|n| RemoteFile::new(folder, n)),
    );

    if depth >= MAX_FOLDER_DEPTH {
        return Ok(());
    }

    for sub in device.list_folders(folder)? {
        let path = join_folder(folder, &sub);
        if let Err(e) = collect_files(device, &path, extension, out, depth + 1) {
            debug!("Skipping camera folder {}: {}", path, e);
        }
    }
    Ok(())
}

fn select_file(
    candidates: Vec<RemoteFile>,
    name: Option<&str>,
    extension: &str,
) -> Option<RemoteFile> {
    let mut matching = candidates
        .into_iter()
        .filter(|f| f.has_extension(extension));
    match name {
        Some(wanted) => matching.find(|f| f.name.eq_ignore_ascii_case(wanted)),
        None => matching.max_by(|a, b| a.name.cmp(&b.name)),
    }
}

pub(crate) fn has_extension(name: &str, extension: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| {
            ext.to_string_lossy()
                .eq_ignore_ascii_case(extension.trim_start_matches('.'))
        })
        .unwrap_or(false)
}

pub(crate) fn join_folder(folder: &str, name: &str) -> String {
    format!("{}/{}", folder.trim_end_matches('/'), name)
}

/// Close a camera discovery will not keep
fn close_unused(device: &mut dyn CameraDevice, port: &str) {
    if let Err(e) = device.exit() {
        debug!("Closing unused camera on {} failed: {}", port, e);
    }
}
