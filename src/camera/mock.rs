use super::controller::join_folder;
use super::device::{CameraBackend, CameraDevice, CaptureTarget, DetectedCamera, DeviceEvent};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Produces live-view frames when no scripted preview is queued
pub type PreviewSource = Arc<dyn Fn() -> Result<Vec<u8>, String> + Send + Sync>;

const DEFAULT_FOLDER: &str = "/store_00010001/DCIM/100CANON";

/// Shared state behind a scripted in-memory camera
pub struct MockCameraState {
    pub model: String,
    pub serial: String,
    /// Serials of further cameras on the bus
    pub other_serials: Vec<String>,
    pub attached: bool,
    pub initialized: bool,
    pub capture_target: Option<CaptureTarget>,

    /// Scripted previews, consumed before `preview_source`
    pub previews: VecDeque<Result<Vec<u8>, String>>,
    pub preview_source: Option<PreviewSource>,

    /// Bytes stored for each shutter release
    pub capture_image: Vec<u8>,
    pub capture_raw: bool,
    pub capture_produces_file: bool,
    pub emit_file_events: bool,
    pub folder: String,
    pub next_image_number: u32,

    pub storage: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    pub events: VecDeque<DeviceEvent>,

    pub fail_init: u32,
    pub fail_capture: u32,
    pub fail_get: HashSet<String>,
    pub fail_delete: HashSet<String>,
    /// `exit` still closes the session but reports an error
    pub fail_exit: bool,

    pub init_calls: u32,
    pub exit_calls: u32,
    pub preview_calls: u32,
    pub capture_calls: u32,
    pub deleted: Vec<String>,
}

impl MockCameraState {
    fn new(serial: &str) -> Self {
        Self {
            model: "Canon EOS R".to_string(),
            serial: serial.to_string(),
            other_serials: Vec::new(),
            attached: true,
            initialized: false,
            capture_target: None,
            previews: VecDeque::new(),
            preview_source: None,
            capture_image: Vec::new(),
            capture_raw: true,
            capture_produces_file: true,
            emit_file_events: true,
            folder: DEFAULT_FOLDER.to_string(),
            next_image_number: 1,
            storage: BTreeMap::new(),
            events: VecDeque::new(),
            fail_init: 0,
            fail_capture: 0,
            fail_get: HashSet::new(),
            fail_delete: HashSet::new(),
            fail_exit: false,
            init_calls: 0,
            exit_calls: 0,
            preview_calls: 0,
            capture_calls: 0,
            deleted: Vec::new(),
        }
    }

    fn folder_exists(&self, folder: &str) -> bool {
        if folder == "/" || self.storage.contains_key(folder) {
            return true;
        }
        let prefix = format!("{}/", folder.trim_end_matches('/'));
        self.storage.keys().any(|k| k.starts_with(&prefix))
    }

    fn shutter(&mut self) {
        let number = self.next_image_number;
        self.next_image_number += 1;
        let stem = format!("IMG_{:04}", number);
        let folder = self.folder.clone();

        let jpg = format!("{}.JPG", stem);
        self.storage
            .entry(folder.clone())
            .or_default()
            .insert(jpg.clone(), self.capture_image.clone());
        if self.emit_file_events {
            self.events.push_back(DeviceEvent::FileAdded {
                folder: folder.clone(),
                name: jpg,
            });
        }

        if self.capture_raw {
            let raw = format!("{}.CR3", stem);
            self.storage
                .entry(folder.clone())
                .or_default()
                .insert(raw.clone(), format!("RAW {}", stem).into_bytes());
            if self.emit_file_events {
                self.events.push_back(DeviceEvent::FileAdded { folder, name: raw });
            }
        }
    }
}

/// In-memory camera bus used by tests and the simulator
#[derive(Clone)]
pub struct MockCameraBackend {
    state: Arc<Mutex<MockCameraState>>,
}

impl MockCameraBackend {
    pub fn new(serial: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockCameraState::new(serial))),
        }
    }

    /// Inspect or script the camera
    pub fn with_state<R>(&self, f: impl FnOnce(&mut MockCameraState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn push_preview(&self, data: Vec<u8>) {
        self.state.lock().previews.push_back(Ok(data));
    }

    pub fn push_preview_failure(&self, message: &str) {
        self.state.lock().previews.push_back(Err(message.to_string()));
    }

    pub fn set_preview_source(&self, source: PreviewSource) {
        self.state.lock().preview_source = Some(source);
    }

    pub fn set_capture_image(&self, data: Vec<u8>) {
        self.state.lock().capture_image = data;
    }

    pub fn add_file(&self, folder: &str, name: &str, data: Vec<u8>) {
        self.state
            .lock()
            .storage
            .entry(folder.to_string())
            .or_default()
            .insert(name.to_string(), data);
    }

    pub fn has_file(&self, folder: &str, name: &str) -> bool {
        self.state
            .lock()
            .storage
            .get(folder)
            .map(|files| files.contains_key(name))
            .unwrap_or(false)
    }

    /// Every stored file as `folder/name`
    pub fn file_paths(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .storage
            .iter()
            .flat_map(|(folder, files)| files.keys().map(move |name| join_folder(folder, name)))
            .collect()
    }

    pub fn set_attached(&self, attached: bool) {
        let mut state = self.state.lock();
        state.attached = attached;
        if !attached {
            state.initialized = false;
        }
    }
}

impl CameraBackend for MockCameraBackend {
    fn autodetect(&mut self) -> Result<Vec<DetectedCamera>, String> {
        let state = self.state.lock();
        let mut cameras = Vec::new();
        if state.attached {
            cameras.push(DetectedCamera {
                model: state.model.clone(),
                port: "usb:001,004".to_string(),
            });
        }
        for (i, _) in state.other_serials.iter().enumerate() {
            cameras.push(DetectedCamera {
                model: state.model.clone(),
                port: format!("usb:002,{:03}", i + 1),
            });
        }
        Ok(cameras)
    }

    fn open(&mut self, camera: &DetectedCamera) -> Result<Box<dyn CameraDevice>, String> {
        let state = self.state.lock();
        let serial_override = match camera.port.strip_prefix("usb:002,") {
            Some(index) => {
                let index: usize = index.parse().map_err(|_| "bad port".to_string())?;
                Some(
                    state
                        .other_serials
                        .get(index - 1)
                        .cloned()
                        .ok_or_else(|| "no such port".to_string())?,
                )
            }
            None => None,
        };

        Ok(Box::new(MockCameraDevice {
            state: Arc::clone(&self.state),
            serial_override,
        }))
    }
}

struct MockCameraDevice {
    state: Arc<Mutex<MockCameraState>>,
    /// Set for the secondary cameras, which only answer discovery
    serial_override: Option<String>,
}

impl MockCameraDevice {
    fn ready(state: &MockCameraState) -> Result<(), String> {
        if !state.attached {
            return Err("camera not attached".to_string());
        }
        if !state.initialized {
            return Err("camera not initialized".to_string());
        }
        Ok(())
    }
}

impl CameraDevice for MockCameraDevice {
    fn init(&mut self) -> Result<(), String> {
        if self.serial_override.is_some() {
            return Ok(());
        }
        let mut state = self.state.lock();
        state.init_calls += 1;
        if !state.attached {
            return Err("camera not attached".to_string());
        }
        if state.fail_init > 0 {
            state.fail_init -= 1;
            return Err("I/O in progress".to_string());
        }
        state.initialized = true;
        Ok(())
    }

    fn exit(&mut self) -> Result<(), String> {
        if self.serial_override.is_some() {
            return Ok(());
        }
        let mut state = self.state.lock();
        state.exit_calls += 1;
        state.initialized = false;
        if state.fail_exit {
            return Err("session close interrupted".to_string());
        }
        Ok(())
    }

    fn serial_number(&mut self) -> Result<String, String> {
        if let Some(serial) = &self.serial_override {
            return Ok(serial.clone());
        }
        let state = self.state.lock();
        Self::ready(&state)?;
        Ok(state.serial.clone())
    }

    fn set_capture_target(&mut self, target: CaptureTarget) -> Result<(), String> {
        let mut state = self.state.lock();
        Self::ready(&state)?;
        state.capture_target = Some(target);
        Ok(())
    }

    fn capture_preview(&mut self) -> Result<Vec<u8>, String> {
        let source = {
            let mut state = self.state.lock();
            Self::ready(&state)?;
            state.preview_calls += 1;
            if let Some(scripted) = state.previews.pop_front() {
                return scripted;
            }
            state.preview_source.clone()
        };

        match source {
            Some(source) => source(),
            None => Err("no preview available".to_string()),
        }
    }

    fn trigger_capture(&mut self) -> Result<(), String> {
        let mut state = self.state.lock();
        Self::ready(&state)?;
        state.capture_calls += 1;
        if state.fail_capture > 0 {
            state.fail_capture -= 1;
            return Err("shutter busy".to_string());
        }
        if state.capture_produces_file {
            state.shutter();
        }
        Ok(())
    }

    fn wait_for_event(&mut self, _timeout: Duration) -> Result<DeviceEvent, String> {
        let mut state = self.state.lock();
        Self::ready(&state)?;
        Ok(state.events.pop_front().unwrap_or(DeviceEvent::Timeout))
    }

    fn list_files(&mut self, folder: &str) -> Result<Vec<String>, String> {
        let state = self.state.lock();
        Self::ready(&state)?;
        if !state.folder_exists(folder) {
            return Err(format!("no such folder {}", folder));
        }
        Ok(state
            .storage
            .get(folder)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn list_folders(&mut self, folder: &str) -> Result<Vec<String>, String> {
        let state = self.state.lock();
        Self::ready(&state)?;
        if !state.folder_exists(folder) {
            return Err(format!("no such folder {}", folder));
        }

        let prefix = if folder == "/" {
            "/".to_string()
        } else {
            format!("{}/", folder.trim_end_matches('/'))
        };
        let children: BTreeSet<String> = state
            .storage
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|child| !child.is_empty())
            .map(str::to_string)
            .collect();
        Ok(children.into_iter().collect())
    }

    fn file_get(&mut self, folder: &str, name: &str) -> Result<Vec<u8>, String> {
        let state = self.state.lock();
        Self::ready(&state)?;
        if state.fail_get.contains(name) {
            return Err(format!("transfer of {} failed", name));
        }
        state
            .storage
            .get(folder)
            .and_then(|files| files.get(name))
            .cloned()
            .ok_or_else(|| format!("{}/{} not found", folder, name))
    }

    fn file_delete(&mut self, folder: &str, name: &str) -> Result<(), String> {
        let mut state = self.state.lock();
        Self::ready(&state)?;
        if state.fail_delete.contains(name) {
            return Err(format!("delete of {} failed", name));
        }
        let removed = state
            .storage
            .get_mut(folder)
            .and_then(|files| files.remove(name));
        match removed {
            Some(_) => {
                state.deleted.push(join_folder(folder, name));
                Ok(())
            }
            None => Err(format!("{}/{} not found", folder, name)),
        }
    }
}
