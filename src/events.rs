use crate::digitizer::LoopState;
use crate::error::ErrorKind;
use image::RgbImage;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Notifications produced for the operator interface
#[derive(Debug, Clone)]
pub enum ScannerEvent {
    /// A frame was saved; the image is the presentation copy
    FrameReady {
        index: u64,
        image: Arc<RgbImage>,
        timestamp: SystemTime,
    },
    /// A live view or alignment preview is available
    PreviewReady {
        image: Arc<RgbImage>,
        white_pixel_count: Option<u32>,
        timestamp: SystemTime,
    },
    /// Human-readable status line
    StatusChanged { text: String },
    /// Loop state transition
    StateChanged { from: LoopState, to: LoopState },
    /// An operator-visible failure
    Error {
        kind: ErrorKind,
        message: String,
        retryable: bool,
    },
    /// RAW download progress (1-based index)
    DownloadProgress { index: usize, total: usize },
    /// The mandatory cleaning pause was reached
    CleaningRequired { captures: u32 },
}

impl ScannerEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            ScannerEvent::FrameReady { index, .. } => format!("Frame {} ready", index),
            ScannerEvent::PreviewReady {
                white_pixel_count, ..
            } => match white_pixel_count {
                Some(count) => format!("Preview ready ({} white pixels)", count),
                None => "Preview ready".to_string(),
            },
            ScannerEvent::StatusChanged { text } => text.clone(),
            ScannerEvent::StateChanged { from, to } => {
                format!("State changed: {:?} -> {:?}", from, to)
            }
            ScannerEvent::Error {
                kind,
                message,
                retryable,
            } => format!(
                "Error [{}]{}: {}",
                kind,
                if *retryable { " (retryable)" } else { "" },
                message
            ),
            ScannerEvent::DownloadProgress { index, total } => {
                format!("Downloading RAW {}/{}", index, total)
            }
            ScannerEvent::CleaningRequired { captures } => {
                format!("Cleaning required after {} captures", captures)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            ScannerEvent::FrameReady { .. } => "frame_ready",
            ScannerEvent::PreviewReady { .. } => "preview_ready",
            ScannerEvent::StatusChanged { .. } => "status_changed",
            ScannerEvent::StateChanged { .. } => "state_changed",
            ScannerEvent::Error { .. } => "error",
            ScannerEvent::DownloadProgress { .. } => "download_progress",
            ScannerEvent::CleaningRequired { .. } => "cleaning_required",
        }
    }
}

/// Broadcast bus between the capture loop and its clients
pub struct EventBus {
    sender: broadcast::Sender<ScannerEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<ScannerEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers, returning how many received it.
    ///
    /// Usable from blocking workers; a bus without subscribers drops the event.
    pub fn publish(&self, event: ScannerEvent) -> usize {
        match &event {
            ScannerEvent::Error {
                kind,
                message,
                retryable,
            } => {
                if *retryable {
                    warn!("{} error: {}", kind, message);
                } else {
                    error!("{} error: {}", kind, message);
                }
            }
            ScannerEvent::CleaningRequired { captures } => {
                info!("Cleaning pause required after {} captures", captures);
            }
            ScannerEvent::StatusChanged { text } => {
                info!("Status: {}", text);
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        match self.sender.send(event) {
            Ok(count) => count,
            Err(broadcast::error::SendError(event)) => {
                debug!("No subscribers for event: {}", event.event_type());
                0
            }
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept everything except the listed event types
    Excluding(Vec<&'static str>),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &ScannerEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Excluding(types) => !types.contains(&event.event_type()),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<ScannerEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<ScannerEvent>,
        filter: EventFilter,
        name: impl Into<String>,
    ) -> Self {
        Self {
            receiver,
            filter,
            name: name.into(),
        }
    }

    /// Receive the next matching event; `None` once the bus is closed.
    ///
    /// Lagged receivers skip the dropped events and keep going.
    pub async fn recv(&mut self) -> Option<ScannerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return None;
                }
            }
        }
    }
}
