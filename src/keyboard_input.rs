use crate::digitizer::{Command, DigitizerHandle};
use crate::error::Result;
use crate::session::FormatId;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::Duration;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Operator keyboard bound to the capture loop
pub struct KeyboardInputHandler {
    digitizer: DigitizerHandle,
    format: FormatId,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    /// `format` is what the start key digitizes
    pub fn new(digitizer: DigitizerHandle, format: FormatId) -> Self {
        Self {
            digitizer,
            format,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!(
            "Keyboard active: z start {}, p pause, r resume, k cleaned, c/- feed, + counter, \
             l overlay, d download RAW, x discard RAW, e camera tool, q quit, Q quit without RAW",
            self.format
        );

        let digitizer = self.digitizer.clone();
        let format = self.format;
        let cancellation_token = self.cancellation_token.clone();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            loop {
                if cancellation_token.is_cancelled() {
                    debug!("Keyboard input handler stopping");
                    break;
                }

                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let key_event = match event::read() {
                            Ok(Event::Key(key_event)) if key_event.kind == KeyEventKind::Press => {
                                key_event
                            }
                            _ => continue,
                        };

                        // Keep reading after a quit key; the loop may stay up to report a failure
                        if !forward_key(&digitizer, key_event.code, format) {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }
            debug!("Keyboard input handler task exited");
        });

        Ok(())
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) -> Result<()> {
        self.cancellation_token.cancel();

        // Give the task a moment to leave raw mode itself
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = disable_raw_mode();

        Ok(())
    }
}

/// Send the command bound to `code`; false once the capture loop is gone
fn forward_key(digitizer: &DigitizerHandle, code: KeyCode, format: FormatId) -> bool {
    let command = match command_for_key(code, format) {
        Some(command) => command,
        None => {
            debug!("Unbound key: {:?}", code);
            return true;
        }
    };

    debug!("Key {:?} -> {:?}", code, command);
    match digitizer.blocking_send(command) {
        Ok(()) => true,
        Err(e) => {
            warn!("Keyboard command dropped: {}", e);
            false
        }
    }
}

/// Key bindings of the capture station
pub fn command_for_key(code: KeyCode, format: FormatId) -> Option<Command> {
    let command = match code {
        KeyCode::Char('z') => Command::Start { format },
        KeyCode::Char('p') | KeyCode::Char(' ') => Command::Pause,
        KeyCode::Char('r') => Command::Resume,
        KeyCode::Char('k') => Command::ResumeAfterCleaning,
        KeyCode::Char('c') => Command::AdvanceFilm(1),
        KeyCode::Char('-') => Command::RetreatOneUnit,
        KeyCode::Char('+') => Command::IncrementCounter,
        KeyCode::Char('l') => Command::ToggleDebugOverlay,
        KeyCode::Char('d') => Command::DownloadPendingRaw,
        KeyCode::Char('x') => Command::DiscardPendingRaw,
        KeyCode::Char('e') => Command::LaunchCameraTool,
        KeyCode::Char('q') | KeyCode::Esc => Command::Shutdown {
            download_pending: true,
        },
        KeyCode::Char('Q') => Command::Shutdown {
            download_pending: false,
        },
        _ => return None,
    };
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bindings() {
        let format = FormatId::ThirtyFive;
        assert_eq!(
            command_for_key(KeyCode::Char('z'), format),
            Some(Command::Start { format })
        );
        assert_eq!(
            command_for_key(KeyCode::Char('c'), format),
            Some(Command::AdvanceFilm(1))
        );
        assert_eq!(
            command_for_key(KeyCode::Char('q'), format),
            Some(Command::Shutdown {
                download_pending: true
            })
        );
        assert_eq!(
            command_for_key(KeyCode::Char('Q'), format),
            Some(Command::Shutdown {
                download_pending: false
            })
        );
        assert_eq!(command_for_key(KeyCode::Char('w'), format), None);
    }

    #[test]
    fn test_keys_after_quit_still_reach_the_loop() {
        let (digitizer, mut commands) = DigitizerHandle::channel(8);
        let format = FormatId::Sixteen;

        assert!(forward_key(&digitizer, KeyCode::Char('q'), format));
        assert!(forward_key(&digitizer, KeyCode::Char('w'), format));
        assert!(forward_key(&digitizer, KeyCode::Char('d'), format));
        assert_eq!(
            commands.try_recv().unwrap(),
            Command::Shutdown {
                download_pending: true
            }
        );
        assert_eq!(commands.try_recv().unwrap(), Command::DownloadPendingRaw);

        drop(commands);
        assert!(!forward_key(&digitizer, KeyCode::Char('r'), format));
    }
}
