use super::FilmAdvanceActuator;
use crate::error::PrinterError;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrinterCommand {
    Advance(u32),
    Retreat,
    Reset,
}

#[derive(Debug, Default)]
struct RecorderState {
    commands: Vec<PrinterCommand>,
    fail_next: bool,
    reconnects: u32,
}

/// In-memory actuator that records every command; clones share the log
#[derive(Debug, Clone, Default)]
pub struct RecordingActuator {
    state: Arc<Mutex<RecorderState>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<PrinterCommand> {
        self.state.lock().commands.clone()
    }

    /// Sum of rows fed forward
    pub fn rows_advanced(&self) -> u64 {
        self.state
            .lock()
            .commands
            .iter()
            .map(|c| match c {
                PrinterCommand::Advance(steps) => *steps as u64,
                _ => 0,
            })
            .sum()
    }

    pub fn clear(&self) {
        self.state.lock().commands.clear();
    }

    /// Make the next command fail with a communication error
    pub fn fail_next(&self) {
        self.state.lock().fail_next = true;
    }

    pub fn reconnects(&self) -> u32 {
        self.state.lock().reconnects
    }

    fn record(&self, command: PrinterCommand) -> Result<(), PrinterError> {
        let mut state = self.state.lock();
        if state.fail_next {
            state.fail_next = false;
            return Err(PrinterError::Comm {
                details: "device write failed".to_string(),
            });
        }
        state.commands.push(command);
        Ok(())
    }
}

impl FilmAdvanceActuator for RecordingActuator {
    fn advance(&mut self, steps: u32) -> Result<(), PrinterError> {
        self.record(PrinterCommand::Advance(steps))
    }

    fn retreat_one_unit(&mut self) -> Result<(), PrinterError> {
        self.record(PrinterCommand::Retreat)
    }

    fn reset(&mut self) -> Result<(), PrinterError> {
        self.record(PrinterCommand::Reset)
    }

    fn reconnect(&mut self) -> Result<(), PrinterError> {
        self.state.lock().reconnects += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "recording actuator".to_string()
    }
}
