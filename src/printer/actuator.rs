use crate::error::PrinterError;

/// Film feed driven by a raster printer mechanism
pub trait FilmAdvanceActuator: Send {
    /// Feed `steps` print lines of film
    fn advance(&mut self, steps: u32) -> Result<(), PrinterError>;

    /// Pull the film back by one reverse-feed unit
    fn retreat_one_unit(&mut self) -> Result<(), PrinterError>;

    /// Reset the device, discarding any buffered job
    fn reset(&mut self) -> Result<(), PrinterError>;

    /// Re-open the underlying device after a communication failure
    fn reconnect(&mut self) -> Result<(), PrinterError> {
        Ok(())
    }

    /// Device description for logs
    fn describe(&self) -> String;
}
