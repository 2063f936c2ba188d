mod actuator;
mod escpos;
mod mock;

pub use actuator::FilmAdvanceActuator;
pub use escpos::{locate_device, raster_feed, EscPosPrinter, ESC_RESET, ESC_REVERSE_FEED};
pub use mock::{PrinterCommand, RecordingActuator};
