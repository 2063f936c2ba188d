mod detector;
mod overlay;
#[cfg(test)]
mod tests;

pub use detector::{evaluate, to_luma, AlignmentDetector, AlignmentSample};
pub use overlay::draw_alignment_overlay;
