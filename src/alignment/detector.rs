use crate::session::{FormatProfile, RegionOfInterest};
use image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::contrast::threshold;

/// Outcome of one alignment evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentSample {
    pub white_pixel_count: u32,
    pub aligned: bool,
}

/// Alignment predicate bound to the thresholds of one format
#[derive(Debug, Clone, Copy)]
pub struct AlignmentDetector {
    roi: RegionOfInterest,
    gray_threshold: u8,
    white_pixel_threshold: u32,
}

impl AlignmentDetector {
    pub fn new(roi: RegionOfInterest, gray_threshold: u8, white_pixel_threshold: u32) -> Self {
        Self {
            roi,
            gray_threshold,
            white_pixel_threshold,
        }
    }

    pub fn for_profile(profile: &FormatProfile) -> Self {
        Self::new(
            profile.roi,
            profile.gray_threshold,
            profile.white_pixel_threshold,
        )
    }

    pub fn roi(&self) -> &RegionOfInterest {
        &self.roi
    }

    pub fn evaluate(&self, frame: &RgbImage) -> AlignmentSample {
        evaluate(
            frame,
            &self.roi,
            self.gray_threshold,
            self.white_pixel_threshold,
        )
    }
}

/// Count pixels of the ROI at or above `gray_threshold`; aligned when the count
/// exceeds `white_pixel_threshold`. The ROI is clamped to the frame.
pub fn evaluate(
    frame: &RgbImage,
    roi: &RegionOfInterest,
    gray_threshold: u8,
    white_pixel_threshold: u32,
) -> AlignmentSample {
    let (width, height) = frame.dimensions();
    let x0 = roi.x0.min(width);
    let y0 = roi.y0.min(height);
    let x1 = roi.x1.min(width);
    let y1 = roi.y1.min(height);

    if x1 <= x0 || y1 <= y0 {
        return AlignmentSample {
            white_pixel_count: 0,
            aligned: false,
        };
    }

    let region = imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image();
    let gray = to_luma(&region);

    let white_pixel_count = if gray_threshold == 0 {
        gray.width() * gray.height()
    } else {
        // `threshold` keeps pixels strictly above its argument
        threshold(&gray, gray_threshold - 1)
            .pixels()
            .filter(|p| p[0] == 255)
            .count() as u32
    };

    AlignmentSample {
        white_pixel_count,
        aligned: white_pixel_count > white_pixel_threshold,
    }
}

/// BT.601 luma with 14-bit fixed point weights
pub fn to_luma(image: &RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(image.width(), image.height());
    for (x, y, rgb) in image.enumerate_pixels() {
        let value =
            (rgb[0] as u32 * 4899 + rgb[1] as u32 * 9617 + rgb[2] as u32 * 1868 + 8192) >> 14;
        gray.put_pixel(x, y, Luma([value.min(255) as u8]));
    }
    gray
}
