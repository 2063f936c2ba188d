use super::AlignmentSample;
use crate::session::RegionOfInterest;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

const ALIGNED_COLOR: Rgb<u8> = Rgb([0, 220, 0]);
const MISALIGNED_COLOR: Rgb<u8> = Rgb([230, 0, 0]);

/// Outline the ROI and draw a fill gauge of the white pixel ratio under it
pub fn draw_alignment_overlay(
    image: &mut RgbImage,
    roi: &RegionOfInterest,
    sample: &AlignmentSample,
) {
    let (width, height) = image.dimensions();
    let x0 = roi.x0.min(width);
    let y0 = roi.y0.min(height);
    let w = roi.x1.min(width).saturating_sub(x0);
    let h = roi.y1.min(height).saturating_sub(y0);
    if w < 3 || h < 3 {
        return;
    }

    let color = if sample.aligned {
        ALIGNED_COLOR
    } else {
        MISALIGNED_COLOR
    };

    let outer = Rect::at(x0 as i32, y0 as i32).of_size(w, h);
    let inner = Rect::at(x0 as i32 + 1, y0 as i32 + 1).of_size(w - 2, h - 2);
    draw_hollow_rect_mut(image, outer, color);
    draw_hollow_rect_mut(image, inner, color);

    let gauge_y = (y0 + h + 2) as i32;
    if gauge_y + 4 > height as i32 {
        return;
    }
    let ratio = (sample.white_pixel_count as f64 / (w * h) as f64).min(1.0);
    let filled = (ratio * w as f64).round() as u32;
    if filled > 0 {
        draw_filled_rect_mut(image, Rect::at(x0 as i32, gauge_y).of_size(filled, 4), color);
    }
}
