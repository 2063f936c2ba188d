use super::*;
use crate::session::RegionOfInterest;
use image::{Rgb, RgbImage};

fn sixteen_mm_roi() -> RegionOfInterest {
    RegionOfInterest::new(200, 160, 290, 240)
}

/// Black frame with a bright block over the given rectangle
fn frame_with_block(x0: u32, y0: u32, x1: u32, y1: u32, level: u8) -> RgbImage {
    RgbImage::from_fn(320, 260, |x, y| {
        if x >= x0 && x < x1 && y >= y0 && y < y1 {
            Rgb([level, level, level])
        } else {
            Rgb([0, 0, 0])
        }
    })
}

#[test]
fn test_dark_roi_is_not_aligned() {
    let frame = RgbImage::new(320, 260);
    let sample = evaluate(&frame, &sixteen_mm_roi(), 245, 2400);
    assert_eq!(sample.white_pixel_count, 0);
    assert!(!sample.aligned);
}

#[test]
fn test_bright_roi_is_aligned() {
    let frame = frame_with_block(200, 160, 290, 240, 255);
    let sample = evaluate(&frame, &sixteen_mm_roi(), 245, 2400);
    assert_eq!(sample.white_pixel_count, 90 * 80);
    assert!(sample.aligned);
}

#[test]
fn test_gray_threshold_is_inclusive() {
    let frame = frame_with_block(200, 160, 290, 240, 245);
    assert_eq!(
        evaluate(&frame, &sixteen_mm_roi(), 245, 0).white_pixel_count,
        7200
    );
    assert_eq!(
        evaluate(&frame, &sixteen_mm_roi(), 246, 0).white_pixel_count,
        0
    );
}

#[test]
fn test_white_threshold_is_exclusive() {
    // 60 x 40 = 2400 white pixels, exactly the threshold
    let frame = frame_with_block(200, 160, 260, 200, 255);
    let sample = evaluate(&frame, &sixteen_mm_roi(), 245, 2400);
    assert_eq!(sample.white_pixel_count, 2400);
    assert!(!sample.aligned);

    let sample = evaluate(&frame, &sixteen_mm_roi(), 245, 2399);
    assert!(sample.aligned);
}

#[test]
fn test_only_pixels_inside_roi_count() {
    let frame = frame_with_block(0, 0, 200, 260, 255);
    let sample = evaluate(&frame, &sixteen_mm_roi(), 245, 2400);
    assert_eq!(sample.white_pixel_count, 0);
}

#[test]
fn test_evaluation_is_deterministic() {
    let frame = RgbImage::from_fn(320, 260, |x, y| {
        let v = ((x * 7 + y * 13) % 256) as u8;
        Rgb([v, v.wrapping_add(40), v / 2])
    });
    let detector = AlignmentDetector::new(sixteen_mm_roi(), 200, 1000);
    let first = detector.evaluate(&frame);
    for _ in 0..5 {
        assert_eq!(detector.evaluate(&frame), first);
    }
}

#[test]
fn test_roi_is_clamped_to_frame() {
    let frame = frame_with_block(0, 0, 100, 100, 255);
    let roi = RegionOfInterest::new(50, 50, 500, 500);
    let sample = evaluate(&frame, &roi, 245, 0);
    assert_eq!(sample.white_pixel_count, 50 * 50);

    let outside = RegionOfInterest::new(400, 400, 500, 500);
    assert_eq!(evaluate(&frame, &outside, 245, 0).white_pixel_count, 0);
}

#[test]
fn test_luma_weights() {
    let image = RgbImage::from_fn(3, 1, |x, _| match x {
        0 => Rgb([255, 255, 255]),
        1 => Rgb([255, 0, 0]),
        _ => Rgb([0, 255, 0]),
    });
    let gray = to_luma(&image);
    assert_eq!(gray.get_pixel(0, 0)[0], 255);
    assert_eq!(gray.get_pixel(1, 0)[0], 76);
    assert_eq!(gray.get_pixel(2, 0)[0], 150);
}

#[test]
fn test_overlay_marks_roi() {
    let mut frame = RgbImage::new(320, 260);
    let sample = AlignmentSample {
        white_pixel_count: 3600,
        aligned: true,
    };
    draw_alignment_overlay(&mut frame, &sixteen_mm_roi(), &sample);
    assert_eq!(frame.get_pixel(200, 160), &Rgb([0, 220, 0]));
    // Inside of the box stays untouched
    assert_eq!(frame.get_pixel(245, 200), &Rgb([0, 0, 0]));
    // Half-full gauge below the box
    assert_eq!(frame.get_pixel(210, 243), &Rgb([0, 220, 0]));
    assert_eq!(frame.get_pixel(280, 243), &Rgb([0, 0, 0]));
}
