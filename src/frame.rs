use crate::config::{PresentationConfig, Rotation};
use crate::error::CameraError;
use image::{imageops, RgbImage};
use std::sync::Arc;
use std::time::SystemTime;

/// Encoded live-view frame as delivered by the camera
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    /// Monotonic preview sequence number
    pub sequence: u64,
    /// Timestamp when the frame was received
    pub timestamp: SystemTime,
    /// Encoded image bytes (usually JPEG)
    pub data: Arc<Vec<u8>>,
}

impl PreviewFrame {
    pub fn new(sequence: u64, data: Vec<u8>) -> Self {
        Self {
            sequence,
            timestamp: SystemTime::now(),
            data: Arc::new(data),
        }
    }

    /// Decode the frame into an RGB buffer
    pub fn decode(&self) -> Result<RgbImage, CameraError> {
        decode_rgb(&self.data)
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Decode any supported encoded image into RGB
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, CameraError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| CameraError::Decode {
            details: e.to_string(),
        })
}

impl Rotation {
    /// Get rotation angle in degrees
    pub fn degrees(&self) -> u16 {
        match self {
            Rotation::Rotate90 => 90,
            Rotation::Rotate180 => 180,
            Rotation::Rotate270 => 270,
        }
    }
}

/// Orientation applied to copies shown to the operator.
///
/// Saved frames are never transformed; only presentation copies go through here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresentationTransform {
    pub rotation: Option<Rotation>,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl PresentationTransform {
    pub fn from_config(config: &PresentationConfig) -> Self {
        Self {
            rotation: config.rotation,
            flip_horizontal: config.flip_horizontal,
            flip_vertical: config.flip_vertical,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.rotation.is_none() && !self.flip_horizontal && !self.flip_vertical
    }

    /// Apply the transform, consuming the input buffer
    pub fn apply(&self, image: RgbImage) -> RgbImage {
        if self.is_identity() {
            return image;
        }

        let mut output = match self.rotation {
            Some(Rotation::Rotate90) => imageops::rotate90(&image),
            Some(Rotation::Rotate180) => imageops::rotate180(&image),
            Some(Rotation::Rotate270) => imageops::rotate270(&image),
            None => image,
        };

        if self.flip_horizontal {
            imageops::flip_horizontal_in_place(&mut output);
        }
        if self.flip_vertical {
            imageops::flip_vertical_in_place(&mut output);
        }

        output
    }
}

/// Build the presentation copy of a saved frame from its encoded bytes
pub fn render_presentation(
    encoded: &[u8],
    transform: PresentationTransform,
) -> Result<RgbImage, CameraError> {
    decode_rgb(encoded).map(|img| transform.apply(img))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb};
    use std::io::Cursor;

    fn encoded_gradient(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 0]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_preview_decode() {
        let frame = PreviewFrame::new(1, encoded_gradient(8, 4));
        let img = frame.decode().unwrap();
        assert_eq!(img.dimensions(), (8, 4));
        assert_eq!(img.get_pixel(3, 2), &Rgb([3, 2, 0]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let frame = PreviewFrame::new(1, vec![0, 1, 2, 3]);
        assert!(matches!(frame.decode(), Err(CameraError::Decode { .. })));
    }

    #[test]
    fn test_presentation_rotation() {
        let transform = PresentationTransform {
            rotation: Some(Rotation::Rotate90),
            ..Default::default()
        };
        let img = render_presentation(&encoded_gradient(8, 4), transform).unwrap();
        assert_eq!(img.dimensions(), (4, 8));
    }

    #[test]
    fn test_presentation_flip() {
        let transform = PresentationTransform {
            flip_horizontal: true,
            ..Default::default()
        };
        let img = render_presentation(&encoded_gradient(8, 4), transform).unwrap();
        assert_eq!(img.get_pixel(0, 0), &Rgb([7, 0, 0]));
    }

    #[test]
    fn test_identity_transform() {
        assert!(PresentationTransform::default().is_identity());
        assert_eq!(Rotation::Rotate270.degrees(), 270);
    }
}
