use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::frame::Frame;

/// JPEG + base64 encoder for evidence frames and status images.
#[derive(Clone, Copy, Debug)]
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    pub fn new(quality: u8) -> Result<Self> {
        if quality == 0 || quality > 100 {
            return Err(anyhow!("jpeg quality must be in 1..=100, got {}", quality));
        }
        Ok(Self { quality })
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn jpeg(&self, frame: &Frame) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode(frame.rgb(), frame.width, frame.height, ExtendedColorType::Rgb8)
            .with_context(|| format!("encode frame {} as jpeg", frame.sequence))?;
        Ok(out)
    }

    /// Base64 (standard alphabet, padded) of the JPEG encoding.
    pub fn base64_jpeg(&self, frame: &Frame) -> Result<String> {
        Ok(STANDARD.encode(self.jpeg(frame)?))
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self { quality: 80 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_jpeg_with_soi_marker() {
        let frame = Frame::from_gray(vec![128u8; 16 * 8], 16, 8, 1).unwrap();
        let jpeg = FrameEncoder::default().jpeg(&frame).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let text = FrameEncoder::default().base64_jpeg(&frame).unwrap();
        assert_eq!(STANDARD.decode(text).unwrap(), jpeg);
    }

    #[test]
    fn rejects_out_of_range_quality() {
        assert!(FrameEncoder::new(0).is_err());
        assert!(FrameEncoder::new(101).is_err());
        assert_eq!(FrameEncoder::new(55).unwrap().quality(), 55);
    }
}
