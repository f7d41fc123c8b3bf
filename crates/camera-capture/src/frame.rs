//! Video frame types and processing

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};

use crate::CameraError;

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds since the stream was acquired)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Solid-colour frame, mostly useful for feeds that only need geometry
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(vec![0; (width * height * 3) as usize], width, height, 0, 0)
    }

    /// Wrap a decoded RGB image
    pub fn from_image(image: RgbImage, timestamp_ns: u64, sequence: u32) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, timestamp_ns, sequence)
    }

    /// Borrow the pixels as an `image` buffer.
    ///
    /// Returns `None` when the buffer length does not match the geometry.
    pub fn to_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Shorter of the two frame dimensions
    pub fn min_dimension(&self) -> u32 {
        self.width.min(self.height)
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.data.get(idx..idx + 3).map(|p| [p[0], p[1], p[2]])
    }

    /// Crop a region of the frame
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Option<VideoFrame> {
        if w == 0 || h == 0 || x + w > self.width || y + h > self.height {
            return None;
        }

        let mut cropped = Vec::with_capacity((w * h * 3) as usize);
        for row in y..(y + h) {
            let start = ((row * self.width + x) * 3) as usize;
            let end = start + (w * 3) as usize;
            cropped.extend_from_slice(self.data.get(start..end)?);
        }

        Some(VideoFrame {
            data: cropped,
            width: w,
            height: h,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
        })
    }

    /// Encode the frame as a baseline JPEG (quality 1-100)
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, CameraError> {
        let expected = (self.width * self.height * 3) as usize;
        if self.data.len() != expected {
            return Err(CameraError::Encode(format!(
                "buffer holds {} bytes, {}x{} RGB needs {}",
                self.data.len(),
                self.width,
                self.height,
                expected
            )));
        }

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
            .encode(&self.data, self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|e| CameraError::Encode(e.to_string()))?;
        Ok(jpeg)
    }
}

/// Decode an image file (JPEG, PNG) into an RGB frame
pub fn decode_image(bytes: &[u8], sequence: u32) -> Result<VideoFrame, CameraError> {
    let img = image::load_from_memory(bytes).map_err(|e| CameraError::Decode(e.to_string()))?;
    Ok(VideoFrame::from_image(img.to_rgb8(), 0, sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> VideoFrame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, 128]);
            }
        }
        VideoFrame::new(data, width, height, 0, 0)
    }

    #[test]
    fn test_get_pixel_bounds() {
        let frame = gradient(4, 3);
        assert_eq!(frame.get_pixel(2, 1), Some([2, 1, 128]));
        assert_eq!(frame.get_pixel(4, 0), None);
        assert_eq!(frame.get_pixel(0, 3), None);
    }

    #[test]
    fn test_crop() {
        let frame = gradient(8, 6);
        let cropped = frame.crop(2, 1, 3, 2).unwrap();
        assert_eq!(cropped.width, 3);
        assert_eq!(cropped.height, 2);
        assert_eq!(cropped.get_pixel(0, 0), Some([2, 1, 128]));
        assert_eq!(cropped.get_pixel(2, 1), Some([4, 2, 128]));

        assert!(frame.crop(6, 0, 3, 1).is_none());
        assert!(frame.crop(0, 0, 0, 1).is_none());
    }

    #[test]
    fn test_min_dimension() {
        assert_eq!(VideoFrame::blank(640, 480).min_dimension(), 480);
        assert_eq!(VideoFrame::blank(480, 640).min_dimension(), 480);
    }

    #[test]
    fn test_jpeg_encode_decodes_back() {
        let frame = gradient(32, 24);
        let jpeg = frame.encode_jpeg(90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = decode_image(&jpeg, 7).unwrap();
        assert_eq!((decoded.width, decoded.height), (32, 24));
        assert_eq!(decoded.sequence, 7);
    }

    #[test]
    fn test_jpeg_rejects_short_buffer() {
        let frame = VideoFrame::new(vec![0; 10], 32, 24, 0, 0);
        assert!(matches!(frame.encode_jpeg(90), Err(CameraError::Encode(_))));
    }
}
