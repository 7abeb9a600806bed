//! Pixel buffer type shared by readers, the pipeline, and writers.
//!
//! [`PixelMatrix`] is a format-agnostic, interleaved, row-major pixel
//! container. Readers produce one per request; the pipeline transforms it in
//! place or replaces it; a writer consumes it. Samples are stored at their
//! native bit depth (8 or 16 per channel) and converted to f32 lanes only
//! for resampling-class operations.

use crate::{Error, Result};

/// Raw sample storage at native bit depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Samples {
    /// 8 bits per sample.
    U8(Vec<u8>),
    /// 16 bits per sample.
    U16(Vec<u16>),
}

impl Samples {
    /// Number of samples held.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Samples::U8(v) => v.len(),
            Samples::U16(v) => v.len(),
        }
    }

    /// Returns `true` if no samples are held.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An interleaved, row-major pixel matrix.
///
/// `channels` is 1 (gray), 2 (gray+alpha), 3 (RGB) or 4 (RGBA). An embedded
/// ICC profile, when present in the source, rides along as an opaque blob;
/// the engine never interprets it.
#[derive(Debug, Clone)]
pub struct PixelMatrix {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Samples per pixel.
    pub channels: u8,
    /// Sample storage.
    pub samples: Samples,
    /// Embedded ICC profile bytes, if the source carried one.
    pub icc: Option<Vec<u8>>,
}

impl PixelMatrix {
    /// Creates a zeroed matrix with the given geometry and bit depth.
    pub fn new(width: u32, height: u32, channels: u8, bit_depth: u8) -> Self {
        let len = width as usize * height as usize * channels as usize;
        let samples = match bit_depth {
            16 => Samples::U16(vec![0; len]),
            _ => Samples::U8(vec![0; len]),
        };
        Self { width, height, channels, samples, icc: None }
    }

    /// Creates a matrix from 8-bit samples.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the buffer length does not match the
    /// geometry.
    pub fn from_u8(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(Error::internal(format!(
                "pixel buffer length {} does not match {}x{}x{}",
                data.len(),
                width,
                height,
                channels
            )));
        }
        Ok(Self { width, height, channels, samples: Samples::U8(data), icc: None })
    }

    /// Creates a matrix from 16-bit samples.
    pub fn from_u16(width: u32, height: u32, channels: u8, data: Vec<u16>) -> Result<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(Error::internal(format!(
                "pixel buffer length {} does not match {}x{}x{}",
                data.len(),
                width,
                height,
                channels
            )));
        }
        Ok(Self { width, height, channels, samples: Samples::U16(data), icc: None })
    }

    /// Bits per sample (8 or 16).
    #[inline]
    pub fn bit_depth(&self) -> u8 {
        match self.samples {
            Samples::U8(_) => 8,
            Samples::U16(_) => 16,
        }
    }

    /// Total number of pixels.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Returns `true` if the matrix has an alpha channel.
    #[inline]
    pub fn has_alpha(&self) -> bool {
        self.channels == 2 || self.channels == 4
    }

    /// Converts samples to normalized f32 lanes (0.0–1.0), interleaved.
    pub fn to_f32(&self) -> Vec<f32> {
        match &self.samples {
            Samples::U8(data) => data.iter().map(|&v| v as f32 / 255.0).collect(),
            Samples::U16(data) => data.iter().map(|&v| v as f32 / 65535.0).collect(),
        }
    }

    /// Rebuilds a matrix from normalized f32 lanes at the given bit depth.
    ///
    /// Values are clamped to 0.0–1.0. The ICC profile is not carried over;
    /// callers re-attach it when the transform preserves color meaning.
    pub fn from_f32(width: u32, height: u32, channels: u8, bit_depth: u8, data: &[f32]) -> Self {
        let samples = match bit_depth {
            16 => Samples::U16(
                data.iter().map(|&v| (v.clamp(0.0, 1.0) * 65535.0 + 0.5) as u16).collect(),
            ),
            _ => Samples::U8(
                data.iter().map(|&v| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8).collect(),
            ),
        };
        Self { width, height, channels, samples, icc: None }
    }

    /// Returns samples as 8-bit, reducing 16-bit data by truncation.
    pub fn to_u8(&self) -> Vec<u8> {
        match &self.samples {
            Samples::U8(data) => data.clone(),
            Samples::U16(data) => data.iter().map(|&v| (v >> 8) as u8).collect(),
        }
    }

    /// Copies out a sub-rectangle.
    ///
    /// The rectangle is clipped to the matrix extent first; an empty
    /// intersection yields [`Error::InvalidRequest`].
    pub fn crop(&self, region: crate::Rect) -> Result<PixelMatrix> {
        let region = region.clipped_to(self.width, self.height);
        if region.is_empty() {
            return Err(Error::invalid_request("crop region lies outside the image"));
        }

        let ch = self.channels as usize;
        let src_stride = self.width as usize * ch;
        let dst_stride = region.width as usize * ch;
        let x0 = region.x as usize * ch;

        let samples = match &self.samples {
            Samples::U8(data) => {
                let mut out = Vec::with_capacity(dst_stride * region.height as usize);
                for row in region.y..region.bottom() {
                    let start = row as usize * src_stride + x0;
                    out.extend_from_slice(&data[start..start + dst_stride]);
                }
                Samples::U8(out)
            }
            Samples::U16(data) => {
                let mut out = Vec::with_capacity(dst_stride * region.height as usize);
                for row in region.y..region.bottom() {
                    let start = row as usize * src_stride + x0;
                    out.extend_from_slice(&data[start..start + dst_stride]);
                }
                Samples::U16(out)
            }
        };

        Ok(PixelMatrix {
            width: region.width,
            height: region.height,
            channels: self.channels,
            samples,
            icc: self.icc.clone(),
        })
    }

    /// Nearest-neighbor decimation by an integer step.
    ///
    /// Used when a codec cannot subsample during decompression; every
    /// `step`-th pixel in each axis is kept.
    pub fn decimate(&self, step: u32) -> PixelMatrix {
        if step <= 1 {
            return self.clone();
        }

        let out_w = self.width.div_ceil(step);
        let out_h = self.height.div_ceil(step);
        let ch = self.channels as usize;
        let src_stride = self.width as usize * ch;

        let samples = match &self.samples {
            Samples::U8(data) => {
                let mut out = Vec::with_capacity(out_w as usize * out_h as usize * ch);
                for y in (0..self.height).step_by(step as usize) {
                    for x in (0..self.width).step_by(step as usize) {
                        let idx = y as usize * src_stride + x as usize * ch;
                        out.extend_from_slice(&data[idx..idx + ch]);
                    }
                }
                Samples::U8(out)
            }
            Samples::U16(data) => {
                let mut out = Vec::with_capacity(out_w as usize * out_h as usize * ch);
                for y in (0..self.height).step_by(step as usize) {
                    for x in (0..self.width).step_by(step as usize) {
                        let idx = y as usize * src_stride + x as usize * ch;
                        out.extend_from_slice(&data[idx..idx + ch]);
                    }
                }
                Samples::U16(out)
            }
        };

        PixelMatrix {
            width: out_w,
            height: out_h,
            channels: self.channels,
            samples,
            icc: self.icc.clone(),
        }
    }

    /// Writes one pixel into the matrix. Out-of-bounds writes are ignored.
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: &[u16]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let ch = self.channels as usize;
        let idx = (y as usize * self.width as usize + x as usize) * ch;
        match &mut self.samples {
            Samples::U8(data) => {
                for c in 0..ch.min(pixel.len()) {
                    data[idx + c] = (pixel[c] >> 8) as u8;
                }
            }
            Samples::U16(data) => {
                data[idx..idx + ch.min(pixel.len())]
                    .copy_from_slice(&pixel[..ch.min(pixel.len())]);
            }
        }
    }

    /// Reads one pixel, widened to 16-bit samples.
    pub fn get_pixel(&self, x: u32, y: u32) -> Vec<u16> {
        let ch = self.channels as usize;
        let idx = (y as usize * self.width as usize + x as usize) * ch;
        match &self.samples {
            Samples::U8(data) => data[idx..idx + ch]
                .iter()
                .map(|&v| (v as u16) << 8 | v as u16)
                .collect(),
            Samples::U16(data) => data[idx..idx + ch].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Rect;

    fn gradient(width: u32, height: u32) -> PixelMatrix {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(((x + y) % 256) as u8);
            }
        }
        PixelMatrix::from_u8(width, height, 1, data).expect("geometry")
    }

    #[test]
    fn from_u8_validates_length() {
        assert!(PixelMatrix::from_u8(4, 4, 3, vec![0; 48]).is_ok());
        assert!(PixelMatrix::from_u8(4, 4, 3, vec![0; 47]).is_err());
    }

    #[test]
    fn crop_copies_expected_rows() {
        let img = gradient(8, 8);
        let crop = img.crop(Rect::new(2, 3, 4, 2)).expect("crop");
        assert_eq!(crop.width, 4);
        assert_eq!(crop.height, 2);
        // Pixel at crop (0, 0) was at source (2, 3).
        assert_eq!(crop.get_pixel(0, 0)[0] >> 8, 5);
    }

    #[test]
    fn crop_clips_to_extent() {
        let img = gradient(8, 8);
        let crop = img.crop(Rect::new(6, 6, 10, 10)).expect("crop");
        assert_eq!((crop.width, crop.height), (2, 2));

        assert!(img.crop(Rect::new(20, 20, 4, 4)).is_err());
    }

    #[test]
    fn decimate_keeps_every_nth_pixel() {
        let img = gradient(8, 8);
        let half = img.decimate(2);
        assert_eq!((half.width, half.height), (4, 4));
        // (2, 2) in the decimated image was (4, 4) in the source.
        assert_eq!(half.get_pixel(2, 2)[0] >> 8, 8);

        let same = img.decimate(1);
        assert_eq!(same.width, img.width);
    }

    #[test]
    fn f32_round_trip() {
        let img = PixelMatrix::from_u16(2, 1, 1, vec![0, 65535]).expect("geometry");
        let lanes = img.to_f32();
        assert!((lanes[0] - 0.0).abs() < 1e-6);
        assert!((lanes[1] - 1.0).abs() < 1e-6);

        let back = PixelMatrix::from_f32(2, 1, 1, 16, &lanes);
        assert_eq!(back.get_pixel(1, 0)[0], 65535);
    }

    #[test]
    fn depth_reduction_truncates() {
        let img = PixelMatrix::from_u16(1, 1, 1, vec![0xABCD]).expect("geometry");
        assert_eq!(img.to_u8(), vec![0xAB]);
    }
}
