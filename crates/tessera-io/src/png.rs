//! PNG format support.
//!
//! PNG offers no partial decoding: the reader reports a single resolution
//! level with no tile grid, decodes the whole frame, and crops/decimates in
//! memory. Used only where PNG sources are unavoidable.

use std::io::{BufReader, Write};

use tessera_core::{Error, Format, ImageInfo, PixelMatrix, Rect, Result, Samples};

use crate::depth::apply_read_policy;
use crate::{DecodeOptions, EncodeOptions, ImageReader, ImageWriter, Input, ReadHints};

// ============================================================================
// Reader
// ============================================================================

/// Whole-frame PNG reader.
pub struct PngReader {
    info: ImageInfo,
    icc: Option<Vec<u8>>,
    options: DecodeOptions,
    /// Header-parsed decoder, consumed by the first `read()`.
    reader: Option<png::Reader<BufReader<Input>>>,
    /// Decoded frame, cached for the rest of the request.
    decoded: Option<PixelMatrix>,
}

impl PngReader {
    /// Opens a PNG source, reading only the header chunks.
    pub fn new(identifier: &str, input: Input, options: DecodeOptions) -> Result<Self> {
        let mut decoder = png::Decoder::new(BufReader::new(input));
        // Expand palette and sub-byte depths to plain samples.
        decoder.set_transformations(png::Transformations::EXPAND);
        let reader = decoder
            .read_info()
            .map_err(|e| Error::internal(format!("PNG header: {e}")))?;

        let png_info = reader.info();
        let (width, height) = (png_info.width, png_info.height);
        let icc = png_info.icc_profile.as_ref().map(|cow| cow.to_vec());

        let (out_color, out_depth) = reader.output_color_type();
        let bit_depth: u8 = match out_depth {
            png::BitDepth::Sixteen => 16,
            _ => 8,
        };
        let channels: u8 = match out_color {
            png::ColorType::Grayscale => 1,
            png::ColorType::GrayscaleAlpha => 2,
            png::ColorType::Rgb => 3,
            png::ColorType::Rgba => 4,
            png::ColorType::Indexed => 3,
        };

        let mut info =
            ImageInfo::single_level(identifier, Format::Png, width, height, bit_depth, channels);
        info.has_profile = icc.is_some();

        Ok(Self { info, icc, options, reader: Some(reader), decoded: None })
    }

    fn decode_full(&mut self) -> Result<&PixelMatrix> {
        if self.decoded.is_none() {
            let mut reader = self
                .reader
                .take()
                .ok_or_else(|| Error::internal("PNG input already consumed".to_string()))?;

            let buf_size = reader
                .output_buffer_size()
                .ok_or_else(|| Error::internal("PNG buffer size overflow".to_string()))?;
            let mut buf = vec![0u8; buf_size];
            let frame = reader
                .next_frame(&mut buf)
                .map_err(|e| Error::internal(format!("PNG decode: {e}")))?;
            buf.truncate(frame.buffer_size());

            let channels: u8 = match frame.color_type {
                png::ColorType::Grayscale => 1,
                png::ColorType::GrayscaleAlpha => 2,
                png::ColorType::Rgb => 3,
                png::ColorType::Rgba => 4,
                png::ColorType::Indexed => {
                    return Err(Error::internal("PNG palette was not expanded".to_string()));
                }
            };

            let mut matrix = match frame.bit_depth {
                png::BitDepth::Sixteen => {
                    let wide: Vec<u16> =
                        buf.chunks_exact(2).map(|b| u16::from_be_bytes([b[0], b[1]])).collect();
                    PixelMatrix::from_u16(frame.width, frame.height, channels, wide)?
                }
                _ => PixelMatrix::from_u8(frame.width, frame.height, channels, buf)?,
            };
            matrix.icc = self.icc.clone();
            self.decoded = Some(matrix);
        }
        Ok(self.decoded.as_ref().expect("decoded above"))
    }
}

impl ImageReader for PngReader {
    fn info(&mut self) -> Result<ImageInfo> {
        Ok(self.info.clone())
    }

    fn metadata(&mut self, _level: u32) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn read(
        &mut self,
        _level: u32,
        region: Option<Rect>,
        subsample: u32,
    ) -> Result<(PixelMatrix, ReadHints)> {
        let full = self.decode_full()?.clone();

        let mut matrix = match region {
            Some(region) => full.crop(region)?,
            None => full,
        };
        let already_cropped = region.is_some();

        let mut hints = ReadHints { already_cropped, subsample_applied: 1 };
        if subsample > 1 {
            matrix = matrix.decimate(subsample);
            hints.subsample_applied = subsample;
        }

        Ok((apply_read_policy(matrix, &self.options), hints))
    }
}

// ============================================================================
// Writer
// ============================================================================

/// PNG writer.
///
/// Lossless; quality is ignored. The bit depth of the matrix is preserved.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngWriter;

impl PngWriter {
    /// Creates a new writer.
    pub fn new() -> Self {
        Self
    }
}

impl ImageWriter for PngWriter {
    fn write(
        &self,
        out: &mut dyn Write,
        image: &PixelMatrix,
        _options: &EncodeOptions,
    ) -> Result<()> {
        let color_type = match image.channels {
            1 => png::ColorType::Grayscale,
            2 => png::ColorType::GrayscaleAlpha,
            3 => png::ColorType::Rgb,
            4 => png::ColorType::Rgba,
            n => {
                return Err(Error::internal(format!("unsupported channel count for PNG: {n}")));
            }
        };

        let mut encoder = png::Encoder::new(&mut *out, image.width, image.height);
        encoder.set_color(color_type);
        encoder.set_depth(match image.bit_depth() {
            16 => png::BitDepth::Sixteen,
            _ => png::BitDepth::Eight,
        });

        let mut writer = encoder
            .write_header()
            .map_err(|e| Error::internal(format!("PNG header: {e}")))?;

        match &image.samples {
            Samples::U8(data) => writer
                .write_image_data(data)
                .map_err(|e| Error::internal(format!("PNG encode: {e}")))?,
            Samples::U16(data) => {
                let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_be_bytes()).collect();
                writer
                    .write_image_data(&bytes)
                    .map_err(|e| Error::internal(format!("PNG encode: {e}")))?;
            }
        }

        writer.finish().map_err(|e| Error::internal(format!("PNG finish: {e}")))?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
