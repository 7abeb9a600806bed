//! BMP and GIF support through the general-purpose `image` crate.
//!
//! These formats have no internal structure worth exploiting (no pyramid,
//! no tiles, no DCT scaling), so the reader decodes the whole frame and
//! leaves cropping and residual scaling to the pipeline. The GIF writer
//! quantizes RGBA frames through the same crate.

use std::io::{Read, SeekFrom, Seek, Write};

use image::DynamicImage;

use tessera_core::{Error, Format, ImageInfo, PixelMatrix, Rect, Result};

use crate::depth::apply_read_policy;
use crate::{DecodeOptions, EncodeOptions, ImageReader, ImageWriter, Input, ReadHints};

// ============================================================================
// Reader
// ============================================================================

/// Whole-frame reader for formats without partial-decode structure.
pub struct FallbackReader {
    format: Format,
    info: ImageInfo,
    options: DecodeOptions,
    decoded: PixelMatrix,
}

impl FallbackReader {
    /// Opens a BMP or GIF source.
    pub fn new(
        identifier: &str,
        format: Format,
        mut input: Input,
        options: DecodeOptions,
    ) -> Result<Self> {
        let image_format = match format {
            Format::Bmp => image::ImageFormat::Bmp,
            Format::Gif => image::ImageFormat::Gif,
            other => {
                return Err(Error::UnsupportedSourceFormat(format!(
                    "{other} has a dedicated reader"
                )));
            }
        };

        input.seek(SeekFrom::Start(0)).map_err(|e| Error::internal(format!("seek: {e}")))?;
        let mut bytes = Vec::new();
        input
            .read_to_end(&mut bytes)
            .map_err(|e| Error::upstream(format!("reading {format} source: {e}")))?;

        let dynamic = image::load_from_memory_with_format(&bytes, image_format)
            .map_err(|e| Error::internal(format!("{format} decode: {e}")))?;
        let decoded = to_matrix(dynamic)?;

        let info = ImageInfo::single_level(
            identifier,
            format,
            decoded.width,
            decoded.height,
            decoded.bit_depth(),
            decoded.channels,
        );

        Ok(Self { format, info, options, decoded })
    }
}

impl ImageReader for FallbackReader {
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
        _subsample: u32,
    ) -> Result<(PixelMatrix, ReadHints)> {
        if let Some(region) = region
            && region.clipped_to(self.decoded.width, self.decoded.height).is_empty()
        {
            return Err(Error::invalid_request(format!(
                "region lies outside the {} image",
                self.format
            )));
        }
        // The whole frame goes back; the pipeline crops and scales.
        let hints = ReadHints { already_cropped: false, subsample_applied: 1 };
        Ok((apply_read_policy(self.decoded.clone(), &self.options), hints))
    }
}

/// Converts a decoded frame into the engine's pixel container.
fn to_matrix(image: DynamicImage) -> Result<PixelMatrix> {
    let (width, height) = (image.width(), image.height());
    match image {
        DynamicImage::ImageLuma8(buf) => PixelMatrix::from_u8(width, height, 1, buf.into_raw()),
        DynamicImage::ImageLumaA8(buf) => PixelMatrix::from_u8(width, height, 2, buf.into_raw()),
        DynamicImage::ImageRgb8(buf) => PixelMatrix::from_u8(width, height, 3, buf.into_raw()),
        DynamicImage::ImageRgba8(buf) => PixelMatrix::from_u8(width, height, 4, buf.into_raw()),
        DynamicImage::ImageLuma16(buf) => PixelMatrix::from_u16(width, height, 1, buf.into_raw()),
        DynamicImage::ImageRgb16(buf) => PixelMatrix::from_u16(width, height, 3, buf.into_raw()),
        DynamicImage::ImageRgba16(buf) => PixelMatrix::from_u16(width, height, 4, buf.into_raw()),
        other => {
            let rgba = other.to_rgba8();
            PixelMatrix::from_u8(width, height, 4, rgba.into_raw())
        }
    }
}

// ============================================================================
// Writer
// ============================================================================

/// GIF writer.
///
/// Quality and compression options do not apply; frames are quantized to
/// the GIF palette by the encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct GifWriter;

impl GifWriter {
    /// Creates a new writer.
    pub fn new() -> Self {
        Self
    }
}

impl ImageWriter for GifWriter {
    fn write(
        &self,
        out: &mut dyn Write,
        image: &PixelMatrix,
        options: &EncodeOptions,
    ) -> Result<()> {
        use image::codecs::gif::GifEncoder;

        // Flatten only when a background was requested; GIF can represent
        // binary transparency on its own.
        let flattened;
        let image = if options.background.is_some() {
            flattened = crate::flatten_alpha(image, options.background);
            &flattened
        } else {
            image
        };

        let rgba = expand_to_rgba8(image);
        let mut encoder = GifEncoder::new(&mut *out);
        encoder
            .encode(&rgba, image.width, image.height, image::ExtendedColorType::Rgba8)
            .map_err(|e| Error::internal(format!("GIF encode: {e}")))?;
        Ok(())
    }
}

fn expand_to_rgba8(image: &PixelMatrix) -> Vec<u8> {
    let data = image.to_u8();
    match image.channels {
        4 => data,
        3 => data.chunks_exact(3).flat_map(|px| [px[0], px[1], px[2], 255]).collect(),
        2 => data.chunks_exact(2).flat_map(|px| [px[0], px[0], px[0], px[1]]).collect(),
        _ => data.iter().flat_map(|&g| [g, g, g, 255]).collect(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn gif_bytes(width: u32, height: u32) -> Vec<u8> {
        let data: Vec<u8> = (0..width as usize * height as usize * 3)
            .map(|i| ((i * 37) % 256) as u8)
            .collect();
        let image = PixelMatrix::from_u8(width, height, 3, data).expect("geometry");
        let mut bytes = Vec::new();
        GifWriter::new().write(&mut bytes, &image, &EncodeOptions::default()).expect("encode");
        bytes
    }

    #[test]
    fn gif_round_trip_dimensions() {
        let bytes = gif_bytes(24, 16);
        let mut reader = FallbackReader::new(
            "anim.gif",
            Format::Gif,
            Box::new(Cursor::new(bytes)),
            DecodeOptions::default(),
        )
        .expect("open");

        let info = reader.info().expect("info");
        assert_eq!((info.width, info.height), (24, 16));
        assert_eq!(info.num_resolutions(), 1);

        let (matrix, hints) = reader.read(0, None, 1).expect("read");
        assert_eq!((matrix.width, matrix.height), (24, 16));
        // The pipeline owns cropping for this reader.
        assert!(!hints.already_cropped);
    }

    #[test]
    fn read_returns_full_frame_even_with_region() {
        let bytes = gif_bytes(24, 16);
        let mut reader = FallbackReader::new(
            "anim.gif",
            Format::Gif,
            Box::new(Cursor::new(bytes)),
            DecodeOptions::default(),
        )
        .expect("open");

        let (matrix, hints) = reader.read(0, Some(Rect::new(4, 4, 8, 8)), 1).expect("read");
        assert_eq!((matrix.width, matrix.height), (24, 16));
        assert!(!hints.already_cropped);

        let err = reader.read(0, Some(Rect::new(100, 100, 8, 8)), 1).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn dedicated_formats_are_refused() {
        let result = FallbackReader::new(
            "x.tif",
            Format::Tiff,
            Box::new(Cursor::new(Vec::new())),
            DecodeOptions::default(),
        );
        assert!(matches!(result, Err(Error::UnsupportedSourceFormat(_))));
    }

    #[test]
    fn rgba_expansion() {
        let gray = PixelMatrix::from_u8(2, 1, 1, vec![10, 20]).expect("geometry");
        assert_eq!(expand_to_rgba8(&gray), vec![10, 10, 10, 255, 20, 20, 20, 255]);

        let ga = PixelMatrix::from_u8(1, 1, 2, vec![50, 100]).expect("geometry");
        assert_eq!(expand_to_rgba8(&ga), vec![50, 50, 50, 100]);
    }
}
