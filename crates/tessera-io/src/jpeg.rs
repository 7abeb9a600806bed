//! JPEG format support.
//!
//! The reader exposes one resolution level but honors power-of-two
//! subsampling through the decoder's DCT scaling, which decodes 1/1, 1/2,
//! 1/4 and 1/8 frames without a full-frame IDCT. Deeper factors decode at
//! 1/8 and decimate the remainder. The writer encodes baseline JPEG at a
//! configurable quality and re-embeds ICC profiles as APP2 segments.

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::debug;

use tessera_core::{Error, Format, ImageInfo, PixelMatrix, Rect, Result};

use crate::depth::apply_read_policy;
use crate::{DecodeOptions, EncodeOptions, ImageReader, ImageWriter, Input, ReadHints};

/// Maximum DCT downscale the codec can apply during decode.
const MAX_DCT_SCALE: u32 = 8;

// ============================================================================
// Reader
// ============================================================================

/// Baseline/progressive JPEG reader with DCT-scaled subsampling.
pub struct JpegReader {
    input: Input,
    options: DecodeOptions,
    info: ImageInfo,
    icc: Option<Vec<u8>>,
    exif: Option<Vec<u8>>,
}

impl JpegReader {
    /// Opens a JPEG source, parsing its header and APP segments.
    pub fn new(identifier: &str, mut input: Input, options: DecodeOptions) -> Result<Self> {
        let (icc, exif) = scan_app_segments(&mut input)?;

        input.seek(SeekFrom::Start(0)).map_err(|e| Error::internal(format!("seek: {e}")))?;
        let mut decoder = jpeg_decoder::Decoder::new(&mut input);
        decoder
            .read_info()
            .map_err(|e| Error::internal(format!("JPEG header: {e}")))?;
        let header = decoder
            .info()
            .ok_or_else(|| Error::internal("missing JPEG frame header".to_string()))?;

        let (bit_depth, channels) = match header.pixel_format {
            jpeg_decoder::PixelFormat::L8 => (8, 1),
            jpeg_decoder::PixelFormat::L16 => (16, 1),
            jpeg_decoder::PixelFormat::RGB24 => (8, 3),
            jpeg_decoder::PixelFormat::CMYK32 => (8, 3),
        };

        let mut info = ImageInfo::single_level(
            identifier,
            Format::Jpeg,
            header.width as u32,
            header.height as u32,
            bit_depth,
            channels,
        );
        info.has_profile = icc.is_some();

        Ok(Self { input, options, info, icc, exif })
    }

    /// Decodes the frame at the requested DCT scale, returning the matrix
    /// and the scale factor actually applied.
    fn decode_scaled(&mut self, dct: u32) -> Result<(PixelMatrix, u32)> {
        self.input.seek(SeekFrom::Start(0)).map_err(|e| Error::internal(format!("seek: {e}")))?;
        let mut decoder = jpeg_decoder::Decoder::new(&mut self.input);
        decoder
            .read_info()
            .map_err(|e| Error::internal(format!("JPEG header: {e}")))?;

        if dct > 1 {
            let req_w = (self.info.width / dct).max(1) as u16;
            let req_h = (self.info.height / dct).max(1) as u16;
            decoder
                .scale(req_w, req_h)
                .map_err(|e| Error::internal(format!("JPEG scale: {e}")))?;
        }

        let pixels = decoder.decode().map_err(|e| Error::internal(format!("JPEG decode: {e}")))?;
        let header = decoder
            .info()
            .ok_or_else(|| Error::internal("missing JPEG frame header".to_string()))?;
        let (out_w, out_h) = (header.width as u32, header.height as u32);

        let matrix = match header.pixel_format {
            jpeg_decoder::PixelFormat::RGB24 => PixelMatrix::from_u8(out_w, out_h, 3, pixels)?,
            jpeg_decoder::PixelFormat::L8 => PixelMatrix::from_u8(out_w, out_h, 1, pixels)?,
            jpeg_decoder::PixelFormat::L16 => {
                let wide: Vec<u16> =
                    pixels.chunks_exact(2).map(|b| u16::from_be_bytes([b[0], b[1]])).collect();
                PixelMatrix::from_u16(out_w, out_h, 1, wide)?
            }
            jpeg_decoder::PixelFormat::CMYK32 => {
                let rgb: Vec<u8> = pixels
                    .chunks_exact(4)
                    .flat_map(|cmyk| {
                        let c = cmyk[0] as f32 / 255.0;
                        let m = cmyk[1] as f32 / 255.0;
                        let y = cmyk[2] as f32 / 255.0;
                        let k = cmyk[3] as f32 / 255.0;
                        [
                            ((1.0 - c) * (1.0 - k) * 255.0) as u8,
                            ((1.0 - m) * (1.0 - k) * 255.0) as u8,
                            ((1.0 - y) * (1.0 - k) * 255.0) as u8,
                        ]
                    })
                    .collect();
                PixelMatrix::from_u8(out_w, out_h, 3, rgb)?
            }
        };

        // The decoder picks the nearest supported IDCT ratio; report what
        // it actually produced.
        let applied = (self.info.width as f64 / out_w.max(1) as f64).round().max(1.0) as u32;
        Ok((matrix, applied))
    }
}

impl ImageReader for JpegReader {
    fn info(&mut self) -> Result<ImageInfo> {
        Ok(self.info.clone())
    }

    fn metadata(&mut self, _level: u32) -> Result<Vec<u8>> {
        Ok(self.exif.clone().unwrap_or_default())
    }

    fn read(
        &mut self,
        _level: u32,
        region: Option<Rect>,
        subsample: u32,
    ) -> Result<(PixelMatrix, ReadHints)> {
        let dct = subsample.clamp(1, MAX_DCT_SCALE);
        let (mut matrix, applied_dct) = self.decode_scaled(dct)?;
        debug!(requested = subsample, dct = applied_dct, "decoded JPEG frame");

        // Whatever the IDCT could not cover, decimation finishes.
        let mut applied = applied_dct;
        if subsample > applied {
            let extra = subsample / applied;
            if extra > 1 {
                matrix = matrix.decimate(extra);
                applied *= extra;
            }
        }

        matrix.icc = self.icc.clone();

        let mut already_cropped = false;
        if let Some(region) = region {
            let scaled = region.scaled(1.0 / applied as f64);
            let clipped = scaled.clipped_to(matrix.width, matrix.height);
            if clipped.is_empty() {
                return Err(Error::invalid_request("region lies outside the image"));
            }
            matrix = matrix.crop(clipped)?;
            already_cropped = true;
        }

        let hints = ReadHints { already_cropped, subsample_applied: applied };
        Ok((apply_read_policy(matrix, &self.options), hints))
    }
}

/// Scans the marker stream for ICC (APP2) and EXIF (APP1) payloads.
///
/// ICC payloads are reassembled from their chunked APP2 segments. Stops at
/// the start-of-scan marker; entropy-coded data never contains APPn.
fn scan_app_segments(input: &mut Input) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>)> {
    const ICC_HEADER: &[u8] = b"ICC_PROFILE\0";
    const EXIF_HEADER: &[u8] = b"Exif\0\0";

    input.seek(SeekFrom::Start(0)).map_err(|e| Error::internal(format!("seek: {e}")))?;

    let mut soi = [0u8; 2];
    input.read_exact(&mut soi).map_err(|e| Error::internal(format!("JPEG SOI: {e}")))?;
    if soi != [0xFF, 0xD8] {
        return Err(Error::internal("not a JPEG stream".to_string()));
    }

    let mut icc_chunks: Vec<(u8, Vec<u8>)> = Vec::new();
    let mut exif = None;

    loop {
        let mut marker = [0u8; 2];
        if input.read_exact(&mut marker).is_err() {
            break;
        }
        if marker[0] != 0xFF {
            break;
        }
        // Standalone markers carry no length.
        if matches!(marker[1], 0xD8 | 0x01 | 0xD0..=0xD7) {
            continue;
        }
        // Start of scan or end of image: done with headers.
        if marker[1] == 0xDA || marker[1] == 0xD9 {
            break;
        }

        let mut len_bytes = [0u8; 2];
        input.read_exact(&mut len_bytes).map_err(|e| Error::internal(format!("segment: {e}")))?;
        let len = u16::from_be_bytes(len_bytes) as usize;
        if len < 2 {
            break;
        }
        let payload_len = len - 2;

        match marker[1] {
            // APP1: EXIF
            0xE1 if exif.is_none() => {
                let mut payload = vec![0u8; payload_len];
                input
                    .read_exact(&mut payload)
                    .map_err(|e| Error::internal(format!("APP1: {e}")))?;
                if payload.starts_with(EXIF_HEADER) {
                    exif = Some(payload[EXIF_HEADER.len()..].to_vec());
                }
            }
            // APP2: chunked ICC profile
            0xE2 => {
                let mut payload = vec![0u8; payload_len];
                input
                    .read_exact(&mut payload)
                    .map_err(|e| Error::internal(format!("APP2: {e}")))?;
                if payload.len() > ICC_HEADER.len() + 2 && payload.starts_with(ICC_HEADER) {
                    let seq = payload[ICC_HEADER.len()];
                    icc_chunks.push((seq, payload[ICC_HEADER.len() + 2..].to_vec()));
                }
            }
            _ => {
                input
                    .seek(SeekFrom::Current(payload_len as i64))
                    .map_err(|e| Error::internal(format!("segment skip: {e}")))?;
            }
        }
    }

    let icc = if icc_chunks.is_empty() {
        None
    } else {
        icc_chunks.sort_by_key(|(seq, _)| *seq);
        Some(icc_chunks.into_iter().flat_map(|(_, data)| data).collect())
    };

    Ok((icc, exif))
}

// ============================================================================
// Writer
// ============================================================================

/// Baseline JPEG writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegWriter;

impl JpegWriter {
    /// Creates a new writer.
    pub fn new() -> Self {
        Self
    }
}

impl ImageWriter for JpegWriter {
    fn write(
        &self,
        out: &mut dyn Write,
        image: &PixelMatrix,
        options: &EncodeOptions,
    ) -> Result<()> {
        use jpeg_encoder::{ColorType, Encoder};

        // JPEG has no alpha; flatten first, then narrow to 8 bits.
        let flat = crate::flatten_alpha(image, options.background);
        let data = flat.to_u8();

        let color_type = match flat.channels {
            1 => ColorType::Luma,
            3 => ColorType::Rgb,
            n => {
                return Err(Error::internal(format!("unsupported channel count for JPEG: {n}")));
            }
        };

        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, options.quality.min(100));

        if let Some(icc) = flat.icc.as_deref() {
            encoder
                .add_icc_profile(icc)
                .map_err(|e| Error::internal(format!("JPEG ICC segment: {e}")))?;
        }

        encoder
            .encode(&data, flat.width as u16, flat.height as u16, color_type)
            .map_err(|e| Error::internal(format!("JPEG encode: {e}")))?;

        out.write_all(&buffer).map_err(|e| Error::internal(format!("JPEG flush: {e}")))?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
