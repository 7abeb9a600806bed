//! Reader and writer traits.
//!
//! Each format implements the same capability set:
//!
//! ```text
//! +--------------+      +--------------+
//! | ImageReader  |      | ImageWriter  |
//! +--------------+      +--------------+
//!        ^                     ^
//!        |                     |
//! +------+-------+     +------+-------+
//! | TiffReader   |      | TiffWriter  |
//! | JpegReader   |      | JpegWriter  |
//! | Jp2Reader    |      | PngWriter   |
//! | PngReader    |      | GifWriter   |
//! | ...          |      |             |
//! +--------------+      +-------------+
//! ```
//!
//! Readers decode a *chosen resolution level and region* with subsampling,
//! never the whole source unless the request demands it. The returned
//! [`ReadHints`] tell the pipeline which work the reader already performed
//! so it is not repeated.

use std::io::{Read, Seek, Write};

use tessera_core::{ImageInfo, PixelMatrix, ProcessorConfig, Rect, Result};

/// Combined trait bound for decoder inputs (random access required).
///
/// Automatically implemented for any `Read + Seek + Send` type.
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Boxed decoder input.
pub type Input = Box<dyn ReadSeek>;

/// Options applied inside every `read()` as its last step.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Rescale >8-bit samples down to 8 bits.
    pub limit_to_8_bits: bool,
    /// Stretch each channel's observed range to the full depth range
    /// before any bit-depth reduction.
    pub normalize: bool,
}

impl DecodeOptions {
    /// Extracts the decode-relevant subset of the processor configuration.
    pub fn from_config(config: &ProcessorConfig) -> Self {
        Self {
            limit_to_8_bits: config.limit_to_8_bits,
            normalize: config.normalize,
        }
    }
}

/// What the reader already did, so the pipeline can skip redundant work.
#[derive(Debug, Clone, Copy)]
pub struct ReadHints {
    /// The returned matrix is already cropped to the requested region.
    pub already_cropped: bool,
    /// Power-of-two subsampling factor actually applied during decode.
    pub subsample_applied: u32,
}

impl Default for ReadHints {
    fn default() -> Self {
        Self { already_cropped: false, subsample_applied: 1 }
    }
}

/// Format reader capability set.
///
/// One instance serves one request; construction is cheap (header parse
/// only) and pixel decoding is deferred to [`read`](Self::read).
pub trait ImageReader: Send {
    /// Describes the source: dimensions, pyramid, tiling, sample geometry.
    fn info(&mut self) -> Result<ImageInfo>;

    /// Opaque native metadata blob for a level (XMP/EXIF/etc.), empty when
    /// the source carries none. The engine never parses it.
    fn metadata(&mut self, level: u32) -> Result<Vec<u8>>;

    /// Decodes `region` of resolution level `level`, subsampled by the
    /// power-of-two factor `subsample`.
    ///
    /// `region` is in level coordinates; `None` means the full level.
    /// Implementations decode the minimum portion of the source that covers
    /// the region and may apply the subsample during decompression or by
    /// decimation afterwards; [`ReadHints::subsample_applied`] reports the
    /// factor actually applied.
    fn read(
        &mut self,
        level: u32,
        region: Option<Rect>,
        subsample: u32,
    ) -> Result<(PixelMatrix, ReadHints)>;
}

/// TIFF compression for encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// No compression.
    None,
    /// LZW compression (lossless).
    #[default]
    Lzw,
    /// ZIP/Deflate compression (lossless).
    Deflate,
    /// JPEG-in-TIFF. Not provided by the codec stack; requesting it fails
    /// with an unsupported-output error rather than silently substituting.
    Jpeg,
}

/// Options for encoding a derivative.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// JPEG quality, 0-100. Ignored by lossless writers.
    pub quality: u8,
    /// TIFF compression method. Ignored by other writers.
    pub compression: Compression,
    /// Native metadata blob to re-embed, when preservation is on and the
    /// source format equals the target format.
    pub metadata: Option<Vec<u8>>,
    /// Background color flattened under transparent pixels when the target
    /// format has no alpha channel.
    pub background: Option<[u8; 3]>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            quality: 80,
            compression: Compression::default(),
            metadata: None,
            background: None,
        }
    }
}

/// Format writer.
///
/// Writers are stateless; one instance can serve any number of requests.
pub trait ImageWriter: Send + Sync {
    /// Encodes `image` into `out`.
    fn write(&self, out: &mut dyn Write, image: &PixelMatrix, options: &EncodeOptions)
    -> Result<()>;
}

/// Flattens alpha onto an opaque background, producing 1 or 3 channels.
///
/// Writers for alpha-less formats (JPEG, and GIF output without
/// transparency) call this before encoding. `background` defaults to white.
pub(crate) fn flatten_alpha(image: &PixelMatrix, background: Option<[u8; 3]>) -> PixelMatrix {
    if !image.has_alpha() {
        return image.clone();
    }
    let bg = background.unwrap_or([255, 255, 255]);
    let bg16 = [
        (bg[0] as u16) << 8 | bg[0] as u16,
        (bg[1] as u16) << 8 | bg[1] as u16,
        (bg[2] as u16) << 8 | bg[2] as u16,
    ];

    let out_channels: u8 = if image.channels == 2 { 1 } else { 3 };
    let mut out = PixelMatrix::new(image.width, image.height, out_channels, image.bit_depth());
    out.icc = image.icc.clone();

    for y in 0..image.height {
        for x in 0..image.width {
            let px = image.get_pixel(x, y);
            let alpha = *px.last().unwrap_or(&u16::MAX) as u32;
            let mut flat = [0u16; 3];
            for c in 0..out_channels as usize {
                let fg = px[c.min(px.len() - 2)] as u32;
                let bgc = bg16[c] as u32;
                flat[c] = ((fg * alpha + bgc * (65535 - alpha)) / 65535) as u16;
            }
            out.put_pixel(x, y, &flat[..out_channels as usize]);
        }
    }
    out
}
