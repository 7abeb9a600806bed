//! JPEG 2000 format support (read-only).
//!
//! Decoding goes through the `jpeg2k` OpenJPEG bindings, which can restrict
//! a decode to a DWT resolution level (`reduce`) and to the code-blocks
//! overlapping a window (`decode_area`), so a deep-zoom request touches a
//! small fraction of the codestream.
//!
//! The header - dimensions, tile grid, component precision, and the number
//! of DWT resolutions - is parsed directly from the SIZ and COD marker
//! segments. That keeps `info()` cheap and independent of the decoder.

use std::io::{Cursor, Read, SeekFrom, Seek};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::debug;

use tessera_core::{Error, Format, ImageInfo, LevelInfo, PixelMatrix, Rect, Result};

use crate::depth::apply_read_policy;
use crate::{DecodeOptions, ImageReader, Input, ReadHints};

/// Start-of-codestream marker.
const MARKER_SOC: u16 = 0xFF4F;
/// Image-and-tile-size marker.
const MARKER_SIZ: u16 = 0xFF51;
/// Coding-style-default marker.
const MARKER_COD: u16 = 0xFF52;
/// Start-of-tile marker; header parsing stops here.
const MARKER_SOT: u16 = 0xFF90;

/// Parsed SIZ/COD header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CodestreamHeader {
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    components: u8,
    bit_depth: u8,
    /// DWT decomposition levels + 1.
    num_resolutions: u32,
}

/// JPEG 2000 reader with resolution- and region-restricted decoding.
pub struct Jp2Reader {
    /// Complete codestream bytes; OpenJPEG needs the full stream available.
    data: Vec<u8>,
    info: ImageInfo,
    options: DecodeOptions,
}

impl Jp2Reader {
    /// Opens a JPEG 2000 source, parsing the codestream header.
    pub fn new(identifier: &str, mut input: Input, options: DecodeOptions) -> Result<Self> {
        input.seek(SeekFrom::Start(0)).map_err(|e| Error::internal(format!("seek: {e}")))?;
        let mut data = Vec::new();
        input
            .read_to_end(&mut data)
            .map_err(|e| Error::upstream(format!("reading JPEG2000 source: {e}")))?;

        let codestream = locate_codestream(&data)?;
        let header = parse_header(&data[codestream..])?;
        debug!(
            width = header.width,
            height = header.height,
            resolutions = header.num_resolutions,
            "parsed JPEG2000 header"
        );

        let mut levels = Vec::with_capacity(header.num_resolutions as usize);
        for r in 0..header.num_resolutions {
            let divisor = 1u32 << r;
            levels.push(LevelInfo {
                width: header.width.div_ceil(divisor),
                height: header.height.div_ceil(divisor),
                // A tile grid as large as the image is no grid at all.
                tile_width: if header.tile_width < header.width {
                    header.tile_width.div_ceil(divisor)
                } else {
                    0
                },
                tile_height: if header.tile_height < header.height {
                    header.tile_height.div_ceil(divisor)
                } else {
                    0
                },
            });
        }

        let info = ImageInfo {
            identifier: identifier.to_string(),
            format: Format::Jpeg2000,
            width: header.width,
            height: header.height,
            levels,
            bit_depth: if header.bit_depth > 8 { 16 } else { 8 },
            channels: header.components.min(4),
            has_profile: false,
        };

        Ok(Self { data, info, options })
    }
}

impl ImageReader for Jp2Reader {
    fn info(&mut self) -> Result<ImageInfo> {
        Ok(self.info.clone())
    }

    fn metadata(&mut self, _level: u32) -> Result<Vec<u8>> {
        // XML and UUID boxes exist in JP2 containers, but nothing in the
        // pipeline consumes them yet.
        Ok(Vec::new())
    }

    fn read(
        &mut self,
        level: u32,
        region: Option<Rect>,
        subsample: u32,
    ) -> Result<(PixelMatrix, ReadHints)> {
        use jpeg2k::{DecodeArea, DecodeParameters, Image};

        let max_level = self.info.num_resolutions() - 1;
        let level = level.min(max_level);
        // Fold any extra subsampling into deeper DWT levels when they exist.
        let extra_log2 = subsample.max(1).ilog2();
        let reduce = (level + extra_log2).min(max_level);

        let mut params = DecodeParameters::new().reduce(reduce);
        if let Some(region) = region {
            // The decode window is expressed on the full-resolution grid.
            let scale = (1u32 << level) as f64;
            let full = region.scaled(scale);
            params = params.decode_area(Some(DecodeArea::new(
                full.x,
                full.y,
                full.right().min(self.info.width),
                full.bottom().min(self.info.height),
            )));
        }

        let image = Image::from_bytes_with(&self.data, params)
            .map_err(|e| Error::internal(format!("JPEG2000 decode: {e}")))?;

        let width = image.width();
        let height = image.height();
        let precision =
            image.components().first().map(|c| c.precision()).unwrap_or(8);

        let pixels = image
            .get_pixels(Some(255))
            .map_err(|e| Error::internal(format!("JPEG2000 pixel extraction: {e}")))?;

        let pixel_count = (width as usize * height as usize).max(1);
        let channels = (pixels.data.len() / pixel_count).clamp(1, 4) as u8;

        let matrix = if precision <= 8 {
            let data: Vec<u8> = pixels.data.iter().map(|&v| v as u8).collect();
            PixelMatrix::from_u8(width, height, channels, data)?
        } else {
            let data: Vec<u16> = pixels.data.iter().map(|&v| v as u16).collect();
            PixelMatrix::from_u16(width, height, channels, data)?
        };

        // Remaining factor the DWT selection could not absorb.
        let applied_extra = 1u32 << (reduce - level);
        let matrix = if subsample > applied_extra {
            matrix.decimate(subsample / applied_extra)
        } else {
            matrix
        };

        let hints = ReadHints {
            already_cropped: region.is_some(),
            subsample_applied: subsample.max(1),
        };
        Ok((apply_read_policy(matrix, &self.options), hints))
    }
}

/// Finds the codestream offset: 0 for raw J2K, or inside the `jp2c` box of
/// a JP2 container.
fn locate_codestream(data: &[u8]) -> Result<usize> {
    if data.len() >= 4 && data[0..2] == [0xFF, 0x4F] {
        return Ok(0);
    }

    // Walk the JP2 box structure looking for "jp2c".
    let mut offset = 0usize;
    while offset + 8 <= data.len() {
        let len = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        let box_type = &data[offset + 4..offset + 8];

        if box_type == b"jp2c" {
            return Ok(offset + 8);
        }

        // len 0 means "to end of file"; len 1 means 64-bit XLBox follows.
        let advance = match len {
            0 => break,
            1 => {
                if offset + 16 > data.len() {
                    break;
                }
                let xl = u64::from_be_bytes(
                    data[offset + 8..offset + 16].try_into().expect("slice length"),
                );
                xl as usize
            }
            n => n,
        };
        if advance == 0 {
            break;
        }
        offset = offset.saturating_add(advance);
    }

    Err(Error::internal("no JPEG2000 codestream found".to_string()))
}

/// Parses SIZ and COD marker segments from a codestream.
fn parse_header(data: &[u8]) -> Result<CodestreamHeader> {
    let mut cursor = Cursor::new(data);
    let soc = cursor
        .read_u16::<BigEndian>()
        .map_err(|e| Error::internal(format!("JPEG2000 SOC: {e}")))?;
    if soc != MARKER_SOC {
        return Err(Error::internal("missing JPEG2000 SOC marker".to_string()));
    }

    let mut siz: Option<(u32, u32, u32, u32, u8, u8)> = None;
    let mut decompositions: Option<u8> = None;

    loop {
        let marker = cursor
            .read_u16::<BigEndian>()
            .map_err(|e| Error::internal(format!("JPEG2000 marker: {e}")))?;
        if marker == MARKER_SOT {
            break;
        }
        let length = cursor
            .read_u16::<BigEndian>()
            .map_err(|e| Error::internal(format!("JPEG2000 segment length: {e}")))?;
        if length < 2 {
            return Err(Error::internal("corrupt JPEG2000 segment".to_string()));
        }
        let segment_end = cursor.position() + (length as u64 - 2);

        match marker {
            MARKER_SIZ => {
                let read = |c: &mut Cursor<&[u8]>| -> std::io::Result<_> {
                    let _rsiz = c.read_u16::<BigEndian>()?;
                    let xsiz = c.read_u32::<BigEndian>()?;
                    let ysiz = c.read_u32::<BigEndian>()?;
                    let xosiz = c.read_u32::<BigEndian>()?;
                    let yosiz = c.read_u32::<BigEndian>()?;
                    let xtsiz = c.read_u32::<BigEndian>()?;
                    let ytsiz = c.read_u32::<BigEndian>()?;
                    let _xtosiz = c.read_u32::<BigEndian>()?;
                    let _ytosiz = c.read_u32::<BigEndian>()?;
                    let csiz = c.read_u16::<BigEndian>()?;
                    let ssiz = c.read_u8()?;
                    Ok((
                        xsiz - xosiz,
                        ysiz - yosiz,
                        xtsiz,
                        ytsiz,
                        csiz.min(255) as u8,
                        (ssiz & 0x7F) + 1,
                    ))
                };
                siz = Some(
                    read(&mut cursor)
                        .map_err(|e| Error::internal(format!("JPEG2000 SIZ: {e}")))?,
                );
            }
            MARKER_COD => {
                let read = |c: &mut Cursor<&[u8]>| -> std::io::Result<u8> {
                    let _scod = c.read_u8()?;
                    let _progression = c.read_u8()?;
                    let _layers = c.read_u16::<BigEndian>()?;
                    let _mct = c.read_u8()?;
                    c.read_u8() // decomposition levels
                };
                decompositions = Some(
                    read(&mut cursor)
                        .map_err(|e| Error::internal(format!("JPEG2000 COD: {e}")))?,
                );
            }
            _ => {}
        }

        cursor.set_position(segment_end);
        if siz.is_some() && decompositions.is_some() {
            break;
        }
    }

    let (width, height, tile_width, tile_height, components, bit_depth) =
        siz.ok_or_else(|| Error::internal("missing JPEG2000 SIZ segment".to_string()))?;
    let decompositions = decompositions
        .ok_or_else(|| Error::internal("missing JPEG2000 COD segment".to_string()))?;

    Ok(CodestreamHeader {
        width,
        height,
        tile_width,
        tile_height,
        components,
        bit_depth,
        num_resolutions: decompositions as u32 + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal codestream header: SOC, SIZ, COD, SOT.
    fn synthetic_codestream(
        width: u32,
        height: u32,
        tile: u32,
        components: u8,
        depth: u8,
        decompositions: u8,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MARKER_SOC.to_be_bytes());

        // SIZ
        out.extend_from_slice(&MARKER_SIZ.to_be_bytes());
        let lsiz = 38 + 3 * components as u16;
        out.extend_from_slice(&lsiz.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // Rsiz
        out.extend_from_slice(&width.to_be_bytes());
        out.extend_from_slice(&height.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // XOsiz
        out.extend_from_slice(&0u32.to_be_bytes()); // YOsiz
        out.extend_from_slice(&tile.to_be_bytes()); // XTsiz
        out.extend_from_slice(&tile.to_be_bytes()); // YTsiz
        out.extend_from_slice(&0u32.to_be_bytes()); // XTOsiz
        out.extend_from_slice(&0u32.to_be_bytes()); // YTOsiz
        out.extend_from_slice(&(components as u16).to_be_bytes());
        for _ in 0..components {
            out.push(depth - 1); // Ssiz
            out.push(1); // XRsiz
            out.push(1); // YRsiz
        }

        // COD
        out.extend_from_slice(&MARKER_COD.to_be_bytes());
        out.extend_from_slice(&12u16.to_be_bytes());
        out.push(0); // Scod
        out.push(0); // progression order
        out.extend_from_slice(&1u16.to_be_bytes()); // layers
        out.push(0); // MCT
        out.push(decompositions);
        out.extend_from_slice(&[0, 0, 0, 0]); // code-block/transform fields

        out.extend_from_slice(&MARKER_SOT.to_be_bytes());
        out
    }

    #[test]
    fn parses_siz_and_cod() {
        let stream = synthetic_codestream(10000, 8000, 1024, 3, 8, 5);
        let header = parse_header(&stream).expect("parse");
        assert_eq!(header.width, 10000);
        assert_eq!(header.height, 8000);
        assert_eq!(header.tile_width, 1024);
        assert_eq!(header.components, 3);
        assert_eq!(header.bit_depth, 8);
        assert_eq!(header.num_resolutions, 6);
    }

    #[test]
    fn reader_builds_level_pyramid_from_header() {
        let stream = synthetic_codestream(1000, 800, 2048, 3, 8, 3);
        let mut reader = Jp2Reader::new(
            "image.jp2",
            Box::new(Cursor::new(stream)),
            DecodeOptions::default(),
        )
        .expect("open");

        let info = reader.info().expect("info");
        assert_eq!(info.num_resolutions(), 4);
        assert_eq!(info.level(0).width, 1000);
        assert_eq!(info.level(1).width, 500);
        assert_eq!(info.level(3).width, 125);
        // Tile grid wider than the image reports as untiled.
        assert_eq!(info.level(0).tile_width, 0);
    }

    #[test]
    fn sixteen_bit_depth_is_widened() {
        let stream = synthetic_codestream(100, 100, 64, 1, 12, 2);
        let header = parse_header(&stream).expect("parse");
        assert_eq!(header.bit_depth, 12);

        let mut reader = Jp2Reader::new(
            "deep.j2k",
            Box::new(Cursor::new(stream)),
            DecodeOptions::default(),
        )
        .expect("open");
        assert_eq!(reader.info().expect("info").bit_depth, 16);
    }

    #[test]
    fn locates_codestream_in_jp2_container() {
        let codestream = synthetic_codestream(64, 64, 64, 1, 8, 1);

        let mut container = Vec::new();
        // Signature box
        container.extend_from_slice(&12u32.to_be_bytes());
        container.extend_from_slice(b"jP  ");
        container.extend_from_slice(&[0x0D, 0x0A, 0x87, 0x0A]);
        // Codestream box
        container.extend_from_slice(&((8 + codestream.len()) as u32).to_be_bytes());
        container.extend_from_slice(b"jp2c");
        container.extend_from_slice(&codestream);

        let offset = locate_codestream(&container).expect("locate");
        assert_eq!(offset, 20);
        assert!(parse_header(&container[offset..]).is_ok());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(locate_codestream(&[0u8; 32]).is_err());
        let result = Jp2Reader::new(
            "bad.jp2",
            Box::new(Cursor::new(vec![0u8; 32])),
            DecodeOptions::default(),
        );
        assert!(result.is_err());
    }
}
