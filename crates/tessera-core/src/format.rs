//! Format identification.
//!
//! Detects image formats from magic bytes and file extensions, and maps
//! between formats and media types. Detection policy: magic bytes win over
//! the extension, because identifiers routinely carry the wrong one.

use std::fmt;

/// Number of leading bytes needed for magic-number detection.
pub const MAGIC_PROBE_LEN: usize = 16;

/// Image formats the engine can identify.
///
/// Readable: all variants. Writable: JPEG, PNG, TIFF, GIF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// JPEG (baseline and progressive).
    Jpeg,
    /// JPEG 2000 codestream or JP2 container.
    Jpeg2000,
    /// PNG format.
    Png,
    /// TIFF, including BigTIFF.
    Tiff,
    /// Windows bitmap.
    Bmp,
    /// GIF format.
    Gif,
}

impl Format {
    /// All formats, in detection order.
    pub const ALL: [Format; 6] = [
        Format::Jpeg,
        Format::Jpeg2000,
        Format::Png,
        Format::Tiff,
        Format::Bmp,
        Format::Gif,
    ];

    /// Detects a format from leading file bytes, falling back to the
    /// identifier's extension when the bytes match nothing.
    pub fn detect(header: &[u8], identifier: &str) -> Option<Self> {
        Self::from_magic(header).or_else(|| Self::from_identifier(identifier))
    }

    /// Detects a format from magic bytes only.
    pub fn from_magic(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }

        // JPEG: FF D8 FF
        if bytes[0..3] == [0xFF, 0xD8, 0xFF] {
            return Some(Format::Jpeg);
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if bytes.len() >= 8 && bytes[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
            return Some(Format::Png);
        }

        // TIFF: II*\0 / MM\0* (classic) and II+\0 / MM\0+ (BigTIFF)
        if bytes[0..4] == [0x49, 0x49, 0x2A, 0x00]
            || bytes[0..4] == [0x4D, 0x4D, 0x00, 0x2A]
            || bytes[0..4] == [0x49, 0x49, 0x2B, 0x00]
            || bytes[0..4] == [0x4D, 0x4D, 0x00, 0x2B]
        {
            return Some(Format::Tiff);
        }

        // JP2 container signature box, or a raw J2K codestream (SOC + SIZ)
        if bytes.len() >= 12
            && bytes[0..12]
                == [0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A]
        {
            return Some(Format::Jpeg2000);
        }
        if bytes[0..4] == [0xFF, 0x4F, 0xFF, 0x51] {
            return Some(Format::Jpeg2000);
        }

        // BMP: "BM"
        if bytes[0..2] == [b'B', b'M'] {
            return Some(Format::Bmp);
        }

        // GIF: "GIF87a" / "GIF89a"
        if bytes.len() >= 6 && (&bytes[0..6] == b"GIF87a" || &bytes[0..6] == b"GIF89a") {
            return Some(Format::Gif);
        }

        None
    }

    /// Detects a format from the extension of an identifier or path.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        let ext = identifier.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase())?;
        Self::from_extension(&ext)
    }

    /// Maps a lowercase extension (without dot) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "jpg" | "jpeg" => Some(Format::Jpeg),
            "jp2" | "j2k" | "j2c" | "jpx" => Some(Format::Jpeg2000),
            "png" => Some(Format::Png),
            "tif" | "tiff" => Some(Format::Tiff),
            "bmp" => Some(Format::Bmp),
            "gif" => Some(Format::Gif),
            _ => None,
        }
    }

    /// Maps a media type string to a format.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        // Strip any parameters ("image/jpeg; charset=...")
        let essence = media_type.split(';').next().unwrap_or("").trim();
        match essence {
            "image/jpeg" => Some(Format::Jpeg),
            "image/jp2" | "image/jpx" => Some(Format::Jpeg2000),
            "image/png" => Some(Format::Png),
            "image/tiff" => Some(Format::Tiff),
            "image/bmp" | "image/x-bmp" => Some(Format::Bmp),
            "image/gif" => Some(Format::Gif),
            _ => None,
        }
    }

    /// Returns the typical file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Jpeg => "jpg",
            Format::Jpeg2000 => "jp2",
            Format::Png => "png",
            Format::Tiff => "tif",
            Format::Bmp => "bmp",
            Format::Gif => "gif",
        }
    }

    /// Returns the media type.
    pub fn media_type(&self) -> MediaType {
        let name = match self {
            Format::Jpeg => "image/jpeg",
            Format::Jpeg2000 => "image/jp2",
            Format::Png => "image/png",
            Format::Tiff => "image/tiff",
            Format::Bmp => "image/bmp",
            Format::Gif => "image/gif",
        };
        MediaType::new(name)
    }

    /// Returns `true` if the format carries an alpha channel.
    pub fn supports_alpha(&self) -> bool {
        matches!(self, Format::Png | Format::Tiff | Format::Jpeg2000 | Format::Gif)
    }

    /// Returns `true` if a writer exists for this format.
    pub fn is_writable(&self) -> bool {
        matches!(self, Format::Jpeg | Format::Png | Format::Tiff | Format::Gif)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Jpeg => "JPEG",
            Format::Jpeg2000 => "JPEG2000",
            Format::Png => "PNG",
            Format::Tiff => "TIFF",
            Format::Bmp => "BMP",
            Format::Gif => "GIF",
        };
        f.write_str(name)
    }
}

/// A media type, e.g. `image/tiff`.
///
/// Sources probe identifiers to a media type; the reader table maps it back
/// to a [`Format`]. Unknown media types are carried verbatim so the error
/// message can name them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaType(String);

impl MediaType {
    /// Creates a media type from its string name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The string name.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The format this media type maps to, if any reader exists for it.
    pub fn format(&self) -> Option<Format> {
        Format::from_media_type(&self.0)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Format> for MediaType {
    fn from(format: Format) -> Self {
        format.media_type()
    }
}
