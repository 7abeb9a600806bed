//! Per-format reader/writer table.
//!
//! A static table maps each [`Format`] to its reader and writer
//! constructors, populated at compile time. Requesting a format outside the
//! table surfaces the unsupported-source/unsupported-output error kinds
//! rather than a panic or a silent fallback.

use tessera_core::{Error, Format, Result};

use crate::fallback::{FallbackReader, GifWriter};
use crate::jp2::Jp2Reader;
use crate::jpeg::{JpegReader, JpegWriter};
use crate::png::{PngReader, PngWriter};
use crate::tiff::{TiffReader, TiffWriter};
use crate::{DecodeOptions, ImageReader, ImageWriter, Input};

/// Reader constructor signature.
type ReaderCtor = fn(&str, Input, DecodeOptions) -> Result<Box<dyn ImageReader>>;
/// Writer constructor signature.
type WriterCtor = fn() -> Box<dyn ImageWriter>;

/// One row of the format table.
struct FormatEntry {
    format: Format,
    reader: Option<ReaderCtor>,
    writer: Option<WriterCtor>,
}

/// The format table. Readable: all rows with a reader. Writable: JPEG, PNG,
/// TIFF, GIF.
const FORMATS: &[FormatEntry] = &[
    FormatEntry {
        format: Format::Tiff,
        reader: Some(|id, input, opts| Ok(Box::new(TiffReader::new(id, input, opts)?))),
        writer: Some(|| Box::new(TiffWriter::new())),
    },
    FormatEntry {
        format: Format::Jpeg,
        reader: Some(|id, input, opts| Ok(Box::new(JpegReader::new(id, input, opts)?))),
        writer: Some(|| Box::new(JpegWriter::new())),
    },
    FormatEntry {
        format: Format::Jpeg2000,
        reader: Some(|id, input, opts| Ok(Box::new(Jp2Reader::new(id, input, opts)?))),
        writer: None,
    },
    FormatEntry {
        format: Format::Png,
        reader: Some(|id, input, opts| Ok(Box::new(PngReader::new(id, input, opts)?))),
        writer: Some(|| Box::new(PngWriter::new())),
    },
    FormatEntry {
        format: Format::Bmp,
        reader: Some(|id, input, opts| {
            Ok(Box::new(FallbackReader::new(id, Format::Bmp, input, opts)?))
        }),
        writer: None,
    },
    FormatEntry {
        format: Format::Gif,
        reader: Some(|id, input, opts| {
            Ok(Box::new(FallbackReader::new(id, Format::Gif, input, opts)?))
        }),
        writer: Some(|| Box::new(GifWriter::new())),
    },
];

fn entry(format: Format) -> Option<&'static FormatEntry> {
    FORMATS.iter().find(|e| e.format == format)
}

/// Constructs a reader for a detected source format.
///
/// # Errors
///
/// [`Error::UnsupportedSourceFormat`] when no reader exists.
pub fn reader_for(
    format: Format,
    identifier: &str,
    input: Input,
    options: DecodeOptions,
) -> Result<Box<dyn ImageReader>> {
    let ctor = entry(format)
        .and_then(|e| e.reader)
        .ok_or_else(|| Error::UnsupportedSourceFormat(format.to_string()))?;
    ctor(identifier, input, options)
}

/// Constructs a writer for a target format.
///
/// # Errors
///
/// [`Error::UnsupportedOutputFormat`] when no writer exists.
pub fn writer_for(format: Format) -> Result<Box<dyn ImageWriter>> {
    let ctor = entry(format)
        .and_then(|e| e.writer)
        .ok_or_else(|| Error::UnsupportedOutputFormat(format.to_string()))?;
    Ok(ctor())
}

/// Returns `true` if a writer exists for the format.
pub fn can_write(format: Format) -> bool {
    entry(format).is_some_and(|e| e.writer.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writable_set() {
        assert!(can_write(Format::Jpeg));
        assert!(can_write(Format::Png));
        assert!(can_write(Format::Tiff));
        assert!(can_write(Format::Gif));
        assert!(!can_write(Format::Jpeg2000));
        assert!(!can_write(Format::Bmp));
    }

    #[test]
    fn unwritable_format_is_an_error() {
        let err = writer_for(Format::Jpeg2000).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOutputFormat(_)));
    }

    #[test]
    fn every_format_has_a_reader() {
        for format in Format::ALL {
            assert!(entry(format).and_then(|e| e.reader).is_some(), "{format} lacks a reader");
        }
    }
}
