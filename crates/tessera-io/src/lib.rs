//! # tessera-io
//!
//! Format readers and writers for the tessera derivative-image engine.
//!
//! Each supported format implements the [`ImageReader`] capability set -
//! describe the source, surface its native metadata, and decode a chosen
//! resolution level and region with subsampling - and, where encoding is
//! supported, the [`ImageWriter`] trait. The point of the reader design is
//! to exploit each format's internal structure so pixels a request will
//! discard are never decoded:
//!
//! | Format | Levels | Region decode | Subsampling |
//! |--------|--------|---------------|-------------|
//! | TIFF | IFD pyramid | tile/strip cover | decimation |
//! | JPEG2000 | DWT resolutions | decode window | deeper DWT level |
//! | JPEG | 1 | crop after decode | DCT 1/2, 1/4, 1/8 |
//! | PNG | 1 | crop after decode | decimation |
//! | BMP/GIF | 1 | pipeline crops | pipeline scales |
//!
//! Writers: JPEG (quality), PNG, TIFF (none/lzw/deflate), GIF.
//!
//! Use [`registry::reader_for`] / [`registry::writer_for`] to construct
//! handlers from a detected [`tessera_core::Format`].

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod traits;

pub mod depth;
pub mod fallback;
pub mod jp2;
pub mod jpeg;
pub mod png;
pub mod registry;
pub mod tiff;

pub use traits::{
    Compression, DecodeOptions, EncodeOptions, ImageReader, ImageWriter, Input, ReadHints,
    ReadSeek,
};

pub(crate) use traits::flatten_alpha;
