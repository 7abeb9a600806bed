//! Source provider traits.
//!
//! A provider resolves opaque identifiers against one backing store. It
//! exposes exactly two operations: a cheap type probe and an open that
//! yields a [`SourceHandle`]. The handle is either a local file path (the
//! capability readers prefer) or a stream factory every store can supply.

use std::io::Read;
use std::path::PathBuf;

use tessera_core::{CancellationToken, Error, Format, MediaType, Result, MAGIC_PROBE_LEN};

/// A resolved source, valid for one request.
#[derive(Debug)]
pub enum SourceHandle {
    /// A seekable file on the local filesystem.
    File(PathBuf),
    /// A factory producing independent byte streams.
    Stream(Box<dyn StreamFactory>),
}

/// Produces fresh readable streams over one source object.
///
/// Every call to [`open_stream`](Self::open_stream) yields a new stream
/// positioned at offset 0. Stores that can serve byte ranges advertise it
/// through [`supports_ranges`](Self::supports_ranges), which lets readers
/// seek without buffering the whole object.
pub trait StreamFactory: Send + std::fmt::Debug {
    /// Opens a fresh stream over the full object.
    fn open_stream(&self) -> Result<Box<dyn Read + Send>>;

    /// Total object length in bytes.
    fn length(&self) -> Result<u64>;

    /// Whether [`read_range`](Self::read_range) is available.
    fn supports_ranges(&self) -> bool {
        false
    }

    /// Reads `length` bytes starting at `offset`.
    ///
    /// A short read past the end of the object is not an error. The
    /// default implementation reports the capability as missing.
    fn read_range(&self, _offset: u64, _length: u64) -> Result<Vec<u8>> {
        Err(Error::internal("byte ranges are not supported by this source"))
    }
}

/// A backing-store provider.
pub trait Source: Send + Sync + std::fmt::Debug {
    /// Cheap media-type inference for an identifier.
    ///
    /// Policy: a recognized extension wins; otherwise the first bytes are
    /// fetched and matched against magic numbers; HTTP stores additionally
    /// fall back to the upstream's declared content type.
    fn probe(&self, identifier: &str, token: &CancellationToken) -> Result<MediaType>;

    /// Resolves an identifier into a handle for this request.
    fn open(&self, identifier: &str, token: &CancellationToken) -> Result<SourceHandle>;
}

/// Shared probe policy: extension first, then magic bytes supplied by
/// `fetch_head`.
pub(crate) fn probe_with<F>(identifier: &str, fetch_head: F) -> Result<MediaType>
where
    F: FnOnce() -> Result<Vec<u8>>,
{
    if let Some(format) = Format::from_identifier(identifier) {
        return Ok(format.media_type());
    }
    let head = fetch_head()?;
    Format::from_magic(&head[..head.len().min(MAGIC_PROBE_LEN)])
        .map(|format| format.media_type())
        .ok_or_else(|| Error::UnsupportedSourceFormat(identifier.to_string()))
}

/// In-memory stream factory, used by stores that deliver whole objects
/// (database BLOBs) and by tests.
#[derive(Debug)]
pub struct MemoryFactory {
    bytes: Vec<u8>,
}

impl MemoryFactory {
    /// Wraps a byte buffer.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl StreamFactory for MemoryFactory {
    fn open_stream(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(std::io::Cursor::new(self.bytes.clone())))
    }

    fn length(&self) -> Result<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn supports_ranges(&self) -> bool {
        true
    }

    fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let start = (offset as usize).min(self.bytes.len());
        let end = (offset.saturating_add(length) as usize).min(self.bytes.len());
        Ok(self.bytes[start..end].to_vec())
    }
}
