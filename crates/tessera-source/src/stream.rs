//! Random-access adaptation of source handles.
//!
//! Readers want `Read + Seek`. A file handle has it natively. A ranged
//! stream factory gets a block-cached cursor that turns seeks into range
//! requests. A factory without range support is spooled once into an
//! unnamed temporary file, which the OS reclaims when the handle drops -
//! including on cancellation mid-spool.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};

use tracing::{debug, warn};

use tessera_core::{CancellationToken, Error, Result};

use crate::{SourceHandle, StreamFactory};

/// Bytes fetched per range request.
const BLOCK_SIZE: u64 = 64 * 1024;
/// Blocks kept in the cursor's cache.
const BLOCK_CACHE_CAPACITY: usize = 32;
/// Spool copy granularity, also the cancellation-check cadence.
const SPOOL_CHUNK: usize = 64 * 1024;

/// A seekable view over any [`SourceHandle`].
#[derive(Debug)]
pub enum RandomAccessInput {
    /// Local file.
    File(BufReader<File>),
    /// Block-cached ranged reads.
    Ranged(RangeCursor),
    /// Spooled temporary file (deleted on drop).
    Spooled(BufReader<File>),
}

/// Converts a handle into a random-access input.
///
/// The spooling fallback checks `token` between chunks so a cancelled
/// request releases its staging file promptly.
pub fn open_input(handle: SourceHandle, token: &CancellationToken) -> Result<RandomAccessInput> {
    match handle {
        SourceHandle::File(path) => {
            let file = File::open(&path)?;
            Ok(RandomAccessInput::File(BufReader::new(file)))
        }
        SourceHandle::Stream(factory) => {
            if factory.supports_ranges() {
                let length = factory.length()?;
                Ok(RandomAccessInput::Ranged(RangeCursor::new(factory, length)))
            } else {
                warn!("source provides no byte ranges; spooling to a temporary file");
                Ok(RandomAccessInput::Spooled(spool(factory.as_ref(), token)?))
            }
        }
    }
}

fn spool(factory: &dyn StreamFactory, token: &CancellationToken) -> Result<BufReader<File>> {
    let mut stream = factory.open_stream()?;
    let mut file = tempfile::tempfile().map_err(|e| Error::internal(format!("spool: {e}")))?;

    let mut chunk = vec![0u8; SPOOL_CHUNK];
    let mut total = 0u64;
    loop {
        token.checkpoint()?;
        let n = stream
            .read(&mut chunk)
            .map_err(|e| Error::upstream(format!("spooling source: {e}")))?;
        if n == 0 {
            break;
        }
        file.write_all(&chunk[..n]).map_err(|e| Error::internal(format!("spool: {e}")))?;
        total += n as u64;
    }
    debug!(bytes = total, "spooled source to temporary file");

    file.seek(SeekFrom::Start(0)).map_err(|e| Error::internal(format!("spool: {e}")))?;
    Ok(BufReader::new(file))
}

impl Read for RandomAccessInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            RandomAccessInput::File(f) => f.read(buf),
            RandomAccessInput::Ranged(c) => c.read(buf),
            RandomAccessInput::Spooled(f) => f.read(buf),
        }
    }
}

impl Seek for RandomAccessInput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            RandomAccessInput::File(f) => f.seek(pos),
            RandomAccessInput::Ranged(c) => c.seek(pos),
            RandomAccessInput::Spooled(f) => f.seek(pos),
        }
    }
}

/// `Read + Seek` over a ranged stream factory with a small block cache.
///
/// Reads fetch aligned blocks so decoder seek patterns (header, IFD
/// chain, tile offsets) reuse fetched data instead of issuing one request
/// per read call.
#[derive(Debug)]
pub struct RangeCursor {
    factory: Box<dyn StreamFactory>,
    length: u64,
    position: u64,
    /// Cached blocks with insertion-ordered eviction.
    blocks: Vec<(u64, Vec<u8>)>,
    order: VecDeque<u64>,
}

impl RangeCursor {
    fn new(factory: Box<dyn StreamFactory>, length: u64) -> Self {
        Self { factory, length, position: 0, blocks: Vec::new(), order: VecDeque::new() }
    }

    fn block(&mut self, index: u64) -> io::Result<&[u8]> {
        if let Some(pos) = self.blocks.iter().position(|(i, _)| *i == index) {
            return Ok(&self.blocks[pos].1);
        }

        let offset = index * BLOCK_SIZE;
        let data = self
            .factory
            .read_range(offset, BLOCK_SIZE)
            .map_err(|e| io::Error::other(e.to_string()))?;

        if self.blocks.len() >= BLOCK_CACHE_CAPACITY
            && let Some(oldest) = self.order.pop_front()
            && let Some(pos) = self.blocks.iter().position(|(i, _)| *i == oldest)
        {
            self.blocks.swap_remove(pos);
        }
        self.order.push_back(index);
        self.blocks.push((index, data));
        Ok(&self.blocks.last().expect("just pushed").1)
    }
}

impl Read for RangeCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.length || buf.is_empty() {
            return Ok(0);
        }

        let index = self.position / BLOCK_SIZE;
        let within = (self.position % BLOCK_SIZE) as usize;
        let block = self.block(index)?;
        if within >= block.len() {
            return Ok(0);
        }

        let n = buf.len().min(block.len() - within);
        buf[..n].copy_from_slice(&block[within..within + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for RangeCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(delta) => self.length as i128 + delta as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
        };
        if target < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start"));
        }
        self.position = target as u64;
        Ok(self.position)
    }
}
