//! Request fulfillment.
//!
//! The whole journey of one request: fingerprint, derivative-cache
//! lookup, single-flight arbitration, source resolution, format
//! detection, info-cache consultation, pipeline execution with a tee into
//! the staged cache writer, and atomic installation on success.

use std::io::{self, Read, Write};

use tracing::{debug, warn};

use tessera_cache::{CacheHit, EntryWriter, Role};
use tessera_core::{
    CancellationToken, Config, Error, Format, MediaType, Result, MAGIC_PROBE_LEN,
};
use tessera_io::{registry, DecodeOptions};
use tessera_ops::{pipeline, Fingerprint, OperationList};
use tessera_source::open_input;

use crate::Engine;

/// How many times a follower re-enters the flight after a leader failure
/// before giving up on coordination.
const FLIGHT_ATTEMPTS: usize = 3;

/// One derivative request.
#[derive(Debug, Clone)]
pub struct Request {
    /// Opaque, percent-decoded identifier.
    pub identifier: String,
    /// Normalized operation list.
    pub ops: OperationList,
}

impl Request {
    /// Creates a request.
    pub fn new(identifier: impl Into<String>, ops: OperationList) -> Self {
        Self { identifier: identifier.into(), ops }
    }
}

impl Engine {
    /// Fulfills a request, streaming the derivative into `out`.
    ///
    /// Returns the media type of the streamed bytes.
    pub fn fulfill(&self, request: &Request, out: &mut dyn Write) -> Result<MediaType> {
        self.fulfill_cancellable(request, out, self.request_token())
    }

    /// Fulfills a request under an externally controlled cancellation
    /// token.
    pub fn fulfill_cancellable(
        &self,
        request: &Request,
        out: &mut dyn Write,
        token: CancellationToken,
    ) -> Result<MediaType> {
        let config = self.config();
        let fingerprint =
            Fingerprint::compute(&request.identifier, &request.ops, &config).to_hex();
        debug!(identifier = %request.identifier, fingerprint = %fingerprint, "request");

        let Some(cache) = self.derivative_cache.clone() else {
            return self.build(request, &config, None, out, &token);
        };

        if let Some(hit) = cache.get(&fingerprint)? {
            return stream_hit(hit, out);
        }

        if !config.cache.derivative.single_flight {
            return self.build(request, &config, Some(&fingerprint), out, &token);
        }

        for _ in 0..FLIGHT_ATTEMPTS {
            token.checkpoint()?;
            match self.flights.join(&fingerprint) {
                Role::Leader(guard) => {
                    // A previous leader may have installed the entry
                    // between our miss and this join.
                    if let Some(hit) = cache.get(&fingerprint)? {
                        drop(guard);
                        return stream_hit(hit, out);
                    }
                    let result = self.build(request, &config, Some(&fingerprint), out, &token);
                    drop(guard);
                    return result;
                }
                Role::Follower => {
                    // The leader finished (or failed); the cache decides.
                    if let Some(hit) = cache.get(&fingerprint)? {
                        return stream_hit(hit, out);
                    }
                    debug!(fingerprint = %fingerprint, "flight leader failed, retrying");
                }
            }
        }

        // Repeated leader failures: stop coordinating, build directly.
        self.build(request, &config, Some(&fingerprint), out, &token)
    }

    /// Builds the derivative from the source.
    fn build(
        &self,
        request: &Request,
        config: &Config,
        fingerprint: Option<&str>,
        out: &mut dyn Write,
        token: &CancellationToken,
    ) -> Result<MediaType> {
        token.checkpoint()?;
        let provider = self.provider_for(&request.identifier, config)?;

        let open_token =
            token.with_stage_budget("source open", config.timeouts.source_open_seconds);
        let handle = provider.open(&request.identifier, &open_token)?;
        let mut input = open_input(handle, &open_token)?;

        // Magic bytes outrank both the identifier's extension and the
        // provider's declared type; identifiers lie about formats.
        let format = detect_format(&mut input, &request.identifier, || {
            provider.probe(&request.identifier, &open_token).ok()
        })?;
        debug!(identifier = %request.identifier, %format, "detected source format");

        let read_token = token.with_stage_budget("source read", config.timeouts.read_seconds);
        let mut reader = registry::reader_for(
            format,
            &request.identifier,
            Box::new(input),
            DecodeOptions::from_config(&config.processor),
        )?;

        let info = match self.info_cache.get(&request.identifier) {
            Some(info) if info.format == format => info,
            _ => {
                let info = reader.info()?;
                self.info_cache.put(info.clone());
                info
            }
        };

        let staged = match (fingerprint, &self.derivative_cache) {
            (Some(fingerprint), Some(cache)) => {
                let media_type = request.ops.encode().format.media_type();
                Some(cache.put(fingerprint, &request.identifier, &media_type)?)
            }
            _ => None,
        };

        match staged {
            Some(writer) => {
                let mut tee = TeeWriter { out, cache: Some(writer) };
                let media_type = pipeline::execute(
                    reader.as_mut(),
                    &info,
                    &request.ops,
                    config,
                    &read_token,
                    &mut tee,
                )?;
                if let Some(writer) = tee.cache.take() {
                    writer.complete()?;
                }
                Ok(media_type)
            }
            None => pipeline::execute(
                reader.as_mut(),
                &info,
                &request.ops,
                config,
                &read_token,
                out,
            ),
        }
    }
}

/// Streams a cache hit to the caller.
fn stream_hit(hit: CacheHit, out: &mut dyn Write) -> Result<MediaType> {
    let mut payload = hit.payload;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = payload
            .read(&mut buf)
            .map_err(|e| Error::internal(format!("cache payload: {e}")))?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])
            .map_err(|e| Error::internal(format!("response stream: {e}")))?;
    }
    Ok(hit.media_type)
}

/// Detects the source format: magic bytes, then the provider's declared
/// type, then the identifier's extension.
fn detect_format<F>(
    input: &mut tessera_source::RandomAccessInput,
    identifier: &str,
    declared: F,
) -> Result<Format>
where
    F: FnOnce() -> Option<MediaType>,
{
    use std::io::{Seek, SeekFrom};

    let mut head = [0u8; MAGIC_PROBE_LEN];
    let mut filled = 0;
    while filled < head.len() {
        let n = input
            .read(&mut head[filled..])
            .map_err(|e| Error::upstream(format!("reading source head: {e}")))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    input
        .seek(SeekFrom::Start(0))
        .map_err(|e| Error::upstream(format!("rewinding source: {e}")))?;

    Format::from_magic(&head[..filled])
        .or_else(|| declared().and_then(|mt| mt.format()))
        .or_else(|| Format::from_identifier(identifier))
        .ok_or_else(|| Error::UnsupportedSourceFormat(identifier.to_string()))
}

/// Writes to the response and mirrors into the cache staging file.
///
/// A cache-write failure never fails the request: the staging writer is
/// dropped (discarding the entry) and the response keeps streaming.
struct TeeWriter<'a> {
    out: &'a mut dyn Write,
    cache: Option<EntryWriter<'a>>,
}

impl Write for TeeWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.write_all(buf)?;
        if let Some(writer) = self.cache.as_mut()
            && let Err(err) = writer.write_all(buf)
        {
            warn!(error = %err, "cache staging failed; continuing uncached");
            self.cache = None;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()?;
        if let Some(writer) = self.cache.as_mut() {
            let _ = writer.flush();
        }
        Ok(())
    }
}
