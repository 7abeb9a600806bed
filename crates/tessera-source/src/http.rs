//! HTTP(S) provider.
//!
//! Maps identifiers to URLs as prefix + identifier + suffix (or through
//! the delegate's URL hook). The provider owns a pooled blocking client;
//! pools are never shared across providers.
//!
//! Range support is discovered per object from `Accept-Ranges`. When the
//! upstream can serve ranges, readers seek through ranged GETs; otherwise
//! the stream adapter buffers the object into a temporary file.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header;
use reqwest::StatusCode;
use tracing::{debug, warn};

use tessera_core::{
    CancellationToken, Error, Format, HttpConfig, LookupStrategy, MediaType, Result,
    TimeoutConfig, MAGIC_PROBE_LEN,
};

use crate::delegate::{hooks, DelegateBridge};
use crate::{Source, SourceHandle, StreamFactory};

/// Provider over an HTTP(S) upstream.
#[derive(Debug)]
pub struct HttpSource {
    client: Client,
    config: HttpConfig,
    delegate: Option<Arc<DelegateBridge>>,
}

impl HttpSource {
    /// Creates the provider with its own connection pool.
    pub fn new(
        config: HttpConfig,
        timeouts: &TimeoutConfig,
        delegate: Option<Arc<DelegateBridge>>,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .pool_max_idle_per_host(config.max_connections)
            .connect_timeout(Duration::from_secs(timeouts.source_open_seconds.max(1)))
            .timeout(Duration::from_secs(timeouts.read_seconds.max(1)));
        if config.trust_all_certs {
            warn!("TLS certificate verification is disabled for the HTTP source");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client =
            builder.build().map_err(|e| Error::internal(format!("HTTP client: {e}")))?;
        Ok(Self { client, config, delegate })
    }

    fn url(&self, identifier: &str) -> Result<String> {
        match self.config.lookup_strategy {
            LookupStrategy::Script => {
                let delegate = self
                    .delegate
                    .as_ref()
                    .ok_or_else(|| Error::internal("script lookup without a delegate"))?;
                delegate
                    .invoke(hooks::URL, identifier)?
                    .ok_or_else(|| Error::not_found(identifier.to_string()))
            }
            LookupStrategy::Basic => {
                Ok(format!("{}{}{}", self.config.prefix, identifier, self.config.suffix))
            }
        }
    }

    fn authorize(&self, request: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match (&self.config.username, &self.config.secret) {
            (Some(user), secret) => request.basic_auth(user, secret.as_deref()),
            _ => request,
        }
    }

    /// HEAD request returning length, range support, and content type.
    fn head(&self, url: &str) -> Result<(u64, bool, Option<String>)> {
        let response = self
            .authorize(self.client.head(url))
            .send()
            .map_err(|e| Error::upstream(format!("HEAD {url}: {e}")))?;
        let response = check_status(response, url)?;

        let length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let ranges = response
            .headers()
            .get(header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok((length, ranges, content_type))
    }

    /// Fetches the first bytes of an object without pulling the rest.
    ///
    /// The range header is advisory; upstreams that ignore it stream from
    /// the start and the read stops after the probe window either way.
    fn get_head(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .authorize(self.client.get(url))
            .header(header::RANGE, format!("bytes=0-{}", MAGIC_PROBE_LEN - 1))
            .send()
            .map_err(|e| Error::upstream(format!("GET {url}: {e}")))?;
        let mut response = check_status(response, url)?;

        let mut head = vec![0u8; MAGIC_PROBE_LEN];
        let mut filled = 0;
        while filled < head.len() {
            let n = response
                .read(&mut head[filled..])
                .map_err(|e| Error::upstream(format!("GET {url}: {e}")))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        head.truncate(filled);
        Ok(head)
    }
}

/// Maps upstream status codes onto the engine's error kinds.
fn check_status(response: Response, url: &str) -> Result<Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(Error::not_found(url.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(Error::access_denied(url.to_string()))
        }
        status => Err(Error::upstream(format!("{url} answered {status}"))),
    }
}

impl Source for HttpSource {
    fn probe(&self, identifier: &str, token: &CancellationToken) -> Result<MediaType> {
        token.checkpoint()?;
        let url = self.url(identifier)?;

        if let Some(format) = Format::from_identifier(identifier) {
            return Ok(format.media_type());
        }

        // Magic bytes next; the upstream's declared type is the last word.
        if let Ok(head) = self.get_head(&url)
            && let Some(format) = Format::from_magic(&head)
        {
            return Ok(format.media_type());
        }

        let (_, _, content_type) = self.head(&url)?;
        content_type
            .map(MediaType::new)
            .ok_or_else(|| Error::UnsupportedSourceFormat(identifier.to_string()))
    }

    fn open(&self, identifier: &str, token: &CancellationToken) -> Result<SourceHandle> {
        token.checkpoint()?;
        let url = self.url(identifier)?;
        let (length, ranges, _) = self.head(&url)?;
        debug!(url = %url, length, ranges, "opened HTTP source");

        Ok(SourceHandle::Stream(Box::new(HttpStreamFactory {
            source: HttpSourceRef {
                client: self.client.clone(),
                username: self.config.username.clone(),
                secret: self.config.secret.clone(),
            },
            url,
            length,
            ranges,
        })))
    }
}

/// Client handle detached from the provider's lifetime.
#[derive(Debug)]
struct HttpSourceRef {
    client: Client,
    username: Option<String>,
    secret: Option<String>,
}

impl HttpSourceRef {
    fn authorize(&self, request: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match (&self.username, &self.secret) {
            (Some(user), secret) => request.basic_auth(user, secret.as_deref()),
            _ => request,
        }
    }
}

/// Stream factory over one URL.
#[derive(Debug)]
struct HttpStreamFactory {
    source: HttpSourceRef,
    url: String,
    length: u64,
    ranges: bool,
}

impl StreamFactory for HttpStreamFactory {
    fn open_stream(&self) -> Result<Box<dyn Read + Send>> {
        let response = self
            .source
            .authorize(self.source.client.get(&self.url))
            .send()
            .map_err(|e| Error::upstream(format!("GET {}: {e}", self.url)))?;
        let response = check_status(response, &self.url)?;
        Ok(Box::new(response))
    }

    fn length(&self) -> Result<u64> {
        Ok(self.length)
    }

    fn supports_ranges(&self) -> bool {
        self.ranges
    }

    fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let end = offset + length.saturating_sub(1);
        let response = self
            .source
            .authorize(self.source.client.get(&self.url))
            .header(header::RANGE, format!("bytes={offset}-{end}"))
            .send()
            .map_err(|e| Error::upstream(format!("GET {}: {e}", self.url)))?;
        let response = check_status(response, &self.url)?;
        let bytes = response
            .bytes()
            .map_err(|e| Error::upstream(format!("GET {}: {e}", self.url)))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(config: HttpConfig) -> HttpSource {
        HttpSource::new(config, &TimeoutConfig::default(), None).expect("client")
    }

    #[test]
    fn url_assembly() {
        let provider = source(HttpConfig {
            prefix: "https://img.example.org/iiif/".to_string(),
            suffix: ".tif".to_string(),
            ..Default::default()
        });
        assert_eq!(
            provider.url("scans/p0001").expect("url"),
            "https://img.example.org/iiif/scans/p0001.tif"
        );
    }

    #[test]
    fn script_lookup_requires_delegate() {
        let provider = source(HttpConfig {
            lookup_strategy: LookupStrategy::Script,
            ..Default::default()
        });
        assert!(provider.url("x").is_err());
    }

    #[test]
    fn probe_short_circuits_on_extension() {
        // No server needed: the extension resolves before any request.
        let provider = source(HttpConfig {
            prefix: "http://127.0.0.1:1/".to_string(),
            ..Default::default()
        });
        let media_type =
            provider.probe("a.jpg", &CancellationToken::new()).expect("probe");
        assert_eq!(media_type.as_str(), "image/jpeg");
    }

    #[test]
    fn unreachable_upstream_is_transient() {
        let provider = source(HttpConfig {
            prefix: "http://127.0.0.1:1/".to_string(),
            ..Default::default()
        });
        let err = provider.open("blob", &CancellationToken::new()).unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
    }
}
