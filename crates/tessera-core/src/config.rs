//! Configuration snapshot.
//!
//! The engine never reads configuration files; some outer layer
//! deserializes a [`Config`] (any serde format works) and hands the engine
//! an `Arc<Config>`. Reload is a pointer swap between requests, so a request
//! in flight always sees one consistent snapshot.

use std::path::PathBuf;

use serde::Deserialize;

/// How a provider maps identifiers to backing-store locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupStrategy {
    /// Identifier is combined with the configured prefix/suffix.
    #[default]
    Basic,
    /// A delegate hook translates the identifier.
    Script,
}

/// Top-level configuration snapshot.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pixel-affecting processing options.
    pub processor: ProcessorConfig,
    /// Cache sizing and policies.
    pub cache: CacheConfig,
    /// Source-provider selection.
    pub resolver: ResolverConfig,
    /// Stage time budgets.
    pub timeouts: TimeoutConfig,
    /// Filesystem provider settings.
    pub filesystem: FilesystemConfig,
    /// HTTP provider settings.
    pub http: HttpConfig,
    /// Relational-database provider settings.
    pub database: DatabaseConfig,
    /// Object-store provider settings.
    pub s3: S3Config,
}

/// Processing options that change output pixels.
///
/// `limit_to_8_bits` and `normalize` participate in the request fingerprint
/// because they alter the derivative for the same operation list.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Rescale >8-bit sources to 8 bits per sample inside `read()`.
    pub limit_to_8_bits: bool,
    /// Stretch each channel's observed range to full depth before any
    /// bit-depth reduction.
    pub normalize: bool,
    /// Re-embed source metadata blobs when source and target formats match.
    pub metadata_preserve: bool,
    /// Reject derivatives larger than this many pixels (0 = unlimited).
    pub max_pixels: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            limit_to_8_bits: true,
            normalize: false,
            metadata_preserve: false,
            max_pixels: 0,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Derivative (encoded output) cache.
    pub derivative: DerivativeCacheConfig,
    /// Source-description cache.
    pub info: InfoCacheConfig,
}

/// Derivative cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DerivativeCacheConfig {
    /// Enables the cache. Disabled when no directory is configured.
    pub enabled: bool,
    /// Directory holding payloads and sidecar records.
    pub dir: PathBuf,
    /// Entry time-to-live in seconds (0 = no TTL).
    pub ttl_seconds: u64,
    /// Soft cap on total payload bytes (0 = unbounded).
    pub size_bytes: u64,
    /// Eviction sweep cadence in seconds.
    pub worker_interval_seconds: u64,
    /// Collapse concurrent identical builds to one execution. When false,
    /// duplicates all run independently.
    pub single_flight: bool,
}

impl Default for DerivativeCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::new(),
            ttl_seconds: 0,
            size_bytes: 0,
            worker_interval_seconds: 60,
            single_flight: true,
        }
    }
}

/// Info cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InfoCacheConfig {
    /// Maximum number of memoized source descriptions.
    pub capacity: usize,
}

impl Default for InfoCacheConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Which source provider handles requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Default provider name: `filesystem`, `http`, `database` or `s3`.
    #[serde(rename = "static")]
    pub static_provider: String,
    /// Consult the delegate's resolver hook per request.
    pub delegate: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { static_provider: "filesystem".into(), delegate: false }
    }
}

/// Stage time budgets, in whole seconds. 0 disables a budget.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Budget for opening a source.
    pub source_open_seconds: u64,
    /// Budget for a single read phase (decode of one request's region).
    pub read_seconds: u64,
    /// Budget for the whole request.
    pub request_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { source_open_seconds: 30, read_seconds: 30, request_seconds: 0 }
    }
}

/// Filesystem provider settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilesystemConfig {
    /// Directory prepended to sanitized identifiers.
    pub prefix: PathBuf,
    /// Suffix appended after the identifier (e.g. an extension).
    pub suffix: String,
    /// `basic` or `script`.
    pub lookup_strategy: LookupStrategy,
}

/// HTTP provider settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// URL prefix.
    pub prefix: String,
    /// URL suffix.
    pub suffix: String,
    /// Basic-auth user, if the upstream requires credentials.
    pub username: Option<String>,
    /// Basic-auth secret.
    pub secret: Option<String>,
    /// Disable TLS certificate verification.
    pub trust_all_certs: bool,
    /// Maximum pooled connections to the upstream.
    pub max_connections: usize,
    /// `basic` or `script`.
    pub lookup_strategy: LookupStrategy,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            suffix: String::new(),
            username: None,
            secret: None,
            trust_all_certs: false,
            max_connections: 16,
            lookup_strategy: LookupStrategy::Basic,
        }
    }
}

/// Relational-database provider settings.
///
/// The three statements are configuration-supplied SQL; the engine only
/// binds positional values, never splices strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Optional statement translating an identifier to a lookup key.
    pub identifier_query: Option<String>,
    /// Optional statement returning the media type for a key.
    pub media_type_query: Option<String>,
    /// Statement returning the image BLOB for a key.
    pub blob_query: String,
    /// `basic` or `script`.
    pub lookup_strategy: LookupStrategy,
}

/// Object-store provider settings (S3-compatible).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// Bucket name.
    pub bucket: String,
    /// Region, if the endpoint requires one.
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores (MinIO, gateways).
    pub endpoint: Option<String>,
    /// Use path-style addressing (required by most non-AWS stores).
    pub path_style: bool,
    /// Static access key; falls back to the ambient credential chain.
    pub access_key: Option<String>,
    /// Static secret key.
    pub secret_key: Option<String>,
    /// Key prefix prepended to identifiers.
    pub prefix: String,
    /// Key suffix appended to identifiers.
    pub suffix: String,
    /// `basic` or `script`.
    pub lookup_strategy: LookupStrategy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(config.processor.limit_to_8_bits);
        assert!(!config.processor.normalize);
        assert_eq!(config.resolver.static_provider, "filesystem");
        assert_eq!(config.timeouts.source_open_seconds, 30);
        assert!(config.cache.derivative.single_flight);
    }

    #[test]
    fn deserializes_partial_json() {
        let json = r#"{
            "processor": { "limit_to_8_bits": false },
            "resolver": { "static": "http", "delegate": true },
            "http": { "prefix": "https://img.example.org/", "trust_all_certs": true }
        }"#;
        let config: Config = serde_json::from_str(json).expect("parse");
        assert!(!config.processor.limit_to_8_bits);
        assert!(config.resolver.delegate);
        assert_eq!(config.resolver.static_provider, "http");
        assert!(config.http.trust_all_certs);
        // Untouched sections keep their defaults.
        assert_eq!(config.timeouts.read_seconds, 30);
    }

    #[test]
    fn lookup_strategy_names() {
        let s: LookupStrategy = serde_json::from_str("\"script\"").expect("parse");
        assert_eq!(s, LookupStrategy::Script);
        let b: LookupStrategy = serde_json::from_str("\"basic\"").expect("parse");
        assert_eq!(b, LookupStrategy::Basic);
    }
}
