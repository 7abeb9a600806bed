//! # tessera-source
//!
//! Backing-store providers for the tessera derivative-image engine.
//!
//! A provider turns an opaque identifier into a [`SourceHandle`]: either a
//! local file path or a factory of byte streams, which
//! [`stream::open_input`] adapts into the random access readers need.
//!
//! # Providers
//!
//! | Provider | Store | Handle | Random access |
//! |----------|-------|--------|---------------|
//! | [`FilesystemSource`] | local directory | file path | native |
//! | [`HttpSource`] | HTTP(S) upstream | stream factory | ranged GETs, or temp-file spool |
//! | [`DatabaseSource`] | relational BLOBs | stream factory | in-memory |
//! | [`S3Source`] | S3-compatible bucket | stream factory | ranged GetObject |
//!
//! Dynamic lookups go through the [`Delegate`] bridge: one narrow callable
//! resolving identifiers to pathnames, URLs, object keys, or provider
//! names.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod traits;

pub mod database;
pub mod delegate;
pub mod filesystem;
pub mod http;
pub mod s3;
pub mod stream;

pub use database::DatabaseSource;
pub use delegate::{hooks, Delegate, DelegateBridge};
pub use filesystem::FilesystemSource;
pub use http::HttpSource;
pub use s3::S3Source;
pub use stream::{open_input, RandomAccessInput};
pub use traits::{MemoryFactory, Source, SourceHandle, StreamFactory};

use std::sync::Arc;

use tessera_core::{Config, Error, Result};

/// Constructs the provider registered under `name`.
///
/// Recognized names: `filesystem`, `http`, `database`, `s3`.
pub fn create_provider(
    name: &str,
    config: &Config,
    delegate: Option<Arc<DelegateBridge>>,
) -> Result<Box<dyn Source>> {
    match name {
        "filesystem" => Ok(Box::new(FilesystemSource::new(config.filesystem.clone(), delegate))),
        "http" => Ok(Box::new(HttpSource::new(
            config.http.clone(),
            &config.timeouts,
            delegate,
        )?)),
        "database" => Ok(Box::new(DatabaseSource::new(config.database.clone(), delegate)?)),
        "s3" => Ok(Box::new(S3Source::new(config.s3.clone(), delegate)?)),
        other => Err(Error::internal(format!("unknown source provider: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_provider_by_name() {
        let config = Config::default();
        assert!(create_provider("filesystem", &config, None).is_ok());
    }

    #[test]
    fn unknown_provider_name() {
        let err = create_provider("carrier-pigeon", &Config::default(), None).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
