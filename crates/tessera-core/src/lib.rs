//! # tessera-core
//!
//! Core types for the tessera derivative-image engine.
//!
//! This crate is the foundation of the workspace and has no internal
//! dependencies. It provides:
//!
//! - [`Format`] / [`MediaType`] - format identification by magic bytes and
//!   extension
//! - [`Rect`] - image regions
//! - [`PixelMatrix`] - the pixel container passed between readers, the
//!   pipeline, and writers
//! - [`ImageInfo`] - decoded source descriptions (pyramid, tiling, depth)
//! - [`Config`] - the immutable per-request configuration snapshot
//! - [`CancellationToken`] - per-request cancellation and time budgets
//! - [`Error`] / [`Result`] - the error surface shared by every crate
//!
//! ## Crate structure
//!
//! ```text
//! tessera-core (this crate)
//!    ^
//!    |
//!    +-- tessera-io     (format readers/writers)
//!    +-- tessera-ops    (operation list + pipeline)
//!    +-- tessera-source (backing-store providers)
//!    +-- tessera-cache  (derivative + info caches)
//!    +-- tessera        (engine facade)
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod format;
pub mod image;
pub mod info;
pub mod rect;

pub use cancel::CancellationToken;
pub use config::{
    CacheConfig, Config, DatabaseConfig, DerivativeCacheConfig, FilesystemConfig, HttpConfig,
    InfoCacheConfig, LookupStrategy, ProcessorConfig, ResolverConfig, S3Config, TimeoutConfig,
};
pub use error::{Error, Result};
pub use format::{Format, MediaType, MAGIC_PROBE_LEN};
pub use image::{PixelMatrix, Samples};
pub use info::{ImageInfo, LevelInfo};
pub use rect::Rect;
