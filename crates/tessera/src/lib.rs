//! # tessera
//!
//! A derivative-image engine: it takes an opaque identifier plus an
//! ordered operation list, resolves the identifier against a configured
//! backing store (filesystem, HTTP, relational BLOBs, S3-compatible
//! object stores), decodes only the region and resolution level the
//! request needs, applies the residual operations, encodes the result,
//! and memoizes the encoded bytes under a request fingerprint.
//!
//! # Example
//!
//! ```ignore
//! use tessera::{Engine, Request};
//! use tessera_core::{Config, Format, Rect};
//! use tessera_ops::{Crop, Encode, Operation, OperationList, Scale};
//!
//! let mut config = Config::default();
//! config.filesystem.prefix = "/var/images".into();
//!
//! let engine = Engine::new(config)?;
//! let ops = OperationList::new(vec![
//!     Operation::Crop(Crop::Pixels(Rect::new(2048, 2048, 512, 512))),
//!     Operation::Scale(Scale::FitWidth(256)),
//!     Operation::Encode(Encode::new(Format::Jpeg)),
//! ])?;
//!
//! let mut body = Vec::new();
//! let media_type = engine.fulfill(&Request::new("scan-0042.tif", ops), &mut body)?;
//! # Ok::<(), tessera_core::Error>(())
//! ```
//!
//! # Crate structure
//!
//! ```text
//! tessera (this crate: engine + request flow)
//!    |
//!    +-- tessera-source (backing-store providers, delegate bridge)
//!    +-- tessera-io     (format readers/writers)
//!    +-- tessera-ops    (operation list, fingerprints, pipeline)
//!    +-- tessera-cache  (derivative + info caches, single-flight)
//!    +-- tessera-core   (shared types)
//! ```
//!
//! The engine has no HTTP awareness; callers hand it identifiers and
//! operation lists and receive bytes plus a media type.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod engine;
mod request;

pub use engine::Engine;
pub use request::Request;

// The vocabulary callers need alongside the engine.
pub use tessera_core::{
    CancellationToken, Config, Error, Format, MediaType, Rect, Result,
};
pub use tessera_ops::{
    Axis, ColorTransform, Crop, Encode, Fingerprint, Operation, OperationList, Overlay,
    OverlayPosition, Scale,
};
pub use tessera_source::{Delegate, Source, SourceHandle, StreamFactory};
