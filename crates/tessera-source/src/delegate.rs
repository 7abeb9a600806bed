//! Delegate bridge.
//!
//! Dynamic identifier resolution is delegated to a user-supplied callable:
//! any scripting runtime or compiled policy object that can answer
//! `call(hook, identifier) -> Option<String>`. The engine depends on
//! nothing beyond this interface.
//!
//! Delegate runtimes are commonly thread-unsafe, so the bridge funnels all
//! invocations through one lock. No engine data-structure lock is ever
//! held across an invocation; the funnel is the only lock involved.

use std::sync::{Arc, Mutex};

use tessera_core::{Error, Result};

/// Hook names the engine invokes.
pub mod hooks {
    /// Filesystem provider: identifier to absolute pathname.
    pub const PATHNAME: &str = "get_pathname";
    /// HTTP provider: identifier to URL.
    pub const URL: &str = "get_url";
    /// Object-store provider: identifier to S3 object key.
    pub const S3_OBJECT_KEY: &str = "get_s3_object_key";
    /// Object-store provider: identifier to Azure blob key.
    pub const AZURE_BLOB_KEY: &str = "get_azure_blob_key";
    /// Engine: identifier to provider name.
    pub const RESOLVER: &str = "get_resolver";
}

/// User-supplied lookup callable.
///
/// Each call receives a single identifier string and returns a string or
/// `None`. Errors from the callable are surfaced as internal faults.
pub trait Delegate: Send + Sync {
    /// Invokes the named hook.
    fn call(&self, hook: &str, identifier: &str) -> Result<Option<String>>;
}

/// Serializing wrapper around a [`Delegate`].
pub struct DelegateBridge {
    inner: Arc<dyn Delegate>,
    gate: Mutex<()>,
}

impl std::fmt::Debug for DelegateBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateBridge").finish_non_exhaustive()
    }
}

impl DelegateBridge {
    /// Wraps a delegate.
    pub fn new(delegate: Arc<dyn Delegate>) -> Self {
        Self { inner: delegate, gate: Mutex::new(()) }
    }

    /// Invokes a hook, serialized against all other invocations.
    ///
    /// An empty string from the delegate is normalized to `None`, which
    /// callers render as a missing resource.
    pub fn invoke(&self, hook: &str, identifier: &str) -> Result<Option<String>> {
        let _serialized = self.gate.lock().map_err(|_| Error::internal("delegate gate poisoned"))?;
        match self.inner.call(hook, identifier) {
            Ok(Some(value)) if value.is_empty() => Ok(None),
            Ok(other) => Ok(other),
            Err(err) => Err(Error::internal(format!("delegate {hook}: {err}"))),
        }
    }
}
