//! Filesystem provider.
//!
//! Maps identifiers to paths as prefix + sanitized identifier + suffix.
//! Sanitization strips every `..` fragment before the join, and the
//! resolved path must stay inside the canonicalized prefix even through
//! symlinks; an escape surfaces as access denied, never as a read.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use tessera_core::{
    CancellationToken, Error, FilesystemConfig, LookupStrategy, MediaType, Result,
    MAGIC_PROBE_LEN,
};

use crate::delegate::{hooks, DelegateBridge};
use crate::traits::probe_with;
use crate::{Source, SourceHandle};

/// Provider over a local directory tree.
#[derive(Debug)]
pub struct FilesystemSource {
    config: FilesystemConfig,
    delegate: Option<Arc<DelegateBridge>>,
}

impl FilesystemSource {
    /// Creates the provider.
    pub fn new(config: FilesystemConfig, delegate: Option<Arc<DelegateBridge>>) -> Self {
        Self { config, delegate }
    }

    /// Resolves an identifier to a contained path.
    fn resolve(&self, identifier: &str) -> Result<PathBuf> {
        let path = match self.config.lookup_strategy {
            LookupStrategy::Script => {
                let delegate = self
                    .delegate
                    .as_ref()
                    .ok_or_else(|| Error::internal("script lookup without a delegate"))?;
                let pathname = delegate
                    .invoke(hooks::PATHNAME, identifier)?
                    .ok_or_else(|| Error::not_found(identifier.to_string()))?;
                PathBuf::from(pathname)
            }
            LookupStrategy::Basic => {
                let sanitized = sanitize(identifier);
                if sanitized.is_empty() {
                    return Err(Error::not_found(identifier.to_string()));
                }
                self.config.prefix.join(format!("{sanitized}{}", self.config.suffix))
            }
        };
        self.contain(&path, identifier)
    }

    /// Canonicalizes and verifies containment under the prefix.
    ///
    /// Script-resolved paths are exempt: the delegate is trusted to point
    /// anywhere it likes.
    fn contain(&self, path: &Path, identifier: &str) -> Result<PathBuf> {
        let canonical = path.canonicalize().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::not_found(identifier.to_string()),
            _ => Error::from(e),
        })?;

        if matches!(self.config.lookup_strategy, LookupStrategy::Basic) {
            let root = self
                .config
                .prefix
                .canonicalize()
                .map_err(|e| Error::internal(format!("source prefix: {e}")))?;
            if !canonical.starts_with(&root) {
                return Err(Error::access_denied(format!(
                    "{identifier} escapes the source root"
                )));
            }
        }

        debug!(path = %canonical.display(), "resolved identifier");
        Ok(canonical)
    }
}

/// Strips traversal fragments and leading separators from an identifier.
pub(crate) fn sanitize(identifier: &str) -> String {
    identifier
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

impl Source for FilesystemSource {
    fn probe(&self, identifier: &str, _token: &CancellationToken) -> Result<MediaType> {
        let path = self.resolve(identifier)?;
        probe_with(identifier, || {
            let mut file = File::open(&path)?;
            let mut head = vec![0u8; MAGIC_PROBE_LEN];
            let n = file.read(&mut head)?;
            head.truncate(n);
            Ok(head)
        })
    }

    fn open(&self, identifier: &str, _token: &CancellationToken) -> Result<SourceHandle> {
        Ok(SourceHandle::File(self.resolve(identifier)?))
    }
}
