//! Relational-database provider.
//!
//! Three configuration-supplied statements drive the lookup: an optional
//! identifier translation, an optional media-type query, and the BLOB
//! query. All of them are executed with positional binds; identifiers
//! never reach the SQL text.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::debug;

use tessera_core::{
    CancellationToken, DatabaseConfig, Error, Format, MediaType, Result, MAGIC_PROBE_LEN,
};

use crate::delegate::DelegateBridge;
use crate::traits::MemoryFactory;
use crate::{Source, SourceHandle};

/// Provider over BLOBs in an embedded relational database.
///
/// The connection is funneled through one lock; the provider owns its
/// pool and shares it with nobody.
#[derive(Debug)]
pub struct DatabaseSource {
    conn: Mutex<Connection>,
    config: DatabaseConfig,
    #[allow(dead_code)]
    delegate: Option<Arc<DelegateBridge>>,
}

impl DatabaseSource {
    /// Opens the database.
    pub fn new(config: DatabaseConfig, delegate: Option<Arc<DelegateBridge>>) -> Result<Self> {
        if config.blob_query.is_empty() {
            return Err(Error::internal("database source requires a blob query"));
        }
        let conn = Connection::open(&config.path)
            .map_err(|e| Error::upstream(format!("database open: {e}")))?;
        Ok(Self { conn: Mutex::new(conn), config, delegate })
    }

    /// Creates a provider over an already-open connection (tests,
    /// in-memory databases).
    pub fn with_connection(config: DatabaseConfig, conn: Connection) -> Self {
        Self { conn: Mutex::new(conn), config, delegate: None }
    }

    /// Applies the identifier-translation query, when configured.
    fn lookup_key(&self, conn: &Connection, identifier: &str) -> Result<String> {
        match &self.config.identifier_query {
            Some(sql) => conn
                .query_row(sql, [identifier], |row| row.get::<_, String>(0))
                .map_err(|e| map_db_err(e, identifier)),
            None => Ok(identifier.to_string()),
        }
    }

    fn fetch_blob(&self, identifier: &str) -> Result<Vec<u8>> {
        let conn = self.conn.lock().map_err(|_| Error::internal("connection lock poisoned"))?;
        let key = self.lookup_key(&conn, identifier)?;
        let blob = conn
            .query_row(&self.config.blob_query, [key.as_str()], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|e| map_db_err(e, identifier))?;
        debug!(identifier, bytes = blob.len(), "fetched BLOB");
        Ok(blob)
    }
}

fn map_db_err(err: rusqlite::Error, identifier: &str) -> Error {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Error::not_found(identifier.to_string()),
        other => Error::upstream(format!("database: {other}")),
    }
}

impl Source for DatabaseSource {
    fn probe(&self, identifier: &str, _token: &CancellationToken) -> Result<MediaType> {
        if let Some(format) = Format::from_identifier(identifier) {
            return Ok(format.media_type());
        }

        // Metadata-only query before touching the BLOB itself.
        if let Some(sql) = &self.config.media_type_query {
            let conn =
                self.conn.lock().map_err(|_| Error::internal("connection lock poisoned"))?;
            let key = self.lookup_key(&conn, identifier)?;
            let declared = conn
                .query_row(sql, [key.as_str()], |row| row.get::<_, String>(0))
                .map_err(|e| map_db_err(e, identifier))?;
            return Ok(MediaType::new(declared));
        }

        let blob = self.fetch_blob(identifier)?;
        Format::from_magic(&blob[..blob.len().min(MAGIC_PROBE_LEN)])
            .map(|format| format.media_type())
            .ok_or_else(|| Error::UnsupportedSourceFormat(identifier.to_string()))
    }

    fn open(&self, identifier: &str, _token: &CancellationToken) -> Result<SourceHandle> {
        let blob = self.fetch_blob(identifier)?;
        Ok(SourceHandle::Stream(Box::new(MemoryFactory::new(blob))))
    }
}
