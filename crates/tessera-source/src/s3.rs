//! S3-compatible object-store provider.
//!
//! Identifiers map to object keys as prefix + identifier + suffix, or
//! through the delegate's object-key hooks. Reads go through ranged
//! `GetObject` requests, so readers seek inside multi-gigabyte objects
//! without downloading them.
//!
//! The AWS SDK is async; this provider owns a private current-thread
//! runtime and drives every call to completion on it. The runtime is the
//! provider's connection pool and never leaks past this module. A custom
//! endpoint plus path-style addressing covers MinIO and other
//! S3-compatible gateways, including Azure-fronting ones.

use std::io::Read;
use std::sync::Arc;

use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::Client;
use tokio::runtime::Runtime;
use tracing::debug;

use tessera_core::{
    CancellationToken, Error, LookupStrategy, MediaType, Result, S3Config,
};

use crate::delegate::{hooks, DelegateBridge};
use crate::traits::probe_with;
use crate::{Source, SourceHandle, StreamFactory};

/// Provider over an S3-compatible bucket.
#[derive(Debug)]
pub struct S3Source {
    runtime: Arc<Runtime>,
    client: Client,
    config: S3Config,
    delegate: Option<Arc<DelegateBridge>>,
}

impl S3Source {
    /// Creates the provider, building its private runtime and client.
    pub fn new(config: S3Config, delegate: Option<Arc<DelegateBridge>>) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(Error::internal("object-store source requires a bucket"));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::internal(format!("object-store runtime: {e}")))?;

        let sdk_config = runtime.block_on(async {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(region) = &config.region {
                loader = loader.region(aws_sdk_s3::config::Region::new(region.clone()));
            }
            if let (Some(access), Some(secret)) = (&config.access_key, &config.secret_key) {
                loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                    access.clone(),
                    secret.clone(),
                    None,
                    None,
                    "configured",
                ));
            }
            loader.load().await
        });

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }
        if config.path_style {
            builder = builder.force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        Ok(Self { runtime: Arc::new(runtime), client, config, delegate })
    }

    /// Resolves an identifier to an object key.
    fn key(&self, identifier: &str) -> Result<String> {
        match self.config.lookup_strategy {
            LookupStrategy::Script => {
                let delegate = self
                    .delegate
                    .as_ref()
                    .ok_or_else(|| Error::internal("script lookup without a delegate"))?;
                // Either object-key hook may answer; deployments configure
                // whichever matches their store.
                if let Some(key) = delegate.invoke(hooks::S3_OBJECT_KEY, identifier)? {
                    return Ok(key);
                }
                delegate
                    .invoke(hooks::AZURE_BLOB_KEY, identifier)?
                    .ok_or_else(|| Error::not_found(identifier.to_string()))
            }
            LookupStrategy::Basic => {
                Ok(format!("{}{}{}", self.config.prefix, identifier, self.config.suffix))
            }
        }
    }

    /// HeadObject returning (length, content type).
    fn head(&self, key: &str, identifier: &str) -> Result<(u64, Option<String>)> {
        let result = self.runtime.block_on(
            self.client.head_object().bucket(&self.config.bucket).key(key).send(),
        );
        match result {
            Ok(output) => Ok((
                output.content_length().unwrap_or(0).max(0) as u64,
                output.content_type().map(str::to_string),
            )),
            Err(err) => Err(map_sdk_err(&err, identifier)),
        }
    }

    fn get_range(&self, key: &str, identifier: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let end = offset + length.saturating_sub(1);
        let result = self.runtime.block_on(async {
            let output = self
                .client
                .get_object()
                .bucket(&self.config.bucket)
                .key(key)
                .range(format!("bytes={offset}-{end}"))
                .send()
                .await
                .map_err(|e| map_sdk_err(&e, identifier))?;
            output
                .body
                .collect()
                .await
                .map(|data| data.into_bytes().to_vec())
                .map_err(|e| Error::upstream(format!("object body: {e}")))
        });
        result
    }
}

/// Maps SDK failures onto the engine's error kinds via the error code.
fn map_sdk_err<E>(err: &aws_sdk_s3::error::SdkError<E>, identifier: &str) -> Error
where
    aws_sdk_s3::error::SdkError<E>: ProvideErrorMetadata + std::fmt::Display,
{
    match err.code() {
        Some("NoSuchKey") | Some("NotFound") | Some("NoSuchBucket") => {
            Error::not_found(identifier.to_string())
        }
        Some("AccessDenied") | Some("InvalidAccessKeyId") | Some("SignatureDoesNotMatch") => {
            Error::access_denied(identifier.to_string())
        }
        _ => Error::upstream(format!("object store: {err}")),
    }
}

impl Source for S3Source {
    fn probe(&self, identifier: &str, token: &CancellationToken) -> Result<MediaType> {
        token.checkpoint()?;
        let key = self.key(identifier)?;

        // Metadata-only request before any byte fetch.
        let head = self.head(&key, identifier)?;
        if let Some(declared) = head.1
            && MediaType::new(declared.clone()).format().is_some()
        {
            return Ok(MediaType::new(declared));
        }

        probe_with(identifier, || {
            self.get_range(&key, identifier, 0, tessera_core::MAGIC_PROBE_LEN as u64)
        })
    }

    fn open(&self, identifier: &str, token: &CancellationToken) -> Result<SourceHandle> {
        token.checkpoint()?;
        let key = self.key(identifier)?;
        let (length, _) = self.head(&key, identifier)?;
        debug!(key = %key, length, "opened object-store source");

        Ok(SourceHandle::Stream(Box::new(S3StreamFactory {
            runtime: self.runtime.clone(),
            client: self.client.clone(),
            bucket: self.config.bucket.clone(),
            key,
            identifier: identifier.to_string(),
            length,
        })))
    }
}

/// Ranged stream factory over one object.
#[derive(Debug)]
struct S3StreamFactory {
    runtime: Arc<Runtime>,
    client: Client,
    bucket: String,
    key: String,
    identifier: String,
    length: u64,
}

impl StreamFactory for S3StreamFactory {
    fn open_stream(&self) -> Result<Box<dyn Read + Send>> {
        // Whole-object fetch; the ranged path is what readers actually use.
        let bytes = self.fetch(None)?;
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }

    fn length(&self) -> Result<u64> {
        Ok(self.length)
    }

    fn supports_ranges(&self) -> bool {
        true
    }

    fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let end = offset + length.saturating_sub(1);
        self.fetch(Some(format!("bytes={offset}-{end}")))
    }
}

impl S3StreamFactory {
    fn fetch(&self, range: Option<String>) -> Result<Vec<u8>> {
        self.runtime.block_on(async {
            let mut request =
                self.client.get_object().bucket(&self.bucket).key(&self.key);
            if let Some(range) = range {
                request = request.range(range);
            }
            let output =
                request.send().await.map_err(|e| map_sdk_err(&e, &self.identifier))?;
            output
                .body
                .collect()
                .await
                .map(|data| data.into_bytes().to_vec())
                .map_err(|e| Error::upstream(format!("object body: {e}")))
        })
    }
}
