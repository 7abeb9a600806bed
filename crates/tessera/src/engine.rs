//! The engine: wiring between providers, caches, delegate, and config.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::debug;

use tessera_cache::{
    spawn_eviction_worker, DerivativeCache, DerivativeCacheStats, EvictionWorker, InfoCache,
    InfoCacheStats, PurgeSelector, SingleFlight,
};
use tessera_core::{CancellationToken, Config, Error, Result};
use tessera_source::{create_provider, hooks, Delegate, DelegateBridge, Source};

/// The derivative-image engine.
///
/// One instance serves many concurrent requests. Construction builds the
/// configured source providers and caches; configuration reload swaps the
/// snapshot pointer between requests without touching in-flight ones.
pub struct Engine {
    config: RwLock<Arc<Config>>,
    providers: HashMap<&'static str, Arc<dyn Source>>,
    delegate: Option<Arc<DelegateBridge>>,
    pub(crate) derivative_cache: Option<Arc<DerivativeCache>>,
    pub(crate) info_cache: InfoCache,
    pub(crate) flights: SingleFlight,
    /// Keeps the eviction worker alive for the engine's lifetime.
    _eviction: Option<EvictionWorker>,
}

impl Engine {
    /// Builds an engine without a delegate.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_delegate(config, None)
    }

    /// Builds an engine with an optional delegate for dynamic lookups.
    pub fn with_delegate(config: Config, delegate: Option<Arc<dyn Delegate>>) -> Result<Self> {
        let bridge = delegate.map(|d| Arc::new(DelegateBridge::new(d)));

        let mut providers: HashMap<&'static str, Arc<dyn Source>> = HashMap::new();
        providers.insert(
            "filesystem",
            Arc::from(create_provider("filesystem", &config, bridge.clone())?),
        );
        if !config.http.prefix.is_empty() || bridge.is_some() {
            providers
                .insert("http", Arc::from(create_provider("http", &config, bridge.clone())?));
        }
        if !config.database.blob_query.is_empty() {
            providers.insert(
                "database",
                Arc::from(create_provider("database", &config, bridge.clone())?),
            );
        }
        if !config.s3.bucket.is_empty() {
            providers.insert("s3", Arc::from(create_provider("s3", &config, bridge.clone())?));
        }
        debug!(providers = providers.len(), "built source providers");

        let (derivative_cache, eviction) = if config.cache.derivative.enabled {
            let cache = Arc::new(DerivativeCache::new(&config.cache.derivative)?);
            let worker = spawn_eviction_worker(
                cache.clone(),
                Duration::from_secs(config.cache.derivative.worker_interval_seconds.max(1)),
            );
            (Some(cache), Some(worker))
        } else {
            (None, None)
        };

        let info_cache = InfoCache::new(config.cache.info.capacity);

        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            providers,
            delegate: bridge,
            derivative_cache,
            info_cache,
            flights: SingleFlight::new(),
            _eviction: eviction,
        })
    }

    /// The current configuration snapshot.
    pub fn config(&self) -> Arc<Config> {
        self.config.read().expect("config lock").clone()
    }

    /// Atomically swaps in a new configuration snapshot.
    ///
    /// Processor and cache-policy keys take effect on the next request.
    /// Provider wiring (clients, pools) is fixed at construction.
    pub fn reload_config(&self, config: Config) {
        *self.config.write().expect("config lock") = Arc::new(config);
    }

    /// Resolves the provider for one request.
    pub(crate) fn provider_for(
        &self,
        identifier: &str,
        config: &Config,
    ) -> Result<Arc<dyn Source>> {
        let name = if config.resolver.delegate
            && let Some(delegate) = &self.delegate
        {
            delegate
                .invoke(hooks::RESOLVER, identifier)?
                .unwrap_or_else(|| config.resolver.static_provider.clone())
        } else {
            config.resolver.static_provider.clone()
        };

        self.providers
            .get(name.as_str())
            .cloned()
            .ok_or_else(|| Error::internal(format!("provider {name} is not configured")))
    }

    /// Purges all cached state for an identifier (and everything under it,
    /// when identifiers form a hierarchy).
    pub fn purge_identifier(&self, identifier: &str) -> Result<u64> {
        self.info_cache.purge(identifier);
        match &self.derivative_cache {
            Some(cache) => cache.purge(PurgeSelector::IdentifierPrefix(identifier)),
            None => Ok(0),
        }
    }

    /// Purges one cached derivative by fingerprint.
    pub fn purge_fingerprint(&self, fingerprint_hex: &str) -> Result<u64> {
        match &self.derivative_cache {
            Some(cache) => cache.purge(PurgeSelector::Key(fingerprint_hex)),
            None => Ok(0),
        }
    }

    /// Drops every cache entry.
    pub fn purge_all(&self) -> Result<u64> {
        self.info_cache.purge_all();
        match &self.derivative_cache {
            Some(cache) => cache.purge(PurgeSelector::All),
            None => Ok(0),
        }
    }

    /// Derivative-cache counters, when the cache is enabled.
    pub fn derivative_cache_stats(&self) -> Option<DerivativeCacheStats> {
        self.derivative_cache.as_ref().map(|c| c.stats())
    }

    /// Info-cache counters.
    pub fn info_cache_stats(&self) -> InfoCacheStats {
        self.info_cache.stats()
    }

    /// Creates a cancellation token pre-budgeted with the request timeout.
    pub fn request_token(&self) -> CancellationToken {
        let config = self.config();
        CancellationToken::with_budget("request", config.timeouts.request_seconds)
    }
}
