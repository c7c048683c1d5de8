//! Backend connectors and the registry that owns them
//!
//! Each configured backend is paired with its [`BackendPool`]; every call
//! made by the router or the fetcher goes through [`RegisteredBackend::call`].

mod content_server;
mod mock;
mod search_index;

pub use content_server::ContentServerConnector;
pub use mock::MockConnector;
pub use search_index::SearchIndexConnector;

use integrity_common::config::{AppConfig, BackendKind};
use integrity_common::connector::SourceConnector;
use integrity_common::credential::{Credential, StaticCredentialProvider};
use integrity_common::errors::{AppError, Result};
use integrity_common::metrics;
use integrity_common::models::BackendId;
use integrity_common::resilience::BackendPool;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A connector with its pool and tie-break priority
#[derive(Clone)]
pub struct RegisteredBackend {
    pub connector: Arc<dyn SourceConnector>,
    pub pool: Arc<BackendPool>,
    /// Lower sorts first among backends of the same source kind
    pub priority: u32,
}

impl RegisteredBackend {
    pub fn new(connector: Arc<dyn SourceConnector>, pool: BackendPool, priority: u32) -> Self {
        Self {
            connector,
            pool: Arc::new(pool),
            priority,
        }
    }

    pub fn id(&self) -> &BackendId {
        self.connector.id()
    }

    /// Run one call through the pool, recording latency and outcome
    pub async fn call<T, Fut>(&self, operation: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = self.pool.run(fut).await;
        metrics::record_backend_call(
            self.id().as_str(),
            operation,
            start.elapsed().as_secs_f64(),
            result.is_ok(),
        );
        result
    }
}

/// All configured backends, in configuration order
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<RegisteredBackend>,
    index: Option<Arc<SearchIndexConnector>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build connectors and pools from configuration
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut registry = Self::new();
        let max_staleness = Duration::from_secs(config.sync.max_staleness_secs);

        for backend in &config.backends {
            let pool = BackendPool::from_config(backend);
            match backend.kind {
                BackendKind::ContentServer => {
                    let base_url = backend.base_url.clone().ok_or_else(|| AppError::Configuration {
                        message: format!("backend {} requires base_url", backend.id),
                    })?;
                    let credential = match backend.token_ttl_secs {
                        Some(ttl) => Credential::expiring_in(
                            backend.token.clone().unwrap_or_default(),
                            chrono::Duration::seconds(ttl as i64),
                        ),
                        None => Credential::bearer(backend.token.clone().unwrap_or_default(), None),
                    };
                    let connector = ContentServerConnector::new(
                        backend.backend_id(),
                        base_url,
                        StaticCredentialProvider::new(credential),
                        backend.timeout(),
                    )?;
                    registry.register(Arc::new(connector), pool, backend.priority);
                }
                BackendKind::SearchIndex => {
                    let index = Arc::new(SearchIndexConnector::new(backend.backend_id(), max_staleness));
                    registry.register_index(index, pool, backend.priority);
                }
            }
            tracing::info!(backend = %backend.id, kind = ?backend.kind, priority = backend.priority, "Registered backend");
        }

        Ok(registry)
    }

    pub fn register(&mut self, connector: Arc<dyn SourceConnector>, pool: BackendPool, priority: u32) {
        self.backends.push(RegisteredBackend::new(connector, pool, priority));
    }

    /// Register the pre-synced index; it stays reachable for the sync path
    pub fn register_index(&mut self, index: Arc<SearchIndexConnector>, pool: BackendPool, priority: u32) {
        self.index = Some(index.clone());
        self.register(index, pool, priority);
    }

    pub fn get(&self, id: &BackendId) -> Option<&RegisteredBackend> {
        self.backends.iter().find(|b| b.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredBackend> {
        self.backends.iter()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn search_index(&self) -> Option<Arc<SearchIndexConnector>> {
        self.index.clone()
    }

    /// First real-time backend, the source of the sync path
    pub fn real_time(&self) -> Option<&RegisteredBackend> {
        self.backends
            .iter()
            .find(|b| b.connector.source_kind() == integrity_common::models::SourceKind::RealTime)
    }

    /// Probe every backend concurrently
    pub async fn ping_all(&self) -> Vec<(BackendId, Result<()>)> {
        let probes = self.backends.iter().map(|b| async move {
            let result = b.call("ping", b.connector.ping()).await;
            (b.id().clone(), result)
        });
        futures::future::join_all(probes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use integrity_common::config::BackendConfig;

    #[test]
    fn test_registry_from_default_config() {
        let registry = BackendRegistry::from_config(&AppConfig::default()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.search_index().is_some());
        assert!(registry.real_time().is_none());
        assert!(registry.get(&BackendId::new("index")).is_some());
    }

    #[test]
    fn test_content_server_requires_base_url() {
        let mut config = AppConfig::default();
        config.backends.push(BackendConfig {
            id: "livelink".into(),
            kind: BackendKind::ContentServer,
            base_url: None,
            token: None,
            token_ttl_secs: None,
            priority: 0,
            max_concurrency: 4,
            requests_per_second: None,
            timeout_ms: 1000,
        });
        assert!(matches!(
            BackendRegistry::from_config(&config),
            Err(AppError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_ping_all_reports_each_backend() {
        let registry = BackendRegistry::from_config(&AppConfig::default()).unwrap();
        let probes = registry.ping_all().await;
        assert_eq!(probes.len(), 1);
        assert!(probes[0].1.is_ok());
    }
}
