//! Search router
//!
//! Fans a query out to every backend that can search, waits at most the
//! per-backend timeout for each, then merges the answers. Backends that fail
//! or time out are listed as excluded and the result is flagged partial.

mod merge;

pub use merge::{dedup, is_duplicate, MergePolicy};

use crate::connectors::{BackendRegistry, RegisteredBackend};
use integrity_common::config::RouterConfig;
use integrity_common::connector::{adapt_query, Capability};
use integrity_common::errors::{AppError, Result};
use integrity_common::models::{ExcludedBackend, SearchQuery, SearchResult};
use integrity_common::resilience::{retry_idempotent, RetryPolicy};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Concurrent fan-out, merge, dedup and rank
pub struct SearchRouter {
    registry: BackendRegistry,
    config: RouterConfig,
    retry: RetryPolicy,
    policy: MergePolicy,
}

/// What one backend contributed
enum Outcome {
    Answered(SearchResult, Vec<String>),
    Failed(AppError),
}

impl SearchRouter {
    pub fn new(registry: BackendRegistry, config: RouterConfig, retry: RetryPolicy) -> Self {
        let policy = MergePolicy {
            priorities: registry
                .iter()
                .map(|b| (b.id().clone(), b.priority))
                .collect(),
            min_score: config.min_score,
        };
        Self {
            registry,
            config,
            retry,
            policy,
        }
    }

    pub fn top_k(&self) -> usize {
        self.config.top_k
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Route a query to all capable backends and merge the results
    ///
    /// `query.limit` caps the merged hits; zero selects the configured top-k.
    #[instrument(skip(self, query), fields(query_len = query.text.len()))]
    pub async fn route(&self, query: &SearchQuery) -> Result<SearchResult> {
        let start = Instant::now();
        let top_k = if query.limit == 0 { self.config.top_k } else { query.limit };
        let per_backend = self.config.per_backend_limit.max(top_k);
        let timeout = Duration::from_millis(self.config.backend_timeout_ms);

        let mut warnings = Vec::new();
        let mut targets = Vec::new();
        for backend in self.registry.iter() {
            let caps = backend.connector.capabilities();
            if !caps.contains(Capability::FullTextSearch) {
                debug!(backend = %backend.id(), "Backend cannot search, skipping");
                continue;
            }
            let (mut adapted, dropped) = adapt_query(query, backend.id(), caps);
            adapted.limit = per_backend;
            warnings.extend(dropped);
            targets.push((backend, adapted));
        }

        if targets.is_empty() {
            return Err(AppError::Configuration {
                message: "no backend supports full-text search".to_string(),
            });
        }

        let calls = targets
            .iter()
            .map(|(backend, adapted)| self.search_one(backend, adapted, timeout));
        let outcomes = futures::future::join_all(calls).await;

        let mut merged = SearchResult::default();
        let mut hits = Vec::new();
        let mut answered = 0usize;
        let mut first_error: Option<AppError> = None;

        for ((backend, _), outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Outcome::Answered(result, backend_warnings) => {
                    answered += 1;
                    warnings.extend(backend_warnings);
                    merged.total_count += result.total_count;
                    for (facet, values) in &result.facets {
                        for (value, count) in values {
                            merged.add_facet(facet, value, *count);
                        }
                    }
                    hits.extend(result.hits);
                }
                Outcome::Failed(error) => {
                    if let AppError::Forbidden { .. } = &error {
                        warnings.push(format!("Access denied by backend {}", backend.id()));
                    } else {
                        warnings.push(format!("Backend {} unavailable; results may be incomplete", backend.id()));
                    }
                    warn!(backend = %backend.id(), error = %error, "Backend excluded from merge");
                    merged.excluded_backends.push(ExcludedBackend {
                        backend: backend.id().clone(),
                        reason: error.to_string(),
                    });
                    merged.partial = true;
                    let replace = match &first_error {
                        None => true,
                        Some(existing) => existing.is_retryable() && !error.is_retryable(),
                    };
                    if replace {
                        first_error = Some(error);
                    }
                }
            }
        }

        if answered == 0 {
            return Err(first_error.unwrap_or_else(|| AppError::unavailable("router", "no backend answered")));
        }

        let candidates = hits.len();
        merged.hits = self.policy.merge(hits, top_k);
        merged.warnings = warnings;

        info!(
            backends = targets.len(),
            answered = answered,
            candidates = candidates,
            returned = merged.hits.len(),
            partial = merged.partial,
            duration_ms = start.elapsed().as_millis() as u64,
            "Query routed"
        );

        Ok(merged)
    }

    async fn search_one(&self, backend: &RegisteredBackend, query: &SearchQuery, timeout: Duration) -> Outcome {
        let call = retry_idempotent(&self.retry, "search", || {
            backend.call("search", backend.connector.search(query))
        });

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(mut result)) => {
                let warnings = std::mem::take(&mut result.warnings);
                Outcome::Answered(result, warnings)
            }
            Ok(Err(e)) => Outcome::Failed(e),
            Err(_) => Outcome::Failed(AppError::unavailable(
                backend.id().as_str(),
                format!("no answer within {}ms", timeout.as_millis()),
            )),
        }
    }
}
