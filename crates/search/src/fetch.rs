//! Content fetching
//!
//! A [`FetchSession`] lives for one query. It fetches each (document,
//! version) at most once, runs fetches concurrently up to the configured
//! limit, and pins the version reported by search so citations stay
//! consistent with the text that was read. Dropping the session's
//! in-flight future aborts every outstanding fetch task.

use crate::connectors::BackendRegistry;
use integrity_common::config::FetchConfig;
use integrity_common::connector::load_document;
use integrity_common::errors::{AppError, Result};
use integrity_common::models::{Document, DocumentId, DocumentRef, FailedDocument, Version};
use integrity_common::resilience::{retry_idempotent, RetryPolicy};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{self, JoinSet};
use tracing::{debug, warn};

/// Shared fetch configuration
#[derive(Clone)]
pub struct ContentFetcher {
    registry: BackendRegistry,
    retry: RetryPolicy,
    concurrency: usize,
    timeout: Duration,
}

/// Documents fetched for one query
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Loaded documents, in request order
    pub documents: Vec<Document>,
    /// Documents whose content could not be fetched
    pub failed: Vec<FailedDocument>,
    /// Access denials worth telling the user about
    pub warnings: Vec<String>,
}

impl ContentFetcher {
    pub fn new(registry: BackendRegistry, config: &FetchConfig, retry: RetryPolicy) -> Self {
        Self {
            registry,
            retry,
            concurrency: config.concurrency.max(1),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Start a per-query session
    pub fn session(&self) -> FetchSession {
        FetchSession {
            fetcher: self.clone(),
            memo: Arc::new(Mutex::new(HashMap::new())),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Load one document outside a query, latest version unless pinned
    pub async fn resolve(&self, id: &DocumentId, version: Option<Version>) -> Result<Document> {
        let backend = self
            .registry
            .get(&id.backend)
            .ok_or_else(|| AppError::not_found("backend", id.backend.to_string()))?;
        retry_idempotent(&self.retry, "fetch_document", || {
            backend.call("fetch_document", load_document(backend.connector.as_ref(), id, version))
        })
        .await
    }
}

/// Per-query fetch memo
pub struct FetchSession {
    fetcher: ContentFetcher,
    memo: Arc<Mutex<HashMap<(DocumentId, Version), Document>>>,
    fetches: Arc<AtomicUsize>,
}

impl FetchSession {
    /// Backend fetches issued by this session so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Forget a document so the next request fetches it again
    pub async fn invalidate(&self, id: &DocumentId) {
        self.memo.lock().await.retain(|(doc, _), _| doc != id);
    }

    /// Fetch content for every reference, reusing anything already loaded
    pub async fn fetch_all(&self, refs: &[DocumentRef]) -> FetchOutcome {
        let mut pending: Vec<DocumentRef> = Vec::new();
        {
            let memo = self.memo.lock().await;
            for r in refs {
                let key = (r.id.clone(), r.version);
                if !memo.contains_key(&key) && !pending.iter().any(|p| p.id == r.id && p.version == r.version) {
                    pending.push(r.clone());
                }
            }
        }

        let mut failed = Vec::new();
        let mut warnings = Vec::new();

        if !pending.is_empty() {
            debug!(pending = pending.len(), concurrency = self.fetcher.concurrency, "Fetching content");
            let permits = Arc::new(Semaphore::new(self.fetcher.concurrency));
            let mut tasks = JoinSet::new();
            let mut requested: HashMap<task::Id, DocumentRef> = HashMap::new();

            for meta in pending {
                let Some(backend) = self.fetcher.registry.get(&meta.id.backend).cloned() else {
                    failed.push(FailedDocument {
                        document: meta.id.clone(),
                        reason: format!("unknown backend {}", meta.id.backend),
                    });
                    continue;
                };
                let permits = permits.clone();
                let retry = self.fetcher.retry.clone();
                let timeout = self.fetcher.timeout;
                let fetches = self.fetches.clone();
                let id = meta.id.clone();
                let version = meta.version;

                let handle = tasks.spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    let call = retry_idempotent(&retry, "fetch_content", || {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        backend.call("fetch_content", backend.connector.fetch_content(&id, Some(version)))
                    });
                    match tokio::time::timeout(timeout, call).await {
                        Ok(result) => result,
                        Err(_) => Err(AppError::unavailable(
                            backend.id().as_str(),
                            format!("fetch exceeded {}ms", timeout.as_millis()),
                        )),
                    }
                });
                requested.insert(handle.id(), meta);
            }

            while let Some(joined) = tasks.join_next_with_id().await {
                let (task, result) = match joined {
                    Ok(pair) => pair,
                    Err(e) => {
                        let reason = if e.is_panic() { "fetch task panicked" } else { "fetch task cancelled" };
                        (e.id(), Err(AppError::Internal { message: reason.to_string() }))
                    }
                };
                let Some(meta) = requested.remove(&task) else {
                    continue;
                };
                match result {
                    Ok(content) => {
                        let key = (meta.id.clone(), meta.version);
                        self.memo.lock().await.insert(key, Document::with_content(meta, content));
                    }
                    Err(e) => {
                        warn!(document = %meta.id, error = %e, "Content fetch failed");
                        if let AppError::Forbidden { .. } = e {
                            warnings.push(format!("Access denied to document {}", meta.name));
                        }
                        failed.push(FailedDocument {
                            document: meta.id,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        let memo = self.memo.lock().await;
        let mut documents = Vec::new();
        let mut seen = Vec::new();
        for r in refs {
            let key = (r.id.clone(), r.version);
            if seen.contains(&key) {
                continue;
            }
            if let Some(doc) = memo.get(&key) {
                documents.push(doc.clone());
            }
            seen.push(key);
        }
        failed.sort_by(|a, b| a.document.cmp(&b.document));

        FetchOutcome {
            documents,
            failed,
            warnings,
        }
    }
}
