//! Scriptable in-memory connector for tests and local development

use async_trait::async_trait;
use integrity_common::connector::{Capabilities, SourceConnector, VersionInfo};
use integrity_common::errors::{AppError, Result};
use integrity_common::models::{
    BackendId, DocumentId, DocumentRef, SearchHit, SearchQuery, SearchResult, SourceKind, Version,
};
use integrity_common::text::terms;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Mock connector holding documents in memory
///
/// Failures are scripted per operation and consumed in order. Every call is
/// counted so tests can assert on fetch-once behaviour.
pub struct MockConnector {
    id: BackendId,
    kind: SourceKind,
    capabilities: Capabilities,
    documents: Mutex<BTreeMap<String, Vec<(DocumentRef, Vec<u8>)>>>,
    search_failures: Mutex<VecDeque<AppError>>,
    fetch_failures: Mutex<VecDeque<AppError>>,
    deny_all: bool,
    delay: Option<Duration>,
    fetch_delay: Option<Duration>,
    search_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    in_flight: AtomicUsize,
}

/// Counts a call as in flight until dropped, completed or cancelled
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockConnector {
    pub fn new(id: &str, kind: SourceKind) -> Self {
        Self {
            id: BackendId::new(id),
            kind,
            capabilities: Capabilities::all(),
            documents: Mutex::new(BTreeMap::new()),
            search_failures: Mutex::new(VecDeque::new()),
            fetch_failures: Mutex::new(VecDeque::new()),
            deny_all: false,
            delay: None,
            fetch_delay: None,
            search_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sleep before answering every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleep before answering content fetches only
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Answer every call with `Forbidden`
    pub fn denying_access(mut self) -> Self {
        self.deny_all = true;
        self
    }

    /// Add a document version; the id is rescoped to this backend
    pub fn with_document(self, mut meta: DocumentRef, content: impl Into<Vec<u8>>) -> Self {
        meta.id = DocumentId {
            backend: self.id.clone(),
            id: meta.id.id,
        };
        meta.source = self.kind;
        if let Ok(mut documents) = self.documents.lock() {
            let versions = documents.entry(meta.id.id.clone()).or_default();
            versions.push((meta, content.into()));
            versions.sort_by_key(|(m, _)| m.version);
        }
        self
    }

    pub fn fail_searches(self, errors: Vec<AppError>) -> Self {
        if let Ok(mut queue) = self.search_failures.lock() {
            queue.extend(errors);
        }
        self
    }

    pub fn fail_fetches(self, errors: Vec<AppError>) -> Self {
        if let Ok(mut queue) = self.fetch_failures.lock() {
            queue.extend(errors);
        }
        self
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Calls started but not yet finished or cancelled
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn scripted(&self, queue: &Mutex<VecDeque<AppError>>) -> Result<()> {
        if self.deny_all {
            return Err(AppError::forbidden(self.id.as_str(), "access denied"));
        }
        match queue.lock().ok().and_then(|mut q| q.pop_front()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn latest(&self, id: &DocumentId) -> Result<(DocumentRef, Vec<u8>)> {
        let documents = self
            .documents
            .lock()
            .map_err(|_| AppError::unavailable(self.id.as_str(), "poisoned"))?;
        documents
            .get(&id.id)
            .filter(|_| id.backend == self.id)
            .and_then(|versions| versions.last().cloned())
            .ok_or_else(|| AppError::not_found("document", id.to_string()))
    }
}

#[async_trait]
impl SourceConnector for MockConnector {
    fn id(&self) -> &BackendId {
        &self.id
    }

    fn source_kind(&self) -> SourceKind {
        self.kind
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResult> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.in_flight);
        self.pause().await;
        self.scripted(&self.search_failures)?;

        let wanted: HashSet<String> = terms(&query.text).into_iter().collect();
        let documents = self
            .documents
            .lock()
            .map_err(|_| AppError::unavailable(self.id.as_str(), "poisoned"))?;

        let mut hits = Vec::new();
        for versions in documents.values() {
            let Some((meta, content)) = versions.last() else {
                continue;
            };
            if !query.filters.matches(meta) {
                continue;
            }
            let text = String::from_utf8_lossy(content);
            let have: HashSet<String> = terms(&format!("{} {}", meta.name, text)).into_iter().collect();
            let score = if wanted.is_empty() {
                0.5
            } else {
                wanted.intersection(&have).count() as f32 / wanted.len() as f32
            };
            if score == 0.0 {
                continue;
            }
            hits.push(SearchHit {
                document: meta.clone(),
                score,
                snippet: text.chars().take(120).collect(),
                backend: self.id.clone(),
            });
        }

        let total_count = hits.len();
        hits.truncate(query.limit);
        Ok(SearchResult {
            hits,
            total_count,
            ..Default::default()
        })
    }

    async fn fetch_content(&self, id: &DocumentId, version: Option<Version>) -> Result<Vec<u8>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.in_flight);
        self.pause().await;
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.scripted(&self.fetch_failures)?;

        let documents = self
            .documents
            .lock()
            .map_err(|_| AppError::unavailable(self.id.as_str(), "poisoned"))?;
        let versions = documents
            .get(&id.id)
            .filter(|_| id.backend == self.id)
            .ok_or_else(|| AppError::not_found("document", id.to_string()))?;
        let found = match version {
            Some(v) => versions.iter().find(|(m, _)| m.version == v),
            None => versions.last(),
        };
        found
            .map(|(_, content)| content.clone())
            .ok_or_else(|| AppError::not_found("document version", id.to_string()))
    }

    async fn fetch_metadata(&self, id: &DocumentId) -> Result<DocumentRef> {
        self.pause().await;
        if self.deny_all {
            return Err(AppError::forbidden(self.id.as_str(), "access denied"));
        }
        self.latest(id).map(|(meta, _)| meta)
    }

    async fn list_versions(&self, id: &DocumentId) -> Result<Vec<VersionInfo>> {
        let documents = self
            .documents
            .lock()
            .map_err(|_| AppError::unavailable(self.id.as_str(), "poisoned"))?;
        let versions = documents
            .get(&id.id)
            .ok_or_else(|| AppError::not_found("document", id.to_string()))?;
        Ok(versions
            .iter()
            .map(|(m, _)| VersionInfo {
                version: m.version,
                modified_at: m.modified_at,
            })
            .collect())
    }

    async fn categories(&self, id: &DocumentId) -> Result<Vec<String>> {
        Ok(self.latest(id)?.0.categories)
    }
}
