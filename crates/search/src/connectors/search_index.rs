//! Pre-synced in-process search index
//!
//! Lexical term-frequency scoring over title and text, metadata filters and
//! facets. Entries remember when they were synced; copies older than the
//! maximum staleness are invisible to search and refused on fetch, so the
//! real-time source wins.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use integrity_common::connector::{Capabilities, Capability, SourceConnector};
use integrity_common::errors::{AppError, Result};
use integrity_common::models::{
    BackendId, DocumentId, DocumentRef, SearchHit, SearchQuery, SearchResult, SourceKind, Version,
};
use integrity_common::text::{find_word_ci, terms};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Weight of a title match relative to a body match
const TITLE_WEIGHT: f32 = 2.0;

/// Characters of context on each side of a snippet match
const SNIPPET_RADIUS: usize = 80;

struct IndexEntry {
    meta: DocumentRef,
    content: Arc<[u8]>,
    title_terms: HashMap<String, usize>,
    body_terms: HashMap<String, usize>,
    synced_at: DateTime<Utc>,
}

impl IndexEntry {
    fn new(meta: DocumentRef, content: Arc<[u8]>, synced_at: DateTime<Utc>) -> Self {
        let text = String::from_utf8_lossy(&content);
        Self {
            title_terms: term_counts(&meta.name),
            body_terms: term_counts(&text),
            meta,
            content,
            synced_at,
        }
    }

    /// Score in (0, 1] or `None` when no query term matches
    fn score(&self, query_terms: &[String]) -> Option<f32> {
        if query_terms.is_empty() {
            return Some(0.5);
        }
        let mut matched = 0usize;
        let mut raw = 0.0f32;
        for term in query_terms {
            let title = self.title_terms.get(term).copied().unwrap_or(0);
            let body = self.body_terms.get(term).copied().unwrap_or(0);
            if title + body > 0 {
                matched += 1;
                raw += TITLE_WEIGHT * title as f32 + (1.0 + body as f32).ln();
            }
        }
        if matched == 0 {
            return None;
        }
        let coverage = matched as f32 / query_terms.len() as f32;
        Some(0.5 * coverage + 0.5 * (raw / (raw + 1.0)))
    }
}

fn term_counts(text: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for term in terms(text) {
        *counts.entry(term).or_insert(0) += 1;
    }
    counts
}

fn snippet(text: &str, query_terms: &[String]) -> String {
    let hit = query_terms
        .iter()
        .filter_map(|t| find_word_ci(text, t).first().copied())
        .min_by_key(|(start, _)| *start);

    let (start, end) = match hit {
        Some((s, e)) => (s.saturating_sub(SNIPPET_RADIUS), (e + SNIPPET_RADIUS).min(text.len())),
        None => (0, (2 * SNIPPET_RADIUS).min(text.len())),
    };
    let start = floor_boundary(text, start);
    let end = ceil_boundary(text, end);
    text[start..end].split_whitespace().collect::<Vec<_>>().join(" ")
}

fn floor_boundary(text: &str, mut i: usize) -> usize {
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(text: &str, mut i: usize) -> usize {
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// In-memory index of synced document copies
pub struct SearchIndexConnector {
    id: BackendId,
    entries: RwLock<HashMap<String, IndexEntry>>,
    max_staleness: Duration,
}

impl SearchIndexConnector {
    pub fn new(id: BackendId, max_staleness: std::time::Duration) -> Self {
        Self {
            id,
            entries: RwLock::new(HashMap::new()),
            max_staleness: Duration::from_std(max_staleness).unwrap_or(Duration::MAX),
        }
    }

    /// Insert or replace a synced copy, stamped now
    pub async fn upsert(&self, meta: DocumentRef, content: impl Into<Arc<[u8]>>) -> Result<()> {
        self.upsert_at(meta, content, Utc::now()).await
    }

    /// Insert or replace a synced copy with an explicit sync time
    ///
    /// Versions never go backwards: an older version than the stored one is
    /// rejected.
    pub async fn upsert_at(
        &self,
        mut meta: DocumentRef,
        content: impl Into<Arc<[u8]>>,
        synced_at: DateTime<Utc>,
    ) -> Result<()> {
        meta.id = DocumentId {
            backend: self.id.clone(),
            id: meta.id.id,
        };
        meta.source = SourceKind::Synced;

        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&meta.id.id) {
            if meta.version < existing.meta.version {
                return Err(AppError::Validation {
                    message: format!(
                        "version {} of {} is older than indexed {}",
                        meta.version, meta.id, existing.meta.version
                    ),
                    field: Some("version".to_string()),
                });
            }
        }
        let key = meta.id.id.clone();
        entries.insert(key, IndexEntry::new(meta, content.into(), synced_at));
        Ok(())
    }

    /// Drop one copy; the next sync pass repopulates it
    pub async fn invalidate(&self, id: &str) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    /// Drop every copy older than the maximum staleness
    pub async fn purge_stale(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| now - e.synced_at <= self.max_staleness);
        before - entries.len()
    }

    /// Version and sync time of a stored copy
    pub async fn synced_version(&self, id: &str) -> Option<(Version, DateTime<Utc>)> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| (e.meta.version, e.synced_at))
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn is_fresh(&self, entry: &IndexEntry, now: DateTime<Utc>) -> bool {
        now - entry.synced_at <= self.max_staleness
    }

    fn check_backend(&self, id: &DocumentId) -> Result<()> {
        if id.backend != self.id {
            return Err(AppError::not_found("document", id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceConnector for SearchIndexConnector {
    fn id(&self) -> &BackendId {
        &self.id
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::Synced
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[
            Capability::FullTextSearch,
            Capability::MetadataFilter,
            Capability::CategoryLookup,
        ])
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResult> {
        let query_terms = if query.text.trim() == "*" {
            Vec::new()
        } else {
            terms(&query.text)
        };
        let now = Utc::now();
        let entries = self.entries.read().await;

        let mut result = SearchResult::default();
        let mut hits = Vec::new();
        let mut stale = 0usize;

        for entry in entries.values() {
            if !self.is_fresh(entry, now) {
                stale += 1;
                continue;
            }
            if !query.filters.matches(&entry.meta) {
                continue;
            }
            let Some(score) = entry.score(&query_terms) else {
                continue;
            };

            result.add_facet("content_type", &entry.meta.content_type, 1);
            for category in &entry.meta.categories {
                result.add_facet("category", category, 1);
            }

            let text = String::from_utf8_lossy(&entry.content);
            hits.push(SearchHit {
                document: entry.meta.clone(),
                score,
                snippet: snippet(&text, &query_terms),
                backend: self.id.clone(),
            });
        }

        if stale > 0 {
            tracing::debug!(backend = %self.id, stale = stale, "Skipped stale index entries");
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        result.total_count = hits.len();
        hits.truncate(query.limit);
        result.hits = hits;
        Ok(result)
    }

    async fn fetch_content(&self, id: &DocumentId, version: Option<Version>) -> Result<Vec<u8>> {
        self.check_backend(id)?;
        let entries = self.entries.read().await;
        let entry = entries
            .get(&id.id)
            .ok_or_else(|| AppError::not_found("document", id.to_string()))?;

        if !self.is_fresh(entry, Utc::now()) {
            return Err(AppError::not_found("fresh synced copy", id.to_string()));
        }
        if let Some(pinned) = version {
            if pinned != entry.meta.version {
                return Err(AppError::not_found("document version", format!("{}@{}", id, pinned)));
            }
        }
        Ok(entry.content.to_vec())
    }

    async fn fetch_metadata(&self, id: &DocumentId) -> Result<DocumentRef> {
        self.check_backend(id)?;
        let entries = self.entries.read().await;
        let entry = entries
            .get(&id.id)
            .ok_or_else(|| AppError::not_found("document", id.to_string()))?;
        if !self.is_fresh(entry, Utc::now()) {
            return Err(AppError::not_found("fresh synced copy", id.to_string()));
        }
        Ok(entry.meta.clone())
    }

    async fn categories(&self, id: &DocumentId) -> Result<Vec<String>> {
        Ok(self.fetch_metadata(id).await?.categories)
    }
}
