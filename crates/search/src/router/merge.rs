//! Merging hits from several backends
//!
//! Ranking is a total order:
//! 1. modification time, newest first
//! 2. relevance score, highest first
//! 3. source kind, real-time before synced
//! 4. configured backend priority, lowest first
//! 5. document id
//!
//! Duplicates (the same document reached through two backends) share a
//! normalized title and have overlapping party sets. Within one backend only
//! an identical id is a duplicate. Hits are deduplicated in ranked order, so
//! the survivor is always the better-ranked copy.

use integrity_common::models::{BackendId, DocumentId, SearchHit};
use integrity_common::text::{normalize_phrase, normalize_title};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Merge parameters
#[derive(Debug, Clone, Default)]
pub struct MergePolicy {
    /// Backend id -> configured priority (missing sorts last)
    pub priorities: HashMap<BackendId, u32>,

    /// Hits scoring below this are dropped
    pub min_score: f32,
}

impl MergePolicy {
    fn priority(&self, backend: &BackendId) -> u32 {
        self.priorities.get(backend).copied().unwrap_or(u32::MAX)
    }

    /// Ranking order; `Less` means `a` ranks first
    pub fn compare(&self, a: &SearchHit, b: &SearchHit) -> Ordering {
        b.document
            .modified_at
            .cmp(&a.document.modified_at)
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
            .then_with(|| {
                a.document
                    .source
                    .priority_rank()
                    .cmp(&b.document.source.priority_rank())
            })
            .then_with(|| self.priority(&a.backend).cmp(&self.priority(&b.backend)))
            .then_with(|| a.document.id.cmp(&b.document.id))
    }

    /// Filter, rank, deduplicate and cap
    pub fn merge(&self, hits: Vec<SearchHit>, top_k: usize) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = hits
            .into_iter()
            .filter(|h| h.score.is_finite() && h.score >= self.min_score)
            .collect();
        hits.sort_by(|a, b| self.compare(a, b));

        let mut kept = dedup(hits);
        kept.truncate(top_k);
        kept
    }
}

/// Dedup key of a hit: backend id, normalized title and party names
struct DedupKey {
    id: DocumentId,
    title: String,
    parties: HashSet<String>,
}

impl DedupKey {
    fn of(hit: &SearchHit) -> Self {
        Self {
            id: hit.document.id.clone(),
            title: normalize_title(&hit.document.name),
            parties: hit
                .document
                .parties
                .iter()
                .map(|p| normalize_phrase(p))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    fn duplicates(&self, other: &DedupKey) -> bool {
        if self.id.backend == other.id.backend {
            return self.id == other.id;
        }
        if self.title != other.title {
            return false;
        }
        self.parties.is_empty()
            || other.parties.is_empty()
            || !self.parties.is_disjoint(&other.parties)
    }
}

/// Two hits describe the same underlying document
pub fn is_duplicate(a: &SearchHit, b: &SearchHit) -> bool {
    DedupKey::of(a).duplicates(&DedupKey::of(b))
}

/// Drop later duplicates of earlier hits; input order is preserved
pub fn dedup(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut kept: Vec<(DedupKey, SearchHit)> = Vec::with_capacity(hits.len());
    let mut dropped = 0usize;
    for hit in hits {
        let key = DedupKey::of(&hit);
        if kept.iter().any(|(k, _)| k.duplicates(&key)) {
            dropped += 1;
            continue;
        }
        kept.push((key, hit));
    }
    if dropped > 0 {
        tracing::debug!(dropped = dropped, "Removed duplicate hits");
    }
    kept.into_iter().map(|(_, hit)| hit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use integrity_common::models::{DocumentId, DocumentRef, SourceKind, Version};

    fn hit(backend: &str, id: &str, name: &str, day: u32, score: f32, source: SourceKind) -> SearchHit {
        let ts = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        SearchHit {
            document: DocumentRef {
                id: DocumentId::new(backend, id),
                name: name.to_string(),
                content_type: "text/plain".to_string(),
                version: Version(1),
                created_at: ts,
                modified_at: ts,
                source,
                categories: vec![],
                parties: vec![],
            },
            score,
            snippet: String::new(),
            backend: BackendId::new(backend),
        }
    }

    #[test]
    fn test_recency_beats_relevance() {
        let policy = MergePolicy::default();
        let merged = policy.merge(
            vec![
                hit("index", "old", "Old memo", 1, 0.99, SourceKind::Synced),
                hit("index", "new", "New memo", 20, 0.10, SourceKind::Synced),
            ],
            10,
        );
        assert_eq!(merged[0].document.id.id, "new");
    }

    #[test]
    fn test_real_time_copy_survives_dedup() {
        let policy = MergePolicy::default();
        let merged = policy.merge(
            vec![
                hit("index", "1001", "Acme Corp IDD.pdf", 5, 0.9, SourceKind::Synced),
                hit("livelink", "1001", "acme corp idd", 5, 0.9, SourceKind::RealTime),
            ],
            10,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].backend, BackendId::new("livelink"));
    }

    #[test]
    fn test_same_title_different_parties_are_kept() {
        let mut a = hit("livelink", "1", "Screening memo", 5, 0.5, SourceKind::RealTime);
        a.document.parties = vec!["Acme Corp".into()];
        let mut b = hit("index", "2", "Screening memo", 5, 0.5, SourceKind::Synced);
        b.document.parties = vec!["Globex Ltd".into()];
        assert!(!is_duplicate(&a, &b));

        b.document.parties.push("ACME corp".into());
        assert!(is_duplicate(&a, &b));
    }

    #[test]
    fn test_same_backend_same_title_are_kept() {
        let policy = MergePolicy::default();
        let merged = policy.merge(
            vec![
                hit("livelink", "1001", "Screening memo.pdf", 5, 0.9, SourceKind::RealTime),
                hit("livelink", "2002", "Screening memo.pdf", 5, 0.8, SourceKind::RealTime),
            ],
            10,
        );
        let ids: Vec<_> = merged.iter().map(|h| h.document.id.id.as_str()).collect();
        assert_eq!(ids, vec!["1001", "2002"]);
    }

    #[test]
    fn test_same_backend_same_id_is_duplicate() {
        let a = hit("index", "7", "Memo", 5, 0.9, SourceKind::Synced);
        let b = hit("index", "7", "Memo (copy)", 5, 0.4, SourceKind::Synced);
        assert!(is_duplicate(&a, &b));
    }

    #[test]
    fn test_configured_priority_breaks_ties() {
        let mut priorities = HashMap::new();
        priorities.insert(BackendId::new("b"), 0);
        priorities.insert(BackendId::new("a"), 5);
        let policy = MergePolicy { priorities, min_score: 0.0 };
        let merged = policy.merge(
            vec![
                hit("a", "x", "First", 3, 0.5, SourceKind::Synced),
                hit("b", "y", "Second", 3, 0.5, SourceKind::Synced),
            ],
            10,
        );
        assert_eq!(merged[0].backend, BackendId::new("b"));
    }

    #[test]
    fn test_min_score_and_top_k() {
        let policy = MergePolicy {
            priorities: HashMap::new(),
            min_score: 0.3,
        };
        let hits = (1..=5)
            .map(|i| hit("index", &i.to_string(), &format!("doc {}", i), i, 0.1 * i as f32, SourceKind::Synced))
            .collect();
        let merged = policy.merge(hits, 2);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().all(|h| h.score >= 0.3));
        assert_eq!(merged[0].document.id.id, "5");
    }
}
