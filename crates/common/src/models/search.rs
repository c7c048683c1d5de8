use super::document::{BackendId, DocumentRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Optional explicit filters accompanying a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Restrict to documents carrying any of these categories
    #[serde(default)]
    pub categories: Vec<String>,

    #[serde(default)]
    pub modified_after: Option<DateTime<Utc>>,

    #[serde(default)]
    pub modified_before: Option<DateTime<Utc>>,

    /// Restrict to these MIME types
    #[serde(default)]
    pub content_types: Vec<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
            && self.modified_after.is_none()
            && self.modified_before.is_none()
            && self.content_types.is_empty()
    }

    /// Date range or content type filtering requested
    pub fn has_metadata_filters(&self) -> bool {
        self.modified_after.is_some() || self.modified_before.is_some() || !self.content_types.is_empty()
    }

    /// Check a document against every filter
    pub fn matches(&self, document: &DocumentRef) -> bool {
        if let Some(after) = self.modified_after {
            if document.modified_at < after {
                return false;
            }
        }
        if let Some(before) = self.modified_before {
            if document.modified_at > before {
                return false;
            }
        }
        if !self.content_types.is_empty()
            && !self
                .content_types
                .iter()
                .any(|ct| ct.eq_ignore_ascii_case(&document.content_type))
        {
            return false;
        }
        if !self.categories.is_empty()
            && !self.categories.iter().any(|wanted| {
                document
                    .categories
                    .iter()
                    .any(|have| have.eq_ignore_ascii_case(wanted))
            })
        {
            return false;
        }
        true
    }
}

/// A search request to one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,

    #[serde(default)]
    pub filters: SearchFilters,

    pub limit: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            filters: SearchFilters::default(),
            limit,
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// One matched document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document: DocumentRef,

    /// Relevance score (0.0 - 1.0)
    pub score: f32,

    /// Matched snippet
    pub snippet: String,

    /// Backend of origin
    pub backend: BackendId,
}

/// A backend excluded from a merged result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedBackend {
    pub backend: BackendId,
    pub reason: String,
}

/// Search result from one backend, or merged across backends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Ordered hits
    pub hits: Vec<SearchHit>,

    /// Total matches before the limit was applied
    pub total_count: usize,

    /// Facet name -> value -> count
    #[serde(default)]
    pub facets: BTreeMap<String, BTreeMap<String, usize>>,

    /// Some backend did not contribute
    #[serde(default)]
    pub partial: bool,

    #[serde(default)]
    pub excluded_backends: Vec<ExcludedBackend>,

    /// User-visible notices (access denials, dropped filters)
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Add `count` to a facet bucket
    pub fn add_facet(&mut self, facet: &str, value: &str, count: usize) {
        *self
            .facets
            .entry(facet.to_string())
            .or_default()
            .entry(value.to_string())
            .or_default() += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentId, SourceKind, Version};
    use chrono::TimeZone;

    fn doc(modified: DateTime<Utc>, categories: &[&str]) -> DocumentRef {
        DocumentRef {
            id: DocumentId::new("index", "1"),
            name: "memo".to_string(),
            content_type: "text/plain".to_string(),
            version: Version(1),
            created_at: modified,
            modified_at: modified,
            source: SourceKind::Synced,
            categories: categories.iter().map(|c| c.to_string()).collect(),
            parties: vec![],
        }
    }

    #[test]
    fn test_date_range_filter() {
        let filters = SearchFilters {
            modified_after: Some(Utc.with_ymd_and_hms(2023, 7, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        assert!(filters.matches(&doc(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), &[])));
        assert!(!filters.matches(&doc(Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap(), &[])));
    }

    #[test]
    fn test_category_filter_is_case_insensitive() {
        let filters = SearchFilters {
            categories: vec!["IDD".to_string()],
            ..Default::default()
        };
        let now = Utc::now();
        assert!(filters.matches(&doc(now, &["idd", "legal"])));
        assert!(!filters.matches(&doc(now, &["legal"])));
    }

    #[test]
    fn test_facet_accumulation() {
        let mut result = SearchResult::default();
        result.add_facet("content_type", "text/plain", 2);
        result.add_facet("content_type", "text/plain", 1);
        assert_eq!(result.facets["content_type"]["text/plain"], 3);
    }
}
