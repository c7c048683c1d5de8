//! Source connector contract
//!
//! Every document backend implements [`SourceConnector`]. Backends differ in
//! what they can do, so each one advertises a [`Capabilities`] set and the
//! optional operations return [`AppError::Unsupported`] unless overridden.
//! Callers consult the set before use and degrade instead of failing.

use crate::errors::{AppError, Result};
use crate::models::{BackendId, Document, DocumentId, DocumentRef, SearchQuery, SearchResult, SourceKind, Version};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Optional backend capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    FullTextSearch,
    MetadataFilter,
    CategoryLookup,
    VersionListing,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::FullTextSearch,
        Capability::MetadataFilter,
        Capability::CategoryLookup,
        Capability::VersionListing,
    ];

    fn bit(self) -> u8 {
        match self {
            Capability::FullTextSearch => 1,
            Capability::MetadataFilter => 1 << 1,
            Capability::CategoryLookup => 1 << 2,
            Capability::VersionListing => 1 << 3,
        }
    }
}

/// Set of capabilities a backend implements
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
    pub fn none() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Capability::ALL.iter().fold(Self::none(), |set, cap| set.with(*cap))
    }

    pub fn of(caps: &[Capability]) -> Self {
        caps.iter().fold(Self::none(), |set, cap| set.with(*cap))
    }

    #[must_use]
    pub fn with(self, cap: Capability) -> Self {
        Self(self.0 | cap.bit())
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|cap| self.contains(*cap))
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// One entry of a version listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: Version,
    pub modified_at: DateTime<Utc>,
}

/// Uniform interface over heterogeneous document backends
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Backend identifier; scopes every document id it returns
    fn id(&self) -> &BackendId;

    /// Real-time source or synced copy
    fn source_kind(&self) -> SourceKind;

    fn capabilities(&self) -> Capabilities;

    /// Search documents
    async fn search(&self, query: &SearchQuery) -> Result<SearchResult>;

    /// Byte content of a document; latest version unless pinned
    async fn fetch_content(&self, id: &DocumentId, version: Option<Version>) -> Result<Vec<u8>>;

    /// Metadata of the latest version
    async fn fetch_metadata(&self, id: &DocumentId) -> Result<DocumentRef>;

    /// All versions, oldest first (VersionListing)
    async fn list_versions(&self, _id: &DocumentId) -> Result<Vec<VersionInfo>> {
        Err(self.unsupported("version listing"))
    }

    /// Categories assigned to a document (CategoryLookup)
    async fn categories(&self, _id: &DocumentId) -> Result<Vec<String>> {
        Err(self.unsupported("category lookup"))
    }

    /// Cheap reachability check for readiness probes
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn unsupported(&self, operation: &str) -> AppError {
        AppError::Unsupported {
            backend: self.id().to_string(),
            operation: operation.to_string(),
        }
    }
}

/// Drop filters a backend cannot honor
///
/// Returns the adapted query plus one warning per dropped filter.
pub fn adapt_query(query: &SearchQuery, backend: &BackendId, caps: Capabilities) -> (SearchQuery, Vec<String>) {
    let mut adapted = query.clone();
    let mut warnings = Vec::new();

    if !adapted.filters.categories.is_empty() && !caps.contains(Capability::CategoryLookup) {
        warnings.push(format!(
            "category filter ignored for backend {} (no category lookup)",
            backend
        ));
        adapted.filters.categories.clear();
    }

    if adapted.filters.has_metadata_filters() && !caps.contains(Capability::MetadataFilter) {
        warnings.push(format!(
            "metadata filters ignored for backend {} (no metadata filtering)",
            backend
        ));
        adapted.filters.modified_after = None;
        adapted.filters.modified_before = None;
        adapted.filters.content_types.clear();
    }

    (adapted, warnings)
}

/// Metadata plus content for one document, honoring a version pin
pub async fn load_document(
    connector: &dyn SourceConnector,
    id: &DocumentId,
    version: Option<Version>,
) -> Result<Document> {
    let mut meta = connector.fetch_metadata(id).await?;
    if let Some(pinned) = version {
        if pinned > meta.version {
            return Err(AppError::not_found("document version", format!("{}@{}", id, pinned)));
        }
        meta.version = pinned;
    }
    let content = connector.fetch_content(id, Some(meta.version)).await?;
    Ok(Document::with_content(meta, content))
}
