use crate::text::{decode_lossy, DecodedText};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Identifier of a configured backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(String);

impl BackendId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend-scoped document identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId {
    pub backend: BackendId,
    pub id: String,
}

impl DocumentId {
    pub fn new(backend: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            backend: BackendId::new(backend),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend, self.id)
    }
}

/// Version number of a document; monotonically non-decreasing per id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u32);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Where a document copy comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Live content-management API
    RealTime,
    /// Pre-synced search index copy
    Synced,
}

impl SourceKind {
    /// Lower ranks first: the live source beats a synced copy
    pub fn priority_rank(&self) -> u8 {
        match self {
            SourceKind::RealTime => 0,
            SourceKind::Synced => 1,
        }
    }
}

/// Document metadata as reported by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: DocumentId,

    /// Display name
    pub name: String,

    /// MIME type
    pub content_type: String,

    pub version: Version,

    pub created_at: DateTime<Utc>,

    pub modified_at: DateTime<Utc>,

    pub source: SourceKind,

    /// Category labels, when the backend has them
    #[serde(default)]
    pub categories: Vec<String>,

    /// Party names known from metadata (used for cross-backend dedup)
    #[serde(default)]
    pub parties: Vec<String>,
}

/// A fetched document snapshot for one version
///
/// Content is loaded lazily; once set it is never mutated. A new version is
/// a new `Document`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub meta: DocumentRef,

    #[serde(skip)]
    content: Option<Arc<[u8]>>,
}

impl Document {
    /// Metadata only, content not yet fetched
    pub fn new(meta: DocumentRef) -> Self {
        Self { meta, content: None }
    }

    pub fn with_content(meta: DocumentRef, content: impl Into<Arc<[u8]>>) -> Self {
        Self {
            meta,
            content: Some(content.into()),
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.meta.id
    }

    pub fn is_loaded(&self) -> bool {
        self.content.is_some()
    }

    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    /// Content decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> Cow<'_, str> {
        match &self.content {
            Some(bytes) => String::from_utf8_lossy(bytes),
            None => Cow::Borrowed(""),
        }
    }

    /// Decoded content that can map offsets back to raw bytes
    pub fn decoded(&self) -> DecodedText<'_> {
        decode_lossy(self.content().unwrap_or_default())
    }

    /// SHA-256 of the content, hex encoded
    pub fn content_digest(&self) -> Option<String> {
        self.content.as_ref().map(|bytes| {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            hex::encode(hasher.finalize())
        })
    }
}
