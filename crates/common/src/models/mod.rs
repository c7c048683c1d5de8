//! Domain model shared by connectors, router and the answer pipeline
//!
//! Documents are snapshots of an external store; nothing here is
//! authoritative, every derived value points back to a document version.

mod answer;
mod citation;
mod document;
mod entities;
mod search;

pub use answer::{AnswerStatus, Coverage, FailedDocument, Finding, FindingKind, GroundingOutcome, SynthesizedAnswer};
pub use citation::{Citation, Location};
pub use document::{BackendId, Document, DocumentId, DocumentRef, SourceKind, Version};
pub use entities::{
    ConcernTag, Extracted, ExtractedEntities, ExtractionMethod, PartyRole, Provenance, RiskRating,
};
pub use search::{ExcludedBackend, SearchFilters, SearchHit, SearchQuery, SearchResult};
