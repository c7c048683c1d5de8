//! Integrity Assistant Search Layer
//!
//! - Source connectors: real-time content server (REST) and the pre-synced
//!   in-process index
//! - Search router: concurrent fan-out, merge, dedup and recency-first ranking
//! - Content fetcher: bounded, memoized, version-pinned content loading

pub mod connectors;
pub mod fetch;
pub mod router;

pub use connectors::{BackendRegistry, ContentServerConnector, MockConnector, RegisteredBackend, SearchIndexConnector};
pub use fetch::{ContentFetcher, FetchOutcome, FetchSession};
pub use router::{MergePolicy, SearchRouter};
