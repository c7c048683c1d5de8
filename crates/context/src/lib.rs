//! Integrity Assistant context engine
//!
//! Turns a user question into a grounded, cited answer:
//! - [`query`]: question type detection and subject extraction
//! - [`guard`]: injection screening before anything leaves the gateway
//! - [`enricher`]: structured entities from document text
//! - [`synthesizer`]: budgeted, subject-first context assembly
//! - [`generator`]: prompted generation with a grounding check
//! - [`pipeline`]: the per-query state machine tying the stages together
//! - [`sync`]: keeps the search index fresh from the live backend

pub mod enricher;
pub mod generator;
pub mod guard;
pub mod pipeline;
pub mod query;
pub mod sync;
pub mod synthesizer;

pub use enricher::Enricher;
pub use generator::{AnswerGenerator, Generation};
pub use guard::InputGuard;
pub use pipeline::{QueryPipeline, QueryReport, QueryRequest, QueryState};
pub use query::{ParsedQuery, QueryType};
pub use sync::{IndexSyncer, SyncReport};
pub use synthesizer::{SynthesisContext, Synthesizer};
