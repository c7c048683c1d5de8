use super::citation::Citation;
use super::document::DocumentId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal status of a successful query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Answered,
    /// Some relevant documents or backends did not make it into the answer
    PartialAnswered,
}

/// How the grounding check went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingOutcome {
    /// First generation was fully grounded
    Grounded,
    /// Grounded after a stricter regeneration
    Regenerated,
    /// Ungrounded sentences were removed and the answer downgraded
    Downgraded,
    /// Fixed answer, no model output used (refusal, empty context)
    NotApplicable,
}

/// A relevant document that did not contribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedDocument {
    pub document: DocumentId,
    pub reason: String,
}

/// How much of the candidate set made it into the answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    /// Candidate documents after routing
    pub candidates: usize,

    /// Documents with at least one passage in the context
    pub used: usize,

    /// Relevant documents left out by the context budget
    pub excluded: Vec<DocumentId>,

    /// Documents whose content could not be fetched
    pub failed: Vec<FailedDocument>,
}

impl Coverage {
    pub fn is_complete(&self) -> bool {
        self.excluded.is_empty() && self.failed.is_empty()
    }

    /// `used / candidates`, 1.0 for an empty candidate set
    pub fn ratio(&self) -> f32 {
        if self.candidates == 0 {
            1.0
        } else {
            self.used as f32 / self.candidates as f32
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Party,
    Role,
    Concern,
    Clearance,
    MitigatingFactor,
    DocumentType,
    RiskRating,
}

/// A structured entity surfaced with the answer, tied to a citation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub value: String,
    pub document: DocumentId,
    /// Citation index into `SynthesizedAnswer::citations`
    pub citation: usize,
}

/// Answer returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedAnswer {
    pub query_id: Uuid,

    /// Generated answer text with `[n]` citation markers
    pub answer: String,

    /// Citations referenced by the answer, ordered by index
    pub citations: Vec<Citation>,

    /// Documents that contributed cited passages, in citation order
    pub contributing_documents: Vec<DocumentId>,

    /// Entities relevant to the question, each with a citation
    #[serde(default)]
    pub findings: Vec<Finding>,

    pub coverage: Coverage,

    pub status: AnswerStatus,

    pub grounding: GroundingOutcome,

    /// Detected query type
    pub query_type: String,

    /// User-visible notices (partial results, access denials)
    #[serde(default)]
    pub warnings: Vec<String>,
}
