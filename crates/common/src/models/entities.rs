use super::citation::Location;
use super::document::{DocumentId, Version};
use crate::text::normalize_phrase;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an extracted item was found
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub document: DocumentId,
    pub version: Version,
    /// Byte range in the raw document content
    pub start: usize,
    pub end: usize,
    /// 1-based page, when the text carries page breaks
    pub page: Option<u32>,
}

impl Provenance {
    pub fn location(&self) -> Location {
        Location {
            start: self.start,
            end: self.end,
            page: self.page,
        }
    }
}

/// An extracted value with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extracted<T> {
    pub value: T,
    pub provenance: Provenance,
}

/// A party together with the role it plays
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartyRole {
    pub name: String,
    pub role: String,
}

/// A concern type found in a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcernTag {
    pub tag: String,
    /// False for clearance phrases such as "none noted"
    pub adverse: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRating {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskRating {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "low" => Some(RiskRating::Low),
            "medium" | "moderate" => Some(RiskRating::Medium),
            "high" => Some(RiskRating::High),
            "critical" | "severe" => Some(RiskRating::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for RiskRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskRating::Low => "low",
            RiskRating::Medium => "medium",
            RiskRating::High => "high",
            RiskRating::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Deterministic,
    Model,
    /// Deterministic results enhanced by the model
    Combined,
}

/// Entities derived from one document; never authoritative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    pub document: DocumentId,
    pub version: Version,
    pub parties: Vec<Extracted<String>>,
    pub roles: Vec<Extracted<PartyRole>>,
    pub concerns: Vec<Extracted<ConcernTag>>,
    pub mitigating_factors: Vec<Extracted<String>>,
    pub document_type: Option<Extracted<String>>,
    pub risk_rating: Option<Extracted<RiskRating>>,
    pub method: ExtractionMethod,
}

impl ExtractedEntities {
    pub fn empty(document: DocumentId, version: Version) -> Self {
        Self {
            document,
            version,
            parties: Vec::new(),
            roles: Vec::new(),
            concerns: Vec::new(),
            mitigating_factors: Vec::new(),
            document_type: None,
            risk_rating: None,
            method: ExtractionMethod::Deterministic,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
            && self.roles.is_empty()
            && self.concerns.is_empty()
            && self.mitigating_factors.is_empty()
            && self.document_type.is_none()
            && self.risk_rating.is_none()
    }

    /// Does any extracted party name match `name` after normalization
    pub fn mentions_party(&self, name: &str) -> bool {
        let wanted = normalize_phrase(name);
        if wanted.is_empty() {
            return false;
        }
        self.parties.iter().any(|p| {
            let have = normalize_phrase(&p.value);
            have == wanted || have.contains(&wanted) || wanted.contains(&have)
        })
    }

    pub fn party_names(&self) -> Vec<String> {
        self.parties.iter().map(|p| p.value.clone()).collect()
    }

    /// Rewrite every provenance offset, e.g. from decoded text to raw bytes
    pub fn map_offsets(&mut self, map: impl Fn(usize) -> usize) {
        let provenances = self
            .parties
            .iter_mut()
            .map(|p| &mut p.provenance)
            .chain(self.roles.iter_mut().map(|r| &mut r.provenance))
            .chain(self.concerns.iter_mut().map(|c| &mut c.provenance))
            .chain(self.mitigating_factors.iter_mut().map(|m| &mut m.provenance))
            .chain(self.document_type.iter_mut().map(|d| &mut d.provenance))
            .chain(self.risk_rating.iter_mut().map(|r| &mut r.provenance));
        for provenance in provenances {
            provenance.start = map(provenance.start);
            provenance.end = map(provenance.end);
        }
    }

    pub fn adverse_concerns(&self) -> impl Iterator<Item = &Extracted<ConcernTag>> {
        self.concerns.iter().filter(|c| c.value.adverse)
    }
}
