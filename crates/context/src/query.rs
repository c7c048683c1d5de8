//! Query Parser - classifies a question and finds who it is about
//!
//! Classification is a keyword heuristic evaluated in a fixed order; the
//! first rule that matches wins. The subject is the party the question
//! targets and drives both retrieval and passage grouping.

use integrity_common::text::terms;
use serde::{Deserialize, Serialize};

/// Question types, one prompt template each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Who is this party, what do we hold on them
    PartyLookup,
    /// Has the party been assessed or screened before
    PriorAssessment,
    ConcernExtraction,
    RiskRating,
    RoleIdentification,
    MitigatingFactors,
    DocumentTypeLookup,
    CrossDocumentSearch,
    Timeline,
    General,
}

impl QueryType {
    pub const ALL: [QueryType; 10] = [
        QueryType::PartyLookup,
        QueryType::PriorAssessment,
        QueryType::ConcernExtraction,
        QueryType::RiskRating,
        QueryType::RoleIdentification,
        QueryType::MitigatingFactors,
        QueryType::DocumentTypeLookup,
        QueryType::CrossDocumentSearch,
        QueryType::Timeline,
        QueryType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::PartyLookup => "party_lookup",
            QueryType::PriorAssessment => "prior_assessment",
            QueryType::ConcernExtraction => "concern_extraction",
            QueryType::RiskRating => "risk_rating",
            QueryType::RoleIdentification => "role_identification",
            QueryType::MitigatingFactors => "mitigating_factors",
            QueryType::DocumentTypeLookup => "document_type_lookup",
            QueryType::CrossDocumentSearch => "cross_document_search",
            QueryType::Timeline => "timeline",
            QueryType::General => "general",
        }
    }

    /// Heuristic classification of a question
    pub fn detect(question: &str) -> Self {
        let q = question.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| q.contains(n));

        if has(&["timeline", "chronolog", "history of", "over time", "when was", "when were", "sequence of events"]) {
            QueryType::Timeline
        } else if has(&["risk rating", "risk level", "risk score", "how risky", "rated as", "risk classification"]) {
            QueryType::RiskRating
        } else if has(&["mitigat", "remediat", "offset", "compensating control"]) {
            QueryType::MitigatingFactors
        } else if has(&["concern", "red flag", "adverse", "allegation", "issues", "findings"]) {
            QueryType::ConcernExtraction
        } else if has(&["role", "acting as", "capacity", "beneficial owner", "director of", "relationship to"]) {
            QueryType::RoleIdentification
        } else if has(&["type of document", "kind of document", "document type", "what document is", "what documents are"]) {
            QueryType::DocumentTypeLookup
        } else if has(&["other documents", "across", "which documents mention", "all documents", "any documents"]) {
            QueryType::CrossDocumentSearch
        } else if has(&["previously", "prior", "assessed", "screened", "before", "past assessment", "due diligence on"]) {
            QueryType::PriorAssessment
        } else if has(&["who is", "who are", "what do we know", "tell me about", "information on", "details on", "profile of"]) {
            QueryType::PartyLookup
        } else {
            QueryType::General
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A question after parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuery {
    pub original: String,
    pub query_type: QueryType,
    /// Target party, when one could be found
    pub subject: Option<String>,
    /// Content terms of the question
    pub terms: Vec<String>,
    /// Text sent to the search backends
    pub search_text: String,
}

impl ParsedQuery {
    pub fn parse(question: &str) -> Self {
        let original = question.trim().to_string();
        let query_type = QueryType::detect(&original);
        let subject = extract_subject(&original, DEFAULT_SUFFIXES);
        let search_text = subject.clone().unwrap_or_else(|| original.clone());

        Self {
            terms: terms(&original),
            original,
            query_type,
            subject,
            search_text,
        }
    }

    /// Parse with a configured list of company suffixes
    pub fn parse_with_suffixes(question: &str, suffixes: &[String]) -> Self {
        let suffixes: Vec<&str> = suffixes.iter().map(String::as_str).collect();
        let mut parsed = Self::parse(question);
        parsed.subject = extract_subject(&parsed.original, &suffixes);
        parsed.search_text = parsed.subject.clone().unwrap_or_else(|| parsed.original.clone());
        parsed
    }
}

const DEFAULT_SUFFIXES: &[&str] = &[
    "Corp", "Corporation", "Inc", "Ltd", "LLC", "GmbH", "AG", "SA", "PLC", "Limited", "Holdings",
];

const QUESTION_WORDS: &[&str] = &[
    "has", "have", "had", "did", "does", "do", "is", "are", "was", "were", "what", "which", "who",
    "whom", "whose", "when", "where", "why", "how", "can", "could", "should", "would", "will",
    "tell", "show", "list", "give", "find", "please", "i", "we", "our", "any", "the", "a", "an",
    "in", "and", "or", "of", "for",
];

/// Find the target party in a question
///
/// In priority order: a quoted phrase, a capitalized run ending in a company
/// suffix, the last capitalized run that is not a question word.
pub fn extract_subject(question: &str, suffixes: &[&str]) -> Option<String> {
    if let Some(quoted) = quoted_phrase(question) {
        return Some(quoted);
    }

    let runs = capitalized_runs(question);

    let with_suffix = runs.iter().find(|run| {
        run.len() > 1
            && run
                .last()
                .map(|last| suffixes.iter().any(|s| s.eq_ignore_ascii_case(last)))
                .unwrap_or(false)
    });
    if let Some(run) = with_suffix {
        return Some(run.join(" "));
    }

    runs.iter()
        .rev()
        .map(|run| {
            run.iter()
                .copied()
                .skip_while(|w| QUESTION_WORDS.contains(&w.to_lowercase().as_str()))
                .collect::<Vec<_>>()
        })
        .find(|run| !run.is_empty())
        .map(|run| run.join(" "))
}

fn quoted_phrase(text: &str) -> Option<String> {
    for (open, close) in [('"', '"'), ('\u{201C}', '\u{201D}'), ('\'', '\'')] {
        if let Some(start) = text.find(open) {
            let rest = &text[start + open.len_utf8()..];
            if let Some(end) = rest.find(close) {
                let phrase = rest[..end].trim();
                // apostrophes inside words are not quotes
                if open == '\'' && start > 0 && text[..start].ends_with(|c: char| c.is_alphanumeric()) {
                    continue;
                }
                if !phrase.is_empty() {
                    return Some(phrase.to_string());
                }
            }
        }
    }
    None
}

/// Runs of consecutive capitalized words; punctuation ends a run
fn capitalized_runs(text: &str) -> Vec<Vec<&str>> {
    let mut runs: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for raw in text.split_whitespace() {
        let word = raw.trim_start_matches(|c: char| !c.is_alphanumeric());
        let trimmed = word.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '&');
        let trimmed = trimmed.strip_suffix("'s").unwrap_or(trimmed);
        let ends_run = trimmed.len() < word.len() && !word.ends_with("'s");

        let capitalized = trimmed.chars().next().map(|c| c.is_uppercase()).unwrap_or(false);
        if capitalized || (trimmed == "&" && !current.is_empty()) {
            current.push(trimmed);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }

        if ends_run && !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }

    for run in &mut runs {
        while run.last() == Some(&"&") {
            run.pop();
        }
    }
    runs.retain(|run| !run.is_empty());
    runs
}
