//! Multi-Document Synthesizer
//!
//! Splits each candidate document into passages, groups documents by whether
//! they mention the question's subject, and fills the context budget
//! breadth-first so that every relevant document gets its best passage in
//! before any document gets a second one.

use crate::query::ParsedQuery;
use integrity_common::config::SynthesisConfig;
use integrity_common::models::{Coverage, Document, DocumentId, ExtractedEntities, Location, Version};
use integrity_common::text::{estimate_tokens, find_word_ci, page_at, split_sentences, terms, PAGE_BREAK};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

/// Per-passage allowance for the rendered header line
const PASSAGE_HEADER_TOKENS: usize = 8;

/// A fetched document with its search relevance and extracted entities
#[derive(Debug, Clone)]
pub struct Candidate {
    pub document: Document,
    pub relevance: f32,
    pub entities: ExtractedEntities,
}

/// A span of one document version
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub document: DocumentId,
    pub version: Version,
    pub title: String,
    pub modified_at: DateTime<Utc>,
    pub location: Location,
    pub text: String,
    pub score: f32,
}

impl Passage {
    /// Tokens this passage costs in the rendered prompt
    pub fn cost(&self) -> usize {
        estimate_tokens(&self.text) + estimate_tokens(&self.title) + PASSAGE_HEADER_TOKENS
    }
}

/// A passage bound to its citation index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextPassage {
    pub index: usize,
    pub passage: Passage,
}

/// Everything the answer generator is allowed to see
#[derive(Debug, Clone, Default)]
pub struct SynthesisContext {
    /// Ordered by citation index, starting at 1
    pub passages: Vec<ContextPassage>,
    pub coverage: Coverage,
    pub subject: Option<String>,
    /// Documents mentioning the subject, in context order
    pub primary: Vec<DocumentId>,
    /// Entities for every candidate, in context order
    pub entities: Vec<ExtractedEntities>,
    pub used_tokens: usize,
    pub budget_tokens: usize,
}

impl SynthesisContext {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn passage(&self, index: usize) -> Option<&ContextPassage> {
        index
            .checked_sub(1)
            .and_then(|i| self.passages.get(i))
            .filter(|p| p.index == index)
            .or_else(|| self.passages.iter().find(|p| p.index == index))
    }

    pub fn entities_for(&self, document: &DocumentId) -> Option<&ExtractedEntities> {
        self.entities.iter().find(|e| &e.document == document)
    }
}

pub struct Synthesizer {
    config: SynthesisConfig,
}

impl Synthesizer {
    pub fn new(config: SynthesisConfig) -> Self {
        Self { config }
    }

    pub fn synthesize(&self, query: &ParsedQuery, candidates: Vec<Candidate>) -> SynthesisContext {
        let subject = query.subject.clone();
        let (mut primary, mut secondary): (Vec<Candidate>, Vec<Candidate>) = candidates
            .into_iter()
            .partition(|c| subject.as_deref().map(|s| mentions_subject(c, s)).unwrap_or(true));
        primary.sort_by(by_recency_then_relevance);
        secondary.sort_by(by_recency_then_relevance);

        let primary_ids: Vec<DocumentId> = if subject.is_some() {
            primary.iter().map(|c| c.document.id().clone()).collect()
        } else {
            Vec::new()
        };
        let ordered: Vec<Candidate> = primary.into_iter().chain(secondary).collect();

        let wanted: HashSet<String> = query.terms.iter().cloned().collect();
        let ranked: Vec<Vec<Passage>> = ordered
            .iter()
            .map(|c| self.rank_passages(c, &wanted, subject.as_deref()))
            .collect();

        let budget = self.config.context_budget_tokens;
        let (selected, used_tokens) = fill_breadth_first(&ranked, budget, self.config.max_passages_per_document);

        let mut selected = selected;
        selected.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.location.start.cmp(&b.1.location.start)));

        let used_docs: HashSet<usize> = selected.iter().map(|(doc, _)| *doc).collect();
        let excluded: Vec<DocumentId> = ordered
            .iter()
            .enumerate()
            .filter(|(i, _)| !used_docs.contains(i))
            .map(|(_, c)| c.document.id().clone())
            .collect();

        let coverage = Coverage {
            candidates: ordered.len(),
            used: used_docs.len(),
            excluded,
            failed: Vec::new(),
        };

        debug!(
            candidates = coverage.candidates,
            used = coverage.used,
            passages = selected.len(),
            used_tokens,
            budget,
            "Context synthesized"
        );

        SynthesisContext {
            passages: selected
                .into_iter()
                .enumerate()
                .map(|(i, (_, passage))| ContextPassage { index: i + 1, passage })
                .collect(),
            coverage,
            subject,
            primary: primary_ids,
            entities: ordered.into_iter().map(|c| c.entities).collect(),
            used_tokens,
            budget_tokens: budget,
        }
    }

    /// Passages of one document, best first
    fn rank_passages(&self, candidate: &Candidate, wanted: &HashSet<String>, subject: Option<&str>) -> Vec<Passage> {
        let decoded = candidate.document.decoded();
        let text = decoded.as_str();
        let meta = &candidate.document.meta;
        let entity_starts = entity_offsets(&candidate.entities);

        let mut passages: Vec<Passage> = split_passages(text, self.config.passage_max_chars)
            .into_iter()
            .map(|(start, end)| {
                let body = &text[start..end];
                let mut score = if wanted.is_empty() {
                    0.0
                } else {
                    let found: HashSet<String> = terms(body).into_iter().filter(|t| wanted.contains(t)).collect();
                    found.len() as f32 / wanted.len() as f32
                };
                if subject.map(|s| !find_word_ci(body, s).is_empty()).unwrap_or(false) {
                    score += 1.0;
                }
                let location = Location {
                    start: decoded.raw_offset(start),
                    end: decoded.raw_offset(end),
                    page: page_at(text, start),
                };
                if entity_starts.iter().any(|&offset| offset >= location.start && offset < location.end) {
                    score += 0.5;
                }
                Passage {
                    document: meta.id.clone(),
                    version: meta.version,
                    title: meta.name.clone(),
                    modified_at: meta.modified_at,
                    location,
                    text: body.to_string(),
                    score,
                }
            })
            .collect();

        passages.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.location.start.cmp(&b.location.start))
        });
        passages
    }
}

/// Round-robin over documents: round k offers every document its k-th best
/// passage. A passage that does not fit is skipped; a smaller one later may
/// still fit.
pub fn fill_breadth_first(ranked: &[Vec<Passage>], budget: usize, max_per_document: usize) -> (Vec<(usize, Passage)>, usize) {
    let rounds = ranked.iter().map(Vec::len).max().unwrap_or(0).min(max_per_document.max(1));
    let mut remaining = budget;
    let mut selected = Vec::new();

    for round in 0..rounds {
        for (doc, passages) in ranked.iter().enumerate() {
            if let Some(passage) = passages.get(round) {
                let cost = passage.cost();
                if cost <= remaining {
                    remaining -= cost;
                    selected.push((doc, passage.clone()));
                }
            }
        }
    }
    (selected, budget - remaining)
}

fn mentions_subject(candidate: &Candidate, subject: &str) -> bool {
    candidate.entities.mentions_party(subject)
        || !find_word_ci(&candidate.document.text(), subject).is_empty()
        || candidate
            .document
            .meta
            .parties
            .iter()
            .any(|p| p.eq_ignore_ascii_case(subject))
}

fn by_recency_then_relevance(a: &Candidate, b: &Candidate) -> Ordering {
    b.document
        .meta
        .modified_at
        .cmp(&a.document.meta.modified_at)
        .then(b.relevance.partial_cmp(&a.relevance).unwrap_or(Ordering::Equal))
        .then_with(|| a.document.id().cmp(b.document.id()))
}

fn entity_offsets(entities: &ExtractedEntities) -> Vec<usize> {
    entities
        .parties
        .iter()
        .map(|p| p.provenance.start)
        .chain(entities.concerns.iter().map(|c| c.provenance.start))
        .chain(entities.roles.iter().map(|r| r.provenance.start))
        .chain(entities.mitigating_factors.iter().map(|m| m.provenance.start))
        .chain(entities.risk_rating.iter().map(|r| r.provenance.start))
        .collect()
}

/// Paragraph byte ranges, each at most `max_chars` long where sentence
/// boundaries allow
pub fn split_passages(text: &str, max_chars: usize) -> Vec<(usize, usize)> {
    let max_chars = max_chars.max(1);
    let mut passages = Vec::new();
    for (start, end) in paragraphs(text) {
        if end - start <= max_chars {
            passages.push((start, end));
            continue;
        }
        let mut chunk: Option<(usize, usize)> = None;
        for (s, e) in split_sentences(&text[start..end]) {
            let (s, e) = (start + s, start + e);
            match chunk {
                Some((cs, _)) if e - cs <= max_chars => chunk = Some((cs, e)),
                Some(done) => {
                    passages.push(done);
                    chunk = Some((s, e));
                }
                None => chunk = Some((s, e)),
            }
            if let Some((cs, ce)) = chunk {
                if ce - cs > max_chars {
                    passages.extend(hard_split(text, cs, ce, max_chars));
                    chunk = None;
                }
            }
        }
        passages.extend(chunk);
    }
    passages
}

/// Blank lines and page breaks separate paragraphs
fn paragraphs(text: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut para_start: Option<usize> = None;
    let mut last_end = 0;
    let mut offset = 0;

    for segment in text.split_inclusive(['\n', PAGE_BREAK]) {
        let line = segment.trim_end_matches(['\n', '\r', PAGE_BREAK]);
        let blank = line.trim().is_empty();
        let line_start = offset;
        offset += segment.len();

        if !blank {
            if para_start.is_none() {
                para_start = Some(line_start + (line.len() - line.trim_start().len()));
            }
            last_end = line_start + line.trim_end().len();
        }
        let breaks = blank || segment.ends_with(PAGE_BREAK);
        if breaks {
            if let Some(start) = para_start.take() {
                out.push((start, last_end));
            }
        }
    }
    if let Some(start) = para_start {
        out.push((start, last_end));
    }
    out
}

fn hard_split(text: &str, start: usize, end: usize, max_chars: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let mut cut = (cursor + max_chars).min(end);
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == cursor {
            cut = cursor + text[cursor..].chars().next().map_or(end - cursor, char::len_utf8);
        }
        out.push((cursor, cut));
        cursor = cut;
    }
    out
}
