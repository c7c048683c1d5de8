//! Entity/Metadata Enricher
//!
//! Deterministic extraction runs first against the configured vocabulary.
//! When it finds neither parties nor concerns, the language model is asked
//! for a JSON extraction; every model value must be found verbatim in the
//! text or it is discarded. Output is a sorted set, so enriching the same
//! text twice gives the same entities.

use integrity_common::config::{EnrichmentConfig, Vocabulary};
use integrity_common::errors::{AppError, Result};
use integrity_common::llm::{LanguageModel, Prompt, PromptTask};
use integrity_common::metrics;
use integrity_common::models::{
    ConcernTag, Document, DocumentId, Extracted, ExtractedEntities, ExtractionMethod, PartyRole, Provenance,
    RiskRating, Version,
};
use integrity_common::text::{find_word_ci, is_stop_word, normalize_phrase, page_at, split_sentences, truncate_chars};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

const RISK_LABELS: &[&str] = &["risk rating", "risk level", "risk classification", "overall risk"];
const RISK_LEVELS: &[&str] = &["low", "medium", "moderate", "high", "critical", "severe"];
const MAX_NAME_WORDS: usize = 5;
const MAX_NAME_CHARS: usize = 80;
const MODEL_TEXT_CHARS: usize = 6_000;

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract structured entities from integrity due-diligence documents. \
Reply with a single JSON object with the keys parties (list of names), roles (list of objects with name and role), \
concerns (list), mitigating_factors (list), document_type (string or null) and risk_rating (string or null). \
Copy every value verbatim from the document. Use empty lists or null when nothing applies.";

/// Document text plus the identity every provenance points at
struct Scope<'a> {
    document: &'a DocumentId,
    version: Version,
    text: &'a str,
}

impl Scope<'_> {
    fn provenance(&self, start: usize, end: usize) -> Provenance {
        Provenance {
            document: self.document.clone(),
            version: self.version,
            start,
            end,
            page: page_at(self.text, start),
        }
    }

    fn extracted<T>(&self, value: T, start: usize, end: usize) -> Extracted<T> {
        Extracted {
            value,
            provenance: self.provenance(start, end),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ModelEntities {
    #[serde(default)]
    parties: Vec<String>,
    #[serde(default)]
    roles: Vec<ModelRole>,
    #[serde(default)]
    concerns: Vec<String>,
    #[serde(default)]
    mitigating_factors: Vec<String>,
    #[serde(default)]
    document_type: Option<String>,
    #[serde(default)]
    risk_rating: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelRole {
    name: String,
    role: String,
}

/// Extracts parties, roles, concerns and the rest from document text
pub struct Enricher {
    vocabulary: Vocabulary,
    model: Option<Arc<dyn LanguageModel>>,
}

impl Enricher {
    pub fn new(config: &EnrichmentConfig, model: Option<Arc<dyn LanguageModel>>) -> Self {
        Self {
            vocabulary: config.vocabulary.clone(),
            model: model.filter(|_| config.use_model_fallback),
        }
    }

    /// Patterns only, never calls a model
    pub fn deterministic(vocabulary: Vocabulary) -> Self {
        Self { vocabulary, model: None }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Enrich a fetched document
    ///
    /// Never fails: a model error leaves the deterministic result in place.
    pub async fn enrich(&self, document: &Document) -> ExtractedEntities {
        let decoded = document.decoded();
        let text = decoded.as_str();
        let mut entities = self.extract(document.id(), document.meta.version, text);

        let needs_fallback = entities.parties.is_empty() && entities.concerns.is_empty();
        if let (true, Some(model)) = (needs_fallback, &self.model) {
            let scope = Scope {
                document: document.id(),
                version: document.meta.version,
                text,
            };
            match self.model_extract(model.as_ref(), &document.meta.name, &scope).await {
                Ok(proposed) => self.merge_model(&scope, &mut entities, proposed),
                Err(e) => warn!(document = %document.id(), error = %e, "Model extraction failed, keeping pattern results"),
            }
        }

        if !decoded.is_exact() {
            entities.map_offsets(|offset| decoded.raw_offset(offset));
        }

        debug!(
            document = %document.id(),
            parties = entities.parties.len(),
            concerns = entities.concerns.len(),
            method = ?entities.method,
            "Document enriched"
        );
        entities
    }

    /// Deterministic extraction over decoded text; offsets index `text`
    pub fn extract(&self, document: &DocumentId, version: Version, text: &str) -> ExtractedEntities {
        let scope = Scope { document, version, text };
        let mut entities = ExtractedEntities::empty(document.clone(), version);

        let (role_parties, roles) = self.roles(&scope);
        entities.parties = self.company_names(&scope);
        entities.parties.extend(role_parties);
        entities.roles = roles;
        entities.concerns = self.concerns(&scope);
        entities.mitigating_factors = self.mitigating_factors(&scope);
        entities.document_type = self.document_type(&scope);
        entities.risk_rating = risk_rating(&scope);

        normalize(&mut entities);
        entities
    }

    fn company_names(&self, scope: &Scope<'_>) -> Vec<Extracted<String>> {
        let mut found = Vec::new();
        for suffix in &self.vocabulary.company_suffixes {
            for (start, end) in find_word_ci(scope.text, suffix) {
                if !scope.text[start..end].starts_with(char::is_uppercase) {
                    continue;
                }
                let name_start = capitalized_run_start(scope.text, start, MAX_NAME_WORDS - 1);
                if name_start == start {
                    continue;
                }
                found.push(scope.extracted(scope.text[name_start..end].to_string(), name_start, end));
            }
        }
        found
    }

    /// "Role: Name" and "Name (role)" patterns
    fn roles(&self, scope: &Scope<'_>) -> (Vec<Extracted<String>>, Vec<Extracted<PartyRole>>) {
        let text = scope.text;
        let mut parties = Vec::new();
        let mut roles = Vec::new();

        for role in &self.vocabulary.roles {
            let canonical = role.to_lowercase();
            for (start, end) in find_word_ci(text, role) {
                let span = labelled_name(text, end).or_else(|| parenthesized_name(text, start, end));
                let Some((name_start, name_end)) = span else {
                    continue;
                };
                let name = text[name_start..name_end].to_string();
                roles.push(scope.extracted(
                    PartyRole {
                        name: name.clone(),
                        role: canonical.clone(),
                    },
                    name_start,
                    name_end,
                ));
                parties.push(scope.extracted(name, name_start, name_end));
            }
        }
        (parties, roles)
    }

    fn concerns(&self, scope: &Scope<'_>) -> Vec<Extracted<ConcernTag>> {
        let adverse = self.vocabulary.concerns.iter().map(|c| (c, true));
        let clear = self.vocabulary.clearances.iter().map(|c| (c, false));

        adverse
            .chain(clear)
            .filter_map(|(phrase, adverse)| {
                find_word_ci(scope.text, phrase).first().map(|&(start, end)| {
                    scope.extracted(
                        ConcernTag {
                            tag: phrase.to_lowercase(),
                            adverse,
                        },
                        start,
                        end,
                    )
                })
            })
            .collect()
    }

    /// The whole sentence carrying a mitigation cue
    fn mitigating_factors(&self, scope: &Scope<'_>) -> Vec<Extracted<String>> {
        let sentences = split_sentences(scope.text);
        let mut found = Vec::new();
        for cue in &self.vocabulary.mitigating_cues {
            for (cue_start, _) in find_word_ci(scope.text, cue) {
                if let Some(&(start, end)) = sentences.iter().find(|(s, e)| *s <= cue_start && cue_start < *e) {
                    found.push(scope.extracted(scope.text[start..end].to_string(), start, end));
                }
            }
        }
        found
    }

    /// Earliest document type label, longest on ties
    fn document_type(&self, scope: &Scope<'_>) -> Option<Extracted<String>> {
        self.vocabulary
            .document_types
            .iter()
            .filter_map(|label| find_word_ci(scope.text, label).first().map(|&(s, e)| (s, e, label)))
            .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
            .map(|(start, end, label)| scope.extracted(label.to_lowercase(), start, end))
    }

    async fn model_extract(
        &self,
        model: &dyn LanguageModel,
        title: &str,
        scope: &Scope<'_>,
    ) -> Result<ModelEntities> {
        let body = truncate_chars(scope.text, MODEL_TEXT_CHARS);
        let prompt = Prompt {
            task: PromptTask::ExtractEntities,
            system: EXTRACTION_SYSTEM_PROMPT.to_string(),
            user: format!("Document: {}\n\n{}", title, body),
            question: String::new(),
            passages: Vec::new(),
            hints: Vec::new(),
            max_tokens: 800,
            temperature: 0.0,
        };

        let completion = match model.complete(&prompt).await {
            Ok(completion) => completion,
            Err(e) => {
                metrics::record_generation("extraction", model.model_name(), 0, false);
                return Err(e);
            }
        };
        metrics::record_generation(
            "extraction",
            model.model_name(),
            completion.usage.total_tokens as u64,
            true,
        );

        parse_model_json(&completion.text)
    }

    /// Keep only model values that occur verbatim in the text
    fn merge_model(&self, scope: &Scope<'_>, entities: &mut ExtractedEntities, proposed: ModelEntities) {
        let was_empty = entities.is_empty();
        let before = count(entities);
        let clearances: HashSet<String> = self.vocabulary.clearances.iter().map(|c| normalize_phrase(c)).collect();

        for party in proposed.parties {
            if let Some((s, e)) = locate(scope.text, &party) {
                entities.parties.push(scope.extracted(scope.text[s..e].to_string(), s, e));
            }
        }
        for role in proposed.roles {
            if let Some((s, e)) = locate(scope.text, &role.name) {
                let name = scope.text[s..e].to_string();
                entities.parties.push(scope.extracted(name.clone(), s, e));
                entities.roles.push(scope.extracted(
                    PartyRole {
                        name,
                        role: role.role.trim().to_lowercase(),
                    },
                    s,
                    e,
                ));
            }
        }
        for concern in proposed.concerns {
            if let Some((s, e)) = locate(scope.text, &concern) {
                let tag = normalize_phrase(&concern);
                let adverse = !clearances.contains(&tag);
                entities.concerns.push(scope.extracted(ConcernTag { tag, adverse }, s, e));
            }
        }
        for factor in proposed.mitigating_factors {
            if let Some((s, e)) = locate(scope.text, &factor) {
                entities.mitigating_factors.push(scope.extracted(scope.text[s..e].to_string(), s, e));
            }
        }
        if entities.document_type.is_none() {
            entities.document_type = proposed
                .document_type
                .as_deref()
                .and_then(|label| locate(scope.text, label).map(|(s, e)| scope.extracted(label.trim().to_lowercase(), s, e)));
        }
        if entities.risk_rating.is_none() {
            entities.risk_rating = proposed.risk_rating.as_deref().and_then(|label| {
                let rating = RiskRating::parse(label)?;
                locate(scope.text, label).map(|(s, e)| scope.extracted(rating, s, e))
            });
        }

        normalize(entities);
        if count(entities) > before {
            entities.method = if was_empty {
                ExtractionMethod::Model
            } else {
                ExtractionMethod::Combined
            };
        }
    }
}

fn count(entities: &ExtractedEntities) -> usize {
    entities.parties.len()
        + entities.roles.len()
        + entities.concerns.len()
        + entities.mitigating_factors.len()
        + usize::from(entities.document_type.is_some())
        + usize::from(entities.risk_rating.is_some())
}

/// Sort by position and drop repeats of the same normalized value
fn normalize(entities: &mut ExtractedEntities) {
    dedup_sorted(&mut entities.parties, |p| normalize_phrase(p));
    dedup_sorted(&mut entities.roles, |r| format!("{}|{}", normalize_phrase(&r.name), r.role));
    dedup_sorted(&mut entities.concerns, |c| normalize_phrase(&c.tag));
    dedup_sorted(&mut entities.mitigating_factors, |m| normalize_phrase(m));
}

fn dedup_sorted<T>(items: &mut Vec<Extracted<T>>, key: impl Fn(&T) -> String) {
    items.sort_by(|a, b| {
        a.provenance
            .start
            .cmp(&b.provenance.start)
            .then(a.provenance.end.cmp(&b.provenance.end))
            .then_with(|| key(&a.value).cmp(&key(&b.value)))
    });
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(key(&item.value)));
}

/// Start of the run of capitalized words ending right before `end`
fn capitalized_run_start(text: &str, end: usize, max_words: usize) -> usize {
    let mut start = end;
    for _ in 0..max_words {
        let before = &text[..start];
        let trimmed = before.trim_end_matches(' ');
        if trimmed.len() == before.len() {
            break;
        }
        let word_start = trimmed
            .char_indices()
            .rev()
            .find(|(_, c)| !(c.is_alphanumeric() || *c == '&' || *c == '-'))
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        let word = &trimmed[word_start..];
        let capitalized = word.starts_with(char::is_uppercase) || word == "&";
        if word.is_empty() || !capitalized || is_stop_word(&word.to_lowercase()) {
            break;
        }
        start = word_start;
    }
    start
}

/// "director: Jane Smith" - the name after the colon
fn labelled_name(text: &str, role_end: usize) -> Option<(usize, usize)> {
    let rest = &text[role_end..];
    let after_spaces = rest.trim_start_matches(' ');
    let after_colon = after_spaces.strip_prefix(':')?;
    let name_part = after_colon.trim_start_matches(' ');
    let start = text.len() - name_part.len();

    let stop = name_part
        .find(|c: char| matches!(c, '\n' | '\r' | ';' | ',' | '(' | '.') || c == integrity_common::text::PAGE_BREAK)
        .unwrap_or(name_part.len());
    let name = name_part[..stop].trim_end();
    if name.is_empty() || name.len() > MAX_NAME_CHARS || !name.starts_with(char::is_uppercase) {
        return None;
    }
    Some((start, start + name.len()))
}

/// "Jane Smith (director)" - the capitalized run before the parenthesis
fn parenthesized_name(text: &str, role_start: usize, role_end: usize) -> Option<(usize, usize)> {
    if !text[role_end..].starts_with(')') {
        return None;
    }
    let before = text[..role_start].strip_suffix('(')?;
    let name_end = before.trim_end_matches(' ').len();
    let start = capitalized_run_start(text, before.len(), MAX_NAME_WORDS);
    (start < name_end).then_some((start, name_end))
}

fn risk_rating(scope: &Scope<'_>) -> Option<Extracted<RiskRating>> {
    let text = scope.text;
    let labelled = RISK_LABELS
        .iter()
        .flat_map(|label| find_word_ci(text, label))
        .filter_map(|(start, end)| {
            let rest = &text[end..];
            let rest = rest.trim_start_matches(|c: char| c == ' ' || c == ':' || c == '-' || c == '\t');
            let rest = ["is ", "of ", "was "]
                .iter()
                .find_map(|p| {
                    rest.get(..p.len())
                        .filter(|head| head.eq_ignore_ascii_case(p))
                        .map(|_| &rest[p.len()..])
                })
                .unwrap_or(rest)
                .trim_start();
            let word_len = rest.find(|c: char| !c.is_alphabetic()).unwrap_or(rest.len());
            let rating = RiskRating::parse(&rest[..word_len])?;
            let word_end = text.len() - rest.len() + word_len;
            Some((start, word_end, rating))
        })
        .min_by_key(|(start, _, _)| *start);

    let found = labelled.or_else(|| {
        RISK_LEVELS
            .iter()
            .filter_map(|level| {
                let rating = RiskRating::parse(level)?;
                find_word_ci(text, &format!("{} risk", level))
                    .first()
                    .map(|&(s, e)| (s, e, rating))
            })
            .min_by_key(|(start, _, _)| *start)
    });

    found.map(|(start, end, rating)| scope.extracted(rating, start, end))
}

/// Case-insensitive verbatim location of a model-proposed value
fn locate(text: &str, value: &str) -> Option<(usize, usize)> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    find_word_ci(text, value).first().copied()
}

/// The JSON object in a model reply, tolerating code fences and chatter
fn parse_model_json(reply: &str) -> Result<ModelEntities> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if s < e => Ok(serde_json::from_str(&reply[s..=e])?),
        _ if reply.trim().is_empty() => Ok(ModelEntities::default()),
        _ => Err(AppError::InvalidFormat {
            message: "model extraction did not return a JSON object".to_string(),
        }),
    }
}
