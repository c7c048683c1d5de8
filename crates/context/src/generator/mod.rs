//! Answer Generator - prompted generation with a grounding check
//!
//! The model only sees the synthesized passages. Its answer is split into
//! sentences and every sentence must cite a supplied passage; an answer that
//! fails the check is regenerated once with a stricter prompt and then
//! downgraded. Ungrounded text is never returned.

pub mod grounding;
pub mod prompts;

use crate::guard::REFUSAL_MESSAGE;
use crate::query::ParsedQuery;
use crate::synthesizer::SynthesisContext;
use grounding::{CitationMarkers, GroundingReport};
use integrity_common::config::LlmConfig;
use integrity_common::errors::Result;
use integrity_common::llm::{Completion, LanguageModel, Prompt, TokenUsage};
use integrity_common::metrics;
use integrity_common::models::{Citation, DocumentId, Finding, FindingKind, GroundingOutcome};
use integrity_common::resilience::{retry_idempotent, RetryPolicy};
use integrity_common::text::{estimate_tokens, normalize_phrase, truncate_chars};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Downgraded answers start with this notice
pub const INSUFFICIENT_MESSAGE: &str =
    "There is insufficient grounded information in the available documents to answer this question fully.";

/// Fixed answer when the model has nothing to say about the question
pub const NOT_IN_KNOWLEDGE_BASE_MESSAGE: &str = "I'm sorry, this topic does not coincide with the information I have in the Knowledge base. Kindly refer to the FAQs or contact support for further assistance.";

const QUOTE_CHARS: usize = 240;

/// Generated answer with everything it cites
#[derive(Debug, Clone)]
pub struct Generation {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub contributing_documents: Vec<DocumentId>,
    pub findings: Vec<Finding>,
    pub grounding: GroundingOutcome,
    pub usage: TokenUsage,
    /// Model calls made, retries included
    pub model_calls: u32,
}

impl Generation {
    fn fixed(answer: &str, usage: TokenUsage, model_calls: u32) -> Self {
        Self {
            answer: answer.to_string(),
            citations: Vec::new(),
            contributing_documents: Vec::new(),
            findings: Vec::new(),
            grounding: GroundingOutcome::NotApplicable,
            usage,
            model_calls,
        }
    }
}

enum Attempt {
    Refused,
    Empty,
    Answer { text: String, report: GroundingReport },
}

pub struct AnswerGenerator {
    model: Arc<dyn LanguageModel>,
    markers: CitationMarkers,
    retry: RetryPolicy,
    max_tokens: usize,
    temperature: f32,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            model,
            markers: CitationMarkers::new()?,
            // one retry on an unavailable model
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(250),
                max_backoff: Duration::from_secs(1),
            },
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry.initial_backoff = backoff;
        self.retry.max_backoff = backoff;
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub async fn generate(&self, query: &ParsedQuery, context: &SynthesisContext) -> Result<Generation> {
        let mut usage = TokenUsage::default();
        let mut calls = 0u32;

        if context.is_empty() {
            return Ok(Generation::fixed(NOT_IN_KNOWLEDGE_BASE_MESSAGE, usage, calls));
        }

        let hints = prompts::hints(query, context);
        let prompt = prompts::answer_prompt(query, context, &hints, false, self.max_tokens, self.temperature);
        let first = self.attempt(&prompt, context, &mut usage, &mut calls).await?;

        let (text, report) = match first {
            Attempt::Refused => {
                warn!(query_type = %query.query_type, "Model refused the question");
                return Ok(Generation::fixed(REFUSAL_MESSAGE, usage, calls));
            }
            Attempt::Empty => return Ok(Generation::fixed(NOT_IN_KNOWLEDGE_BASE_MESSAGE, usage, calls)),
            Attempt::Answer { text, report } if report.is_grounded() => {
                return Ok(self.finish(&text, GroundingOutcome::Grounded, context, usage, calls));
            }
            Attempt::Answer { text, report } => (text, report),
        };

        warn!(
            violations = report.violations(),
            sentences = report.sentences.len(),
            "Answer failed the grounding check, regenerating"
        );
        metrics::record_grounding_violation("regenerated");

        let strict = prompts::answer_prompt(query, context, &hints, true, self.max_tokens, self.temperature);
        let second = match self.attempt(&strict, context, &mut usage, &mut calls).await {
            Ok(attempt) => Some(attempt),
            Err(e) => {
                warn!(error = %e, "Regeneration failed, downgrading the first answer");
                None
            }
        };

        if let Some(Attempt::Answer { text, report }) = &second {
            if report.is_grounded() {
                return Ok(self.finish(text, GroundingOutcome::Regenerated, context, usage, calls));
            }
        }

        let mut kept: Vec<&str> = match &second {
            Some(Attempt::Answer { text, report }) => report.grounded_sentences(text),
            _ => Vec::new(),
        };
        if kept.is_empty() {
            kept = report.grounded_sentences(&text);
        }

        warn!(kept = kept.len(), "Answer downgraded after a second grounding failure");
        metrics::record_grounding_violation("downgraded");

        let mut downgraded = INSUFFICIENT_MESSAGE.to_string();
        for sentence in kept {
            downgraded.push(' ');
            downgraded.push_str(sentence);
        }
        Ok(self.finish(&downgraded, GroundingOutcome::Downgraded, context, usage, calls))
    }

    async fn attempt(
        &self,
        prompt: &Prompt,
        context: &SynthesisContext,
        usage: &mut TokenUsage,
        calls: &mut u32,
    ) -> Result<Attempt> {
        let completion = self.complete(prompt, calls).await?;
        usage.add(completion.usage);

        if completion.is_refusal() {
            return Ok(Attempt::Refused);
        }
        let text = completion.text.trim().to_string();
        if text.is_empty() {
            return Ok(Attempt::Empty);
        }
        let report = self.markers.check(&text, |n| context.passage(n).is_some());
        Ok(Attempt::Answer { text, report })
    }

    async fn complete(&self, prompt: &Prompt, calls: &mut u32) -> Result<Completion> {
        let counter = std::sync::atomic::AtomicU32::new(0);
        let model = self.model.as_ref();
        let result = retry_idempotent(&self.retry, "generate_answer", || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            model.complete(prompt)
        })
        .await;
        *calls += counter.into_inner();

        match &result {
            Ok(completion) => metrics::record_generation(
                "answer",
                model.model_name(),
                completion.usage.total_tokens as u64,
                true,
            ),
            Err(_) => metrics::record_generation("answer", model.model_name(), 0, false),
        }
        result
    }

    /// Renumber markers densely and build citations and findings
    fn finish(
        &self,
        text: &str,
        grounding: GroundingOutcome,
        context: &SynthesisContext,
        usage: TokenUsage,
        model_calls: u32,
    ) -> Generation {
        let mapping: Vec<(usize, usize)> = self
            .markers
            .dense_mapping(text)
            .into_iter()
            .filter(|(old, _)| context.passage(*old).is_some())
            .enumerate()
            .map(|(i, (old, _))| (old, i + 1))
            .collect();
        let lookup: HashMap<usize, usize> = mapping.iter().copied().collect();
        let answer = self.markers.renumber(text, &lookup);

        let citations: Vec<Citation> = mapping
            .iter()
            .filter_map(|&(old, new)| {
                context.passage(old).map(|cp| Citation {
                    index: new,
                    document: cp.passage.document.clone(),
                    version: cp.passage.version,
                    title: cp.passage.title.clone(),
                    location: cp.passage.location,
                    quote: truncate_chars(&cp.passage.text, QUOTE_CHARS),
                })
            })
            .collect();

        let mut contributing_documents: Vec<DocumentId> = Vec::new();
        for citation in &citations {
            if !contributing_documents.contains(&citation.document) {
                contributing_documents.push(citation.document.clone());
            }
        }

        let findings = findings(&citations, context);

        info!(
            model = self.model.model_name(),
            grounding = ?grounding,
            citations = citations.len(),
            context_tokens = context.used_tokens,
            answer_tokens = estimate_tokens(&answer),
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            model_calls,
            "Answer generated"
        );

        Generation {
            answer,
            citations,
            contributing_documents,
            findings,
            grounding,
            usage,
            model_calls,
        }
    }
}

/// Entities located inside cited passages, each tied to its citation
fn findings(citations: &[Citation], context: &SynthesisContext) -> Vec<Finding> {
    let mut found: Vec<(usize, usize, Finding)> = Vec::new();

    for citation in citations {
        let Some(entities) = context.entities_for(&citation.document) else {
            continue;
        };
        if entities.version != citation.version {
            continue;
        }
        let inside = |start: usize| start >= citation.location.start && start < citation.location.end;
        let mut push = |kind: FindingKind, value: String, start: usize| {
            if inside(start) {
                found.push((
                    citation.index,
                    start,
                    Finding {
                        kind,
                        value,
                        document: citation.document.clone(),
                        citation: citation.index,
                    },
                ));
            }
        };

        for party in &entities.parties {
            push(FindingKind::Party, party.value.clone(), party.provenance.start);
        }
        for role in &entities.roles {
            push(
                FindingKind::Role,
                format!("{} ({})", role.value.name, role.value.role),
                role.provenance.start,
            );
        }
        for concern in &entities.concerns {
            let kind = if concern.value.adverse {
                FindingKind::Concern
            } else {
                FindingKind::Clearance
            };
            push(kind, concern.value.tag.clone(), concern.provenance.start);
        }
        for factor in &entities.mitigating_factors {
            push(FindingKind::MitigatingFactor, factor.value.clone(), factor.provenance.start);
        }
        if let Some(doc_type) = &entities.document_type {
            push(FindingKind::DocumentType, doc_type.value.clone(), doc_type.provenance.start);
        }
        if let Some(rating) = &entities.risk_rating {
            push(FindingKind::RiskRating, rating.value.to_string(), rating.provenance.start);
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    let mut seen = HashSet::new();
    found
        .into_iter()
        .map(|(_, _, finding)| finding)
        .filter(|f| seen.insert((f.kind, normalize_phrase(&f.value), f.document.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesizer::{ContextPassage, Passage};
    use integrity_common::errors::AppError;
    use integrity_common::llm::ScriptedModel;
    use integrity_common::models::{
        ConcernTag, Extracted, ExtractedEntities, Location, Provenance, Version,
    };

    fn passage(index: usize, id: &str, text: &str) -> ContextPassage {
        ContextPassage {
            index,
            passage: Passage {
                document: DocumentId::new("index", id),
                version: Version(1),
                title: format!("{}.txt", id),
                modified_at: chrono::Utc::now(),
                location: Location { start: 0, end: text.len(), page: None },
                text: text.to_string(),
                score: 1.0,
            },
        }
    }

    fn context() -> SynthesisContext {
        let a = DocumentId::new("index", "a");
        let mut entities = ExtractedEntities::empty(a.clone(), Version(1));
        entities.concerns.push(Extracted {
            value: ConcernTag { tag: "sanctions".into(), adverse: true },
            provenance: Provenance { document: a, version: Version(1), start: 14, end: 23, page: None },
        });
        SynthesisContext {
            passages: vec![
                passage(1, "a", "Acme Corp has sanctions exposure."),
                passage(2, "b", "Acme Corp was screened in 2023."),
                passage(3, "c", "Unrelated note."),
            ],
            entities: vec![entities],
            ..Default::default()
        }
    }

    fn build(model: ScriptedModel) -> (Arc<ScriptedModel>, AnswerGenerator) {
        let model = Arc::new(model);
        let generator = AnswerGenerator::new(model.clone(), &LlmConfig::default())
            .unwrap()
            .with_retry_backoff(Duration::ZERO);
        (model, generator)
    }

    fn query() -> ParsedQuery {
        ParsedQuery::parse("What concerns were raised about Acme Corp?")
    }

    #[tokio::test]
    async fn test_grounded_answer_is_renumbered() {
        let (_, generator) = build(ScriptedModel::answers([
            "Acme Corp was screened in 2023 [2]. It has sanctions exposure [1].",
        ]));
        let generation = generator.generate(&query(), &context()).await.unwrap();

        assert_eq!(generation.grounding, GroundingOutcome::Grounded);
        assert_eq!(
            generation.answer,
            "Acme Corp was screened in 2023 [1]. It has sanctions exposure [2]."
        );
        let docs: Vec<&str> = generation.citations.iter().map(|c| c.document.id.as_str()).collect();
        assert_eq!(docs, vec!["b", "a"]);
        assert_eq!(generation.contributing_documents.len(), 2);

        assert_eq!(generation.findings.len(), 1);
        assert_eq!(generation.findings[0].value, "sanctions");
        assert_eq!(generation.findings[0].citation, 2);
    }

    #[tokio::test]
    async fn test_regeneration_recovers() {
        let (model, generator) = build(ScriptedModel::answers([
            "Acme Corp is clean.",
            "Acme Corp has sanctions exposure [1].",
        ]));
        let generation = generator.generate(&query(), &context()).await.unwrap();
        assert_eq!(generation.grounding, GroundingOutcome::Regenerated);
        assert_eq!(model.calls(), 2);
        assert!(model.prompts()[1].system.contains("previous answer"));
    }

    #[tokio::test]
    async fn test_second_violation_downgrades_keeping_grounded_sentences() {
        let (_, generator) = build(ScriptedModel::answers([
            "Acme Corp was fined [9].",
            "Acme Corp has sanctions exposure [1]. Acme Corp also bribed officials.",
        ]));
        let generation = generator.generate(&query(), &context()).await.unwrap();

        assert_eq!(generation.grounding, GroundingOutcome::Downgraded);
        assert_eq!(
            generation.answer,
            format!("{} Acme Corp has sanctions exposure [1].", INSUFFICIENT_MESSAGE)
        );
        assert!(!generation.answer.contains("bribed"));
        assert_eq!(generation.citations.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_citations_never_survive() {
        let (_, generator) = build(ScriptedModel::answers(["Fined [7].", "Fined again [8]."]));
        let generation = generator.generate(&query(), &context()).await.unwrap();
        assert_eq!(generation.answer, INSUFFICIENT_MESSAGE);
        assert!(generation.citations.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_model_is_retried_once() {
        let (model, generator) = build(ScriptedModel::new(vec![
            Err(AppError::GenerationUnavailable { message: "503".into() }),
            Ok(Completion::stop("Acme Corp has sanctions exposure [1].")),
        ]));
        let generation = generator.generate(&query(), &context()).await.unwrap();
        assert_eq!(generation.grounding, GroundingOutcome::Grounded);
        assert_eq!(generation.model_calls, 2);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_twice_is_an_error() {
        let (model, generator) = build(ScriptedModel::new(vec![
            Err(AppError::GenerationUnavailable { message: "503".into() }),
            Err(AppError::GenerationUnavailable { message: "503".into() }),
        ]));
        let err = generator.generate(&query(), &context()).await.unwrap_err();
        assert!(matches!(err, AppError::GenerationUnavailable { .. }));
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_refusal_and_empty_output_use_fixed_answers() {
        let (_, generator) = build(ScriptedModel::new(vec![Ok(Completion::refused())]));
        let generation = generator.generate(&query(), &context()).await.unwrap();
        assert_eq!(generation.answer, REFUSAL_MESSAGE);
        assert_eq!(generation.grounding, GroundingOutcome::NotApplicable);

        let (_, generator) = build(ScriptedModel::answers(["   "]));
        let generation = generator.generate(&query(), &context()).await.unwrap();
        assert_eq!(generation.answer, NOT_IN_KNOWLEDGE_BASE_MESSAGE);
    }

    #[tokio::test]
    async fn test_empty_context_skips_the_model() {
        let (model, generator) = build(ScriptedModel::answers(["unused [1]."]));
        let generation = generator.generate(&query(), &SynthesisContext::default()).await.unwrap();
        assert_eq!(generation.answer, NOT_IN_KNOWLEDGE_BASE_MESSAGE);
        assert_eq!(model.calls(), 0);
    }
}
