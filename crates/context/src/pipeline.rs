//! Query Pipeline - one question from validation to a cited answer
//!
//! Each query runs as a single future under the configured deadline. When the
//! deadline fires the future is dropped, which drops the router fan-out and
//! the fetch session's task set and so cancels every outstanding backend call.

use crate::enricher::Enricher;
use crate::generator::AnswerGenerator;
use crate::guard::InputGuard;
use crate::query::ParsedQuery;
use crate::synthesizer::{Candidate, Synthesizer};
use futures::future::join_all;
use integrity_common::config::{AppConfig, QueryConfig};
use integrity_common::errors::{AppError, Result};
use integrity_common::llm::LanguageModel;
use integrity_common::metrics;
use integrity_common::models::{
    AnswerStatus, DocumentId, DocumentRef, FailedDocument, SearchFilters, SearchQuery, SynthesizedAnswer,
};
use integrity_common::resilience::RetryPolicy;
use integrity_common::text::estimate_tokens;
use integrity_search::{BackendRegistry, ContentFetcher, SearchRouter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A question plus optional explicit filters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub filters: SearchFilters,
    /// Overrides the configured top-k when set
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Why a query ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidInput,
    Rejected,
    NoMatchingDocuments,
    Forbidden,
    BackendUnavailable,
    GenerationUnavailable,
    Timeout,
    Internal,
}

impl FailureReason {
    pub fn from_error(error: &AppError) -> Self {
        match error {
            AppError::Validation { .. } | AppError::InvalidFormat { .. } => FailureReason::InvalidInput,
            AppError::InputRejected { .. } => FailureReason::Rejected,
            AppError::NoMatchingDocuments | AppError::NotFound { .. } => FailureReason::NoMatchingDocuments,
            AppError::Forbidden { .. } | AppError::ExpiredCredential { .. } => FailureReason::Forbidden,
            AppError::BackendUnavailable { .. } | AppError::RateLimited { .. } | AppError::HttpClient(_) => {
                FailureReason::BackendUnavailable
            }
            AppError::GenerationUnavailable { .. } => FailureReason::GenerationUnavailable,
            AppError::DeadlineExceeded { .. } => FailureReason::Timeout,
            _ => FailureReason::Internal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InvalidInput => "invalid_input",
            FailureReason::Rejected => "rejected",
            FailureReason::NoMatchingDocuments => "no_matching_documents",
            FailureReason::Forbidden => "forbidden",
            FailureReason::BackendUnavailable => "backend_unavailable",
            FailureReason::GenerationUnavailable => "generation_unavailable",
            FailureReason::Timeout => "timeout",
            FailureReason::Internal => "internal",
        }
    }
}

/// Per-query state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Received,
    Routed,
    Fetching,
    Enriching,
    Synthesizing,
    Generating,
    Answered,
    PartialAnswered,
    Failed(FailureReason),
}

impl QueryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryState::Answered | QueryState::PartialAnswered | QueryState::Failed(_)
        )
    }

    /// Forward-only: each stage has one successor, any live state may fail
    pub fn can_transition_to(&self, next: QueryState) -> bool {
        use QueryState::*;
        match (*self, next) {
            (from, Failed(_)) => !from.is_terminal(),
            (Received, Routed)
            | (Routed, Fetching)
            | (Fetching, Enriching)
            | (Enriching, Synthesizing)
            | (Synthesizing, Generating)
            | (Generating, Answered)
            | (Generating, PartialAnswered) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryState::Received => "received",
            QueryState::Routed => "routed",
            QueryState::Fetching => "fetching",
            QueryState::Enriching => "enriching",
            QueryState::Synthesizing => "synthesizing",
            QueryState::Generating => "generating",
            QueryState::Answered => "answered",
            QueryState::PartialAnswered => "partial_answered",
            QueryState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryState::Failed(reason) => write!(f, "failed({})", reason.as_str()),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Current state plus every state visited
#[derive(Debug, Clone)]
pub struct QueryLifecycle {
    state: QueryState,
    history: Vec<QueryState>,
}

impl Default for QueryLifecycle {
    fn default() -> Self {
        Self {
            state: QueryState::Received,
            history: vec![QueryState::Received],
        }
    }
}

impl QueryLifecycle {
    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn history(&self) -> &[QueryState] {
        &self.history
    }

    pub fn advance(&mut self, next: QueryState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(AppError::Internal {
                message: format!("illegal query transition {} -> {}", self.state, next),
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Move to `Failed` unless already terminal
    pub fn fail(&mut self, reason: FailureReason) {
        if !self.state.is_terminal() {
            self.state = QueryState::Failed(reason);
            self.history.push(self.state);
        }
    }
}

/// Outcome of one query with its state trail
#[derive(Debug)]
pub struct QueryReport {
    pub query_id: Uuid,
    pub state: QueryState,
    pub history: Vec<QueryState>,
    pub result: Result<SynthesizedAnswer>,
    pub elapsed: Duration,
}

pub struct QueryPipeline {
    router: SearchRouter,
    fetcher: ContentFetcher,
    enricher: Arc<Enricher>,
    synthesizer: Synthesizer,
    generator: AnswerGenerator,
    guard: InputGuard,
    config: QueryConfig,
    company_suffixes: Vec<String>,
}

impl QueryPipeline {
    pub fn new(
        router: SearchRouter,
        fetcher: ContentFetcher,
        enricher: Arc<Enricher>,
        synthesizer: Synthesizer,
        generator: AnswerGenerator,
        config: QueryConfig,
    ) -> Result<Self> {
        let company_suffixes = enricher.vocabulary().company_suffixes.clone();
        Ok(Self {
            router,
            fetcher,
            enricher,
            synthesizer,
            generator,
            guard: InputGuard::new(config.input_guard_enabled)?,
            config,
            company_suffixes,
        })
    }

    /// Wire every stage from configuration
    pub fn from_config(config: &AppConfig, registry: BackendRegistry, model: Arc<dyn LanguageModel>) -> Result<Self> {
        let retry = RetryPolicy::from_config(&config.retry);
        let router = SearchRouter::new(registry.clone(), config.router.clone(), retry.clone());
        let fetcher = ContentFetcher::new(registry, &config.fetch, retry);
        let enricher = Arc::new(Enricher::new(&config.enrichment, Some(model.clone())));
        let synthesizer = Synthesizer::new(config.synthesis.clone());
        let generator = AnswerGenerator::new(model, &config.llm)?;
        Self::new(router, fetcher, enricher, synthesizer, generator, config.query.clone())
    }

    pub fn enricher(&self) -> Arc<Enricher> {
        self.enricher.clone()
    }

    pub fn fetcher(&self) -> &ContentFetcher {
        &self.fetcher
    }

    pub fn registry(&self) -> &BackendRegistry {
        self.router.registry()
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.config.deadline_secs)
    }

    /// Answer a question, or fail with the error that ended it
    pub async fn answer(&self, request: QueryRequest) -> Result<SynthesizedAnswer> {
        self.execute(request).await.result
    }

    /// Run a query and report the state machine's trail
    pub async fn execute(&self, request: QueryRequest) -> QueryReport {
        let query_id = Uuid::new_v4();
        let started = Instant::now();
        let mut lifecycle = QueryLifecycle::default();
        let deadline = self.deadline();

        let mut query_type = "unknown";
        let result = match self.validate(&request) {
            Err(e) => Err(e),
            Ok(question) => {
                let parsed = ParsedQuery::parse_with_suffixes(question, &self.company_suffixes);
                query_type = parsed.query_type.as_str();
                let outcome = tokio::time::timeout(deadline, self.run(query_id, &parsed, &request, &mut lifecycle)).await;
                match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(query_id = %query_id, state = %lifecycle.state(), "Query deadline exceeded, cancelling");
                        Err(AppError::DeadlineExceeded {
                            deadline_ms: deadline.as_millis() as u64,
                        })
                    }
                }
            }
        };

        if let Err(e) = &result {
            lifecycle.fail(FailureReason::from_error(e));
        }

        let elapsed = started.elapsed();
        let state = lifecycle.state();
        metrics::record_query(elapsed.as_secs_f64(), state.as_str(), query_type);
        info!(
            query_id = %query_id,
            state = %state,
            query_type,
            elapsed_ms = elapsed.as_millis() as u64,
            "Query finished"
        );

        QueryReport {
            query_id,
            state,
            history: lifecycle.history().to_vec(),
            result: result.map(|mut answer| {
                answer.query_id = query_id;
                answer
            }),
            elapsed,
        }
    }

    fn validate<'a>(&self, request: &'a QueryRequest) -> Result<&'a str> {
        let question = request.query.trim();
        if question.is_empty() {
            return Err(AppError::Validation {
                message: "query must not be empty".to_string(),
                field: Some("query".to_string()),
            });
        }
        if question.chars().count() > self.config.max_query_chars {
            return Err(AppError::Validation {
                message: format!("query exceeds {} characters", self.config.max_query_chars),
                field: Some("query".to_string()),
            });
        }
        self.guard.screen(question)?;
        Ok(question)
    }

    #[instrument(skip_all, fields(query_id = %query_id, query_type = %parsed.query_type))]
    async fn run(
        &self,
        query_id: Uuid,
        parsed: &ParsedQuery,
        request: &QueryRequest,
        lifecycle: &mut QueryLifecycle,
    ) -> Result<SynthesizedAnswer> {
        let search = SearchQuery::new(parsed.search_text.clone(), request.top_k.unwrap_or(0))
            .with_filters(request.filters.clone());
        let routed = self.router.route(&search).await?;
        lifecycle.advance(QueryState::Routed)?;
        if routed.hits.is_empty() {
            return Err(AppError::NoMatchingDocuments);
        }
        let mut warnings = routed.warnings.clone();

        lifecycle.advance(QueryState::Fetching)?;
        let refs: Vec<DocumentRef> = routed.hits.iter().map(|h| h.document.clone()).collect();
        let session = self.fetcher.session();
        let fetched = session.fetch_all(&refs).await;
        warnings.extend(fetched.warnings.iter().cloned());
        if fetched.documents.is_empty() {
            return Err(nothing_fetched(&fetched.failed, fetched.warnings.len()));
        }

        lifecycle.advance(QueryState::Enriching)?;
        let relevance: HashMap<&DocumentId, f32> = routed.hits.iter().map(|h| (&h.document.id, h.score)).collect();
        let entities = join_all(fetched.documents.iter().map(|d| self.enricher.enrich(d))).await;
        let candidates: Vec<Candidate> = fetched
            .documents
            .into_iter()
            .zip(entities)
            .map(|(document, entities)| Candidate {
                relevance: relevance.get(document.id()).copied().unwrap_or(0.0),
                document,
                entities,
            })
            .collect();

        lifecycle.advance(QueryState::Synthesizing)?;
        let mut context = self.synthesizer.synthesize(parsed, candidates);
        context.coverage.failed = fetched.failed;

        lifecycle.advance(QueryState::Generating)?;
        let generation = self.generator.generate(parsed, &context).await?;

        let coverage = context.coverage.clone();
        if !coverage.excluded.is_empty() {
            warnings.push(format!(
                "{} relevant document(s) did not fit in the answer context: {}",
                coverage.excluded.len(),
                join_ids(&coverage.excluded)
            ));
        }
        if !coverage.failed.is_empty() {
            let ids: Vec<DocumentId> = coverage.failed.iter().map(|f| f.document.clone()).collect();
            warnings.push(format!(
                "{} relevant document(s) could not be read: {}",
                ids.len(),
                join_ids(&ids)
            ));
        }

        let partial = routed.partial || !coverage.is_complete();
        let status = if partial {
            metrics::record_partial_answer();
            lifecycle.advance(QueryState::PartialAnswered)?;
            AnswerStatus::PartialAnswered
        } else {
            lifecycle.advance(QueryState::Answered)?;
            AnswerStatus::Answered
        };

        info!(
            question_chars = parsed.original.chars().count(),
            question_tokens = estimate_tokens(&parsed.original),
            passages = context.passages.len(),
            context_tokens = context.used_tokens,
            answer_tokens = estimate_tokens(&generation.answer),
            total_tokens = generation.usage.total_tokens,
            "Query usage"
        );

        Ok(SynthesizedAnswer {
            query_id,
            answer: generation.answer,
            citations: generation.citations,
            contributing_documents: generation.contributing_documents,
            findings: generation.findings,
            coverage,
            status,
            grounding: generation.grounding,
            query_type: parsed.query_type.as_str().to_string(),
            warnings,
        })
    }
}

fn nothing_fetched(failed: &[FailedDocument], denials: usize) -> AppError {
    if !failed.is_empty() && denials == failed.len() {
        AppError::forbidden("content", "access denied to every matching document")
    } else {
        AppError::unavailable("content", format!("none of {} matching documents could be read", failed.len()))
    }
}

fn join_ids(ids: &[DocumentId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_only() {
        let mut lifecycle = QueryLifecycle::default();
        for next in [
            QueryState::Routed,
            QueryState::Fetching,
            QueryState::Enriching,
            QueryState::Synthesizing,
            QueryState::Generating,
            QueryState::Answered,
        ] {
            lifecycle.advance(next).unwrap();
        }
        assert_eq!(lifecycle.history().len(), 7);
        assert!(lifecycle.advance(QueryState::Generating).is_err());
        assert!(lifecycle.advance(QueryState::Failed(FailureReason::Internal)).is_err());
    }

    #[test]
    fn test_skipping_and_reentry_are_rejected() {
        let mut lifecycle = QueryLifecycle::default();
        assert!(lifecycle.advance(QueryState::Fetching).is_err());
        assert!(lifecycle.advance(QueryState::Received).is_err());
        lifecycle.advance(QueryState::Routed).unwrap();
        assert!(lifecycle.advance(QueryState::Routed).is_err());
        assert!(lifecycle.advance(QueryState::Answered).is_err());
    }

    #[test]
    fn test_fail_from_any_live_state() {
        let mut lifecycle = QueryLifecycle::default();
        lifecycle.advance(QueryState::Routed).unwrap();
        lifecycle.fail(FailureReason::Timeout);
        assert_eq!(lifecycle.state(), QueryState::Failed(FailureReason::Timeout));

        // terminal states stay put
        lifecycle.fail(FailureReason::Internal);
        assert_eq!(lifecycle.state(), QueryState::Failed(FailureReason::Timeout));
        assert_eq!(lifecycle.state().to_string(), "failed(timeout)");
    }

    #[test]
    fn test_failure_reasons_follow_errors() {
        assert_eq!(
            FailureReason::from_error(&AppError::DeadlineExceeded { deadline_ms: 10 }),
            FailureReason::Timeout
        );
        assert_eq!(
            FailureReason::from_error(&AppError::NoMatchingDocuments),
            FailureReason::NoMatchingDocuments
        );
        assert_eq!(
            FailureReason::from_error(&AppError::forbidden("index", "denied")),
            FailureReason::Forbidden
        );
    }

    #[test]
    fn test_nothing_fetched_prefers_forbidden_when_all_denied() {
        let failed = vec![FailedDocument {
            document: DocumentId::new("live", "1"),
            reason: "denied".into(),
        }];
        assert!(matches!(nothing_fetched(&failed, 1), AppError::Forbidden { .. }));
        assert!(matches!(nothing_fetched(&failed, 0), AppError::BackendUnavailable { .. }));
    }
}
