mod support;

use integrity_common::config::{QueryConfig, SynthesisConfig};
use integrity_common::errors::AppError;
use integrity_common::llm::{ExtractiveModel, LanguageModel, ScriptedModel};
use integrity_common::models::{AnswerStatus, DocumentId, GroundingOutcome, SourceKind};
use integrity_context::generator::INSUFFICIENT_MESSAGE;
use integrity_context::guard::REFUSAL_MESSAGE;
use integrity_context::pipeline::FailureReason;
use integrity_context::{QueryRequest, QueryState};
use integrity_search::MockConnector;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{acme_backend, doc, pipeline, Setup, IDD_2024, QUESTION, SCREENING_2023};

fn extractive() -> Arc<dyn LanguageModel> {
    Arc::new(ExtractiveModel::default())
}

#[tokio::test]
async fn test_uncited_answer_is_regenerated() {
    let model = Arc::new(ScriptedModel::answers([
        "OCCO assessed Acme Corp in December 2023 [1]. Acme Corp is a trusted partner.",
        "OCCO assessed Acme Corp in December 2023 [1].",
    ]));
    let pipeline = pipeline(Arc::new(acme_backend()), model.clone(), Setup::default());

    let answer = pipeline.answer(QueryRequest::new(QUESTION)).await.unwrap();
    assert_eq!(answer.grounding, GroundingOutcome::Regenerated);
    assert_eq!(answer.answer, "OCCO assessed Acme Corp in December 2023 [1].");
    assert_eq!(model.calls(), 2);
    assert!(model.prompts()[1].system.contains("previous answer"));
}

#[tokio::test]
async fn test_invented_citations_never_reach_the_caller() {
    let model = Arc::new(ScriptedModel::answers([
        "Acme Corp was fined for bribery [7]. OCCO screened Acme Corp in June 2023 [2].",
        "Acme Corp was fined for bribery [9].",
    ]));
    let pipeline = pipeline(Arc::new(acme_backend()), model, Setup::default());

    let answer = pipeline.answer(QueryRequest::new(QUESTION)).await.unwrap();
    assert_eq!(answer.grounding, GroundingOutcome::Downgraded);
    assert!(answer.answer.starts_with(INSUFFICIENT_MESSAGE));
    assert!(!answer.answer.contains("bribery"));
    assert!(!answer.answer.contains("[7]"));
    assert!(!answer.answer.contains("[9]"));

    // every marker left in the text resolves to a citation of a fetched document
    let fetched: HashSet<DocumentId> = [
        DocumentId::new("livelink", "idd-2024"),
        DocumentId::new("livelink", "screen-2023"),
    ]
    .into_iter()
    .collect();
    for citation in &answer.citations {
        assert!(fetched.contains(&citation.document));
        assert!(answer.answer.contains(&format!("[{}]", citation.index)));
    }
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].document, DocumentId::new("livelink", "screen-2023"));
}

#[tokio::test]
async fn test_budget_exclusion_yields_partial_answer() {
    let setup = Setup {
        synthesis: SynthesisConfig {
            context_budget_tokens: 70,
            ..Default::default()
        },
        ..Default::default()
    };
    let pipeline = pipeline(Arc::new(acme_backend()), extractive(), setup);

    let report = pipeline.execute(QueryRequest::new(QUESTION)).await;
    assert_eq!(report.state, QueryState::PartialAnswered);

    let answer = report.result.unwrap();
    assert_eq!(answer.status, AnswerStatus::PartialAnswered);
    assert_eq!(answer.coverage.excluded, vec![DocumentId::new("livelink", "screen-2023")]);
    assert!(answer.warnings.iter().any(|w| w.contains("did not fit")));
    assert!(answer
        .citations
        .iter()
        .all(|c| c.document == DocumentId::new("livelink", "idd-2024")));
}

#[tokio::test]
async fn test_failed_fetch_yields_partial_answer() {
    let backend = Arc::new(acme_backend().fail_fetches(vec![AppError::unavailable("livelink", "read timed out")]));
    let pipeline = pipeline(backend, extractive(), Setup::default());

    let answer = pipeline.answer(QueryRequest::new(QUESTION)).await.unwrap();
    assert_eq!(answer.status, AnswerStatus::PartialAnswered);
    assert_eq!(answer.coverage.failed.len(), 1);
    assert!(answer.warnings.iter().any(|w| w.contains("could not be read")));
    assert!(!answer.citations.is_empty());
}

#[tokio::test]
async fn test_all_documents_denied_is_forbidden() {
    let backend = Arc::new(
        MockConnector::new("livelink", SourceKind::RealTime)
            .with_document(doc("idd-2024", "Acme Corp IDD 2024.txt", 2024, 1, 1), IDD_2024)
            .fail_fetches(vec![AppError::forbidden("livelink", "no read permission")]),
    );
    let pipeline = pipeline(backend, extractive(), Setup::default());

    let report = pipeline.execute(QueryRequest::new(QUESTION)).await;
    assert_eq!(report.state, QueryState::Failed(FailureReason::Forbidden));
    assert!(matches!(report.result, Err(AppError::Forbidden { .. })));
}

#[tokio::test]
async fn test_deadline_cancels_outstanding_backend_calls() {
    let backend = Arc::new(
        MockConnector::new("livelink", SourceKind::RealTime)
            .with_document(doc("screen-2023", "Acme Corp screening 2023.txt", 2023, 6, 1), SCREENING_2023)
            .with_delay(Duration::from_secs(3)),
    );
    let setup = Setup {
        query: QueryConfig {
            deadline_secs: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    let pipeline = pipeline(backend.clone(), extractive(), setup);

    let started = Instant::now();
    let report = pipeline.execute(QueryRequest::new(QUESTION)).await;
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(report.state, QueryState::Failed(FailureReason::Timeout));
    assert!(matches!(report.result, Err(AppError::DeadlineExceeded { deadline_ms: 1000 })));
    assert_eq!(backend.search_calls(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.in_flight(), 0);
}

#[tokio::test]
async fn test_deadline_during_fetching_aborts_fetch_tasks() {
    let backend = Arc::new(acme_backend().with_fetch_delay(Duration::from_secs(3)));
    let setup = Setup {
        query: QueryConfig {
            deadline_secs: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    let pipeline = pipeline(backend.clone(), extractive(), setup);

    let started = Instant::now();
    let report = pipeline.execute(QueryRequest::new(QUESTION)).await;
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(report.state, QueryState::Failed(FailureReason::Timeout));
    assert!(report.history.contains(&QueryState::Fetching));
    assert!(!report.history.contains(&QueryState::Enriching));
    assert_eq!(backend.search_calls(), 1);
    assert_eq!(backend.fetch_calls(), 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.in_flight(), 0);
}

#[tokio::test]
async fn test_injection_never_reaches_a_backend() {
    let backend = Arc::new(acme_backend());
    let model = Arc::new(ScriptedModel::default());
    let pipeline = pipeline(backend.clone(), model.clone(), Setup::default());

    let report = pipeline
        .execute(QueryRequest::new("Acme Corp'; DROP TABLE documents; --"))
        .await;
    assert_eq!(report.state, QueryState::Failed(FailureReason::Rejected));
    match report.result {
        Err(AppError::InputRejected { reason }) => assert_eq!(reason, REFUSAL_MESSAGE),
        other => panic!("expected rejection, got {:?}", other.map(|a| a.answer)),
    }
    assert_eq!(backend.search_calls(), 0);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_empty_and_oversized_questions_are_invalid() {
    let setup = Setup {
        query: QueryConfig {
            max_query_chars: 20,
            ..Default::default()
        },
        ..Default::default()
    };
    let backend = Arc::new(acme_backend());
    let pipeline = pipeline(backend.clone(), extractive(), setup);

    let empty = pipeline.execute(QueryRequest::new("   ")).await;
    assert_eq!(empty.state, QueryState::Failed(FailureReason::InvalidInput));

    let long = pipeline.execute(QueryRequest::new(QUESTION)).await;
    assert!(matches!(long.result, Err(AppError::Validation { .. })));
    assert_eq!(backend.search_calls(), 0);
}
