mod support;

use integrity_common::llm::{ExtractiveModel, LanguageModel};
use integrity_common::models::{AnswerStatus, DocumentId, FindingKind, GroundingOutcome};
use integrity_context::pipeline::FailureReason;
use integrity_context::{QueryRequest, QueryState};
use std::sync::Arc;
use support::{acme_backend, pipeline, Setup, QUESTION};

#[tokio::test]
async fn test_prior_assessment_answer_cites_both_documents_newest_first() {
    let backend = Arc::new(acme_backend());
    let model = Arc::new(ExtractiveModel::default()) as Arc<dyn LanguageModel>;
    let pipeline = pipeline(backend.clone(), model, Setup::default());

    let report = pipeline.execute(QueryRequest::new(QUESTION)).await;
    assert_eq!(report.state, QueryState::Answered);
    assert_eq!(
        report.history,
        vec![
            QueryState::Received,
            QueryState::Routed,
            QueryState::Fetching,
            QueryState::Enriching,
            QueryState::Synthesizing,
            QueryState::Generating,
            QueryState::Answered,
        ]
    );

    let answer = report.result.unwrap();
    assert_eq!(answer.status, AnswerStatus::Answered);
    assert_eq!(answer.grounding, GroundingOutcome::Grounded);
    assert_eq!(answer.query_type, "concern_extraction");
    assert_eq!(answer.query_id, report.query_id);

    let idd = DocumentId::new("livelink", "idd-2024");
    let screening = DocumentId::new("livelink", "screen-2023");
    let cited: Vec<&DocumentId> = answer.citations.iter().map(|c| &c.document).collect();
    assert_eq!(cited, vec![&idd, &screening]);
    assert_eq!(answer.citations[0].index, 1);
    assert_eq!(answer.citations[1].index, 2);

    assert!(answer.answer.contains("sanctions exposure"));
    assert!(answer.answer.contains("[1]"));
    assert!(answer.answer.contains("[2]"));
    assert!(answer.answer.find("December 2023").unwrap() < answer.answer.find("June 2023").unwrap());

    let sanctions = answer
        .findings
        .iter()
        .find(|f| f.kind == FindingKind::Concern && f.value == "sanctions")
        .expect("sanctions finding");
    assert_eq!(sanctions.document, idd);
    assert_eq!(sanctions.citation, 1);

    assert!(answer
        .findings
        .iter()
        .any(|f| f.kind == FindingKind::Clearance && f.document == screening));

    assert_eq!(answer.contributing_documents, vec![idd, screening]);
    assert!(answer.coverage.is_complete());
    assert!(answer.warnings.is_empty());
}

#[tokio::test]
async fn test_each_document_is_fetched_once() {
    let backend = Arc::new(acme_backend());
    let model = Arc::new(ExtractiveModel::default()) as Arc<dyn LanguageModel>;
    let pipeline = pipeline(backend.clone(), model, Setup::default());

    pipeline.answer(QueryRequest::new(QUESTION)).await.unwrap();
    assert_eq!(backend.search_calls(), 1);
    assert_eq!(backend.fetch_calls(), 2);
}

#[tokio::test]
async fn test_unknown_party_has_no_matching_documents() {
    let backend = Arc::new(acme_backend());
    let model = Arc::new(ExtractiveModel::default()) as Arc<dyn LanguageModel>;
    let pipeline = pipeline(backend.clone(), model, Setup::default());

    let report = pipeline
        .execute(QueryRequest::new("What concerns were raised about Zenith Holdings?"))
        .await;
    assert_eq!(report.state, QueryState::Failed(FailureReason::NoMatchingDocuments));
    assert_eq!(backend.fetch_calls(), 0);
}
