#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use integrity_common::config::{
    EnrichmentConfig, FetchConfig, LlmConfig, QueryConfig, RouterConfig, SynthesisConfig,
};
use integrity_common::llm::LanguageModel;
use integrity_common::models::{DocumentId, DocumentRef, SourceKind, Version};
use integrity_common::resilience::{BackendPool, RetryPolicy};
use integrity_context::{AnswerGenerator, Enricher, QueryPipeline, Synthesizer};
use integrity_search::{BackendRegistry, ContentFetcher, MockConnector, SearchRouter};
use std::sync::Arc;
use std::time::Duration;

pub const QUESTION: &str = "Has OCCO previously assessed Acme Corp and what concerns were raised?";

pub const IDD_2024: &str = "Integrity due diligence report.\n\
OCCO assessed Acme Corp in December 2023.\n\
Concern identified: sanctions exposure linked to a former director.\n\
Risk rating: High.";

pub const SCREENING_2023: &str = "Screening questionnaire.\n\
OCCO screened Acme Corp in June 2023.\n\
Concerns: none noted.";

pub fn doc(id: &str, name: &str, year: i32, month: u32, day: u32) -> DocumentRef {
    let ts = Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap();
    DocumentRef {
        id: DocumentId::new("livelink", id),
        name: name.to_string(),
        content_type: "text/plain".to_string(),
        version: Version(1),
        created_at: ts,
        modified_at: ts,
        source: SourceKind::RealTime,
        categories: vec!["IDD".to_string()],
        parties: vec![],
    }
}

/// The live backend holding both Acme assessments
pub fn acme_backend() -> MockConnector {
    MockConnector::new("livelink", SourceKind::RealTime)
        .with_document(doc("idd-2024", "Acme Corp IDD 2024.txt", 2024, 1, 1), IDD_2024)
        .with_document(doc("screen-2023", "Acme Corp screening 2023.txt", 2023, 6, 1), SCREENING_2023)
}

#[derive(Default)]
pub struct Setup {
    pub synthesis: SynthesisConfig,
    pub query: QueryConfig,
}

pub fn pipeline(backend: Arc<MockConnector>, model: Arc<dyn LanguageModel>, setup: Setup) -> QueryPipeline {
    let mut registry = BackendRegistry::new();
    registry.register(backend, BackendPool::new("livelink", 4, None, Duration::from_secs(5)), 0);

    let router = SearchRouter::new(registry.clone(), RouterConfig::default(), RetryPolicy::none());
    let fetcher = ContentFetcher::new(registry, &FetchConfig::default(), RetryPolicy::none());
    let enricher = Arc::new(Enricher::new(&EnrichmentConfig::default(), None));
    let generator = AnswerGenerator::new(model, &LlmConfig::default())
        .unwrap()
        .with_retry_backoff(Duration::from_millis(1));

    QueryPipeline::new(
        router,
        fetcher,
        enricher,
        Synthesizer::new(setup.synthesis),
        generator,
        setup.query,
    )
    .unwrap()
}
