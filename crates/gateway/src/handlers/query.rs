//! Question answering handler

use axum::{extract::State, Json};
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use integrity_common::{
    errors::{AppError, Result},
    metrics::RequestMetrics,
    models::{SearchFilters, SynthesizedAnswer},
};
use integrity_context::QueryRequest;

/// Query request
#[derive(Debug, Deserialize, Validate)]
pub struct QueryBody {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    #[serde(default)]
    pub filters: SearchFilters,

    /// Maximum candidate documents
    #[validate(range(min = 1, max = 100))]
    pub top_k: Option<usize>,
}

/// Answer one question with citations
pub async fn query(
    State(state): State<AppState>,
    Json(body): Json<QueryBody>,
) -> Result<Json<SynthesizedAnswer>> {
    let request_metrics = RequestMetrics::start("POST", "/v1/query");

    let result = answer(&state, body).await;
    let status = match &result {
        Ok(_) => 200,
        Err(e) => e.status_code().as_u16(),
    };
    request_metrics.finish(status);

    result.map(Json)
}

async fn answer(state: &AppState, body: QueryBody) -> Result<SynthesizedAnswer> {
    body.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("query".to_string()),
    })?;

    tracing::info!(
        query_len = body.query.len(),
        top_k = ?body.top_k,
        "Query received"
    );

    state
        .pipeline
        .answer(QueryRequest {
            query: body.query,
            filters: body.filters,
            top_k: body.top_k,
        })
        .await
}
