//! Citation resolution handler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::AppState;
use integrity_common::{
    errors::{AppError, Result},
    models::{DocumentId, Location, Version},
    text::page_at,
};

/// Resolve request: the citation as returned with an answer
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub document: DocumentId,
    /// Latest version when absent
    pub version: Option<Version>,
    pub location: Location,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub document: DocumentId,
    pub version: Version,
    pub title: String,
    pub location: Location,
    pub text: String,
}

/// Return the cited span of a document version
///
/// The location is a raw byte range; the span is returned decoded.
pub async fn resolve(
    State(state): State<AppState>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>> {
    let document = state
        .pipeline
        .fetcher()
        .resolve(&request.document, request.version)
        .await?;
    let Location { start, end, page } = request.location;
    let out_of_range = || AppError::Validation {
        message: format!(
            "location {}..{} is outside {} of {}",
            start, end, document.meta.version, document.meta.id
        ),
        field: Some("location".to_string()),
    };

    let content = document.content().unwrap_or_default();
    request.location.slice(content).ok_or_else(out_of_range)?;
    let decoded = document.decoded();
    let (Some(text_start), Some(text_end)) = (decoded.decoded_offset(start), decoded.decoded_offset(end)) else {
        return Err(out_of_range());
    };
    let text = decoded.as_str();

    tracing::debug!(document = %document.meta.id, start, end, "Citation resolved");

    Ok(Json(ResolveResponse {
        document: document.meta.id.clone(),
        version: document.meta.version,
        title: document.meta.name.clone(),
        location: Location {
            start,
            end,
            page: page_at(text, text_start).or(page),
        },
        text: text[text_start..text_end].to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{app, app_with, json_body, meta, IDD_TEXT};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use integrity_common::config::AppConfig;
    use integrity_common::models::SourceKind;
    use integrity_search::MockConnector;
    use tower::ServiceExt;

    async fn post(body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        post_to(app(AppConfig::default()), body).await
    }

    async fn post_to(app: axum::Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let request = Request::post("/v1/citations/resolve")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        (status, json_body(response).await)
    }

    #[tokio::test]
    async fn test_resolves_cited_span() {
        let start = IDD_TEXT.find("sanctions").unwrap();
        let (status, body) = post(serde_json::json!({
            "document": { "backend": "livelink", "id": "idd-2024" },
            "version": 1,
            "location": { "start": start, "end": start + "sanctions exposure".len() }
        }))
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"], "sanctions exposure");
        assert!(body["location"].get("page").is_none());
        assert_eq!(body["title"], "Acme Corp IDD 2024.txt");
    }

    #[tokio::test]
    async fn test_resolves_raw_byte_range_of_latin1_content() {
        let raw: &[u8] = b"Caf\xe9 \xe9\xe9\xe9 note.\n\nAcme Corp has sanctions exposure.";
        let backend = MockConnector::new("livelink", SourceKind::RealTime)
            .with_document(meta("memo-1998", "Acme Corp memo.txt"), raw);
        let app = app_with(AppConfig::default(), backend);

        let (status, body) = post_to(
            app.clone(),
            serde_json::json!({
                "document": { "backend": "livelink", "id": "memo-1998" },
                "location": { "start": 16, "end": raw.len() }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"], "Acme Corp has sanctions exposure.");

        let (status, body) = post_to(
            app,
            serde_json::json!({
                "document": { "backend": "livelink", "id": "memo-1998" },
                "location": { "start": 0, "end": 5 }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"], "Caf\u{FFFD} ");
    }

    #[tokio::test]
    async fn test_out_of_range_location_is_invalid() {
        let (status, _) = post(serde_json::json!({
            "document": { "backend": "livelink", "id": "idd-2024" },
            "location": { "start": 0, "end": 10_000 }
        }))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_backend_is_not_found() {
        let (status, _) = post(serde_json::json!({
            "document": { "backend": "archive", "id": "1" },
            "location": { "start": 0, "end": 1 }
        }))
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
