//! Real-time content-management REST backend
//!
//! Endpoints (relative to the configured base URL):
//! - `GET /api/v2/search?q=&limit=&category=&modified_after=&modified_before=&content_type=`
//! - `GET /api/v2/nodes/{id}`
//! - `GET /api/v2/nodes/{id}/versions`
//! - `GET /api/v2/nodes/{id}/versions/{v}/content`
//! - `GET /api/v2/nodes/{id}/categories`
//! - `GET /api/v2/serverinfo` (readiness)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use integrity_common::connector::{Capabilities, SourceConnector, VersionInfo};
use integrity_common::credential::{valid_credential, CredentialProvider};
use integrity_common::errors::{AppError, Result};
use integrity_common::models::{
    BackendId, DocumentId, DocumentRef, SearchHit, SearchQuery, SearchResult, SourceKind, Version,
};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct NodeDto {
    id: String,
    name: String,
    #[serde(rename = "type", default = "default_content_type")]
    content_type: String,
    version: u32,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    parties: Vec<String>,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

#[derive(Debug, Deserialize)]
struct SearchHitDto {
    #[serde(flatten)]
    node: NodeDto,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponseDto {
    results: Vec<SearchHitDto>,
    #[serde(default)]
    total_count: Option<usize>,
    #[serde(default)]
    facets: BTreeMap<String, BTreeMap<String, usize>>,
}

#[derive(Debug, Deserialize)]
struct VersionDto {
    version: u32,
    modified: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct VersionsResponseDto {
    versions: Vec<VersionDto>,
}

#[derive(Debug, Deserialize)]
struct CategoriesResponseDto {
    categories: Vec<String>,
}

/// Connector for the real-time content server
pub struct ContentServerConnector {
    id: BackendId,
    base_url: Url,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl ContentServerConnector {
    pub fn new(
        id: BackendId,
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let base_url = base_url.into();
        let base_url = Url::parse(&base_url).map_err(|e| AppError::Configuration {
            message: format!("invalid base URL {:?} for backend {}: {}", base_url, id, e),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Configuration {
                message: format!("base URL {} for backend {} cannot hold a path", base_url, id),
            });
        }

        Ok(Self {
            id,
            base_url,
            client,
            credentials,
        })
    }

    /// `{base}/api/v2/{segments...}`; each segment is percent-encoded
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v2"]).extend(segments);
        }
        url
    }

    /// URL under `/nodes/{id}`; the id is always exactly one path segment
    fn node_url(&self, id: &DocumentId, rest: &[&str]) -> Result<Url> {
        if id.backend != self.id || matches!(id.id.as_str(), "" | "." | "..") {
            return Err(AppError::not_found("document", id.to_string()));
        }
        let mut segments = vec!["nodes", id.id.as_str()];
        segments.extend_from_slice(rest);
        Ok(self.url(&segments))
    }

    fn to_document_ref(&self, node: NodeDto) -> DocumentRef {
        DocumentRef {
            id: DocumentId {
                backend: self.id.clone(),
                id: node.id,
            },
            name: node.name,
            content_type: node.content_type,
            version: Version(node.version),
            created_at: node.created,
            modified_at: node.modified,
            source: SourceKind::RealTime,
            categories: node.categories,
            parties: node.parties,
        }
    }

    async fn get(&self, url: Url, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let credential = valid_credential(self.credentials.as_ref(), self.id.as_str()).await?;
        let path = url.path().to_string();

        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, credential.authorization_header())
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::unavailable(self.id.as_str(), format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_status(&self.id, status, &path, &body))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, query: &[(&str, String)]) -> Result<T> {
        let path = url.path().to_string();
        let response = self.get(url, query).await?;
        response.json::<T>().await.map_err(|e| AppError::unavailable(
            self.id.as_str(),
            format!("malformed response from {}: {}", path, e),
        ))
    }
}

/// Translate a non-success HTTP status into the error taxonomy
fn map_status(backend: &BackendId, status: StatusCode, path: &str, body: &str) -> AppError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AppError::forbidden(backend.as_str(), format!("access denied to {}", path))
        }
        StatusCode::NOT_FOUND => AppError::not_found("resource", format!("{}{}", backend, path)),
        StatusCode::TOO_MANY_REQUESTS => AppError::unavailable(backend.as_str(), "throttled (429)"),
        s if s.is_server_error() => AppError::unavailable(backend.as_str(), format!("server error {}", s)),
        s => AppError::Internal {
            message: format!("unexpected status {} from {}{}: {}", s, backend, path, body),
        },
    }
}

#[async_trait]
impl SourceConnector for ContentServerConnector {
    fn id(&self) -> &BackendId {
        &self.id
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::RealTime
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResult> {
        let mut params: Vec<(&str, String)> = vec![
            ("q", query.text.clone()),
            ("limit", query.limit.to_string()),
        ];
        for category in &query.filters.categories {
            params.push(("category", category.clone()));
        }
        for content_type in &query.filters.content_types {
            params.push(("content_type", content_type.clone()));
        }
        if let Some(after) = query.filters.modified_after {
            params.push(("modified_after", after.to_rfc3339()));
        }
        if let Some(before) = query.filters.modified_before {
            params.push(("modified_before", before.to_rfc3339()));
        }

        let response: SearchResponseDto = self.get_json(self.url(&["search"]), &params).await?;
        let total_count = response.total_count.unwrap_or(response.results.len());

        let hits = response
            .results
            .into_iter()
            .map(|hit| SearchHit {
                document: self.to_document_ref(hit.node),
                score: hit.score.clamp(0.0, 1.0),
                snippet: hit.snippet,
                backend: self.id.clone(),
            })
            .collect();

        Ok(SearchResult {
            hits,
            total_count,
            facets: response.facets,
            ..Default::default()
        })
    }

    async fn fetch_content(&self, id: &DocumentId, version: Option<Version>) -> Result<Vec<u8>> {
        let version = match version {
            Some(v) => v,
            None => self.fetch_metadata(id).await?.version,
        };
        let version = version.0.to_string();
        let url = self.node_url(id, &["versions", version.as_str(), "content"])?;
        let response = self.get(url, &[]).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::unavailable(self.id.as_str(), format!("content read failed: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn fetch_metadata(&self, id: &DocumentId) -> Result<DocumentRef> {
        let node: NodeDto = self.get_json(self.node_url(id, &[])?, &[]).await?;
        Ok(self.to_document_ref(node))
    }

    async fn list_versions(&self, id: &DocumentId) -> Result<Vec<VersionInfo>> {
        let response: VersionsResponseDto = self.get_json(self.node_url(id, &["versions"])?, &[]).await?;
        let mut versions: Vec<VersionInfo> = response
            .versions
            .into_iter()
            .map(|v| VersionInfo {
                version: Version(v.version),
                modified_at: v.modified,
            })
            .collect();
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    async fn categories(&self, id: &DocumentId) -> Result<Vec<String>> {
        let response: CategoriesResponseDto = self.get_json(self.node_url(id, &["categories"])?, &[]).await?;
        Ok(response.categories)
    }

    async fn ping(&self) -> Result<()> {
        self.get(self.url(&["serverinfo"]), &[]).await.map(|_| ())
    }
}
