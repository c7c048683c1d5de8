//! Integrity Assistant API Gateway
//!
//! The entry point for caller requests.
//! Handles:
//! - Request validation and rate limiting
//! - Request routing to the query pipeline
//! - Startup wiring of backends, model and the index sync task
//! - Observability (logging, metrics, tracing)

mod handlers;
mod middleware;

use axum::{
    routing::{get, post},
    Router,
};
use integrity_common::{
    config::{AppConfig, ObservabilityConfig},
    llm, metrics,
    resilience::RetryPolicy,
};
use integrity_context::{IndexSyncer, QueryPipeline};
use integrity_search::BackendRegistry;
use metrics_exporter_prometheus::PrometheusBuilder;
use middleware::rate_limit::{create_rate_limiter, rate_limit_middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<QueryPipeline>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    init_tracing(&config.observability);

    info!("Starting Integrity Assistant gateway v{}", integrity_common::VERSION);

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!(%addr, "Prometheus exporter listening");
    }
    metrics::register_metrics();

    let config = Arc::new(config);

    // Backends, model and pipeline
    let registry = BackendRegistry::from_config(&config)?;
    if registry.is_empty() {
        warn!("No backends configured; every query will fail");
    }
    let model = llm::from_config(&config.llm)?;
    info!(model = model.model_name(), backends = registry.len(), "Backends registered");

    let sync_task = match (registry.real_time().cloned(), registry.search_index()) {
        (Some(source), Some(index)) => {
            let syncer = IndexSyncer::new(
                source,
                index,
                Arc::new(integrity_context::Enricher::new(&config.enrichment, Some(model.clone()))),
                config.sync.clone(),
                RetryPolicy::from_config(&config.retry),
            );
            info!(interval_secs = config.sync.interval_secs, "Starting index sync");
            Some(Arc::new(syncer).spawn())
        }
        _ => None,
    };

    let pipeline = QueryPipeline::from_config(&config, registry, model)?;

    let state = AppState {
        config: config.clone(),
        pipeline: Arc::new(pipeline),
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = sync_task {
        task.abort();
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let mut api_routes = Router::new()
        .route("/query", post(handlers::query::query))
        .route("/citations/resolve", post(handlers::citations::resolve));

    let limits = &state.config.rate_limit;
    if limits.enabled {
        match create_rate_limiter(limits.requests_per_second, limits.burst) {
            Ok(limiter) => {
                api_routes = api_routes.layer(axum::middleware::from_fn_with_state(limiter, rate_limit_middleware));
            }
            Err(e) => error!(error = %e, "Rate limiter disabled"),
        }
    }

    // Compose the app
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{app, json_body};
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn post_query(body: &str) -> Request<Body> {
        Request::post("/v1/query")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_is_always_up() {
        let response = app(AppConfig::default())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_burst_overflow() {
        let mut config = AppConfig::default();
        config.rate_limit.requests_per_second = 1;
        config.rate_limit.burst = 1;
        let app = app(config);

        let body = r#"{"query": "What concerns were raised about Acme Corp?"}"#;
        let first = app.clone().oneshot(post_query(body)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(post_query(body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let error = json_body(second).await;
        assert_eq!(error["error"]["code"], "RATE_LIMITED");
    }
}
