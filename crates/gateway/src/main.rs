//! CiteForge API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Conversation sessions and grounded, cited answers
//! - Retrieval-only search
//! - Rate limiting
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    extract::Request,
    middleware::{from_fn, Next},
    routing::{get, post},
    Router,
};
use citeforge_common::{
    config::AppConfig, errors::Result, metrics, telemetry, SessionRegistry, VERSION,
};
use citeforge_context::Components;
use citeforge_search::RetrievalMode;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::middleware::rate_limit::{create_rate_limiter, rate_limit_middleware};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub components: Components,
    pub sessions: Arc<SessionRegistry>,
    pub default_mode: RetrievalMode,
}

impl AppState {
    pub fn new(components: Components) -> Result<Self> {
        let default_mode = components.config.retrieval.default_mode.parse()?;
        Ok(Self {
            components,
            sessions: Arc::new(SessionRegistry::new()),
            default_mode,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;
    telemetry::init_tracing(&config.observability);

    info!("Starting CiteForge API Gateway v{}", VERSION);
    config.validate()?;

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()?;
        info!("Prometheus exporter listening on {}", metrics_addr);
    }
    metrics::register_metrics();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let components = Components::build(config).await?;
    let state = AppState::new(components)?;

    // Build the router
    let app = create_router(state)?;

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Result<Router> {
    let config = state.components.config.clone();

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let mut api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Session endpoints
        .route("/sessions", post(handlers::sessions::create_session))
        .route(
            "/sessions/{id}",
            get(handlers::sessions::get_session).delete(handlers::sessions::delete_session),
        )
        .route("/sessions/{id}/ask", post(handlers::sessions::ask))
        // Search endpoints
        .route("/search", post(handlers::search::search))
        .route_layer(from_fn(middleware::metrics::track_requests));

    if config.rate_limit.enabled {
        let limiter = create_rate_limiter(&config.rate_limit)?;
        let limit = config.rate_limit.requests_per_second;
        api_routes = api_routes.layer(from_fn(move |request: Request, next: Next| {
            let limiter = limiter.clone();
            rate_limit_middleware(request, next, limiter, limit)
        }));
    }

    // Compose the app
    Ok(Router::new()
        .nest("/v2", api_routes)
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use citeforge_common::chunks::{Chunk, ChunkStore};
    use citeforge_common::embeddings::HashingEmbedder;
    use citeforge_context::{Generator, Script, ScriptedGenerator};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn chunk(id: &str, text: &str, source: &str, position: u32) -> Chunk {
        Chunk {
            id: id.into(),
            text: text.into(),
            source: source.into(),
            position,
        }
    }

    async fn state_with(mut config: AppConfig, generator: Arc<dyn Generator>) -> AppState {
        config.vector_index.backend = "memory".into();
        let store = ChunkStore::from_chunks(vec![
            chunk(
                "cable-1",
                "Cable cars climb Powell Street from the turnaround at Market.",
                "transit.pdf",
                3,
            ),
            chunk(
                "ferry-1",
                "The Ferry Building hosts a farmers market on Saturdays.",
                "food.pdf",
                7,
            ),
            chunk(
                "owl-1",
                "Owl buses run overnight when the metro is closed.",
                "transit.pdf",
                9,
            ),
        ])
        .unwrap();
        let components = Components::assemble(
            config,
            Arc::new(store),
            Arc::new(HashingEmbedder::new(64)),
            generator,
        )
        .await
        .unwrap();
        AppState::new(components).unwrap()
    }

    async fn router() -> Router {
        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        let state = state_with(config, Arc::new(ScriptedGenerator::new(Script::Extractive))).await;
        create_router(state).unwrap()
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn new_session(app: &Router) -> String {
        let (status, body) = send(app, Method::POST, "/v2/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        body["session_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = router().await;
        let (status, body) = send(&app, Method::GET, "/v2/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ready_reports_components() {
        let app = router().await;
        let (status, body) = send(&app, Method::GET, "/v2/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["checks"]["vector_index"]["status"], "up");
        assert_eq!(body["checks"]["generator"]["detail"], "scripted");
    }

    #[tokio::test]
    async fn test_ask_returns_cited_answer_and_records_history() {
        let app = router().await;
        let id = new_session(&app).await;

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/v2/sessions/{}/ask", id),
            Some(json!({ "question": "Where do cable cars start?", "mode": "bm25" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["evidence"], "grounded");
        assert_eq!(body["mode"], "bm25");
        assert_eq!(body["citations"][0]["marker"], 1);
        assert_eq!(body["citations"][0]["chunk_id"], "cable-1");
        assert!(body["answer"].as_str().unwrap().ends_with("[1]"));

        let (status, body) = send(&app, Method::GET, &format!("/v2/sessions/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        let turns = body["turns"].as_array().unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0]["role"], "user");
        assert_eq!(turns[1]["role"], "assistant");
    }

    #[tokio::test]
    async fn test_ask_without_evidence_declines() {
        let app = router().await;
        let id = new_session(&app).await;

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/v2/sessions/{}/ask", id),
            Some(json!({ "question": "zeppelin", "mode": "bm25" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["evidence"], "empty");
        assert!(body["citations"].as_array().unwrap().is_empty());
        assert!(body["answer"].as_str().unwrap().starts_with("I don't know"));
    }

    #[tokio::test]
    async fn test_ask_validation_errors() {
        let app = router().await;
        let id = new_session(&app).await;
        let uri = format!("/v2/sessions/{}/ask", id);

        let (status, body) = send(&app, Method::POST, &uri, Some(json!({ "question": "" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["field"], "question");

        let (status, body) = send(
            &app,
            Method::POST,
            &uri,
            Some(json!({ "question": "ferry", "mode": "semantic" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["field"], "mode");
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let app = router().await;
        let uri = format!("/v2/sessions/{}/ask", uuid::Uuid::new_v4());
        let (status, _) = send(&app, Method::POST, &uri, Some(json!({ "question": "ferry" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_failed_generation_leaves_history_untouched() {
        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        let state = state_with(
            config,
            Arc::new(ScriptedGenerator::new(Script::FailOnStart("upstream down".into()))),
        )
        .await;
        let app = create_router(state).unwrap();
        let id = new_session(&app).await;

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/v2/sessions/{}/ask", id),
            Some(json!({ "question": "farmers market", "mode": "bm25" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (_, body) = send(&app, Method::GET, &format!("/v2/sessions/{}", id), None).await;
        assert!(body["turns"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_ask_stops_generation() {
        use std::time::Duration;

        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        let answer = "market ".repeat(40) + "[1]";
        let generator = Arc::new(
            ScriptedGenerator::new(Script::answer(&answer)).with_delay(Duration::from_millis(30)),
        );
        let state = state_with(config, generator.clone()).await;
        let app = create_router(state).unwrap();
        let id = new_session(&app).await;

        // Client goes away mid-stream
        let ask_uri = format!("/v2/sessions/{}/ask", id);
        let ask = send(
            &app,
            Method::POST,
            &ask_uri,
            Some(json!({ "question": "farmers market", "mode": "bm25" })),
        );
        assert!(tokio::time::timeout(Duration::from_millis(150), ask).await.is_err());
        assert_eq!(generator.calls(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let emitted = generator.fragments_emitted();
        assert!(emitted > 0 && emitted < 41);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(generator.fragments_emitted(), emitted);

        let (_, body) = send(&app, Method::GET, &format!("/v2/sessions/{}", id), None).await;
        assert!(body["turns"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_session() {
        let app = router().await;
        let id = new_session(&app).await;
        let uri = format!("/v2/sessions/{}", id);

        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_search_reports_ranks() {
        let app = router().await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/v2/search",
            Some(json!({ "query": "farmers market saturdays", "top_k": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "hybrid");
        let results = body["results"].as_array().unwrap();
        assert!(!results.is_empty() && results.len() <= 2);
        assert_eq!(results[0]["chunk_id"], "ferry-1");
        assert_eq!(results[0]["bm25_rank"], 1);
        assert_eq!(results[0]["source"], "food.pdf");
    }

    #[tokio::test]
    async fn test_search_rejects_out_of_range_top_k() {
        let app = router().await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/v2/search",
            Some(json!({ "query": "ferry", "top_k": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["field"], "top_k");
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_excess_requests() {
        let mut config = AppConfig::default();
        config.rate_limit.enabled = true;
        config.rate_limit.requests_per_second = 1;
        config.rate_limit.burst = 1;
        let state = state_with(config, Arc::new(ScriptedGenerator::new(Script::Extractive))).await;
        let app = create_router(state).unwrap();

        let (first, _) = send(&app, Method::GET, "/v2/health", None).await;
        let (second, body) = send(&app, Method::GET, "/v2/health", None).await;
        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
    }
}
