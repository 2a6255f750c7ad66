use crate::config::Config;
use crate::engine::{spawn_engine, EngineHandle};
use crate::routes;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use facecheck_core::OnnxFaceEncoder;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state accessible from handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub started: Instant,
    /// Human-readable description of the loaded models, reported by /health.
    pub models: Arc<str>,
}

impl AppState {
    pub fn new(engine: EngineHandle, models: impl Into<Arc<str>>) -> Self {
        Self {
            engine,
            started: Instant::now(),
            models: models.into(),
        }
    }
}

/// Build the router with all routes and middleware.
pub fn router(state: AppState, max_body_bytes: usize, cors: bool) -> Router {
    let app = Router::new()
        .route("/verify-face", post(routes::verify_face))
        .route("/encode-face", post(routes::encode_face))
        .route("/verify-encoding", post(routes::verify_encoding))
        .route("/health", get(routes::health))
        .fallback(routes::not_found)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http());

    let app = if cors {
        app.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
    } else {
        app
    };

    app.with_state(state)
}

/// Load models, start the engine thread and serve until shutdown.
///
/// Model loading happens before the listener binds so a misconfigured
/// deployment fails at startup instead of on the first request.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let paths = config.model_paths();
    let encoder = OnnxFaceEncoder::load(&paths, config.detector_options(), config.recognizer_options())?;
    tracing::info!(
        detector = %paths.detector.display(),
        recognizer = %paths.recognizer.display(),
        "face models loaded"
    );

    let engine = spawn_engine(encoder, config.queue_depth)?;
    let models = format!(
        "{} + {}",
        config.detector_model, config.recognizer_model
    );
    let app = router(AppState::new(engine, models), config.max_body_bytes(), config.cors);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(
        addr = %config.bind_addr,
        max_body_mb = config.max_body_mb,
        cors = config.cors,
        "facecheckd listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facecheckd shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{png_base64, PixelEncoder};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app(max_body_bytes: usize, cors: bool) -> Router {
        let engine = spawn_engine(PixelEncoder, 1).unwrap();
        router(AppState::new(engine, "test"), max_body_bytes, cors)
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let img = png_base64([1, 2, 3]);
        let body = serde_json::json!({ "image": img }).to_string();
        let req = Request::builder()
            .method("POST")
            .uri("/encode-face")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let resp = app(16, false).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let bytes = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "request body too large");
    }

    #[tokio::test]
    async fn cors_headers_only_when_enabled() {
        let req = || {
            Request::builder()
                .uri("/health")
                .header("origin", "http://localhost:3000")
                .body(Body::empty())
                .unwrap()
        };

        let resp = app(1024, true).oneshot(req()).await.unwrap();
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");

        let resp = app(1024, false).oneshot(req()).await.unwrap();
        assert!(resp.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn get_on_post_route_is_405() {
        let req = Request::builder().uri("/verify-face").body(Body::empty()).unwrap();
        let resp = app(1024, false).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
