// ABOUTME: HTTP/WS API surface: router assembly, shared handler context, error envelope.
// ABOUTME: Recovery and access-log layers wrap everything; auth wraps all but /health.

mod handlers;
mod middleware;
mod request;
mod ws;

pub use request::DeployRequest;

use crate::config::Config;
use crate::deploy::Pipeline;
use crate::drivers::proxy::ProxyManager;
use crate::error::Error;
use crate::logstream::Hub;
use crate::ports::PortAllocator;
use crate::queue::BuildQueue;
use crate::state::Store;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Everything the handlers need, shared behind an Arc.
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub ports: Arc<PortAllocator>,
    pub queue: Arc<BuildQueue>,
    pub proxy: Arc<ProxyManager>,
    pub hub: Arc<Hub>,
    pub pipeline: Arc<Pipeline>,
    pub started_at: Instant,
}

/// The error envelope every failing route answers with.
pub fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

/// Handler-facing error that renders as the envelope.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> ApiError {
        ApiError {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> ApiError {
        ApiError::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> ApiError {
        ApiError::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> ApiError {
        ApiError::new(StatusCode::CONFLICT, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_body(self.status, self.message)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> ApiError {
        let status = match err {
            Error::AppNotFound(_) => StatusCode::NOT_FOUND,
            Error::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    let authed = Router::new()
        .route("/apps", get(handlers::list_apps))
        .route("/apps/deploy", post(handlers::deploy))
        .route("/apps/{app_id}/status", get(handlers::app_status))
        .route("/apps/{app_id}", delete(handlers::teardown))
        .route("/apps/{app_id}/restart", post(handlers::restart))
        .route("/apps/{app_id}/exec", post(handlers::exec))
        .route("/apps/{app_id}/logs", get(handlers::logs))
        .route("/update", post(handlers::update))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&ctx),
            middleware::auth,
        ));

    let streaming = Router::new()
        .route("/apps/{app_id}/logs/stream", get(ws::log_stream))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&ctx),
            middleware::stream_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(authed)
        .merge(streaming)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(|_panic: Box<dyn std::any::Any + Send>| {
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }))
        .with_state(ctx)
}

/// Serve until the token fires, then drain in-flight requests, giving up
/// after the configured grace period.
pub async fn serve(
    ctx: Arc<AppContext>,
    cancel: tokio_util::sync::CancellationToken,
) -> crate::error::Result<()> {
    let listen = ctx.config.server.listen.clone();
    let grace = ctx.config.server.shutdown_grace;
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(%listen, dev = ctx.config.dev, "rad listening");

    let app = router(ctx);
    let graceful = {
        let cancel = cancel.clone();
        async move { cancel.cancelled().await }
    };
    let serve_fut = std::future::IntoFuture::into_future(
        axum::serve(listener, app).with_graceful_shutdown(graceful),
    );
    tokio::pin!(serve_fut);

    let deadline = async {
        cancel.cancelled().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = &mut serve_fut => result.map_err(Into::into),
        _ = deadline => {
            tracing::warn!(grace = ?grace, "server: shutdown grace expired, dropping in-flight requests");
            Ok(())
        }
    }
}
