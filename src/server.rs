//! HTTP boundary.
//!
//! Thin axum router over the lifecycle manager: `POST /pair` issues a
//! pairing code, `POST /restore` brings an archived session back, and
//! `GET /health` is a liveness probe. Exactly one response per request; the
//! flow keeps running in the background after the reply is sent.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::connection::{FlowReply, FlowRequest, FlowResponder, LifecycleManager};
use crate::error::{Error, PairingError};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    manager: Arc<LifecycleManager>,
}

impl AppState {
    pub fn new(manager: Arc<LifecycleManager>) -> Self {
        Self { manager }
    }
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/pair", post(pair))
        .route("/restore", post(restore))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until a shutdown signal arrives.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Pairing service listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}

#[derive(Debug, Deserialize)]
struct PairBody {
    number: String,
}

#[derive(Debug, Deserialize)]
struct RestoreBody {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct PairResponse {
    code: String,
}

#[derive(Debug, Serialize)]
struct LinkedResponse {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn pair(State(state): State<AppState>, Json(body): Json<PairBody>) -> Response {
    match dispatch(state, FlowRequest::Pair {
        number: body.number,
    })
    .await
    {
        Ok(reply) => reply_response(reply),
        Err(e) => error_response(e),
    }
}

async fn restore(State(state): State<AppState>, Json(body): Json<RestoreBody>) -> Response {
    match dispatch(state, FlowRequest::Restore {
        session_id: body.session_id,
    })
    .await
    {
        Ok(reply) => reply_response(reply),
        Err(e) => error_response(e),
    }
}

/// Hand the request to the lifecycle manager and wait for its single reply.
///
/// The flow itself keeps running (upload, confirmation message, teardown)
/// after the reply; later failures surface in logs only.
async fn dispatch(state: AppState, request: FlowRequest) -> Result<FlowReply, Error> {
    let (responder, rx) = FlowResponder::channel();
    let manager = state.manager.clone();
    tokio::spawn(async move {
        manager.run(request, responder).await;
    });
    rx.await.unwrap_or_else(|_| {
        Err(PairingError::FlowEnded {
            reason: "flow task dropped".to_string(),
        }
        .into())
    })
}

fn reply_response(reply: FlowReply) -> Response {
    match reply {
        FlowReply::PairingCode(code) => (StatusCode::OK, Json(PairResponse { code })).into_response(),
        FlowReply::Linked { session_id } => {
            (StatusCode::OK, Json(LinkedResponse { session_id })).into_response()
        }
    }
}

fn error_response(error: Error) -> Response {
    let status = match &error {
        Error::Pairing(PairingError::InvalidNumber { .. }) => StatusCode::BAD_REQUEST,
        Error::Pairing(PairingError::SessionNotFound { .. }) => StatusCode::NOT_FOUND,
        Error::Pairing(_) | Error::Connection(_) => StatusCode::BAD_GATEWAY,
        Error::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorBody {
        error: error.to_string(),
    }))
        .into_response()
}
