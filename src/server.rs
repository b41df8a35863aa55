use crate::auth::KeyRing;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::ingest;
use crate::logging::SharedLogger;
use crate::proxy::{self, ChatDispatch};
use crate::translate::openai_types::ErrorEnvelope;

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub client: reqwest::Client,
    pub keys: Arc<KeyRing>,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/messages", post(handle_messages))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `Authorization: Bearer <token>` value, if present.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

fn proxy_key(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

fn resolve_credential(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<String, GatewayError> {
    let bearer = bearer_token(headers);
    let header_key = proxy_key(headers, &state.config.access.proxy_key_header);
    state
        .keys
        .resolve(bearer.as_deref(), header_key.as_deref())
}

fn error_response(err: &GatewayError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let envelope = match err {
        GatewayError::Auth { message } => ErrorEnvelope::authentication(message),
        GatewayError::Validation { message } => ErrorEnvelope::invalid_request(message),
        GatewayError::ThinkingBudget { .. } => ErrorEnvelope::invalid_request(err.to_string()),
        GatewayError::Upstream { envelope, .. } => envelope.clone(),
        other => ErrorEnvelope::api_error(other.to_string()),
    };
    (status, Json(envelope)).into_response()
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Response {
    let headers = request.headers().clone();

    let credential = match resolve_credential(&state, &headers) {
        Ok(c) => c,
        Err(e) => {
            state.logger.warn("server", format!("credential resolution failed: {}", e));
            return error_response(&e);
        }
    };

    let is_multipart = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false);

    let req = if is_multipart {
        match Multipart::from_request(request, &state).await {
            Ok(multipart) => match ingest::chat_request_from_multipart(multipart).await {
                Ok(r) => r,
                Err(e) => return error_response(&e),
            },
            Err(e) => {
                let err = GatewayError::validation(format!("malformed multipart body: {e}"));
                return error_response(&err);
            }
        }
    } else {
        let body = match Bytes::from_request(request, &state).await {
            Ok(b) => b,
            Err(e) => {
                let err = GatewayError::validation(format!("failed to read body: {e}"));
                return error_response(&err);
            }
        };
        match ingest::parse_chat_payload(&body) {
            Ok(r) => r,
            Err(e) => return error_response(&e),
        }
    };

    match proxy::dispatch_chat(req, &credential, &state.config, &state.client, &state.logger).await
    {
        Ok(ChatDispatch::Complete(resp)) => Json(*resp).into_response(),
        Ok(ChatDispatch::Stream(chunks)) => {
            let event_stream = chunks.map(|result| -> std::result::Result<Event, Infallible> {
                match result {
                    Ok(payload) => Ok(Event::default().data(payload)),
                    Err(_) => Ok(Event::default().data("[DONE]")),
                }
            });
            Sse::new(event_stream)
                .keep_alive(axum::response::sse::KeepAlive::default())
                .into_response()
        }
        Err(e) => {
            state.logger.error("server", format!("chat completion failed: {}", e));
            error_response(&e)
        }
    }
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let credential = match resolve_credential(&state, &headers) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };

    match proxy::proxy_messages(body, &credential, &state.config, &state.client, &state.logger)
        .await
    {
        Ok(upstream) => {
            let status =
                StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = upstream
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/json")
                .to_string();

            // Relay the upstream body without buffering so streaming
            // responses stay live.
            Response::builder()
                .status(status)
                .header("content-type", content_type)
                .header("cache-control", "no-cache")
                .body(Body::from_stream(upstream.bytes_stream()))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => {
            state.logger.error("server", format!("passthrough failed: {}", e));
            error_response(&e)
        }
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
