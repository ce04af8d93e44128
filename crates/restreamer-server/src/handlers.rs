// SPDX-License-Identifier: Apache-2.0 OR MIT

//! HTTP request handlers: downstream stream serving, health, check and
//! statistics, per spec.md §6. Mirrors `hdds-gateway::handlers`'s
//! `Result<Response, ApiError>` signature and `ApiError`'s
//! `IntoResponse` conversion, generalized with a 401/403 path for the
//! auth contract (`ApiError` alone can't carry the `WWW-Authenticate`
//! header a 401 needs, so that one response is built directly).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream;
use serde::Serialize;

use crate::auth::{self, Decision};
use crate::AppState;

/// API error response.
#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl ApiError {
    fn not_found(name: &str) -> Self {
        Self {
            error: format!("no such stream: {name}"),
            code: 404,
        }
    }

    fn pool_full(name: &str) -> Self {
        Self {
            error: format!("stream {name} is at capacity"),
            code: 503,
        }
    }

    fn forbidden() -> Self {
        Self {
            error: "forbidden".into(),
            code: 403,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// GET on a stream's configured serve path: admits, authenticates, then
/// streams raw TS bytes until the client disconnects or the producer
/// shuts down (spec.md §6 Downstream contract).
pub async fn serve_stream(
    state: Arc<AppState>,
    name: String,
    remote: SocketAddr,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let runtime = state
        .streams
        .get(&name)
        .ok_or_else(|| ApiError::not_found(&name))?;

    let header_val = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    match auth::authenticate(runtime.config.auth.as_ref(), header_val) {
        Decision::Forbidden => return Err(ApiError::forbidden()),
        Decision::Unauthorized { realm, scheme } => {
            let mut resp = StatusCode::UNAUTHORIZED.into_response();
            if let Ok(value) = format!("{scheme} realm=\"{realm}\"").parse() {
                resp.headers_mut().insert(header::WWW_AUTHENTICATE, value);
            }
            return Ok(resp);
        }
        Decision::Allow => {}
    }

    let guard = runtime.distributor.serve_client(remote).ok_or_else(|| {
        tracing::warn!(event = "pool_full", stream = %name, remote = %remote);
        ApiError::pool_full(&name)
    })?;

    let body = Body::from_stream(stream::unfold(guard, |mut guard| async move {
        guard
            .recv()
            .await
            .map(|packet| (Ok::<_, std::io::Error>(packet.share()), guard))
    }));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp2t")
        .body(body)
        .expect("static headers always produce a valid response"))
}

/// GET on a stream's configured health path.
pub async fn health(state: Arc<AppState>, name: String) -> Result<Response, ApiError> {
    let runtime = state
        .streams
        .get(&name)
        .ok_or_else(|| ApiError::not_found(&name))?;

    let snap = runtime.stats.snapshot();
    let status = if runtime.upstream.connected() {
        "ok"
    } else {
        "disconnected"
    };
    Ok(Json(serde_json::json!({
        "status": status,
        "connections": snap.connections,
        "max": snap.max_connections,
        "full": snap.full_connections,
    }))
    .into_response())
}

/// GET on a stream's configured check path: 200 only while Streaming.
pub async fn check(state: Arc<AppState>, name: String) -> Result<StatusCode, ApiError> {
    match state.streams.get(&name) {
        Some(runtime) if runtime.upstream.connected() => Ok(StatusCode::OK),
        Some(_) => Ok(StatusCode::SERVICE_UNAVAILABLE),
        None => Err(ApiError::not_found(&name)),
    }
}

/// GET on the server-level statistics path: every stream plus `global`.
pub async fn statistics(state: Arc<AppState>) -> Response {
    let snapshots = state.stats_collector.lock().snapshot_all();
    Json(snapshots).into_response()
}
