//! HTTP JSON-RPC server (`POST /rpc`).

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tokio::net::TcpListener;

use snapline_core::error::{Result, SnapError};
use snapline_rpc::jsonrpc::{self, JsonReply, JsonRequest};

use crate::proxy::{encoded, guard, Outcome, Proxy};
use crate::session::Session;

pub fn build_router(proxy: Proxy) -> Router {
    Router::new()
        .route(jsonrpc::PATH, post(handle_rpc))
        .with_state(proxy)
}

async fn handle_rpc(State(proxy): State<Proxy>, body: Bytes) -> Response {
    let req: JsonRequest = match serde_json::from_slice(&body) {
        Ok(r) if !body.is_empty() => r,
        _ => return Json(JsonReply::err(0, jsonrpc::ILL_FORMED)).into_response(),
    };
    let payload = match req.body() {
        Ok(p) => p,
        Err(e) => return Json(JsonReply::err(req.id, e.to_string())).into_response(),
    };

    let session = proxy.session().clone();
    match guard(&session, encoded::dispatch(&proxy, &req.method, &payload)).await {
        Outcome::Done(Ok(out)) => Json(JsonReply::ok(req.id, &out)).into_response(),
        Outcome::Done(Err(e)) => {
            tracing::debug!(parent: session.span(), method = %req.method, error = %e, "call failed");
            Json(JsonReply::err(req.id, e.to_string())).into_response()
        }
        Outcome::Panicked => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

pub async fn serve(session: Arc<Session>, listener: TcpListener) -> Result<()> {
    let stop = session.termination().token().clone();
    let app = build_router(Proxy::new(session));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await
        .map_err(|e| SnapError::Transport(format!("http server failed: {e}")))
}
