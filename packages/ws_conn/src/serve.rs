//! HTTP-to-WebSocket upgrade step.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{debug, info, warn};

use crate::config::WsConnConfig;
use crate::conn::{WsConn, WsHandler};
use crate::session::handle_conn;

pub struct WsState<H> {
    pub handler: H,
    pub config: WsConnConfig,
}

/// Mount `handler` at `path`.
pub fn ws_router<H: WsHandler>(path: &str, handler: H, config: WsConnConfig) -> Router {
    let state = Arc::new(WsState { handler, config });
    Router::new()
        .route(path, get(ws_serve::<H>))
        .with_state(state)
}

/// Validate the request, then upgrade and supervise the connection.
///
/// Validation runs first so a handler can refuse with its own response. A
/// request that cannot be upgraded gets `400 WS Upgrade failed`.
pub async fn ws_serve<H: WsHandler>(
    State(state): State<Arc<WsState<H>>>,
    uri: Uri,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let conn = match state.handler.validate(&uri, &headers) {
        Ok(conn) => conn,
        Err(response) => {
            debug!(%uri, status = %response.status(), "upgrade request refused");
            return response;
        }
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            warn!(%uri, error = %rejection, "WS upgrade failed");
            return (StatusCode::BAD_REQUEST, "WS Upgrade failed").into_response();
        }
    };

    let config = state.config.clone();
    upgrade
        .read_buffer_size(config.read_buffer_size)
        .write_buffer_size(config.write_buffer_size)
        .on_failed_upgrade(|e| warn!(error = %e, "WS upgrade failed"))
        .on_upgrade(move |socket| async move {
            info!(name = %conn.name(), conn_id = %conn.conn_id(), "Start handling conn");
            let end = handle_conn(socket, conn, &config).await;
            debug!(?end, "conn handler finished");
        })
}
