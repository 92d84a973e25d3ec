//! Collaborator contracts for a supervised connection.

use axum::http::{HeaderMap, Uri};
use axum::response::Response;

use crate::error::WsError;
use crate::frame::{FrameReader, Outbound};

/// Per-connection behaviour plugged into the session loop.
///
/// Every hook except [`WsConn::read_message`] runs on the session task, one
/// at a time, so implementations need no locking of their own state.
pub trait WsConn: Send + 'static {
    type Input: Send + 'static;

    /// Read one protocol unit. Runs on the reader thread and may block.
    fn read_message(frames: &mut FrameReader) -> Result<Self::Input, WsError>;

    fn name(&self) -> &str {
        "WsConn"
    }

    fn conn_id(&self) -> &str {
        ""
    }

    /// Emit one liveness probe.
    fn send_ping(&mut self) -> Result<(), WsError>;

    fn handle_message(&mut self, msg: Self::Input) -> Result<(), WsError>;

    /// Take ownership of the outbound half. An error ends the session before
    /// any message is handled.
    fn on_start(&mut self, outbound: Outbound) -> Result<(), WsError>;

    /// Suppress a read error with `Ok`, or end the session with `Err`.
    fn on_error(&mut self, err: WsError) -> Result<(), WsError> {
        Err(err)
    }

    /// Whether prolonged silence ends the session.
    fn on_timeout(&mut self) -> bool {
        true
    }

    /// Runs exactly once, whichever way the session ended.
    fn on_close(&mut self) {}
}

/// Decides which upgrade requests become connections.
pub trait WsHandler: Send + Sync + 'static {
    type Conn: WsConn;

    /// Build the collaborator for this request, or the response that
    /// refuses it.
    fn validate(&self, uri: &Uri, headers: &HeaderMap) -> Result<Self::Conn, Response>;
}
