//! JSON collaborator: text frames in, JSON values out, JSON ping probes.

use axum::extract::ws::Message;
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use conc::WriterChan;

use crate::conn::{WsConn, WsHandler};
use crate::error::WsError;
use crate::frame::{FrameReader, Outbound, outbound_writer};

const DEFAULT_NAME: &str = "JSONConn";
const CONN_ID_LEN: usize = 10;

/// Random identifier for log correlation, 10 hex characters.
pub fn random_conn_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(CONN_ID_LEN);
    id
}

pub struct JsonConn {
    name: String,
    conn_id: String,
    writer: Option<WriterChan<Message, axum::Error>>,
}

impl Default for JsonConn {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonConn {
    pub fn new() -> Self {
        Self::with_name(DEFAULT_NAME)
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conn_id: random_conn_id(),
            writer: None,
        }
    }

    /// Queue one JSON text frame. Fails before `on_start` or once the
    /// writer has stopped.
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<(), WsError> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| WsError::Rejected("connection not started".into()))?;
        let text = serde_json::to_string(value).map_err(|e| WsError::Encode(e.to_string()))?;
        writer.send(Message::Text(text.into()))?;
        Ok(())
    }

    /// Queue an error report for the peer.
    pub fn send_error(&self, err: &WsError) -> Result<(), WsError> {
        self.send_json(&json!({
            "type": "error",
            "error": err.to_string(),
        }))
    }
}

impl WsConn for JsonConn {
    type Input = Value;

    fn read_message(frames: &mut FrameReader) -> Result<Value, WsError> {
        frames.next_json()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn conn_id(&self) -> &str {
        &self.conn_id
    }

    fn send_ping(&mut self) -> Result<(), WsError> {
        self.send_json(&json!({
            "type": "ping",
            "name": self.name,
            "connId": self.conn_id,
        }))
    }

    fn handle_message(&mut self, msg: Value) -> Result<(), WsError> {
        info!(conn_id = %self.conn_id, message = %msg, "Received message");
        Ok(())
    }

    fn on_start(&mut self, outbound: Outbound) -> Result<(), WsError> {
        self.writer = Some(outbound_writer(outbound)?);
        Ok(())
    }

    fn on_close(&mut self) {
        if let Some(writer) = &self.writer {
            writer.stop();
        }
    }
}

/// Accepts every upgrade request with a fresh [`JsonConn`].
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonHandler;

impl WsHandler for JsonHandler {
    type Conn = JsonConn;

    fn validate(&self, _uri: &Uri, _headers: &HeaderMap) -> Result<JsonConn, Response> {
        Ok(JsonConn::new())
    }
}
