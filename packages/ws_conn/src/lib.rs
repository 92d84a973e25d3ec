//! WS Conn - supervised WebSocket connections
//!
//! Drives long-lived duplex connections with a ping timer, a liveness
//! timeout, and a blocking reader thread, delegating every decision to a
//! [`WsConn`] collaborator.
//!
//! # Example
//!
//! ```no_run
//! use ws_conn::{JsonHandler, WsConnConfig, ws_router};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = ws_router("/ws", JsonHandler, WsConnConfig::default());
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

pub mod config;
pub mod conn;
mod error;
pub mod frame;
pub mod json;
pub mod serve;
pub mod session;

pub use config::{FileConfig, MAX_PERIOD, WsConnConfig, load_config};
pub use conn::{WsConn, WsHandler};
pub use error::{ReadDisposition, WsError};
pub use frame::{FrameReader, Outbound, ReadDeadline, outbound_writer};
pub use json::{JsonConn, JsonHandler};
pub use serve::{ws_router, ws_serve};
pub use session::{SessionEnd, drive, handle_conn};
