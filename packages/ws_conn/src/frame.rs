//! Blocking access to the inbound half of a socket.
//!
//! Collaborators read from a [`FrameReader`] on the reader thread. Each read
//! is bounded by the session's [`ReadDeadline`], which the session pushes
//! forward whenever traffic arrives.

use std::pin::Pin;
use std::time::Duration;

use axum::extract::ws::{Message, close_code};
use futures::Sink;
use futures::stream::{BoxStream, Stream};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;

use conc::{ConcError, WriterChan};

use crate::error::WsError;

/// The outbound half of a socket, handed to the collaborator on start.
pub type Outbound = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// Shared read deadline. The session owns it, the reader observes it.
#[derive(Debug)]
pub struct ReadDeadline {
    at: watch::Sender<Instant>,
}

// Roughly thirty years; stands in for a deadline that cannot be represented.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

impl ReadDeadline {
    pub fn new(timeout: Duration) -> Self {
        let (at, _) = watch::channel(after(timeout));
        Self { at }
    }

    /// Move the deadline to `timeout` from now.
    pub fn extend(&self, timeout: Duration) {
        self.at.send_replace(after(timeout));
    }

    /// Expire the deadline, releasing a read that is parked on it.
    pub fn expire(&self) {
        self.at.send_replace(Instant::now());
    }

    pub fn subscribe(&self) -> watch::Receiver<Instant> {
        self.at.subscribe()
    }
}

pub struct FrameReader {
    frames: BoxStream<'static, Result<Message, axum::Error>>,
    deadline: watch::Receiver<Instant>,
    runtime: Handle,
}

impl FrameReader {
    pub fn new<S>(frames: S, deadline: watch::Receiver<Instant>, runtime: Handle) -> Self
    where
        S: Stream<Item = Result<Message, axum::Error>> + Send + 'static,
    {
        Self {
            frames: frames.boxed(),
            deadline,
            runtime,
        }
    }

    /// Block until the next data frame. Control frames are skipped; a close
    /// frame becomes [`WsError::Closed`] and the end of the stream becomes
    /// [`WsError::Eof`].
    ///
    /// Must not be called from inside the runtime.
    pub fn next_message(&mut self) -> Result<Message, WsError> {
        let runtime = self.runtime.clone();
        runtime.block_on(self.recv())
    }

    pub fn next_text(&mut self) -> Result<String, WsError> {
        match self.next_message()? {
            Message::Text(text) => Ok(text.as_str().to_owned()),
            Message::Binary(bytes) => {
                String::from_utf8(bytes.to_vec()).map_err(|e| WsError::Decode(e.to_string()))
            }
            other => Err(WsError::Decode(format!("unexpected frame: {other:?}"))),
        }
    }

    pub fn next_json<T: DeserializeOwned>(&mut self) -> Result<T, WsError> {
        match self.next_message()? {
            Message::Text(text) => Ok(serde_json::from_str(text.as_str())?),
            Message::Binary(bytes) => Ok(serde_json::from_slice(&bytes)?),
            other => Err(WsError::Decode(format!("unexpected frame: {other:?}"))),
        }
    }

    async fn recv(&mut self) -> Result<Message, WsError> {
        let mut deadline_open = true;
        loop {
            let deadline = *self.deadline.borrow_and_update();
            tokio::select! {
                frame = self.frames.next() => match frame {
                    None => return Err(WsError::Eof),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(Message::Close(frame))) => {
                        return Err(match frame {
                            Some(frame) => WsError::Closed {
                                code: frame.code,
                                reason: frame.reason.as_str().to_owned(),
                            },
                            None => WsError::Closed {
                                code: close_code::STATUS,
                                reason: String::new(),
                            },
                        });
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        trace!("control frame skipped");
                    }
                    Some(Ok(msg)) => return Ok(msg),
                },
                () = tokio::time::sleep_until(deadline) => return Err(WsError::ReadTimeout),
                changed = self.deadline.changed(), if deadline_open => {
                    // Without an owner the last deadline stays in force.
                    if changed.is_err() {
                        deadline_open = false;
                    }
                }
            }
        }
    }
}

/// Start a writer thread that owns `outbound` and sends whatever is queued
/// on the returned adapter. Must be called from inside the runtime.
pub fn outbound_writer(
    mut outbound: Outbound,
) -> Result<WriterChan<Message, axum::Error>, ConcError> {
    let runtime = Handle::current();
    let mut writer = WriterChan::new(move |msg: Message| runtime.block_on(outbound.send(msg)));
    writer.start()?;
    Ok(writer)
}
