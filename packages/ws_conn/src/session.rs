//! Connection supervision loop.
//!
//! A session moves through three states: awaiting start (the collaborator's
//! `on_start` hook), active (the select loop below), and terminated. All
//! session state is touched from the session task only; the reader thread
//! talks to it through the inbound channel and the shared read deadline.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, Stream};
use futures_util::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info, info_span, warn};

use conc::ReaderChan;

use crate::config::{MAX_PERIOD, WsConnConfig};
use crate::conn::WsConn;
use crate::error::{ReadDisposition, WsError};
use crate::frame::{FrameReader, Outbound, ReadDeadline};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Why a session ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionEnd {
    /// `on_start` failed; no message was handled.
    StartFailed,
    /// The liveness timeout elapsed and the collaborator agreed to close.
    TimedOut,
    /// The inbound stream ended without a close frame.
    EndOfStream,
    /// The peer closed normally or is going away.
    Closed(u16),
    /// The collaborator's error hook refused a read error.
    Fatal,
}

/// Supervise an upgraded socket until the session ends.
pub async fn handle_conn<C: WsConn>(
    socket: WebSocket,
    conn: C,
    config: &WsConnConfig,
) -> SessionEnd {
    let (sink, stream) = socket.split();
    drive(stream, sink, conn, config).await
}

/// Supervise any frame stream/sink pair. The sink is handed to the
/// collaborator through `on_start`.
pub async fn drive<C, St, Si>(
    stream: St,
    sink: Si,
    mut conn: C,
    config: &WsConnConfig,
) -> SessionEnd
where
    C: WsConn,
    St: Stream<Item = Result<Message, axum::Error>> + Send + 'static,
    Si: Sink<Message, Error = axum::Error> + Send + 'static,
{
    let span = info_span!("ws_session", name = %conn.name(), conn_id = %conn.conn_id());
    async move {
        let ping_period = config.ping_period.clamp(MIN_PERIOD, MAX_PERIOD);
        let pong_period = config.pong_period.clamp(MIN_PERIOD, MAX_PERIOD);

        let deadline = ReadDeadline::new(pong_period);
        let mut frames = FrameReader::new(stream, deadline.subscribe(), Handle::current());
        let mut reader = ReaderChan::new(move || C::read_message(&mut frames));

        let end = match reader.start() {
            Ok(inbound) => {
                let mut session = Session {
                    conn: &mut conn,
                    deadline: &deadline,
                    ping_period,
                    pong_period,
                };
                session.run(inbound, Box::pin(sink)).await
            }
            Err(e) => {
                warn!(error = %e, "failed to start inbound reader");
                SessionEnd::StartFailed
            }
        };

        reader.stop();
        deadline.expire();
        conn.on_close();
        info!(?end, "connection closed");
        end
    }
    .instrument(span)
    .await
}

struct Session<'a, C> {
    conn: &'a mut C,
    deadline: &'a ReadDeadline,
    ping_period: Duration,
    pong_period: Duration,
}

impl<C: WsConn> Session<'_, C> {
    async fn run(
        &mut self,
        mut inbound: mpsc::Receiver<Result<C::Input, WsError>>,
        outbound: Outbound,
    ) -> SessionEnd {
        let start = Instant::now();
        let mut ping = time::interval_at(start + self.ping_period, self.ping_period);
        let mut liveness = time::interval_at(start + self.pong_period, self.pong_period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_read = start;

        if let Err(e) = self.conn.on_start(outbound) {
            warn!(error = %e, "on_start failed");
            return SessionEnd::StartFailed;
        }
        info!("connection started");

        self.deadline.extend(self.pong_period);
        self.ping();

        let mut inbound_open = true;
        loop {
            tokio::select! {
                _ = ping.tick() => self.ping(),
                _ = liveness.tick() => {
                    let elapsed = last_read.elapsed();
                    if elapsed > self.pong_period && self.conn.on_timeout() {
                        info!(
                            elapsed_secs = elapsed.as_secs(),
                            "no inbound traffic within liveness timeout"
                        );
                        return SessionEnd::TimedOut;
                    }
                }
                result = inbound.recv(), if inbound_open => {
                    let Some(result) = result else {
                        debug!("inbound reader finished");
                        inbound_open = false;
                        continue;
                    };
                    self.deadline.extend(self.pong_period);
                    last_read = Instant::now();
                    if let Some(end) = self.dispatch(result) {
                        return end;
                    }
                }
            }
        }
    }

    fn ping(&mut self) {
        if let Err(e) = self.conn.send_ping() {
            warn!(error = %e, "send_ping failed");
        }
    }

    fn dispatch(&mut self, result: Result<C::Input, WsError>) -> Option<SessionEnd> {
        let err = match result {
            Ok(msg) => {
                if let Err(e) = self.conn.handle_message(msg) {
                    warn!(error = %e, "handle_message failed");
                }
                return None;
            }
            Err(err) => err,
        };

        match err.disposition() {
            ReadDisposition::EndOfStream => Some(SessionEnd::EndOfStream),
            ReadDisposition::Continue => {
                debug!(error = %err, "abnormal closure, keeping session");
                None
            }
            ReadDisposition::Terminate(code) => {
                info!(code, "peer closed connection");
                Some(SessionEnd::Closed(code))
            }
            ReadDisposition::Delegate => match self.conn.on_error(err) {
                Ok(()) => None,
                Err(e) => {
                    warn!(error = %e, "read error is fatal");
                    Some(SessionEnd::Fatal)
                }
            },
        }
    }
}
