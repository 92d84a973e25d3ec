//! Single-source forwarder.
//!
//! A [`Pipe`] relays one source receiver into a destination sender that it
//! shares with other pipes. It never closes the destination: dropping its own
//! sender clone is the only thing it does to it. The source is handed back
//! from [`Pipe::join`] so the caller keeps ownership of it.

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Identity of one forwarder, used to match its completion notice.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct PipeId(pub u64);

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipe-{}", self.0)
    }
}

/// Why a pipe stopped forwarding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PipeEnd {
    /// Every sender of the source was dropped and the source drained.
    SourceClosed,
    /// The destination receiver was dropped.
    DestinationClosed,
    /// [`Pipe::stop`] was called.
    Stopped,
}

/// Handle to a running forwarder task.
pub struct Pipe<T> {
    id: PipeId,
    cancel: CancellationToken,
    task: JoinHandle<mpsc::Receiver<T>>,
}

impl<T: Send + 'static> Pipe<T> {
    /// Start forwarding `source` into `destination`.
    ///
    /// `on_done` runs exactly once when forwarding ends, whichever way it
    /// ends, and before the source is handed back.
    pub fn spawn<F>(
        id: PipeId,
        mut source: mpsc::Receiver<T>,
        destination: mpsc::Sender<T>,
        on_done: F,
    ) -> Self
    where
        F: FnOnce(PipeId, PipeEnd) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let end = forward(&mut source, &destination, &token).await;
            drop(destination);
            trace!(pipe = %id, ?end, "pipe finished");
            on_done(id, end);
            source
        });
        Self { id, cancel, task }
    }
}

impl<T> Pipe<T> {
    pub fn id(&self) -> PipeId {
        self.id
    }

    /// Request a forced end. A value already received from the source but not
    /// yet accepted by the destination is dropped.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the forwarder to finish and take back its source.
    ///
    /// Returns `None` only if the task was aborted by the runtime.
    pub async fn join(self) -> Option<mpsc::Receiver<T>> {
        self.task.await.ok()
    }
}

async fn forward<T>(
    source: &mut mpsc::Receiver<T>,
    destination: &mpsc::Sender<T>,
    cancel: &CancellationToken,
) -> PipeEnd {
    loop {
        let value = tokio::select! {
            biased;
            () = cancel.cancelled() => return PipeEnd::Stopped,
            value = source.recv() => match value {
                Some(value) => value,
                None => return PipeEnd::SourceClosed,
            },
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => return PipeEnd::Stopped,
            sent = destination.send(value) => {
                if sent.is_err() {
                    return PipeEnd::DestinationClosed;
                }
            }
        }
    }
}
