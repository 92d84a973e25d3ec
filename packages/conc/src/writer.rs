//! Blocking-call adapter, writer shape.
//!
//! [`WriterChan`] queues messages and hands them one at a time to a
//! synchronous write function running on a dedicated thread.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ConcError;
use crate::runner::CloseGuard;

const DEFAULT_QUEUE_CAPACITY: usize = 64;

type WriteFn<W, E> = Box<dyn FnMut(W) -> Result<(), E> + Send>;
type CloseFn = Box<dyn FnOnce() + Send + Sync>;

pub struct WriterChan<W, E> {
    write: Option<WriteFn<W, E>>,
    queue: Option<mpsc::Sender<W>>,
    capacity: usize,
    on_close: Option<CloseFn>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl<W, E> WriterChan<W, E>
where
    W: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    pub fn new<F>(write: F) -> Self
    where
        F: FnMut(W) -> Result<(), E> + Send + 'static,
    {
        Self {
            write: Some(Box::new(write)),
            queue: None,
            capacity: DEFAULT_QUEUE_CAPACITY,
            on_close: None,
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Called once after the write loop has finished.
    pub fn on_close<F>(mut self, on_close: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        self.on_close = Some(Box::new(on_close));
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the write loop. Must be called from within a tokio runtime.
    ///
    /// The loop ends on the first failed write, or on [`stop`]. An adapter
    /// starts once; later calls fail without disturbing the running loop.
    ///
    /// [`stop`]: WriterChan::stop
    pub fn start(&mut self) -> Result<(), ConcError> {
        let mut write = self
            .write
            .take()
            .ok_or(ConcError::AlreadyStarted("writer"))?;
        let (tx, mut rx) = mpsc::channel::<W>(self.capacity);
        self.queue = Some(tx);

        let guard = CloseGuard::new(self.running.clone(), self.on_close.take());
        let cancel = self.cancel.clone();
        let runtime = Handle::current();
        std::thread::spawn(move || {
            let _guard = guard;
            loop {
                let next = runtime.block_on(async {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        msg = rx.recv() => msg,
                    }
                });
                let Some(msg) = next else {
                    break;
                };
                if let Err(e) = write(msg) {
                    warn!("Write failed, stopping writer: {}", e);
                    break;
                }
            }
            // Refuse further sends before the close callback observes us.
            drop(rx);
            cancel.cancel();
            debug!("writer loop exiting");
        });
        Ok(())
    }

    /// Queue a message without waiting. Fails when the queue is full or the
    /// writer is not running.
    pub fn send(&self, msg: W) -> Result<(), ConcError> {
        let queue = self.queue.as_ref().ok_or(ConcError::Stopped("writer"))?;
        queue.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConcError::Full("writer"),
            mpsc::error::TrySendError::Closed(_) => ConcError::Stopped("writer"),
        })
    }

    /// Queue a message, waiting for capacity.
    pub async fn send_async(&self, msg: W) -> Result<(), ConcError> {
        let queue = self.queue.as_ref().ok_or(ConcError::Stopped("writer"))?;
        queue
            .send(msg)
            .await
            .map_err(|_| ConcError::Stopped("writer"))
    }

    /// Request shutdown. A no-op when the writer is not running; queued
    /// messages that were not yet written are dropped.
    pub fn stop(&self) {
        if !self.is_running() {
            return;
        }
        self.cancel.cancel();
    }
}

impl<W, E> Drop for WriterChan<W, E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
