//! Blocking-call adapter, reader shape.
//!
//! [`ReaderChan`] runs a synchronous, blocking read function on a dedicated
//! thread and delivers every outcome as a `Result` on a channel. Delivery
//! waits for the consumer, so a stalled consumer stalls reading.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::ConcError;
use crate::runner::CloseGuard;

/// Default watchdog interval; the watchdog ticks at 9/10 of it.
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(10);

type ReadFn<R, E> = Box<dyn FnMut() -> Result<R, E> + Send>;
type CloseFn = Box<dyn FnOnce() + Send + Sync>;

pub struct ReaderChan<R, E> {
    read: Option<ReadFn<R, E>>,
    wait_time: Duration,
    on_close: Option<CloseFn>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl<R: Send + 'static, E: Send + 'static> ReaderChan<R, E> {
    pub fn new<F>(read: F) -> Self
    where
        F: FnMut() -> Result<R, E> + Send + 'static,
    {
        Self {
            read: Some(Box::new(read)),
            wait_time: DEFAULT_WAIT_TIME,
            on_close: None,
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Called once after the read loop and the watchdog have both finished.
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

    /// Start the read loop and return the channel of results.
    ///
    /// The loop ends after delivering the first error, after a [`stop`], or
    /// when the returned receiver is dropped. An adapter starts once; later
    /// calls fail without disturbing the running loop.
    ///
    /// [`stop`]: ReaderChan::stop
    pub fn start(&mut self) -> Result<mpsc::Receiver<Result<R, E>>, ConcError> {
        let mut read = self
            .read
            .take()
            .ok_or(ConcError::AlreadyStarted("reader"))?;
        let (tx, rx) = mpsc::channel(1);
        let guard = CloseGuard::new(self.running.clone(), self.on_close.take());

        // Nine tenths of the wait time.
        let period = (self.wait_time - self.wait_time / 10).max(Duration::from_millis(1));
        let cancel = self.cancel.clone();
        let watchdog_guard = guard.clone();
        tokio::spawn(async move {
            let _guard = watchdog_guard;
            let Some(first_tick) = Instant::now().checked_add(period) else {
                cancel.cancelled().await;
                return;
            };
            let mut ticker = time::interval_at(first_tick, period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => trace!("reader watchdog tick"),
                }
            }
        });

        let cancel = self.cancel.clone();
        std::thread::spawn(move || {
            let _guard = guard;
            while !cancel.is_cancelled() {
                let result = read();
                let failed = result.is_err();
                if tx.blocking_send(result).is_err() {
                    debug!("reader consumer dropped");
                    break;
                }
                if failed {
                    break;
                }
            }
            // Take the watchdog down with the loop.
            cancel.cancel();
            debug!("reader loop exiting");
        });

        Ok(rx)
    }

    /// Request shutdown. A no-op when the adapter is not running. The read
    /// loop honours the request before its next call.
    pub fn stop(&self) {
        if !self.is_running() {
            return;
        }
        self.cancel.cancel();
    }
}

impl<R, E> Drop for ReaderChan<R, E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_reader(
        limit: usize,
    ) -> (
        impl FnMut() -> Result<usize, &'static str> + Send + 'static,
        Arc<AtomicUsize>,
    ) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let read = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < limit { Ok(n) } else { Err("eof") }
        };
        (read, calls)
    }

    #[tokio::test]
    async fn test_delivers_values_then_final_error() {
        let (read, calls) = counting_reader(3);
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        let mut reader = ReaderChan::new(read).on_close(move || {
            let _ = closed_tx.send(());
        });
        let mut results = reader.start().unwrap();

        assert_eq!(results.recv().await, Some(Ok(0)));
        assert_eq!(results.recv().await, Some(Ok(1)));
        assert_eq!(results.recv().await, Some(Ok(2)));
        assert_eq!(results.recv().await, Some(Err("eof")));
        assert_eq!(results.recv().await, None);

        tokio::time::timeout(Duration::from_secs(1), closed_rx)
            .await
            .unwrap()
            .unwrap();
        assert!(!reader.is_running());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let (read, calls) = counting_reader(1);
        let mut reader = ReaderChan::new(read);
        reader.stop();
        assert!(!reader.is_running());

        let mut results = reader.start().unwrap();
        assert_eq!(results.recv().await, Some(Ok(0)));
        assert_eq!(results.recv().await, Some(Err("eof")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (read, _calls) = counting_reader(usize::MAX);
        let mut reader = ReaderChan::new(read);
        let mut results = reader.start().unwrap();

        assert_eq!(
            reader.start().err(),
            Some(ConcError::AlreadyStarted("reader"))
        );
        assert!(reader.is_running());
        assert_eq!(results.recv().await, Some(Ok(0)));
        assert_eq!(results.recv().await, Some(Ok(1)));
        reader.stop();
    }

    #[tokio::test]
    async fn test_unbounded_wait_time_runs_and_stops() {
        let (read, _calls) = counting_reader(usize::MAX);
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        let mut reader = ReaderChan::new(read)
            .with_wait_time(Duration::MAX)
            .on_close(move || {
                let _ = closed_tx.send(());
            });
        let mut results = reader.start().unwrap();
        assert_eq!(results.recv().await, Some(Ok(0)));

        reader.stop();
        while results.recv().await.is_some() {}
        tokio::time::timeout(Duration::from_secs(1), closed_rx)
            .await
            .unwrap()
            .unwrap();
        assert!(!reader.is_running());
    }

    #[tokio::test]
    async fn test_stop_ends_loop_and_fires_close_once() {
        let (read, calls) = counting_reader(usize::MAX);
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        let mut reader = ReaderChan::new(read)
            .with_wait_time(Duration::from_millis(10))
            .on_close(move || {
                let _ = closed_tx.send(());
            });
        let mut results = reader.start().unwrap();
        assert_eq!(results.recv().await, Some(Ok(0)));

        reader.stop();
        // Drain whatever was in flight so the loop can observe the stop.
        while results.recv().await.is_some() {}

        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), closed_rx.recv())
                .await
                .unwrap(),
            Some(())
        );
        assert!(closed_rx.recv().await.is_none());
        assert!(!reader.is_running());

        let after = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after);
    }
}
