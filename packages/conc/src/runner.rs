//! Lifecycle primitive shared by every worker-owning component.
//!
//! A worker is split the same way as an actor: the [`RunnerBase`] owns the
//! receiving half of the control channel and runs inside the spawned task,
//! while the cloneable [`RunnerHandle`] submits commands to it. The handle
//! observes teardown through the control channel itself: once the worker has
//! run [`RunnerBase::cleanup`], sends fail and [`RunnerHandle::closed`]
//! resolves.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span};

use crate::error::ConcError;

/// Command vocabularies that include a stop request.
pub trait StopCommand: Send + 'static {
    fn stop() -> Self;
}

/// Counter of dependent units (e.g. live forwarders) that must finish before
/// teardown completes.
#[derive(Debug)]
pub struct WorkGroup {
    counter: watch::Sender<usize>,
}

impl Default for WorkGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkGroup {
    pub fn new() -> Self {
        let (counter, _) = watch::channel(0);
        Self { counter }
    }

    pub fn add(&self, n: usize) {
        self.counter.send_modify(|count| *count += n);
    }

    pub fn done(&self) {
        self.counter.send_modify(|count| {
            debug_assert!(*count > 0, "WorkGroup::done without matching add");
            *count = count.saturating_sub(1);
        });
    }

    pub fn outstanding(&self) -> usize {
        *self.counter.borrow()
    }

    /// Wait until every added unit has been marked done.
    pub async fn wait(&self) {
        let mut rx = self.counter.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

/// Worker-side half of the lifecycle primitive.
pub struct RunnerBase<C> {
    name: &'static str,
    control: Option<mpsc::Receiver<C>>,
    work: WorkGroup,
    running: bool,
}

/// Caller-side half of the lifecycle primitive.
pub struct RunnerHandle<C> {
    control: mpsc::Sender<C>,
    name: &'static str,
}

impl<C> Clone for RunnerHandle<C> {
    fn clone(&self) -> Self {
        Self {
            control: self.control.clone(),
            name: self.name,
        }
    }
}

impl<C: StopCommand> RunnerBase<C> {
    /// Create the control channel. `capacity` bounds how many commands may
    /// queue before submitters block.
    pub fn new(name: &'static str, capacity: usize) -> (Self, RunnerHandle<C>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let base = Self {
            name,
            control: Some(rx),
            work: WorkGroup::new(),
            running: false,
        };
        (base, RunnerHandle { control: tx, name })
    }

    /// Launch the owned worker. `body` receives the base and is expected to
    /// drive the command loop and call [`RunnerBase::cleanup`] on exit.
    pub fn start<F, Fut>(mut self, body: F) -> JoinHandle<()>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.running = true;
        let name = self.name;
        debug!(worker = name, "starting worker");
        tokio::spawn(body(self).instrument(info_span!("worker", name)))
    }

    pub fn is_running(&self) -> bool {
        self.running && self.control.is_some()
    }

    /// Next command in submission order. `None` once the control channel is
    /// released or every handle is gone.
    pub async fn recv(&mut self) -> Option<C> {
        match self.control.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    pub fn work(&self) -> &WorkGroup {
        &self.work
    }

    /// Release the control channel. Runs its body at most once; returns
    /// whether this call performed the release.
    pub fn cleanup(&mut self) -> bool {
        let Some(mut rx) = self.control.take() else {
            return false;
        };
        rx.close();
        self.running = false;
        debug!(
            worker = self.name,
            outstanding = self.work.outstanding(),
            "control channel released"
        );
        true
    }
}

impl<C> Drop for RunnerBase<C> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.control.take() {
            rx.close();
        }
    }
}

impl<C: StopCommand> RunnerHandle<C> {
    /// Submit a command, waiting for queue capacity.
    pub async fn send(&self, cmd: C) -> Result<(), ConcError> {
        self.control
            .send(cmd)
            .await
            .map_err(|_| ConcError::Stopped(self.name))
    }

    pub async fn stop(&self) -> Result<(), ConcError> {
        self.send(C::stop()).await
    }

    /// Whether the worker still accepts commands.
    pub fn is_running(&self) -> bool {
        !self.control.is_closed()
    }

    /// Resolves once the worker has released its control channel.
    pub async fn closed(&self) {
        self.control.closed().await
    }
}

/// Close notification shared by the sub-workers of an adapter. Whichever
/// holder drops it last clears the running flag and fires the callback, so
/// the callback runs exactly once regardless of which path finished first.
pub(crate) struct CloseGuard {
    running: Arc<AtomicBool>,
    on_close: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CloseGuard {
    pub(crate) fn new(
        running: Arc<AtomicBool>,
        on_close: Option<Box<dyn FnOnce() + Send + Sync>>,
    ) -> Arc<Self> {
        running.store(true, Ordering::SeqCst);
        Arc::new(Self { running, on_close })
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    enum Cmd {
        Stop,
        Ping(tokio::sync::oneshot::Sender<usize>),
    }

    impl StopCommand for Cmd {
        fn stop() -> Self {
            Cmd::Stop
        }
    }

    #[tokio::test]
    async fn test_work_group_counts() {
        let work = WorkGroup::new();
        work.add(2);
        assert_eq!(work.outstanding(), 2);
        work.done();
        work.done();
        assert_eq!(work.outstanding(), 0);
        tokio::time::timeout(Duration::from_secs(1), work.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_runs_once() {
        let (mut base, handle) = RunnerBase::<Cmd>::new("test", 1);
        assert!(handle.is_running());
        assert!(base.cleanup());
        assert!(!base.cleanup());
        assert!(!handle.is_running());
        assert_eq!(handle.stop().await, Err(ConcError::Stopped("test")));
    }

    #[tokio::test]
    async fn test_worker_serves_commands_until_stop() {
        let (base, handle) = RunnerBase::<Cmd>::new("test", 1);
        assert!(!base.is_running());
        base.start(|mut base| async move {
            assert!(base.is_running());
            let mut served = 0;
            while let Some(cmd) = base.recv().await {
                match cmd {
                    Cmd::Stop => break,
                    Cmd::Ping(respond_to) => {
                        served += 1;
                        let _ = respond_to.send(served);
                    }
                }
            }
            base.cleanup();
            assert!(!base.is_running());
        });

        for expected in 1..=3 {
            let (tx, rx) = tokio::sync::oneshot::channel();
            handle.send(Cmd::Ping(tx)).await.unwrap();
            assert_eq!(rx.await.unwrap(), expected);
        }

        handle.stop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle.closed())
            .await
            .unwrap();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_close_guard_fires_once_on_last_drop() {
        let running = Arc::new(AtomicBool::new(false));
        let (tx, rx) = std::sync::mpsc::channel();
        let guard = CloseGuard::new(
            running.clone(),
            Some(Box::new(move || {
                let _ = tx.send(());
            })),
        );
        let other = guard.clone();
        assert!(running.load(Ordering::SeqCst));

        drop(guard);
        assert!(running.load(Ordering::SeqCst));
        assert!(rx.try_recv().is_err());

        drop(other);
        assert!(!running.load(Ordering::SeqCst));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
