//! Dynamic many-to-one multiplexer.
//!
//! [`FanIn`] merges any number of source receivers into one destination. The
//! set of sources changes at runtime; every mutation is funneled through a
//! single worker task that owns the input list, so the list needs no lock.
//!
//! Removal uses `swap_remove`, so the input list does not keep insertion
//! order. Values from one source arrive in that source's order; there is no
//! ordering between different sources.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::ConcError;
use crate::pipe::{Pipe, PipeEnd, PipeId};
use crate::runner::{RunnerBase, RunnerHandle, StopCommand};

const DEFAULT_CONTROL_CAPACITY: usize = 1;
const DEFAULT_OUTPUT_CAPACITY: usize = 1;

/// Opaque identity of a source added to a [`FanIn`].
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// Mutation vocabulary accepted by the fan-in worker.
pub enum FanInCmd<T> {
    Stop,
    Add {
        id: SourceId,
        source: mpsc::Receiver<T>,
    },
    Remove {
        id: SourceId,
    },
    Count {
        respond_to: oneshot::Sender<usize>,
    },
}

impl<T: Send + 'static> StopCommand for FanInCmd<T> {
    fn stop() -> Self {
        Self::Stop
    }
}

/// How a source left the fan-in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RemoveReason {
    /// Removed with [`FanIn::remove`].
    Removed,
    /// Every sender of the source was dropped.
    Closed,
    /// The destination's receiver was dropped, so the source's values had
    /// nowhere to go.
    DestinationClosed,
    /// The fan-in shut down while the source was still tracked.
    Shutdown,
}

/// Notification passed to the removal callback. Fires exactly once for every
/// source that was added.
pub struct Removed<T> {
    pub id: SourceId,
    pub reason: RemoveReason,
    /// The source receiver, handed back to the caller.
    pub source: Option<mpsc::Receiver<T>>,
}

pub type RemovedCallback<T> = Box<dyn FnMut(Removed<T>) + Send>;

/// Builder for a [`FanIn`] with non-default settings.
pub struct FanInBuilder<T> {
    output: Option<mpsc::Sender<T>>,
    output_capacity: usize,
    control_capacity: usize,
    on_removed: Option<RemovedCallback<T>>,
}

impl<T: Send + 'static> Default for FanInBuilder<T> {
    fn default() -> Self {
        Self {
            output: None,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
            control_capacity: DEFAULT_CONTROL_CAPACITY,
            on_removed: None,
        }
    }
}

impl<T: Send + 'static> FanInBuilder<T> {
    /// Merge into a caller-owned destination. The fan-in never closes it.
    pub fn output(mut self, output: mpsc::Sender<T>) -> Self {
        self.output = Some(output);
        self
    }

    /// Capacity of the self-allocated destination.
    pub fn output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity.max(1);
        self
    }

    pub fn control_capacity(mut self, capacity: usize) -> Self {
        self.control_capacity = capacity.max(1);
        self
    }

    pub fn on_removed<F>(mut self, callback: F) -> Self
    where
        F: FnMut(Removed<T>) + Send + 'static,
    {
        self.on_removed = Some(Box::new(callback));
        self
    }

    /// Spawn the worker and return a running fan-in.
    pub fn start(self) -> FanIn<T> {
        let (output, merged) = match self.output {
            Some(output) => (output, None),
            None => {
                let (tx, rx) = mpsc::channel(self.output_capacity);
                (tx, Some(rx))
            }
        };
        let self_owned = merged.is_some();

        let (base, runner) = RunnerBase::new("fan-in", self.control_capacity);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let on_removed = self.on_removed;

        base.start(move |base| {
            FanInActor {
                base,
                inputs: Vec::new(),
                output: Some(output),
                self_owned,
                done_tx,
                done_rx,
                next_pipe: 0,
                on_removed,
            }
            .run()
        });

        FanIn {
            runner,
            next_id: AtomicU64::new(0),
            merged,
        }
    }
}

/// Handle to a running fan-in.
pub struct FanIn<T> {
    runner: RunnerHandle<FanInCmd<T>>,
    next_id: AtomicU64,
    merged: Option<mpsc::Receiver<T>>,
}

impl<T: Send + 'static> FanIn<T> {
    /// Start a fan-in. With `None` the fan-in allocates its own destination,
    /// available through [`FanIn::output`], and closes it on shutdown.
    pub fn new(output: Option<mpsc::Sender<T>>) -> Self {
        let builder = FanInBuilder::default();
        match output {
            Some(output) => builder.output(output).start(),
            None => builder.start(),
        }
    }

    pub fn builder() -> FanInBuilder<T> {
        FanInBuilder::default()
    }

    /// Start merging `source`. Waits until the worker accepts the command.
    pub async fn add(&self, source: mpsc::Receiver<T>) -> Result<SourceId, ConcError> {
        let id = SourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.runner.send(FanInCmd::Add { id, source }).await?;
        Ok(id)
    }

    /// Add several sources, one command each.
    pub async fn add_all<I>(&self, sources: I) -> Result<Vec<SourceId>, ConcError>
    where
        I: IntoIterator<Item = mpsc::Receiver<T>>,
    {
        let mut ids = Vec::new();
        for source in sources {
            ids.push(self.add(source).await?);
        }
        Ok(ids)
    }

    /// Stop merging the source with this id. Unknown ids are ignored.
    pub async fn remove(&self, id: SourceId) -> Result<(), ConcError> {
        self.runner.send(FanInCmd::Remove { id }).await
    }

    /// Number of tracked sources, answered by the worker in command order.
    /// Once the worker has shut down every input has been drained, so this
    /// reports zero.
    pub async fn count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self
            .runner
            .send(FanInCmd::Count { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Take the merged receiver. `None` when a caller-owned destination was
    /// supplied, or when it was already taken.
    pub fn output(&mut self) -> Option<mpsc::Receiver<T>> {
        self.merged.take()
    }

    /// Ask the worker to shut down after the commands already queued.
    pub async fn stop(&self) -> Result<(), ConcError> {
        self.runner.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    /// Resolves once shutdown has finished: every pipe is stopped and a
    /// self-allocated destination is closed.
    pub async fn closed(&self) {
        self.runner.closed().await
    }
}

struct Input<T> {
    id: SourceId,
    pipe: Pipe<T>,
}

struct FanInActor<T> {
    base: RunnerBase<FanInCmd<T>>,
    inputs: Vec<Input<T>>,
    output: Option<mpsc::Sender<T>>,
    self_owned: bool,
    done_tx: mpsc::UnboundedSender<(PipeId, PipeEnd)>,
    done_rx: mpsc::UnboundedReceiver<(PipeId, PipeEnd)>,
    next_pipe: u64,
    on_removed: Option<RemovedCallback<T>>,
}

impl<T: Send + 'static> FanInActor<T> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                Some((pipe_id, end)) = self.done_rx.recv() => self.pipe_closed(pipe_id, end).await,
                cmd = self.base.recv() => match cmd {
                    Some(FanInCmd::Add { id, source }) => self.add(id, source),
                    Some(FanInCmd::Remove { id }) => self.remove(id).await,
                    Some(FanInCmd::Count { respond_to }) => {
                        let _ = respond_to.send(self.inputs.len());
                    }
                    Some(FanInCmd::Stop) | None => break,
                },
            }
        }
        self.shutdown().await;
    }

    fn add(&mut self, id: SourceId, source: mpsc::Receiver<T>) {
        let Some(output) = self.output.clone() else {
            return;
        };
        let pipe_id = PipeId(self.next_pipe);
        self.next_pipe += 1;

        let done = self.done_tx.clone();
        let pipe = Pipe::spawn(pipe_id, source, output, move |pipe_id, end| {
            if end != PipeEnd::Stopped {
                let _ = done.send((pipe_id, end));
            }
        });

        self.base.work().add(1);
        self.inputs.push(Input { id, pipe });
        debug!(source = %id, pipe = %pipe_id, inputs = self.inputs.len(), "input added");
    }

    async fn remove(&mut self, id: SourceId) {
        match self.inputs.iter().position(|input| input.id == id) {
            Some(index) => self.remove_at(index, RemoveReason::Removed).await,
            None => debug!(source = %id, "remove of untracked source ignored"),
        }
    }

    async fn pipe_closed(&mut self, pipe_id: PipeId, end: PipeEnd) {
        let reason = match end {
            PipeEnd::DestinationClosed => RemoveReason::DestinationClosed,
            PipeEnd::SourceClosed | PipeEnd::Stopped => RemoveReason::Closed,
        };
        // A pipe that was already removed explicitly has nothing left to do.
        if let Some(index) = self
            .inputs
            .iter()
            .position(|input| input.pipe.id() == pipe_id)
        {
            self.remove_at(index, reason).await;
        }
    }

    async fn remove_at(&mut self, index: usize, reason: RemoveReason) {
        let Input { id, pipe } = self.inputs.swap_remove(index);
        pipe.stop();
        let source = pipe.join().await;
        debug!(source = %id, ?reason, inputs = self.inputs.len(), "input removed");
        self.notify_removed(id, reason, source);
        self.base.work().done();
    }

    fn notify_removed(
        &mut self,
        id: SourceId,
        reason: RemoveReason,
        source: Option<mpsc::Receiver<T>>,
    ) {
        if let Some(on_removed) = self.on_removed.as_mut() {
            on_removed(Removed { id, reason, source });
        }
    }

    async fn shutdown(mut self) {
        let inputs = std::mem::take(&mut self.inputs);
        for input in &inputs {
            input.pipe.stop();
        }
        for Input { id, pipe } in inputs {
            let source = pipe.join().await;
            self.notify_removed(id, RemoveReason::Shutdown, source);
            self.base.work().done();
        }
        self.base.work().wait().await;

        // Dropping the last sender is what closes a self-allocated destination.
        self.output = None;
        debug!(self_owned = self.self_owned, "fan-in output released");
        self.base.cleanup();
    }
}
