//! Lifecycle misuse errors.
//!
//! These are reported to the caller and never abort the process.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConcError {
    /// `start` was called on an adapter that has already been started.
    #[error("{0} already started")]
    AlreadyStarted(&'static str),

    /// The owning worker has exited and no longer accepts commands.
    #[error("{0} has stopped")]
    Stopped(&'static str),

    /// A non-blocking submission found the queue at capacity.
    #[error("{0} queue is full")]
    Full(&'static str),
}
