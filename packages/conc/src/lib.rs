//! Conc - channel-based worker lifecycles
//!
//! Building blocks for background loops that talk over tokio channels:
//!
//! - [`RunnerBase`] / [`RunnerHandle`]: a worker task that owns its control
//!   channel, with idempotent cleanup and an outstanding-work counter.
//! - [`Pipe`]: forwards one source receiver into a shared destination.
//! - [`FanIn`]: merges a changing set of sources into one destination.
//! - [`ReaderChan`] / [`WriterChan`]: wrap a blocking read or write call in a
//!   dedicated thread and expose it as a channel.
//!
//! # Example
//!
//! ```no_run
//! use conc::FanIn;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut fan_in = FanIn::new(None);
//!     let mut merged = fan_in.output().unwrap();
//!
//!     let (tx, rx) = mpsc::channel(8);
//!     let id = fan_in.add(rx).await.unwrap();
//!     tx.send("hello").await.unwrap();
//!     assert_eq!(merged.recv().await, Some("hello"));
//!
//!     fan_in.remove(id).await.unwrap();
//!     fan_in.stop().await.unwrap();
//!     fan_in.closed().await;
//! }
//! ```

mod error;
pub mod fan_in;
pub mod pipe;
pub mod reader;
pub mod runner;
pub mod writer;

pub use error::ConcError;
pub use fan_in::{FanIn, FanInBuilder, FanInCmd, RemoveReason, Removed, SourceId};
pub use pipe::{Pipe, PipeEnd, PipeId};
pub use reader::ReaderChan;
pub use runner::{RunnerBase, RunnerHandle, StopCommand, WorkGroup};
pub use writer::WriterChan;
