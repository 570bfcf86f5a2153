//! Programmable in-process backend.
//!
//! Statements are answered from a table of canned results keyed by their
//! normalized text and parameters. Aborts, latency, errors and lost
//! sessions can be injected to drive the transaction runners through their
//! retry paths deterministically.

mod backend;
pub mod fixtures;
mod timing;

pub use backend::{BackendError, CommittedTransaction, ProgrammableBackend, RecordedRequest};
pub use timing::{BackendMethod, SimulatedExecutionTime};
