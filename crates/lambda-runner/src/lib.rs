//! Execution host that runs inside every instance.
//!
//! Submitted source is JavaScript defining a global `entrypoint(data)`.
//! `/load` evaluates it in a fresh engine context; `/run` calls the entry
//! point with the request body and answers with its JSON result. The process
//! shuts itself down after a configurable idle period.

pub mod engine;
pub mod error;
pub mod host;
pub mod idle;
pub mod server;

pub use error::{LoadError, RunError};
pub use host::ExecutionHost;
pub use server::build_router;
