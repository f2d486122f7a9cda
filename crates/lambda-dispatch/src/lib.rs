//! Dispatch engine: maps a code fingerprint to a warm, reusable instance.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher
//!   ├── InstancePool (fingerprint → InstanceEntry, per-fingerprint creation locks)
//!   ├── RuntimeClient (create / inspect / remove instances, shared network)
//!   ├── HostClient (probe, load, run against the runner in an instance)
//!   ├── RetryPolicy (fixed delay, transient failures only)
//!   └── Reaper (background sweep evicting idle entries)
//! ```
//!
//! # Guarantees
//!
//! - At most one live instance per fingerprint. Concurrent first calls with
//!   the same code share one creation; different fingerprints create in
//!   parallel.
//! - Failures raised by user code are surfaced once, never retried.
//! - Every runtime call and runner request carries a timeout, so a hung
//!   remote cannot hold a creation lock indefinitely.
//! - [`Dispatcher::shutdown`] reconciles pool state with the runtime. It must
//!   run on every exit path; [`Dispatcher::scoped`] does that for you.

pub mod dispatcher;
pub mod error;
pub mod host;
pub mod http_host;
pub mod pool;
pub mod readiness;
pub mod reaper;
pub mod retry;
mod runtime_call;

pub use dispatcher::Dispatcher;
pub use error::{DispatchError, DispatchResult, HostError};
pub use host::{HostClient, RunOutcome};
pub use http_host::HttpHostClient;
pub use pool::{InstanceEntry, InstancePool, InstanceState};
pub use retry::{Retry, RetryFailure, RetryPolicy};
