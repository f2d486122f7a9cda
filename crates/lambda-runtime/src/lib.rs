//! Container primitives used by the dispatcher.
//!
//! The dispatcher never talks to a container engine directly. It goes through
//! the [`RuntimeClient`] trait, which covers exactly what the instance
//! lifecycle needs:
//!
//! - **Network**: one shared network, created at startup, removed at shutdown
//! - **Instances**: create+start with a published service port, inspect
//!   status and port, force-remove
//!
//! # Architecture
//!
//! ```text
//! RuntimeClient (trait, Send + Sync)
//!   ├── DockerRuntime (bollard, local daemon)
//!   └── test fakes (in-memory)
//! ```
//!
//! Implementations must tolerate concurrent calls for different instance
//! names. Removal is best-effort: the caller logs and discards its error.

pub mod docker;
pub mod error;
pub mod instance;

use async_trait::async_trait;

pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeResult};
pub use instance::{InstanceHandle, InstanceSpec, InstanceStatus, ServiceAddress};

/// Container primitives the dispatcher builds instance lifecycles on.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Create the shared network if it does not exist yet.
    async fn ensure_network(&self) -> RuntimeResult<()>;

    /// Create and start an instance exposing `spec.service_port`.
    async fn create_instance(&self, spec: &InstanceSpec) -> RuntimeResult<InstanceHandle>;

    /// Inspect an instance by name. `Ok(None)` when it does not exist.
    async fn get_instance(&self, name: &str) -> RuntimeResult<Option<InstanceHandle>>;

    /// Stop (forcibly) and remove an instance. Missing instances are not an error.
    async fn remove_instance(&self, name: &str) -> RuntimeResult<()>;

    /// Remove the shared network. Missing networks are not an error.
    async fn remove_network(&self) -> RuntimeResult<()>;
}
