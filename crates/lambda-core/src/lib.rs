//! Shared types for the Lambda dispatcher.
//!
//! - [`Fingerprint`]: the digest of submitted source used as the pool key
//! - [`LambdaConfig`]: `lambda.toml` parsing with defaults for every field
//! - [`protocol`]: JSON bodies exchanged with the in-instance runner

pub mod config;
pub mod duration;
pub mod fingerprint;
pub mod protocol;

pub use config::{ConfigError, LambdaConfig};
pub use fingerprint::{Fingerprint, INSTANCE_NAME_PREFIX};
