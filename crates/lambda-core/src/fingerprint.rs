//! Code fingerprints.
//!
//! A fingerprint is the first 16 hex characters of the SHA-256 digest of the
//! submitted source text. It keys the instance pool and names the instance.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Prefix of every runtime resource name derived from a fingerprint.
pub const INSTANCE_NAME_PREFIX: &str = "runner_";

/// Number of hex characters kept from the digest.
const FINGERPRINT_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint of a block of source text.
    pub fn of(source: &str) -> Self {
        let digest = Sha256::digest(source.as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(FINGERPRINT_LEN);
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The deterministic runtime name for this fingerprint's instance.
    pub fn instance_name(&self) -> String {
        format!("{INSTANCE_NAME_PREFIX}{}", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
