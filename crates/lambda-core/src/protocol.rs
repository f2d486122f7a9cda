//! Runner wire protocol.
//!
//! | Method | Path | Success | Failure |
//! |---|---|---|---|
//! | POST | `/load` | `200 {"status":"loaded"}` | `400` `invalid_request` / `load_failed` |
//! | POST | `/run` | `200 <entrypoint result>` | `400 not_loaded`, `500 user_code` |
//! | GET | `/healthz` | `200 {"status":"ok","loaded":bool}` | |
//!
//! Every failure body is an [`ErrorBody`].

use serde::{Deserialize, Serialize};

pub const LOAD_PATH: &str = "/load";
pub const RUN_PATH: &str = "/run";
pub const HEALTH_PATH: &str = "/healthz";

/// Detail text prefix for exceptions raised by user code.
pub const USER_CODE_PREFIX: &str = "User code raised an exception: ";
/// Detail text prefix for source that fails to install.
pub const LOAD_FAILED_PREFIX: &str = "Error executing code: ";
pub const MISSING_ENTRYPOINT: &str = "Code must define an 'entrypoint(data)' function";
pub const NOT_LOADED: &str = "No code loaded. Call /load first.";
pub const INVALID_CODE_FIELD: &str = "Missing or invalid 'code' field";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRequest {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResponse {
    pub status: String,
}

impl LoadResponse {
    pub fn loaded() -> Self {
        Self {
            status: "loaded".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub loaded: bool,
}

/// Machine-readable failure category carried by every error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request body was malformed (e.g. missing `code`).
    InvalidRequest,
    /// The source could not be installed or defines no entry point.
    LoadFailed,
    /// `/run` was called before a successful `/load`.
    NotLoaded,
    /// The entry point raised.
    UserCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
    pub kind: ErrorKind,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_is_snake_case_on_the_wire() {
        let body = ErrorBody::new(ErrorKind::UserCode, "boom");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], "user_code");
        assert_eq!(json["detail"], "boom");
    }

    #[test]
    fn load_response_shape() {
        let json = serde_json::to_string(&LoadResponse::loaded()).unwrap();
        assert_eq!(json, r#"{"status":"loaded"}"#);
    }
}
