//! HTTP surface of the runner.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/load` | Install `{"code": ...}` into a fresh namespace |
//! | POST | `/run` | Call `entrypoint(body)` and return its JSON result |
//! | GET | `/healthz` | Liveness and whether code is loaded |

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use lambda_core::protocol::{
    ErrorBody, ErrorKind, HEALTH_PATH, HealthResponse, INVALID_CODE_FIELD, LOAD_PATH,
    LoadResponse, RUN_PATH,
};
use serde_json::Value;
use tracing::debug;

use crate::error::{LoadError, RunError};
use crate::host::ExecutionHost;

pub fn build_router(host: Arc<ExecutionHost>) -> Router {
    Router::new()
        .route(LOAD_PATH, post(load_code))
        .route(RUN_PATH, post(run_code))
        .route(HEALTH_PATH, get(health))
        .with_state(host)
}

fn error_response(status: StatusCode, kind: ErrorKind, detail: impl Into<String>) -> Response {
    (status, Json(ErrorBody::new(kind, detail))).into_response()
}

/// POST /load
async fn load_code(State(host): State<Arc<ExecutionHost>>, body: Bytes) -> Response {
    let code = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(mut payload)) => match payload.remove("code") {
            Some(Value::String(code)) => code,
            _ => return error_response(StatusCode::BAD_REQUEST, ErrorKind::InvalidRequest, INVALID_CODE_FIELD),
        },
        _ => return error_response(StatusCode::BAD_REQUEST, ErrorKind::InvalidRequest, INVALID_CODE_FIELD),
    };

    match host.load(code).await {
        Ok(()) => Json(LoadResponse::loaded()).into_response(),
        // No error body: the dispatcher treats an undecodable 503 as transient.
        Err(e @ LoadError::EngineUnavailable) => {
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, ErrorKind::LoadFailed, e.to_string()),
    }
}

/// POST /run
async fn run_code(State(host): State<Arc<ExecutionHost>>, body: Bytes) -> Response {
    if !host.is_loaded() {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorKind::NotLoaded,
            RunError::NotLoaded.to_string(),
        );
    }

    let input = match serde_json::from_slice::<Value>(&body) {
        Ok(input) => input,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorKind::InvalidRequest,
                format!("request body is not JSON: {e}"),
            );
        }
    };

    match host.run(input).await {
        Ok(result) => Json(result).into_response(),
        Err(e @ RunError::NotLoaded) => {
            error_response(StatusCode::BAD_REQUEST, ErrorKind::NotLoaded, e.to_string())
        }
        Err(e @ RunError::UserCode(_)) => {
            debug!(error = %e, "entrypoint raised");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::UserCode, e.to_string())
        }
        Err(e @ RunError::InvalidInput(_)) => {
            error_response(StatusCode::BAD_REQUEST, ErrorKind::InvalidRequest, e.to_string())
        }
        Err(e @ RunError::EngineUnavailable) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

/// GET /healthz
async fn health(State(host): State<Arc<ExecutionHost>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        loaded: host.is_loaded(),
    })
}
