//! Execution host state machine: `Unloaded → Loaded`, with an activity clock.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::engine::JsEngine;
use crate::error::{LoadError, RunError};

pub struct ExecutionHost {
    engine: JsEngine,
    loaded: AtomicBool,
    last_activity: Mutex<Instant>,
}

impl ExecutionHost {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            engine: JsEngine::spawn()?,
            loaded: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
        })
    }

    /// Replace whatever is loaded with `code`. A failure leaves the host unloaded.
    pub async fn load(&self, code: String) -> Result<(), LoadError> {
        self.touch();
        let bytes = code.len();
        let result = self.engine.load(code).await;
        self.loaded.store(result.is_ok(), Ordering::SeqCst);
        match &result {
            Ok(()) => info!(bytes, "code loaded"),
            Err(e) => info!(error = %e, "load rejected"),
        }
        self.touch();
        result
    }

    pub async fn run(&self, input: Value) -> Result<Value, RunError> {
        self.touch();
        if !self.is_loaded() {
            return Err(RunError::NotLoaded);
        }
        let result = self.engine.run(input).await;
        if let Err(e) = &result {
            debug!(error = %e, "run failed");
        }
        self.touch();
        result
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn touch(&self) {
        let now = Instant::now();
        let mut last = self.last_activity.lock().unwrap_or_else(|e| e.into_inner());
        if now > *last {
            *last = now;
        }
    }

    /// Time since the last load or run.
    pub fn idle_for(&self) -> Duration {
        let last = *self.last_activity.lock().unwrap_or_else(|e| e.into_inner());
        Instant::now().saturating_duration_since(last)
    }
}
