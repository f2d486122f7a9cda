//! In-memory fakes for the runtime and the runner.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lambda_core::LambdaConfig;
use lambda_dispatch::{Dispatcher, HostClient, HostError, RunOutcome};
use lambda_runtime::{
    InstanceHandle, InstanceSpec, InstanceStatus, RuntimeClient, RuntimeError, RuntimeResult,
    ServiceAddress,
};
use serde_json::{Value, json};

pub const ECHO_CODE: &str = "function entrypoint(data) { return { echo: data }; }";
pub const RAISING_CODE: &str =
    "function entrypoint(data) { throw new Error('intentional error from user code'); }";
pub const BROKEN_CODE: &str = "function entrypoint(data) {";

// ── Runtime ────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeRuntime {
    instances: Mutex<HashMap<String, InstanceHandle>>,
    next_port: AtomicU32,
    pub creates: AtomicUsize,
    pub removals: Mutex<Vec<String>>,
    pub network_ensures: AtomicUsize,
    pub network_removals: AtomicUsize,
    /// In-flight creates, and the highest concurrency seen.
    active_creates: AtomicUsize,
    pub max_concurrent_creates: AtomicUsize,
    create_delay: Duration,
    /// Never publish a port, so readiness cannot succeed.
    never_ready: bool,
    fail_create: bool,
    /// Calls that never complete.
    hang_create: bool,
    hang_remove: bool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            next_port: AtomicU32::new(40000),
            ..Default::default()
        }
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn hanging_create(mut self) -> Self {
        self.hang_create = true;
        self
    }

    pub fn hanging_remove(mut self) -> Self {
        self.hang_remove = true;
        self
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn removals(&self) -> Vec<String> {
        self.removals.lock().unwrap().clone()
    }

    pub fn network_removals(&self) -> usize {
        self.network_removals.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> Vec<String> {
        let mut names: Vec<_> = self.instances.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Simulate an instance exiting on its own.
    pub fn stop(&self, name: &str) {
        if let Some(handle) = self.instances.lock().unwrap().get_mut(name) {
            handle.status = InstanceStatus::Stopped;
        }
    }

    /// Simulate an instance left behind by a previous process.
    pub fn plant(&self, name: &str) {
        self.instances.lock().unwrap().insert(
            name.to_string(),
            InstanceHandle {
                name: name.to_string(),
                status: InstanceStatus::Running,
                address: Some(ServiceAddress::new("127.0.0.1", 1)),
            },
        );
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn ensure_network(&self) -> RuntimeResult<()> {
        self.network_ensures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> RuntimeResult<InstanceHandle> {
        let active = self.active_creates.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_creates.fetch_max(active, Ordering::SeqCst);
        self.creates.fetch_add(1, Ordering::SeqCst);

        if self.hang_create {
            std::future::pending::<()>().await;
        }
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        self.active_creates.fetch_sub(1, Ordering::SeqCst);

        if self.fail_create {
            return Err(RuntimeError::operation("create_container", &spec.name, "engine refused"));
        }

        let mut instances = self.instances.lock().unwrap();
        if instances.contains_key(&spec.name) {
            return Err(RuntimeError::operation("create_container", &spec.name, "409 name in use"));
        }

        let address = if self.never_ready {
            None
        } else {
            let port = self.next_port.fetch_add(1, Ordering::SeqCst) as u16;
            Some(ServiceAddress::new("127.0.0.1", port))
        };
        let handle = InstanceHandle {
            name: spec.name.clone(),
            status: InstanceStatus::Running,
            address,
        };
        instances.insert(spec.name.clone(), handle.clone());
        Ok(handle)
    }

    async fn get_instance(&self, name: &str) -> RuntimeResult<Option<InstanceHandle>> {
        Ok(self.instances.lock().unwrap().get(name).cloned())
    }

    async fn remove_instance(&self, name: &str) -> RuntimeResult<()> {
        if self.hang_remove {
            std::future::pending::<()>().await;
        }
        if self.instances.lock().unwrap().remove(name).is_some() {
            self.removals.lock().unwrap().push(name.to_string());
        }
        Ok(())
    }

    async fn remove_network(&self) -> RuntimeResult<()> {
        self.network_removals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Runner ─────────────────────────────────────────────────────

/// Behaves like a runner: echo code echoes; raising code raises; broken code
/// is rejected at load.
#[derive(Default)]
pub struct FakeHost {
    loaded: Mutex<HashMap<ServiceAddress, String>>,
    pub health_checks: AtomicUsize,
    pub loads: AtomicUsize,
    pub runs: AtomicUsize,
    /// Next N runs fail with a transport error.
    fail_runs: AtomicU32,
    /// Next N loads fail with a transport error.
    fail_loads: AtomicU32,
    /// Every load fails with a transport error.
    loads_always_fail: AtomicBool,
    /// Next N health checks go unanswered.
    fail_health_checks: AtomicU32,
    health_check_delay: Duration,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_health_check_delay(mut self, delay: Duration) -> Self {
        self.health_check_delay = delay;
        self
    }

    pub fn fail_next_health_checks(&self, n: u32) {
        self.fail_health_checks.store(n, Ordering::SeqCst);
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub fn fail_next_runs(&self, n: u32) {
        self.fail_runs.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_loads(&self, n: u32) {
        self.fail_loads.store(n, Ordering::SeqCst);
    }

    pub fn fail_all_loads(&self) {
        self.loads_always_fail.store(true, Ordering::SeqCst);
    }

    /// Simulate the runner restarting and losing its code.
    pub fn forget_all(&self) {
        self.loaded.lock().unwrap().clear();
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl HostClient for FakeHost {
    async fn probe(&self, _address: &ServiceAddress, _timeout: Duration) -> bool {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        if !self.health_check_delay.is_zero() {
            tokio::time::sleep(self.health_check_delay).await;
        }
        !Self::take_failure(&self.fail_health_checks)
    }

    async fn load(
        &self,
        address: &ServiceAddress,
        code: &str,
        _timeout: Duration,
    ) -> Result<(), HostError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.loads_always_fail.load(Ordering::SeqCst) || Self::take_failure(&self.fail_loads) {
            return Err(HostError::Transport {
                address: address.to_string(),
                message: "connection refused".into(),
            });
        }
        if code == BROKEN_CODE {
            self.loaded.lock().unwrap().remove(address);
            return Err(HostError::Rejected(
                "Error executing code: SyntaxError: unexpected end of input".into(),
            ));
        }
        self.loaded
            .lock()
            .unwrap()
            .insert(address.clone(), code.to_string());
        Ok(())
    }

    async fn run(
        &self,
        address: &ServiceAddress,
        input: &Value,
        _timeout: Duration,
    ) -> Result<RunOutcome, HostError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_runs) {
            return Err(HostError::Transport {
                address: address.to_string(),
                message: "connection reset".into(),
            });
        }
        let code = self.loaded.lock().unwrap().get(address).cloned();
        match code.as_deref() {
            None => Ok(RunOutcome::NotLoaded),
            Some(RAISING_CODE) => Ok(RunOutcome::UserError(
                "User code raised an exception: Error: intentional error from user code".into(),
            )),
            Some(_) => Ok(RunOutcome::Completed(json!({ "echo": input }))),
        }
    }
}

// ── Harness ────────────────────────────────────────────────────

pub fn test_config() -> LambdaConfig {
    LambdaConfig::default()
}

pub async fn start_with(
    config: LambdaConfig,
    runtime: FakeRuntime,
) -> (Arc<Dispatcher>, Arc<FakeRuntime>, Arc<FakeHost>) {
    start_with_host(config, runtime, FakeHost::new()).await
}

pub async fn start_with_host(
    config: LambdaConfig,
    runtime: FakeRuntime,
    host: FakeHost,
) -> (Arc<Dispatcher>, Arc<FakeRuntime>, Arc<FakeHost>) {
    let runtime = Arc::new(runtime);
    let host = Arc::new(host);
    let dispatcher = Dispatcher::start(config, runtime.clone(), host.clone())
        .await
        .unwrap();
    (dispatcher, runtime, host)
}

pub async fn start() -> (Arc<Dispatcher>, Arc<FakeRuntime>, Arc<FakeHost>) {
    start_with(test_config(), FakeRuntime::new()).await
}
