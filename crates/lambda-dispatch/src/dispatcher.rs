//! Dispatcher: runs submitted code inside warm, fingerprint-keyed instances.
//!
//! ```text
//! run(code, input)
//!   └── acquire(fingerprint)            per-fingerprint creation lock
//!         ├── reuse: running + answers  → lease
//!         └── create: remove stale → create → wait_ready → load (retry) → lease
//!   └── invoke (retry)                  transient failures only
//!         └── exhausted                 discard the instance
//! ```
//!
//! Every runtime call is bounded by `dispatcher.runtime_timeout`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lambda_core::{Fingerprint, LambdaConfig};
use lambda_runtime::{DockerRuntime, InstanceSpec, RuntimeClient, ServiceAddress};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, DispatchResult, HostError};
use crate::host::{HostClient, RunOutcome};
use crate::http_host::HttpHostClient;
use crate::pool::{InstanceEntry, InstancePool, InstanceState, Lease};
use crate::readiness::wait_ready;
use crate::reaper::Reaper;
use crate::retry::{Retry, RetryFailure, RetryPolicy};
use crate::runtime_call::bounded;

pub struct Dispatcher {
    config: LambdaConfig,
    runtime: Arc<dyn RuntimeClient>,
    host: Arc<dyn HostClient>,
    pool: InstancePool,
    reaper: Mutex<Option<Reaper>>,
    /// Set as soon as shutdown begins; new work fails fast.
    closed: AtomicBool,
    /// Serializes shutdown and records completion.
    shutdown_done: tokio::sync::Mutex<bool>,
}

impl Dispatcher {
    /// Validate `config`, create the shared network, and start the reaper.
    pub async fn start(
        config: LambdaConfig,
        runtime: Arc<dyn RuntimeClient>,
        host: Arc<dyn HostClient>,
    ) -> DispatchResult<Arc<Self>> {
        config.validate()?;

        bounded(
            "ensure_network",
            &config.dispatcher.network,
            config.dispatcher.runtime_timeout,
            runtime.ensure_network(),
        )
        .await?;

        let pool = InstancePool::new();
        let reaper = Reaper::spawn(
            pool.clone(),
            runtime.clone(),
            config.dispatcher.ttl,
            config.dispatcher.sweep_interval,
            config.dispatcher.runtime_timeout,
        );

        info!(
            image = %config.dispatcher.image,
            network = %config.dispatcher.network,
            ttl = ?config.dispatcher.ttl,
            "dispatcher started"
        );

        Ok(Arc::new(Self {
            config,
            runtime,
            host,
            pool,
            reaper: Mutex::new(Some(reaper)),
            closed: AtomicBool::new(false),
            shutdown_done: tokio::sync::Mutex::new(false),
        }))
    }

    /// Start against the local Docker daemon with the HTTP runner client.
    pub async fn connect_docker(config: LambdaConfig) -> DispatchResult<Arc<Self>> {
        let network = config.dispatcher.network.clone();
        let runtime = DockerRuntime::connect(&network)
            .map_err(|e| DispatchError::runtime("connect", &network, e))?;
        Self::start(config, Arc::new(runtime), Arc::new(HttpHostClient::new())).await
    }

    pub fn config(&self) -> &LambdaConfig {
        &self.config
    }

    /// Execute `code` with `input` and return the entry point's result.
    ///
    /// An instance that exhausts the invocation retries is discarded, so the
    /// next call for the same code starts from a fresh instance.
    pub async fn run(&self, code: &str, input: &Value) -> DispatchResult<Value> {
        let fingerprint = Fingerprint::of(code);
        let (address, lease) = self.acquire(&fingerprint, code).await?;
        let generation = lease.generation();
        let result = self.invoke(&fingerprint, &address, code, input).await;
        drop(lease);

        match &result {
            Ok(_) => self.pool.touch(&fingerprint),
            Err(DispatchError::InvocationExhausted { .. }) => {
                self.discard(&fingerprint, generation).await;
            }
            Err(_) => {}
        }
        result
    }

    /// Make sure a loaded instance exists for `code` and return its address.
    pub async fn ensure_instance(
        &self,
        fingerprint: &Fingerprint,
        code: &str,
    ) -> DispatchResult<ServiceAddress> {
        let (address, _lease) = self.acquire(fingerprint, code).await?;
        Ok(address)
    }

    pub fn pooled(&self) -> Vec<InstanceEntry> {
        self.pool.snapshot()
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn runtime_timeout(&self) -> Duration {
        self.config.dispatcher.runtime_timeout
    }

    fn ensure_open(&self) -> DispatchResult<()> {
        if self.is_shut_down() {
            Err(DispatchError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Take the fingerprint's creation lock, reuse or create, and lease the
    /// entry before the lock is released.
    async fn acquire(
        &self,
        fingerprint: &Fingerprint,
        code: &str,
    ) -> DispatchResult<(ServiceAddress, Lease)> {
        self.ensure_open()?;

        let lock = self.pool.creation_lock(fingerprint);
        let result = {
            let _guard = lock.lock().await;
            self.acquire_locked(fingerprint, code).await
        };
        drop(lock);
        self.pool.prune_lock(fingerprint);
        result
    }

    async fn acquire_locked(
        &self,
        fingerprint: &Fingerprint,
        code: &str,
    ) -> DispatchResult<(ServiceAddress, Lease)> {
        self.ensure_open()?;

        let address = match self.reusable(fingerprint).await {
            Some(address) => address,
            None => self.create(fingerprint, code).await?,
        };

        let lease = self
            .pool
            .lease(fingerprint)
            .ok_or(DispatchError::ShutDown)?;
        Ok((address, lease))
    }

    /// The pooled address if the instance is still running and its runner
    /// answers the health probe. Anything else is dropped from the pool; the
    /// creation path removes the leftover instance by name.
    async fn reusable(&self, fingerprint: &Fingerprint) -> Option<ServiceAddress> {
        let entry = self.pool.get(fingerprint)?;
        let name = &entry.instance_name;

        match (entry.state, entry.address.clone()) {
            (InstanceState::Failed, _) => {
                debug!(%fingerprint, instance = %name, "pooled instance was marked failed, recreating");
            }
            (_, None) => {}
            (_, Some(address)) => {
                let inspected = bounded(
                    "get_instance",
                    name,
                    self.runtime_timeout(),
                    self.runtime.get_instance(name),
                )
                .await;
                match inspected {
                    Ok(Some(handle)) if handle.is_running() => {
                        if self.host.probe(&address, self.config.readiness.probe_timeout).await {
                            debug!(%fingerprint, instance = %name, "reusing warm instance");
                            self.pool.touch(fingerprint);
                            return Some(address);
                        }
                        warn!(%fingerprint, instance = %name, %address, "pooled instance does not answer, recreating");
                    }
                    Ok(_) => {
                        warn!(%fingerprint, instance = %name, "pooled instance is gone, recreating");
                    }
                    Err(e) => {
                        warn!(%fingerprint, instance = %name, error = %e, "inspect failed, recreating");
                    }
                }
            }
        }

        self.pool.mark_failed(fingerprint);
        self.pool.remove(fingerprint);
        None
    }

    /// Drop the instance behind `generation` after it exhausted its
    /// invocation retries. Callers still running on it keep their lease; the
    /// entry is then only marked failed and replaced on the next acquire.
    async fn discard(&self, fingerprint: &Fingerprint, generation: u64) {
        let lock = self.pool.creation_lock(fingerprint);
        {
            let _guard = lock.lock().await;
            match self.pool.get(fingerprint) {
                Some(entry) if entry.generation == generation && entry.leases == 0 => {
                    self.pool.remove(fingerprint);
                    warn!(%fingerprint, instance = %entry.instance_name, "discarding unresponsive instance");
                    self.cleanup_instance(&entry.instance_name).await;
                }
                Some(entry) if entry.generation == generation => {
                    self.pool.mark_failed(fingerprint);
                    warn!(%fingerprint, instance = %entry.instance_name, leases = entry.leases, "marking unresponsive instance failed");
                }
                _ => debug!(%fingerprint, "instance already replaced"),
            }
        }
        drop(lock);
        self.pool.prune_lock(fingerprint);
    }

    async fn create(&self, fingerprint: &Fingerprint, code: &str) -> DispatchResult<ServiceAddress> {
        let name = fingerprint.instance_name();
        self.pool.insert_creating(fingerprint.clone(), name.clone());

        let created = self.create_and_load(fingerprint, &name, code).await;
        let created = match created {
            Ok(_) if self.is_shut_down() => Err(DispatchError::ShutDown),
            other => other,
        };

        match created {
            Ok(address) => {
                self.pool.mark_ready(fingerprint, address.clone());
                info!(%fingerprint, instance = %name, %address, "instance ready");
                Ok(address)
            }
            Err(e) => {
                self.pool.remove(fingerprint);
                self.cleanup_instance(&name).await;
                Err(e)
            }
        }
    }

    async fn create_and_load(
        &self,
        fingerprint: &Fingerprint,
        name: &str,
        code: &str,
    ) -> DispatchResult<ServiceAddress> {
        // A previous process may have left an instance under the same name.
        self.cleanup_instance(name).await;

        let spec = InstanceSpec {
            image: self.config.dispatcher.image.clone(),
            name: name.to_string(),
            service_port: self.config.dispatcher.service_port,
            env: self.config.runner.instance_env(),
        };
        bounded(
            "create_instance",
            name,
            self.runtime_timeout(),
            self.runtime.create_instance(&spec),
        )
        .await?;
        info!(%fingerprint, instance = %name, image = %spec.image, "instance created");

        let address = wait_ready(
            self.runtime.as_ref(),
            self.host.as_ref(),
            name,
            &self.config.readiness,
        )
        .await?;

        self.load_with_retry(fingerprint, &address, code).await?;
        info!(%fingerprint, instance = %name, "code loaded");
        Ok(address)
    }

    async fn load_with_retry(
        &self,
        fingerprint: &Fingerprint,
        address: &ServiceAddress,
        code: &str,
    ) -> DispatchResult<()> {
        let host = self.host.as_ref();
        let timeout = self.config.load.timeout;

        RetryPolicy::from(&self.config.load)
            .run("load", |attempt| async move {
                debug!(%fingerprint, %address, attempt, "loading code");
                host.load(address, code, timeout)
                    .await
                    .map_err(Retry::classify)
            })
            .await
            .map_err(|failure| match failure {
                RetryFailure::Exhausted { attempts, last } => DispatchError::CodeLoadExhausted {
                    attempts,
                    source: last,
                },
                RetryFailure::Fatal(HostError::Rejected(m) | HostError::UserCode(m)) => {
                    DispatchError::UserCode(m)
                }
                RetryFailure::Fatal(source) => DispatchError::CodeLoadExhausted {
                    attempts: 1,
                    source,
                },
            })
    }

    async fn invoke(
        &self,
        fingerprint: &Fingerprint,
        address: &ServiceAddress,
        code: &str,
        input: &Value,
    ) -> DispatchResult<Value> {
        let host = self.host.as_ref();
        let timeout = self.config.invoke.timeout;
        let load_timeout = self.config.load.timeout;

        RetryPolicy::from(&self.config.invoke)
            .run("invoke", |attempt| async move {
                debug!(%fingerprint, %address, attempt, "invoking");
                match host.run(address, input, timeout).await {
                    Ok(RunOutcome::Completed(value)) => Ok(value),
                    Ok(RunOutcome::UserError(detail)) => Err(Retry::Fatal(HostError::UserCode(detail))),
                    Ok(RunOutcome::NotLoaded) => {
                        warn!(%fingerprint, %address, "runner lost its code, reloading");
                        match host.load(address, code, load_timeout).await {
                            Err(HostError::Rejected(detail)) => {
                                Err(Retry::Fatal(HostError::Rejected(detail)))
                            }
                            Err(e) => {
                                warn!(%fingerprint, error = %e, "reload failed");
                                Err(Retry::Transient(HostError::NotLoaded))
                            }
                            Ok(()) => Err(Retry::Transient(HostError::NotLoaded)),
                        }
                    }
                    Err(e) => Err(Retry::classify(e)),
                }
            })
            .await
            .map_err(|failure| match failure {
                RetryFailure::Exhausted { attempts, last } => DispatchError::InvocationExhausted {
                    attempts,
                    source: last,
                },
                RetryFailure::Fatal(HostError::UserCode(m) | HostError::Rejected(m)) => {
                    DispatchError::UserCode(m)
                }
                RetryFailure::Fatal(source) => DispatchError::InvocationExhausted {
                    attempts: 1,
                    source,
                },
            })
    }

    /// Best-effort removal: failures and timeouts are logged and discarded.
    async fn cleanup_instance(&self, name: &str) {
        let removed = bounded(
            "remove_instance",
            name,
            self.runtime_timeout(),
            self.runtime.remove_instance(name),
        )
        .await;
        if let Err(e) = removed {
            warn!(instance = %name, error = %e, "failed to remove instance");
        }
    }

    /// Stop the reaper, remove every pooled instance, and remove the network.
    /// Later calls return immediately.
    pub async fn shutdown(&self) {
        let mut done = self.shutdown_done.lock().await;
        if *done {
            debug!("dispatcher already shut down");
            return;
        }

        self.closed.store(true, Ordering::SeqCst);
        info!(pooled = self.pool.len(), "dispatcher shutting down");

        let reaper = self.reaper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(reaper) = reaper {
            reaper.stop().await;
        }

        // Wait out in-progress creations so their instances are removed too.
        for fingerprint in self.pool.fingerprints() {
            let lock = self.pool.creation_lock(&fingerprint);
            let _guard = lock.lock().await;
            if let Some(entry) = self.pool.remove(&fingerprint) {
                self.cleanup_instance(&entry.instance_name).await;
            }
        }
        for entry in self.pool.drain() {
            self.cleanup_instance(&entry.instance_name).await;
        }

        let network = &self.config.dispatcher.network;
        let removed = bounded(
            "remove_network",
            network,
            self.runtime_timeout(),
            self.runtime.remove_network(),
        )
        .await;
        if let Err(e) = removed {
            warn!(%network, error = %e, "failed to remove network");
        }

        *done = true;
        info!("dispatcher shut down");
    }

    /// Run `f` with this dispatcher and shut down afterwards on every path.
    ///
    /// A panic inside `f` is re-raised after shutdown completes.
    pub async fn scoped<F, Fut, T>(self: Arc<Self>, f: F) -> DispatchResult<T>
    where
        F: FnOnce(Arc<Dispatcher>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let joined = tokio::spawn(f(self.clone())).await;
        self.shutdown().await;
        match joined {
            Ok(value) => Ok(value),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(DispatchError::ScopeAborted),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if !self.is_shut_down() {
            warn!(
                pooled = self.pool.len(),
                "dispatcher dropped without shutdown; instances may be orphaned"
            );
        }
    }
}
