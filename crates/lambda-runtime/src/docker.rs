//! Docker-backed runtime client.
//!
//! Talks to the local daemon through bollard. Every instance is attached to
//! the shared network, publishes its service port on an ephemeral host port,
//! and is created with `auto_remove` so a runner that exits on its own
//! leaves nothing behind.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerCreateBody, ContainerInspectResponse, ContainerStateStatusEnum, HostConfig,
    NetworkCreateRequest, PortBinding,
};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
    InspectNetworkOptions, KillContainerOptions, RemoveContainerOptionsBuilder,
    StartContainerOptions,
};
use futures_util::TryStreamExt;
use tracing::{debug, info, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::instance::{InstanceHandle, InstanceSpec, InstanceStatus, ServiceAddress};
use crate::RuntimeClient;

/// Runtime client for the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    network: String,
}

impl DockerRuntime {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket).
    pub fn connect(network: impl Into<String>) -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Connect(e.to_string()))?;
        Ok(Self::with_client(docker, network))
    }

    pub fn with_client(docker: Docker, network: impl Into<String>) -> Self {
        Self {
            docker,
            network: network.into(),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Pull `image` if the daemon does not have it.
    async fn ensure_image(&self, image: &str) -> RuntimeResult<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        let (from_image, tag) = split_image_tag(image);
        info!(%image, "pulling runner image");
        self.docker
            .create_image(
                Some(
                    CreateImageOptionsBuilder::new()
                        .from_image(from_image)
                        .tag(tag)
                        .build(),
                ),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| RuntimeError::operation("pull_image", image, e))?;
        Ok(())
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn ensure_network(&self) -> RuntimeResult<()> {
        match self
            .docker
            .inspect_network(&self.network, None::<InspectNetworkOptions>)
            .await
        {
            Ok(_) => {
                debug!(network = %self.network, "network already present");
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                self.docker
                    .create_network(NetworkCreateRequest {
                        name: self.network.clone(),
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| RuntimeError::operation("create_network", &self.network, e))?;
                info!(network = %self.network, "network created");
                Ok(())
            }
            Err(e) => Err(RuntimeError::operation("inspect_network", &self.network, e)),
        }
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> RuntimeResult<InstanceHandle> {
        self.ensure_image(&spec.image).await?;

        let port_key = format!("{}/tcp", spec.service_port);
        let port_bindings = HashMap::from([(
            port_key,
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: None,
            }]),
        )]);

        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            host_config: Some(HostConfig {
                network_mode: Some(self.network.clone()),
                port_bindings: Some(port_bindings),
                auto_remove: Some(true),
                ..HostConfig::default()
            }),
            ..ContainerCreateBody::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(&spec.name).build()),
                body,
            )
            .await
            .map_err(|e| RuntimeError::operation("create_container", &spec.name, e))?;

        self.docker
            .start_container(&spec.name, None::<StartContainerOptions>)
            .await
            .map_err(|e| RuntimeError::operation("start_container", &spec.name, e))?;

        info!(instance = %spec.name, image = %spec.image, "instance started");

        // The port may not be assigned yet; readiness polling picks it up.
        Ok(self
            .get_instance(&spec.name)
            .await?
            .unwrap_or(InstanceHandle {
                name: spec.name.clone(),
                status: InstanceStatus::Created,
                address: None,
            }))
    }

    async fn get_instance(&self, name: &str) -> RuntimeResult<Option<InstanceHandle>> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => Ok(Some(handle_from_inspect(name, &inspect))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(RuntimeError::operation("inspect_container", name, e)),
        }
    }

    async fn remove_instance(&self, name: &str) -> RuntimeResult<()> {
        if let Err(e) = self
            .docker
            .kill_container(name, None::<KillContainerOptions>)
            .await
        {
            if !is_not_found(&e) {
                debug!(instance = %name, error = %e, "kill failed, removing anyway");
            }
        }

        match self
            .docker
            .remove_container(
                name,
                Some(RemoveContainerOptionsBuilder::new().force(true).v(true).build()),
            )
            .await
        {
            Ok(()) => {
                debug!(instance = %name, "instance removed");
                Ok(())
            }
            Err(e) if is_not_found(&e) || is_removal_in_progress(&e) => Ok(()),
            Err(e) => Err(RuntimeError::operation("remove_container", name, e)),
        }
    }

    async fn remove_network(&self) -> RuntimeResult<()> {
        match self.docker.remove_network(&self.network).await {
            Ok(()) => {
                info!(network = %self.network, "network removed");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => {
                warn!(network = %self.network, error = %e, "network removal failed");
                Err(RuntimeError::operation("remove_network", &self.network, e))
            }
        }
    }
}

fn handle_from_inspect(name: &str, inspect: &ContainerInspectResponse) -> InstanceHandle {
    let status = match inspect.state.as_ref() {
        Some(state) if state.running == Some(true) => InstanceStatus::Running,
        Some(state) if state.status == Some(ContainerStateStatusEnum::CREATED) => {
            InstanceStatus::Created
        }
        _ => InstanceStatus::Stopped,
    };

    let address = inspect
        .network_settings
        .as_ref()
        .and_then(|settings| settings.ports.as_ref())
        .and_then(|ports| {
            ports.iter().find_map(|(key, bindings)| {
                if !key.ends_with("/tcp") {
                    return None;
                }
                bindings.as_ref()?.iter().find_map(|binding| {
                    ServiceAddress::from_binding(
                        binding.host_ip.as_deref(),
                        binding.host_port.as_deref()?,
                    )
                })
            })
        });

    InstanceHandle {
        name: name.to_string(),
        status,
        address,
    }
}

fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError { status_code: 404, .. }
    )
}

/// `auto_remove` races with an explicit removal and answers 409.
fn is_removal_in_progress(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError { status_code: 409, message }
            if message.contains("removal") && message.contains("in progress")
    )
}

/// Split `repo[:tag]`, leaving registry ports (`host:5000/repo`) intact.
fn split_image_tag(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (image, "latest"),
    }
}
