//! Docker engine adapter.
//!
//! Maps the [`ContainerEngine`] capability surface onto the Docker API via
//! bollard. Engine errors are reduced to taxonomy kinds at this boundary:
//! connectivity failures become `EngineUnreachable`, pull failures become
//! `ImageUnavailable`, 404s on lookups become `ContainerNotFound`.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogsOptions,
    NetworkingConfig, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::secret::{HealthStatusEnum, PortTypeEnum};
use bollard::service::{
    EndpointSettings, HealthConfig, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions, RemoveVolumeOptions};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info};

use super::{
    ContainerDetails, ContainerEngine, ContainerSpec, ContainerSummary, Filter, HealthState,
    LogOptions, LogStream, NetworkOptions, NetworkSummary, PortState, VolumeOptions, VolumeSummary,
};
use crate::error::{ComposeError, Result};

/// [`ContainerEngine`] implementation backed by the local Docker daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects using the platform defaults (socket or named pipe).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ComposeError::engine_unreachable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Wraps an existing bollard client.
    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

fn container_lookup_error(id: &str, err: bollard::errors::Error) -> ComposeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => ComposeError::ContainerNotFound(id.to_string()),
        other => other.into(),
    }
}

fn restart_policy_name(policy: &str) -> RestartPolicyNameEnum {
    match policy {
        "always" => RestartPolicyNameEnum::ALWAYS,
        "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
        "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
        _ => RestartPolicyNameEnum::NO,
    }
}

fn port_type_str(typ: Option<PortTypeEnum>) -> &'static str {
    match typ {
        Some(PortTypeEnum::UDP) => "udp",
        Some(PortTypeEnum::SCTP) => "sctp",
        _ => "tcp",
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| ComposeError::engine_unreachable(e.to_string()))?;
        Ok(())
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        if self.docker.inspect_image(reference).await.is_ok() {
            debug!(image = %reference, "image already present");
            return Ok(());
        }

        info!(image = %reference, "pulling image");
        let options = CreateImageOptions {
            from_image: reference,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!(status = %status, "pull progress");
                    }
                }
                Err(e) => {
                    return Err(ComposeError::image_unavailable(reference, e.to_string()));
                }
            }
        }
        Ok(())
    }

    async fn create_network(&self, opts: NetworkOptions) -> Result<String> {
        // The bollard API wants borrowed label maps.
        let labels: HashMap<&str, &str> = opts
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let config = CreateNetworkOptions {
            name: opts.name.as_str(),
            driver: opts.driver.as_str(),
            enable_ipv6: opts.enable_ipv6,
            labels,
            ..Default::default()
        };

        let response = self.docker.create_network(config).await?;
        if response.id.as_deref().unwrap_or("").is_empty() {
            return Err(ComposeError::engine(format!(
                "network {}: engine returned no id",
                opts.name
            )));
        }
        let id = response.id.unwrap_or_default();
        info!(network = %opts.name, id = %id, "created network");
        Ok(id)
    }

    async fn list_networks(&self, filter: &Filter) -> Result<Vec<NetworkSummary>> {
        let options = ListNetworksOptions {
            filters: filter.to_args(),
        };
        let networks = self.docker.list_networks(Some(options)).await?;
        Ok(networks
            .into_iter()
            .filter_map(|n| {
                let id = n.id?;
                Some(NetworkSummary {
                    id,
                    name: n.name.unwrap_or_default(),
                    labels: n.labels.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.docker.remove_network(id).await?;
        info!(network = %id, "removed network");
        Ok(())
    }

    async fn create_volume(&self, opts: VolumeOptions) -> Result<()> {
        let options = CreateVolumeOptions {
            name: opts.name.clone(),
            driver: opts.driver.clone(),
            labels: opts.labels.clone(),
            ..Default::default()
        };
        self.docker.create_volume(options).await?;
        info!(volume = %opts.name, "created volume");
        Ok(())
    }

    async fn list_volumes(&self, filter: &Filter) -> Result<Vec<VolumeSummary>> {
        let options = ListVolumesOptions {
            filters: filter.to_args(),
        };
        let response = self.docker.list_volumes(Some(options)).await?;
        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| VolumeSummary {
                name: v.name,
                labels: v.labels,
            })
            .collect())
    }

    async fn remove_volume(&self, name: &str, force: bool) -> Result<()> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force }))
            .await?;
        info!(volume = %name, "removed volume");
        Ok(())
    }

    async fn create_container(&self, spec: ContainerSpec) -> Result<String> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|(port, proto)| (format!("{port}/{proto}"), HashMap::new()))
            .collect();

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for published in &spec.port_bindings {
            let key = format!("{}/{}", published.container_port, published.protocol);
            let binding = PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(published.host_port.to_string()),
            };
            port_bindings
                .entry(key)
                .or_insert_with(|| Some(Vec::new()))
                .get_or_insert_with(Vec::new)
                .push(binding);
        }

        let restart_policy = spec.restart.as_deref().map(|policy| RestartPolicy {
            name: Some(restart_policy_name(policy)),
            maximum_retry_count: None,
        });

        let host_config = HostConfig {
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            port_bindings: Some(port_bindings),
            restart_policy,
            ..Default::default()
        };

        let endpoints: HashMap<String, EndpointSettings> = spec
            .networks
            .iter()
            .map(|endpoint| {
                (
                    endpoint.network.clone(),
                    EndpointSettings {
                        aliases: Some(endpoint.aliases.clone()),
                        ..Default::default()
                    },
                )
            })
            .collect();

        let healthcheck = spec.healthcheck.as_ref().map(|check| HealthConfig {
            test: Some(check.test.clone()),
            interval: check.interval_ns,
            timeout: check.timeout_ns,
            retries: check.retries,
            start_period: check.start_period_ns,
            ..Default::default()
        });

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            cmd: spec.command.clone(),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            networking_config: (!endpoints.is_empty()).then(|| NetworkingConfig {
                endpoints_config: endpoints,
            }),
            healthcheck,
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };
        let response = self.docker.create_container(Some(options), config).await?;
        info!(container = %spec.name, id = %response.id, "created container");
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        info!(container = %id, "started container");
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<()> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: timeout_secs }))
            .await?;
        Ok(())
    }

    async fn kill_container(&self, id: &str, signal: &str) -> Result<()> {
        self.docker
            .kill_container(id, Some(KillContainerOptions { signal }))
            .await?;
        Ok(())
    }

    async fn remove_container(
        &self,
        id: &str,
        force: bool,
        remove_anonymous_volumes: bool,
    ) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: remove_anonymous_volumes,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        info!(container = %id, "removed container");
        Ok(())
    }

    async fn list_containers(&self, filter: &Filter, all: bool) -> Result<Vec<ContainerSummary>> {
        let options = ListContainersOptions {
            all,
            filters: filter.to_args(),
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                names: c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|name| name.trim_start_matches('/').to_string())
                    .collect(),
                state: c.state.unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
                ports: c
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| PortState {
                        host_ip: p.ip,
                        container_port: p.private_port,
                        host_port: p.public_port,
                        protocol: port_type_str(p.typ).to_string(),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        let response = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| container_lookup_error(id, e))?;

        let mut running = false;
        let mut health = HealthState::None;
        if let Some(state) = response.state {
            running = state.running.unwrap_or(false);
            if let Some(probe) = state.health {
                health = match probe.status {
                    Some(HealthStatusEnum::HEALTHY) => HealthState::Healthy,
                    Some(HealthStatusEnum::UNHEALTHY) => HealthState::Unhealthy,
                    Some(HealthStatusEnum::STARTING) => HealthState::Starting,
                    _ => HealthState::None,
                };
            }
        }

        Ok(ContainerDetails {
            id: response.id.unwrap_or_else(|| id.to_string()),
            running,
            health,
        })
    }

    async fn container_logs(&self, id: &str, opts: LogOptions) -> Result<LogStream> {
        // Surface unknown ids eagerly; stream errors otherwise arrive mid-read.
        self.docker
            .inspect_container(id, None)
            .await
            .map_err(|e| container_lookup_error(id, e))?;

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            timestamps: opts.timestamps,
            tail: opts
                .tail
                .map(|n| n.to_string())
                .unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let stream = self
            .docker
            .logs(id, Some(options))
            .map(|item| item.map(|log| log.into_bytes()).map_err(ComposeError::from));
        Ok(stream.boxed())
    }
}
