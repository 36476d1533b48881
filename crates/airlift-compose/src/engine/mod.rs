//! Narrow capability surface over the local container engine.
//!
//! The orchestrator drives the engine exclusively through the
//! [`ContainerEngine`] trait: images, networks, volumes, containers, logs and
//! inspection, with label- and name-based list filters. The production
//! implementation is [`docker::DockerEngine`]; tests substitute an in-memory
//! engine behind the same trait.

mod docker;

pub use docker::DockerEngine;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Result;

/// List filter supporting label terms (`key=value`) and name terms.
///
/// Engine name filters match substrings; callers claiming existence must
/// compare the returned names for equality.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    labels: Vec<String>,
    names: Vec<String>,
}

impl Filter {
    /// Creates an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `key=value` label term.
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.push(format!("{key}={value}"));
        self
    }

    /// Adds a name term.
    pub fn name(mut self, name: &str) -> Self {
        self.names.push(name.to_string());
        self
    }

    /// Returns the engine-API filter arguments.
    pub fn to_args(&self) -> HashMap<String, Vec<String>> {
        let mut args = HashMap::new();
        if !self.labels.is_empty() {
            args.insert("label".to_string(), self.labels.clone());
        }
        if !self.names.is_empty() {
            args.insert("name".to_string(), self.names.clone());
        }
        args
    }

    /// Returns the label terms of this filter.
    pub fn label_terms(&self) -> &[String] {
        &self.labels
    }

    /// Returns the name terms of this filter.
    pub fn name_terms(&self) -> &[String] {
        &self.names
    }
}

/// A network as reported by a list call.
#[derive(Debug, Clone)]
pub struct NetworkSummary {
    /// Engine-assigned network id.
    pub id: String,
    /// Network name.
    pub name: String,
    /// Labels on the network.
    pub labels: HashMap<String, String>,
}

/// A named volume as reported by a list call.
#[derive(Debug, Clone)]
pub struct VolumeSummary {
    /// Volume name (volumes have no separate id).
    pub name: String,
    /// Labels on the volume.
    pub labels: HashMap<String, String>,
}

/// A container as reported by a list call.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    /// Engine-assigned container id.
    pub id: String,
    /// Container names, without the leading slash.
    pub names: Vec<String>,
    /// Coarse state string (`running`, `exited`, ...).
    pub state: String,
    /// Labels on the container.
    pub labels: HashMap<String, String>,
    /// Port state, published or not.
    pub ports: Vec<PortState>,
}

impl ContainerSummary {
    /// Returns the primary container name, if any.
    pub fn name(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }

    /// Returns true if the container is currently running.
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// One port entry on a listed container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortState {
    /// Host address the port is bound to, when published.
    pub host_ip: Option<String>,
    /// Container-side port.
    pub container_port: u16,
    /// Host-side port, when published.
    pub host_port: Option<u16>,
    /// Transport protocol string.
    pub protocol: String,
}

/// Detailed container state from inspection.
#[derive(Debug, Clone)]
pub struct ContainerDetails {
    /// Full container id.
    pub id: String,
    /// Whether the container is running.
    pub running: bool,
    /// Healthcheck verdict.
    pub health: HealthState,
}

/// Healthcheck verdict for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// No healthcheck is configured.
    None,
    /// The healthcheck has not produced a verdict yet.
    Starting,
    /// The healthcheck reports healthy.
    Healthy,
    /// The healthcheck reports unhealthy.
    Unhealthy,
}

impl HealthState {
    /// Returns the engine-format status string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Parameters for network creation.
#[derive(Debug, Clone)]
pub struct NetworkOptions {
    /// Engine-visible network name.
    pub name: String,
    /// Driver; empty means the engine default.
    pub driver: String,
    /// Whether to enable IPv6.
    pub enable_ipv6: bool,
    /// Labels to attach.
    pub labels: HashMap<String, String>,
}

/// Parameters for volume creation.
#[derive(Debug, Clone)]
pub struct VolumeOptions {
    /// Engine-visible volume name.
    pub name: String,
    /// Driver; empty means the engine default.
    pub driver: String,
    /// Labels to attach.
    pub labels: HashMap<String, String>,
}

/// Everything needed to create one container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Engine-visible container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Environment entries in `KEY=value` form.
    pub env: Vec<String>,
    /// Command override.
    pub command: Option<Vec<String>>,
    /// Labels to attach.
    pub labels: HashMap<String, String>,
    /// Container ports to expose, `(port, protocol)`.
    pub exposed_ports: Vec<(u16, String)>,
    /// Published ports.
    pub port_bindings: Vec<PublishedPort>,
    /// Mount entries in `source:target` form, sources already resolved.
    pub binds: Vec<String>,
    /// Networks to attach, with DNS aliases.
    pub networks: Vec<EndpointSpec>,
    /// Restart policy string in compose format.
    pub restart: Option<String>,
    /// Healthcheck handed to the engine.
    pub healthcheck: Option<HealthcheckSpec>,
}

/// One published port on a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPort {
    /// Container-side port.
    pub container_port: u16,
    /// Transport protocol string.
    pub protocol: String,
    /// Host-side port.
    pub host_port: u16,
}

/// Attachment of a container to one network.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    /// Engine-visible network name.
    pub network: String,
    /// DNS aliases for the container on this network.
    pub aliases: Vec<String>,
}

/// Engine-format healthcheck definition.
#[derive(Debug, Clone)]
pub struct HealthcheckSpec {
    /// Probe command (`["CMD", ...]` or `["CMD-SHELL", ...]`).
    pub test: Vec<String>,
    /// Interval between probes, nanoseconds.
    pub interval_ns: Option<i64>,
    /// Probe timeout, nanoseconds.
    pub timeout_ns: Option<i64>,
    /// Failures before unhealthy.
    pub retries: Option<i64>,
    /// Grace period, nanoseconds.
    pub start_period_ns: Option<i64>,
}

/// Options for a log read.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Number of trailing lines, or `None` for the full log.
    pub tail: Option<usize>,
    /// Whether to prefix each line with a timestamp.
    pub timestamps: bool,
}

/// Raw multiplexed stdout+stderr log stream.
pub type LogStream = BoxStream<'static, Result<Bytes>>;

/// Capability surface the orchestrator needs from a container engine.
///
/// Every call is a blocking I/O operation from the orchestrator's point of
/// view; the engine itself is the serialization point for concurrent callers.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Probes engine readiness.
    async fn ping(&self) -> Result<()>;

    /// Ensures an image is present locally, pulling it if missing.
    /// A no-op when the image already exists.
    async fn pull_image(&self, reference: &str) -> Result<()>;

    /// Creates a network and returns its id.
    async fn create_network(&self, opts: NetworkOptions) -> Result<String>;

    /// Lists networks matching the filter.
    async fn list_networks(&self, filter: &Filter) -> Result<Vec<NetworkSummary>>;

    /// Removes a network by id.
    async fn remove_network(&self, id: &str) -> Result<()>;

    /// Creates a named volume.
    async fn create_volume(&self, opts: VolumeOptions) -> Result<()>;

    /// Lists volumes matching the filter.
    async fn list_volumes(&self, filter: &Filter) -> Result<Vec<VolumeSummary>>;

    /// Removes a volume by name.
    async fn remove_volume(&self, name: &str, force: bool) -> Result<()>;

    /// Creates a container and returns its id.
    async fn create_container(&self, spec: ContainerSpec) -> Result<String>;

    /// Starts a created or stopped container.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Gracefully stops a container within the given timeout.
    async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<()>;

    /// Sends a signal to a running container.
    async fn kill_container(&self, id: &str, signal: &str) -> Result<()>;

    /// Removes a container.
    async fn remove_container(
        &self,
        id: &str,
        force: bool,
        remove_anonymous_volumes: bool,
    ) -> Result<()>;

    /// Lists containers matching the filter; `all` includes stopped ones.
    async fn list_containers(&self, filter: &Filter, all: bool) -> Result<Vec<ContainerSummary>>;

    /// Inspects a single container.
    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails>;

    /// Opens a log stream for a container.
    async fn container_logs(&self, id: &str, opts: LogOptions) -> Result<LogStream>;
}
