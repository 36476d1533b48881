//! In-memory project model.
//!
//! A [`Project`] is the deployed unit: a named set of services, networks, and
//! volumes parsed from a compose description. Resource identity is the project
//! name; everything the orchestrator creates on the engine is named
//! `<project>_<resource>` (containers `<project>-<service>-1`) and labeled for
//! discovery.

mod loader;

pub use loader::{load_project, parse_project};

use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::labels;

/// A declarative multi-service application bound to a project name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project name, unique per engine host.
    pub name: String,

    /// Directory relative bind-mount sources resolve against.
    pub working_dir: PathBuf,

    /// Declared services in document order.
    pub services: IndexMap<String, Service>,

    /// Declared networks in document order.
    pub networks: IndexMap<String, NetworkDef>,

    /// Declared named volumes in document order.
    pub volumes: IndexMap<String, VolumeDef>,
}

impl Project {
    /// Returns the engine-visible name for a declared network.
    pub fn network_name(&self, declared: &str) -> String {
        labels::scoped_name(&self.name, declared)
    }

    /// Returns the engine-visible name for a declared volume.
    pub fn volume_name(&self, declared: &str) -> String {
        labels::scoped_name(&self.name, declared)
    }

    /// Looks up a declared service.
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    /// Serializes the model back to the supported compose subset.
    pub fn to_yaml(&self) -> Result<String> {
        loader::to_yaml(self)
    }
}

/// A managed container description within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Logical service name.
    pub name: String,

    /// Image reference to run.
    pub image: String,

    /// Explicit container name override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    /// Command override for the image default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Environment bindings. A `None` value means the variable is resolved
    /// from the host process environment at container-create time.
    pub environment: IndexMap<String, Option<String>>,

    /// Exposed and published ports.
    pub ports: Vec<PortSpec>,

    /// Bind and named-volume mounts.
    pub mounts: Vec<ServiceMount>,

    /// Declared networks this service joins.
    pub networks: Vec<String>,

    /// Restart policy handed to the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartPolicy>,

    /// Services that must start before this one.
    pub depends_on: Vec<String>,

    /// User labels attached to the container.
    pub labels: IndexMap<String, String>,

    /// Healthcheck passed through to the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
}

impl Service {
    /// Returns the engine-visible container name for this service.
    pub fn engine_container_name(&self, project: &str) -> String {
        match &self.container_name {
            Some(name) => name.clone(),
            None => labels::default_container_name(project, &self.name),
        }
    }

    /// Returns true if the service declares a healthcheck.
    pub fn has_healthcheck(&self) -> bool {
        self.healthcheck.is_some()
    }
}

/// A single port mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Container-side port.
    pub target: u16,

    /// Host-side port, when published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<u16>,

    /// Transport protocol.
    pub protocol: Protocol,
}

/// Transport protocol for a port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP (the default).
    Tcp,
    /// UDP.
    Udp,
}

impl Protocol {
    /// Returns the engine protocol string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::Tcp
    }
}

/// A volume entry on a service, tagged by mount type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServiceMount {
    /// Host path mounted into the container. Relative sources resolve
    /// against the project working directory.
    Bind {
        /// Host path.
        source: String,
        /// Container path.
        target: String,
    },

    /// Named volume declared at project level.
    Volume {
        /// Declared volume name.
        source: String,
        /// Container path.
        target: String,
    },
}

impl ServiceMount {
    /// Returns the container-side path of the mount.
    pub fn target(&self) -> &str {
        match self {
            Self::Bind { target, .. } | Self::Volume { target, .. } => target,
        }
    }
}

/// A declared project network.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkDef {
    /// Network driver; the engine default applies when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,

    /// Whether to enable IPv6 on the network.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enable_ipv6: bool,

    /// User labels attached to the network.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub labels: IndexMap<String, String>,
}

/// A declared named volume.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VolumeDef {
    /// Volume driver; the engine default applies when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,

    /// User labels attached to the volume.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub labels: IndexMap<String, String>,
}

/// Engine-level health probe attached to a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Healthcheck {
    /// Probe command, engine form (`["CMD", ...]` or `["CMD-SHELL", ...]`).
    pub test: Vec<String>,

    /// Time between probe runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<Duration>,

    /// Maximum time a single probe may take.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Consecutive failures before the container is reported unhealthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Grace period before failures start counting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_period: Option<Duration>,
}

/// Container restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Never restart.
    No,
    /// Always restart.
    Always,
    /// Restart on non-zero exit.
    OnFailure,
    /// Restart unless explicitly stopped.
    UnlessStopped,
}

impl RestartPolicy {
    /// Returns the compose-format policy string.
    pub fn as_compose_str(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Always => "always",
            Self::OnFailure => "on-failure",
            Self::UnlessStopped => "unless-stopped",
        }
    }

    /// Parses a compose-format policy string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "no" | "none" => Some(Self::No),
            "always" => Some(Self::Always),
            "on-failure" => Some(Self::OnFailure),
            "unless-stopped" => Some(Self::UnlessStopped),
            _ => None,
        }
    }
}
