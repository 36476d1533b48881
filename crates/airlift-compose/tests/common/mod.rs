//! In-memory engine used by the lifecycle tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Once};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use airlift_compose::engine::{
    ContainerDetails, ContainerEngine, ContainerSpec, ContainerSummary, Filter, HealthState,
    LogOptions, LogStream, NetworkOptions, NetworkSummary, PortState, VolumeOptions, VolumeSummary,
};
use airlift_compose::error::{ComposeError, Result};
use airlift_compose::labels::PROJECT_LABEL;

/// Routes orchestrator logs to the test output, honoring `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// One container held by the fake engine.
#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub state: String,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortState>,
    pub health: HealthState,
}

#[derive(Debug, Default)]
pub struct EngineState {
    pub networks: Vec<NetworkSummary>,
    pub volumes: Vec<VolumeSummary>,
    pub containers: Vec<FakeContainer>,
    /// Ordered trace of mutating calls, for ordering assertions.
    pub events: Vec<String>,
    pub next_id: u64,
    /// Images whose pull fails.
    pub missing_images: HashSet<String>,
    /// Log text by container name.
    pub logs: HashMap<String, String>,
    /// When set, fires after each successful container removal.
    pub cancel_on_container_remove: Option<CancellationToken>,
}

/// In-memory [`ContainerEngine`] with failure injection hooks.
#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap()
    }

    pub fn add_missing_image(&self, image: &str) {
        self.state().missing_images.insert(image.to_string());
    }

    pub fn set_logs(&self, container_name: &str, text: &str) {
        self.state()
            .logs
            .insert(container_name.to_string(), text.to_string());
    }

    pub fn cancel_on_container_remove(&self, token: CancellationToken) {
        self.state().cancel_on_container_remove = Some(token);
    }

    pub fn clear_cancel_on_container_remove(&self) {
        self.state().cancel_on_container_remove = None;
    }

    pub fn set_container_health(&self, container_name: &str, health: HealthState) {
        let mut state = self.state();
        for container in &mut state.containers {
            if container.name == container_name {
                container.health = health;
            }
        }
    }

    pub fn set_container_state(&self, container_name: &str, container_state: &str) {
        let mut state = self.state();
        for container in &mut state.containers {
            if container.name == container_name {
                container.state = container_state.to_string();
            }
        }
    }

    pub fn remove_container_by_name(&self, container_name: &str) {
        self.state()
            .containers
            .retain(|c| c.name != container_name);
    }

    pub fn container_id_of(&self, container_name: &str) -> Option<String> {
        self.state()
            .containers
            .iter()
            .find(|c| c.name == container_name)
            .map(|c| c.id.clone())
    }

    pub fn seed_network(&self, name: &str, labels: HashMap<String, String>) {
        let mut state = self.state();
        let id = format!("net-{}", state.next_id);
        state.next_id += 1;
        state.networks.push(NetworkSummary {
            id,
            name: name.to_string(),
            labels,
        });
    }

    pub fn seed_volume(&self, name: &str, labels: HashMap<String, String>) {
        self.state().volumes.push(VolumeSummary {
            name: name.to_string(),
            labels,
        });
    }

    pub fn seed_container(&self, name: &str, labels: HashMap<String, String>) {
        let mut state = self.state();
        let id = format!("seeded-container-{:08}", state.next_id);
        state.next_id += 1;
        state.containers.push(FakeContainer {
            id,
            name: name.to_string(),
            state: "running".to_string(),
            labels,
            ports: Vec::new(),
            health: HealthState::None,
        });
    }

    /// Counts (containers, networks, volumes) carrying the project label.
    pub fn project_resources(&self, project: &str) -> (usize, usize, usize) {
        let state = self.state();
        let owned = |labels: &HashMap<String, String>| {
            labels.get(PROJECT_LABEL).map(String::as_str) == Some(project)
        };
        (
            state.containers.iter().filter(|c| owned(&c.labels)).count(),
            state.networks.iter().filter(|n| owned(&n.labels)).count(),
            state.volumes.iter().filter(|v| owned(&v.labels)).count(),
        )
    }

    pub fn event_index(&self, needle: &str) -> Option<usize> {
        self.state().events.iter().position(|e| e == needle)
    }

    pub fn event_count(&self, prefix: &str) -> usize {
        self.state()
            .events
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

fn matches_labels(labels: &HashMap<String, String>, filter: &Filter) -> bool {
    filter
        .label_terms()
        .iter()
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
            None => labels.contains_key(term),
        })
}

// Engine name filters are substring matches, like the real daemon's.
fn matches_name(name: &str, filter: &Filter) -> bool {
    filter.name_terms().is_empty() || filter.name_terms().iter().any(|term| name.contains(term))
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        let mut state = self.state();
        if state.missing_images.contains(reference) {
            return Err(ComposeError::image_unavailable(reference, "manifest unknown"));
        }
        state.events.push(format!("pull_image {reference}"));
        Ok(())
    }

    async fn create_network(&self, opts: NetworkOptions) -> Result<String> {
        let mut state = self.state();
        if state.networks.iter().any(|n| n.name == opts.name) {
            return Err(ComposeError::engine(format!(
                "network {} already exists",
                opts.name
            )));
        }
        let id = format!("net-{}", state.next_id);
        state.next_id += 1;
        state.events.push(format!("create_network {}", opts.name));
        state.networks.push(NetworkSummary {
            id: id.clone(),
            name: opts.name,
            labels: opts.labels,
        });
        Ok(id)
    }

    async fn list_networks(&self, filter: &Filter) -> Result<Vec<NetworkSummary>> {
        let state = self.state();
        Ok(state
            .networks
            .iter()
            .filter(|n| matches_name(&n.name, filter) && matches_labels(&n.labels, filter))
            .cloned()
            .collect())
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        let before = state.networks.len();
        state.networks.retain(|n| n.id != id);
        if state.networks.len() == before {
            return Err(ComposeError::engine(format!("no such network: {id}")));
        }
        state.events.push(format!("remove_network {id}"));
        Ok(())
    }

    async fn create_volume(&self, opts: VolumeOptions) -> Result<()> {
        let mut state = self.state();
        if state.volumes.iter().any(|v| v.name == opts.name) {
            return Err(ComposeError::engine(format!(
                "volume {} already exists",
                opts.name
            )));
        }
        state.events.push(format!("create_volume {}", opts.name));
        state.volumes.push(VolumeSummary {
            name: opts.name,
            labels: opts.labels,
        });
        Ok(())
    }

    async fn list_volumes(&self, filter: &Filter) -> Result<Vec<VolumeSummary>> {
        let state = self.state();
        Ok(state
            .volumes
            .iter()
            .filter(|v| matches_name(&v.name, filter) && matches_labels(&v.labels, filter))
            .cloned()
            .collect())
    }

    async fn remove_volume(&self, name: &str, _force: bool) -> Result<()> {
        let mut state = self.state();
        let before = state.volumes.len();
        state.volumes.retain(|v| v.name != name);
        if state.volumes.len() == before {
            return Err(ComposeError::engine(format!("no such volume: {name}")));
        }
        state.events.push(format!("remove_volume {name}"));
        Ok(())
    }

    async fn create_container(&self, spec: ContainerSpec) -> Result<String> {
        let mut state = self.state();
        if state.containers.iter().any(|c| c.name == spec.name) {
            return Err(ComposeError::engine(format!(
                "container name {} already in use",
                spec.name
            )));
        }

        let mut ports: Vec<PortState> = spec
            .port_bindings
            .iter()
            .map(|binding| PortState {
                host_ip: Some("0.0.0.0".to_string()),
                container_port: binding.container_port,
                host_port: Some(binding.host_port),
                protocol: binding.protocol.clone(),
            })
            .collect();
        for (port, proto) in &spec.exposed_ports {
            let published = spec
                .port_bindings
                .iter()
                .any(|b| b.container_port == *port && &b.protocol == proto);
            if !published {
                ports.push(PortState {
                    host_ip: None,
                    container_port: *port,
                    host_port: None,
                    protocol: proto.clone(),
                });
            }
        }

        let id = format!("container-{:08}", state.next_id);
        state.next_id += 1;
        state.events.push(format!("create_container {}", spec.name));
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name,
            state: "created".to_string(),
            labels: spec.labels,
            ports,
            health: if spec.healthcheck.is_some() {
                HealthState::Starting
            } else {
                HealthState::None
            },
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        let Some(container) = state.containers.iter_mut().find(|c| c.id == id) else {
            return Err(ComposeError::ContainerNotFound(id.to_string()));
        };
        container.state = "running".to_string();
        let name = container.name.clone();
        state.events.push(format!("start_container {name}"));
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout_secs: i64) -> Result<()> {
        let mut state = self.state();
        let Some(container) = state.containers.iter_mut().find(|c| c.id == id) else {
            return Err(ComposeError::ContainerNotFound(id.to_string()));
        };
        container.state = "exited".to_string();
        let name = container.name.clone();
        state.events.push(format!("stop_container {name}"));
        Ok(())
    }

    async fn kill_container(&self, id: &str, _signal: &str) -> Result<()> {
        let mut state = self.state();
        let Some(container) = state.containers.iter_mut().find(|c| c.id == id) else {
            return Err(ComposeError::ContainerNotFound(id.to_string()));
        };
        container.state = "exited".to_string();
        Ok(())
    }

    async fn remove_container(
        &self,
        id: &str,
        _force: bool,
        _remove_anonymous_volumes: bool,
    ) -> Result<()> {
        let mut state = self.state();
        let Some(index) = state.containers.iter().position(|c| c.id == id) else {
            return Err(ComposeError::ContainerNotFound(id.to_string()));
        };
        let container = state.containers.remove(index);
        state
            .events
            .push(format!("remove_container {}", container.name));
        if let Some(token) = &state.cancel_on_container_remove {
            token.cancel();
        }
        Ok(())
    }

    async fn list_containers(&self, filter: &Filter, all: bool) -> Result<Vec<ContainerSummary>> {
        let state = self.state();
        Ok(state
            .containers
            .iter()
            .filter(|c| all || c.state == "running")
            .filter(|c| matches_name(&c.name, filter) && matches_labels(&c.labels, filter))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![c.name.clone()],
                state: c.state.clone(),
                labels: c.labels.clone(),
                ports: c.ports.clone(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        let state = self.state();
        let Some(container) = state.containers.iter().find(|c| c.id == id) else {
            return Err(ComposeError::ContainerNotFound(id.to_string()));
        };
        Ok(ContainerDetails {
            id: container.id.clone(),
            running: container.state == "running",
            health: container.health,
        })
    }

    async fn container_logs(&self, id: &str, _opts: LogOptions) -> Result<LogStream> {
        let state = self.state();
        let Some(container) = state.containers.iter().find(|c| c.id == id) else {
            return Err(ComposeError::ContainerNotFound(id.to_string()));
        };
        let text = state.logs.get(&container.name).cloned().unwrap_or_default();
        let chunks: Vec<Result<Bytes>> = vec![Ok(Bytes::from(text))];
        Ok(stream::iter(chunks).boxed())
    }
}
