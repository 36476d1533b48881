//! Project lifecycle over the engine.
//!
//! [`ComposeStack`] owns one loaded project and drives the engine
//! sequentially: `start` creates networks, then volumes, then containers in
//! dependency order and rolls everything back on failure; `stop` tears down
//! by label discovery; `wait_for_healthy` gates on the aggregate health of
//! the running stack. Callers invoke these from wherever they like; the
//! engine itself is the serialization point.

mod health;
mod status;
mod teardown;

pub use status::ServiceInfo;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{
    ContainerEngine, ContainerSpec, DockerEngine, EndpointSpec, Filter, HealthcheckSpec,
    NetworkOptions, PublishedPort, VolumeOptions,
};
use crate::error::{ComposeError, ResourceKind, Result};
use crate::labels::{NETWORK_LABEL, PROJECT_LABEL, SERVICE_LABEL, VOLUME_LABEL};
use crate::model::{self, NetworkDef, Project, Service, ServiceMount, VolumeDef};
use crate::planner;

/// Graceful stop window before a container is killed.
const STOP_TIMEOUT_SECS: i64 = 10;

/// Pause for container state to settle after stop or kill.
const SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Removal attempts per container or network.
const REMOVE_ATTEMPTS: u32 = 3;

/// Delay between removal attempts; the engine lags while endpoints detach.
const REMOVE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Interval between health polls.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default number of trailing log lines returned by `logs`.
const LOG_TAIL_LINES: usize = 100;

/// Configuration for a [`ComposeStack`].
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Path to the compose description file.
    pub compose_file: PathBuf,

    /// Project name; the value of the project label on every created resource.
    pub project_name: String,

    /// Variables for `${VAR}` interpolation. This map is the only environment
    /// the loader sees.
    pub env: HashMap<String, String>,
}

impl StackConfig {
    /// Creates a configuration with an empty interpolation environment.
    pub fn new(compose_file: impl Into<PathBuf>, project_name: impl Into<String>) -> Self {
        Self {
            compose_file: compose_file.into(),
            project_name: project_name.into(),
            env: HashMap::new(),
        }
    }

    /// Replaces the interpolation environment.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Adds one interpolation variable.
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A compose project bound to a container engine.
pub struct ComposeStack {
    engine: Arc<dyn ContainerEngine>,
    project: Project,
    /// Declared network name -> engine network id, for this instance only.
    /// Teardown never consults this; it rediscovers by label.
    network_ids: Mutex<HashMap<String, String>>,
    /// Scoped names of volumes this instance ensured.
    volume_names: Mutex<Vec<String>>,
}

impl ComposeStack {
    /// Loads the project and verifies the engine is reachable.
    pub async fn new(engine: Arc<dyn ContainerEngine>, config: StackConfig) -> Result<Self> {
        engine.ping().await?;
        let project = model::load_project(&config.compose_file, &config.project_name, &config.env)?;
        info!(
            project = %project.name,
            services = project.services.len(),
            "loaded compose project"
        );
        Ok(Self {
            engine,
            project,
            network_ids: Mutex::new(HashMap::new()),
            volume_names: Mutex::new(Vec::new()),
        })
    }

    /// Connects to the local Docker daemon and loads the project.
    pub async fn connect(config: StackConfig) -> Result<Self> {
        let engine = Arc::new(DockerEngine::connect()?);
        Self::new(engine, config).await
    }

    /// Returns the loaded project model.
    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Brings the entire project up, or leaves nothing new behind.
    ///
    /// Networks are created first, then volumes, then containers in
    /// dependency order. An existing stopped container with the scoped name
    /// is restarted in place rather than recreated. On any failure the
    /// partially constructed project is rolled back via [`Self::stop`] and
    /// the original error is returned; if the rollback itself fails too,
    /// both errors are reported.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        info!(project = %self.project.name, "starting compose project");
        match self.start_inner(cancel).await {
            Ok(()) => Ok(()),
            Err(original) => {
                warn!(
                    project = %self.project.name,
                    error = %original,
                    "start failed, rolling back"
                );
                // The rollback runs under its own token so that a cancelled
                // start still cleans up.
                let rollback_cancel = CancellationToken::new();
                match self.stop(&rollback_cancel).await {
                    Ok(()) => Err(original),
                    Err(cleanup) => Err(ComposeError::RollbackIncomplete {
                        original: Box::new(original),
                        cleanup: Box::new(cleanup),
                    }),
                }
            }
        }
    }

    async fn start_inner(&self, cancel: &CancellationToken) -> Result<()> {
        for (name, def) in &self.project.networks {
            check_cancelled(cancel, "network creation")?;
            self.ensure_network(name, def).await?;
        }

        for (name, def) in &self.project.volumes {
            check_cancelled(cancel, "volume creation")?;
            self.ensure_volume(name, def).await?;
        }

        for service_name in planner::start_order(&self.project) {
            check_cancelled(cancel, "service startup")?;
            if let Some(service) = self.project.services.get(&service_name) {
                self.start_service(service).await?;
            }
        }

        Ok(())
    }

    /// Looks a declared network up by exact scoped name, creating it if
    /// absent. A same-named network without our project label belongs to
    /// someone else and fails the start.
    async fn ensure_network(&self, declared: &str, def: &NetworkDef) -> Result<()> {
        let scoped = self.project.network_name(declared);
        let existing = self
            .engine
            .list_networks(&Filter::new().name(&scoped))
            .await?;

        // Engine name filters substring-match; require exact equality.
        if let Some(found) = existing.into_iter().find(|n| n.name == scoped) {
            if found.labels.get(PROJECT_LABEL) != Some(&self.project.name) {
                return Err(ComposeError::resource_conflict(
                    ResourceKind::Network,
                    scoped,
                    &self.project.name,
                ));
            }
            debug!(network = %scoped, "network already exists");
            self.network_ids
                .lock()
                .await
                .insert(declared.to_string(), found.id);
            return Ok(());
        }

        let mut network_labels: HashMap<String, String> = def
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        network_labels.insert(PROJECT_LABEL.to_string(), self.project.name.clone());
        network_labels.insert(NETWORK_LABEL.to_string(), declared.to_string());

        let id = self
            .engine
            .create_network(NetworkOptions {
                name: scoped,
                driver: def.driver.clone().unwrap_or_else(|| "bridge".to_string()),
                enable_ipv6: def.enable_ipv6,
                labels: network_labels,
            })
            .await?;
        self.network_ids
            .lock()
            .await
            .insert(declared.to_string(), id);
        Ok(())
    }

    /// Looks a declared volume up by exact scoped name, creating it if
    /// absent; same ownership fence as networks.
    async fn ensure_volume(&self, declared: &str, def: &VolumeDef) -> Result<()> {
        let scoped = self.project.volume_name(declared);
        let existing = self
            .engine
            .list_volumes(&Filter::new().name(&scoped))
            .await?;

        if let Some(found) = existing.iter().find(|v| v.name == scoped) {
            if found.labels.get(PROJECT_LABEL) != Some(&self.project.name) {
                return Err(ComposeError::resource_conflict(
                    ResourceKind::Volume,
                    scoped,
                    &self.project.name,
                ));
            }
            debug!(volume = %scoped, "volume already exists");
            self.volume_names.lock().await.push(found.name.clone());
            return Ok(());
        }

        let mut volume_labels: HashMap<String, String> = def
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        volume_labels.insert(PROJECT_LABEL.to_string(), self.project.name.clone());
        volume_labels.insert(VOLUME_LABEL.to_string(), declared.to_string());

        self.engine
            .create_volume(VolumeOptions {
                name: scoped.clone(),
                driver: def.driver.clone().unwrap_or_else(|| "local".to_string()),
                labels: volume_labels,
            })
            .await?;
        self.volume_names.lock().await.push(scoped);
        Ok(())
    }

    /// Brings one service container up: restart in place when it already
    /// exists, otherwise pull, create, start.
    async fn start_service(&self, service: &Service) -> Result<()> {
        let container_name = service.engine_container_name(&self.project.name);
        let existing = self
            .engine
            .list_containers(&Filter::new().name(&container_name), true)
            .await?;

        if let Some(found) = existing
            .into_iter()
            .find(|c| c.names.iter().any(|n| n == &container_name))
        {
            if found.labels.get(PROJECT_LABEL) != Some(&self.project.name) {
                return Err(ComposeError::resource_conflict(
                    ResourceKind::Container,
                    container_name,
                    &self.project.name,
                ));
            }
            if !found.is_running() {
                info!(container = %container_name, "restarting existing container");
                self.engine.start_container(&found.id).await?;
            } else {
                debug!(container = %container_name, "container already running");
            }
            return Ok(());
        }

        self.engine.pull_image(&service.image).await?;

        let spec = build_container_spec(&self.project, service, &container_name);
        let id = self.engine.create_container(spec).await?;
        self.engine.start_container(&id).await?;
        info!(service = %service.name, container = %container_name, "service started");
        Ok(())
    }
}

/// Assembles the engine-level container spec for one service.
fn build_container_spec(project: &Project, service: &Service, container_name: &str) -> ContainerSpec {
    let mut container_labels: HashMap<String, String> = service
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    container_labels.insert(PROJECT_LABEL.to_string(), project.name.clone());
    container_labels.insert(SERVICE_LABEL.to_string(), service.name.clone());

    let exposed_ports = service
        .ports
        .iter()
        .map(|p| (p.target, p.protocol.as_str().to_string()))
        .collect();

    let port_bindings = service
        .ports
        .iter()
        .filter_map(|p| {
            p.published.map(|host_port| PublishedPort {
                container_port: p.target,
                protocol: p.protocol.as_str().to_string(),
                host_port,
            })
        })
        .collect();

    let binds = service
        .mounts
        .iter()
        .map(|mount| match mount {
            ServiceMount::Volume { source, target } => {
                format!("{}:{}", project.volume_name(source), target)
            }
            ServiceMount::Bind { source, target } => {
                let path = Path::new(source);
                let resolved: PathBuf = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    // Collecting components drops interior "." segments.
                    project.working_dir.join(path).components().collect()
                };
                format!("{}:{}", resolved.display(), target)
            }
        })
        .collect();

    let networks = service
        .networks
        .iter()
        .map(|net| EndpointSpec {
            network: project.network_name(net),
            // The logical service name doubles as the DNS alias.
            aliases: vec![service.name.clone()],
        })
        .collect();

    let healthcheck = service.healthcheck.as_ref().map(|check| HealthcheckSpec {
        test: check.test.clone(),
        interval_ns: check.interval.map(|d| d.as_nanos() as i64),
        timeout_ns: check.timeout.map(|d| d.as_nanos() as i64),
        retries: check.retries.map(i64::from),
        start_period_ns: check.start_period.map(|d| d.as_nanos() as i64),
    });

    ContainerSpec {
        name: container_name.to_string(),
        image: service.image.clone(),
        env: build_env(&service.environment),
        command: service.command.clone(),
        labels: container_labels,
        exposed_ports,
        port_bindings,
        binds,
        networks,
        restart: service.restart.map(|r| r.as_compose_str().to_string()),
        healthcheck,
    }
}

/// Renders the container environment list. Entries declared without a value
/// resolve from the host process environment at create time; keys absent
/// there are dropped. This is the orchestrator's only read of the process
/// environment.
fn build_env(environment: &IndexMap<String, Option<String>>) -> Vec<String> {
    let mut env = Vec::with_capacity(environment.len());
    for (key, value) in environment {
        match value {
            Some(v) => env.push(format!("{key}={v}")),
            None => {
                if let Ok(host_value) = std::env::var(key) {
                    env.push(format!("{key}={host_value}"));
                }
            }
        }
    }
    env
}

/// Returns a cancellation error when the token has fired.
fn check_cancelled(cancel: &CancellationToken, phase: &str) -> Result<()> {
    if cancel.is_cancelled() {
        Err(ComposeError::cancelled(phase))
    } else {
        Ok(())
    }
}

/// Sleeps, aborting early with a cancellation error when the token fires.
async fn sleep_cancellable(
    delay: Duration,
    cancel: &CancellationToken,
    phase: &str,
) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ComposeError::cancelled(phase)),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
