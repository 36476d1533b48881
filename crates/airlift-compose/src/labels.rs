//! Project identity: scoped resource names and discovery labels.
//!
//! Every resource the orchestrator creates carries the project label plus a
//! role label naming the declared resource. Teardown and status never consult
//! in-process state; they re-query the engine for these labels, which is what
//! lets a fresh instance clean up after a crashed one.

/// Label carrying the owning project name, present on every created resource.
pub const PROJECT_LABEL: &str = "com.docker.compose.project";

/// Label carrying the logical service name, present on each container.
pub const SERVICE_LABEL: &str = "com.docker.compose.service";

/// Label carrying the declared network name, present on each network.
pub const NETWORK_LABEL: &str = "com.docker.compose.network";

/// Label carrying the declared volume name, present on each named volume.
pub const VOLUME_LABEL: &str = "com.docker.compose.volume";

/// Returns the engine-visible name for a declared network or volume.
pub fn scoped_name(project: &str, name: &str) -> String {
    format!("{project}_{name}")
}

/// Returns the default container name for a service with no explicit
/// `container_name` override.
pub fn default_container_name(project: &str, service: &str) -> String {
    format!("{project}-{service}-1")
}
