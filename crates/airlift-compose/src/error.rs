//! Error types for compose orchestration.

use std::time::Duration;

use thiserror::Error;

/// Result type for compose operations.
pub type Result<T> = std::result::Result<T, ComposeError>;

/// Kind of engine resource involved in an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A project network.
    Network,
    /// A named project volume.
    Volume,
    /// A service container.
    Container,
}

impl ResourceKind {
    /// Returns the lowercase name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Volume => "volume",
            Self::Container => "container",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors that can occur during compose orchestration.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// Compose file missing, unparseable, or internally inconsistent.
    #[error("invalid compose configuration: {0}")]
    ConfigInvalid(String),

    /// Cannot reach or authenticate with the container engine.
    #[error("container engine unreachable: {0}")]
    EngineUnreachable(String),

    /// Image pull failed and no local copy is present.
    #[error("image unavailable: {image}: {reason}")]
    ImageUnavailable {
        /// The image reference that could not be obtained.
        image: String,
        /// The reason reported by the engine.
        reason: String,
    },

    /// A resource with the scoped name exists but carries no project label,
    /// so it is owned by someone else and must not be touched.
    #[error("{kind} {name} exists but is not owned by project {project}")]
    ResourceConflict {
        /// The kind of resource that collided.
        kind: ResourceKind,
        /// The scoped resource name.
        name: String,
        /// The project that attempted to claim it.
        project: String,
    },

    /// Start failed and the subsequent rollback also had errors.
    /// Both are reported; the original cause is preserved.
    #[error("start failed: {original}; rollback incomplete: {cleanup}")]
    RollbackIncomplete {
        /// The error that failed the start.
        original: Box<ComposeError>,
        /// The error the rollback ran into.
        cleanup: Box<ComposeError>,
    },

    /// Stop completed all phases but one or more removals failed.
    #[error("partial cleanup, {} resource(s) left behind: {}", failures.len(), failures.join("; "))]
    PartialCleanup {
        /// One entry per resource that could not be removed.
        failures: Vec<String>,
    },

    /// Waiting for the project to become healthy exceeded the deadline.
    #[error("services not healthy after {timeout:?}")]
    HealthTimeout {
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// Caller-driven termination.
    #[error("cancelled during {0}")]
    Cancelled(String),

    /// No container carries the requested service label.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// No container with the given id.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Engine API failure that maps to no more specific kind.
    #[error("engine error: {0}")]
    Engine(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComposeError {
    /// Creates a configuration error.
    pub fn config_invalid(reason: impl Into<String>) -> Self {
        Self::ConfigInvalid(reason.into())
    }

    /// Creates an engine-unreachable error.
    pub fn engine_unreachable(reason: impl Into<String>) -> Self {
        Self::EngineUnreachable(reason.into())
    }

    /// Creates an image-unavailable error.
    pub fn image_unavailable(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImageUnavailable {
            image: image.into(),
            reason: reason.into(),
        }
    }

    /// Creates a resource conflict error.
    pub fn resource_conflict(
        kind: ResourceKind,
        name: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self::ResourceConflict {
            kind,
            name: name.into(),
            project: project.into(),
        }
    }

    /// Creates a cancellation error naming the phase that was interrupted.
    pub fn cancelled(phase: impl Into<String>) -> Self {
        Self::Cancelled(phase.into())
    }

    /// Creates a generic engine error.
    pub fn engine(reason: impl Into<String>) -> Self {
        Self::Engine(reason.into())
    }

    /// Returns true if this error came from caller-driven cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if this is a non-fatal partial cleanup report.
    pub fn is_partial_cleanup(&self) -> bool {
        matches!(self, Self::PartialCleanup { .. })
    }

    /// Returns true if this is a lookup failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ServiceNotFound(_) | Self::ContainerNotFound(_))
    }
}

impl From<bollard::errors::Error> for ComposeError {
    fn from(err: bollard::errors::Error) -> Self {
        Self::Engine(err.to_string())
    }
}

impl From<serde_yaml::Error> for ComposeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ConfigInvalid(err.to_string())
    }
}

impl From<serde_json::Error> for ComposeError {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigInvalid(err.to_string())
    }
}
