//! Programmatic Docker Compose orchestration.
//!
//! This crate brings a declarative multi-service application up against the
//! local container engine through direct API calls, with no external compose
//! binary involved: networks and volumes are created first, containers start
//! in dependency order, readiness is gated on aggregate health, and teardown
//! rediscovers everything by label so it survives process restarts.
//!
//! # Overview
//!
//! - **Model**: [`model::Project`] is parsed from a compose file subset with
//!   variable interpolation from a caller-supplied environment map.
//! - **Engine**: the [`engine::ContainerEngine`] trait is the narrow
//!   capability surface over the engine; [`engine::DockerEngine`] implements
//!   it via the Docker API.
//! - **Lifecycle**: [`ComposeStack`] drives start, stop, status, logs, and
//!   health waiting. Start rolls back on partial failure; stop retries
//!   removals and reports stragglers without giving up.
//! - **Identity**: every created resource carries the project label plus a
//!   role label ([`labels`]), which is the stable contract teardown and
//!   status are built on.
//!
//! # Example
//!
//! ```ignore
//! use airlift_compose::{ComposeStack, StackConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> airlift_compose::Result<()> {
//!     let stack = ComposeStack::connect(
//!         StackConfig::new("docker-compose.yml", "p1"),
//!     )
//!     .await?;
//!
//!     let cancel = CancellationToken::new();
//!     stack.start(&cancel).await?;
//!     stack
//!         .wait_for_healthy(std::time::Duration::from_secs(60), &cancel)
//!         .await?;
//!
//!     for (service, info) in stack.status(&cancel).await? {
//!         println!("{service}: {} ({})", info.state, info.health);
//!     }
//!
//!     stack.stop(&cancel).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod engine;
pub mod error;
pub mod labels;
pub mod metrics;
pub mod model;
pub mod planner;
pub mod stack;

pub use engine::{ContainerEngine, DockerEngine};
pub use error::{ComposeError, ResourceKind, Result};
pub use metrics::ComposeMetrics;
pub use model::{Project, Service};
pub use stack::{ComposeStack, ServiceInfo, StackConfig};
