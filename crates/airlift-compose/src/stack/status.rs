//! Runtime views: per-service status and log reading.

use std::collections::BTreeMap;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{check_cancelled, ComposeStack, LOG_TAIL_LINES};
use crate::engine::{Filter, LogOptions, LogStream, PortState};
use crate::error::{ComposeError, Result};
use crate::labels::{PROJECT_LABEL, SERVICE_LABEL};

/// Per-service runtime view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Logical service name.
    pub name: String,

    /// Short container id (12 characters).
    pub container_id: String,

    /// Coarse state string (`running`, `exited`, ...).
    pub state: String,

    /// Health string: `none` without a healthcheck, else
    /// `starting` | `healthy` | `unhealthy`.
    pub health: String,

    /// Published port bindings, `host:hport->cport/proto`.
    pub ports: Vec<String>,

    /// Derived user-facing URL, when one is meaningful for the service.
    /// Diagnostic metadata only.
    pub url: Option<String>,
}

impl ComposeStack {
    /// Enumerates the project's containers grouped by service label.
    ///
    /// Containers without a service label are ignored; ports without a
    /// public binding are omitted.
    pub async fn status(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, ServiceInfo>> {
        check_cancelled(cancel, "status")?;

        let filter = Filter::new().label(PROJECT_LABEL, &self.project().name);
        let containers = self.engine.list_containers(&filter, true).await?;

        let mut services = BTreeMap::new();
        for container in containers {
            let Some(service_name) = container.labels.get(SERVICE_LABEL).cloned() else {
                continue;
            };

            let ports = format_ports(&container.ports);

            // A failed inspect counts as "not yet healthy", never as healthy.
            let health = match self.engine.inspect_container(&container.id).await {
                Ok(details) => details.health.as_str().to_string(),
                Err(err) => {
                    debug!(
                        container = %container.id,
                        error = %err,
                        "inspect failed while reading status"
                    );
                    "starting".to_string()
                }
            };

            let url = derive_service_url(&service_name, &ports);
            services.insert(
                service_name.clone(),
                ServiceInfo {
                    name: service_name,
                    container_id: short_id(&container.id),
                    state: container.state,
                    health,
                    ports,
                    url,
                },
            );
        }

        Ok(services)
    }

    /// Returns the trailing log text (stdout+stderr, last 100 lines) of the
    /// first container bearing the service label.
    pub async fn logs(&self, service: &str, cancel: &CancellationToken) -> Result<String> {
        check_cancelled(cancel, "logs")?;

        let filter = Filter::new()
            .label(PROJECT_LABEL, &self.project().name)
            .label(SERVICE_LABEL, service);
        let containers = self.engine.list_containers(&filter, true).await?;
        let Some(container) = containers.first() else {
            return Err(ComposeError::ServiceNotFound(service.to_string()));
        };

        let mut stream = self
            .engine
            .container_logs(
                &container.id,
                LogOptions {
                    tail: Some(LOG_TAIL_LINES),
                    timestamps: false,
                },
            )
            .await?;

        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            output.push_str(&String::from_utf8_lossy(&chunk?));
        }
        Ok(output)
    }

    /// Opens the raw log stream for a container id, for advanced consumers.
    pub async fn container_logs_by_id(&self, id: &str) -> Result<LogStream> {
        self.engine.container_logs(id, LogOptions::default()).await
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

fn format_ports(ports: &[PortState]) -> Vec<String> {
    ports
        .iter()
        .filter_map(|p| {
            let host_port = p.host_port?;
            Some(format!(
                "{}:{}->{}/{}",
                p.host_ip.as_deref().unwrap_or("0.0.0.0"),
                host_port,
                p.container_port,
                p.protocol
            ))
        })
        .collect()
}

/// Maps a service to a convenience URL from its first published port.
fn derive_service_url(service: &str, ports: &[String]) -> Option<String> {
    let first = ports.first()?;
    // "0.0.0.0:5432->5432/tcp" -> host port 5432
    let host_port = first.split(':').nth(1)?.split("->").next()?;

    match service {
        "db" | "postgres" => Some(format!("postgres://localhost:{host_port}")),
        "otel-collector" => None,
        _ => Some(format!("http://localhost:{host_port}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(host_port: Option<u16>, container_port: u16, protocol: &str) -> PortState {
        PortState {
            host_ip: host_port.map(|_| "0.0.0.0".to_string()),
            container_port,
            host_port,
            protocol: protocol.to_string(),
        }
    }

    #[test]
    fn unpublished_ports_are_omitted() {
        let ports = vec![port(Some(8080), 80, "tcp"), port(None, 9090, "tcp")];
        assert_eq!(format_ports(&ports), vec!["0.0.0.0:8080->80/tcp"]);
    }

    #[test]
    fn url_by_service_role() {
        let ports = vec!["0.0.0.0:5432->5432/tcp".to_string()];
        assert_eq!(
            derive_service_url("db", &ports),
            Some("postgres://localhost:5432".to_string())
        );
        assert_eq!(
            derive_service_url("jaeger", &ports),
            Some("http://localhost:5432".to_string())
        );
        assert_eq!(derive_service_url("otel-collector", &ports), None);
        assert_eq!(derive_service_url("db", &[]), None);
    }

    #[test]
    fn short_ids() {
        assert_eq!(short_id("0123456789abcdef0123"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn service_info_round_trips_through_json() {
        let info = ServiceInfo {
            name: "db".to_string(),
            container_id: "0123456789ab".to_string(),
            state: "running".to_string(),
            health: "healthy".to_string(),
            ports: vec!["0.0.0.0:5432->5432/tcp".to_string()],
            url: Some("postgres://localhost:5432".to_string()),
        };
        let json = serde_json::to_string(&info).unwrap();
        let back: ServiceInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(info, back);
    }
}
