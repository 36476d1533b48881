//! Label-driven teardown.
//!
//! Every phase discovers its resources by querying the engine for the
//! project label rather than consulting in-memory state, so an instance that
//! never called `start` can still clean up after an earlier process.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{
    check_cancelled, sleep_cancellable, ComposeStack, REMOVE_ATTEMPTS, REMOVE_RETRY_DELAY,
    SETTLE_DELAY, STOP_TIMEOUT_SECS,
};
use crate::engine::Filter;
use crate::error::{ComposeError, Result};
use crate::labels::PROJECT_LABEL;

impl ComposeStack {
    /// Removes every resource labeled with this project: containers first,
    /// then networks, then named volumes.
    ///
    /// Idempotent, and keeps making progress when individual removals fail:
    /// such failures are tallied and reported as a single `PartialCleanup`
    /// after all phases ran. Cancellation stops further attempts and returns
    /// a cancellation error; resources already removed stay removed.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        info!(project = %self.project().name, "stopping compose project");
        let mut failures = Vec::new();

        self.remove_containers(cancel, &mut failures).await?;
        self.remove_networks(cancel, &mut failures).await?;
        self.remove_volumes(cancel, &mut failures).await?;

        self.network_ids.lock().await.clear();
        self.volume_names.lock().await.clear();

        if failures.is_empty() {
            info!(project = %self.project().name, "compose project stopped");
            Ok(())
        } else {
            Err(ComposeError::PartialCleanup { failures })
        }
    }

    async fn remove_containers(
        &self,
        cancel: &CancellationToken,
        failures: &mut Vec<String>,
    ) -> Result<()> {
        let filter = Filter::new().label(PROJECT_LABEL, &self.project().name);
        let containers = self.engine.list_containers(&filter, true).await?;

        for container in containers {
            check_cancelled(cancel, "container cleanup")?;

            let name = container
                .name()
                .unwrap_or(container.id.as_str())
                .to_string();

            if container.is_running() {
                if let Err(stop_err) = self
                    .engine
                    .stop_container(&container.id, STOP_TIMEOUT_SECS)
                    .await
                {
                    warn!(container = %name, error = %stop_err, "graceful stop failed, killing");
                    if let Err(kill_err) = self.engine.kill_container(&container.id, "SIGKILL").await
                    {
                        warn!(container = %name, error = %kill_err, "kill failed");
                    }
                }
            }

            // Give the engine a moment to settle the container state.
            sleep_cancellable(SETTLE_DELAY, cancel, "container cleanup").await?;

            for attempt in 0..REMOVE_ATTEMPTS {
                check_cancelled(cancel, "container removal")?;
                match self.engine.remove_container(&container.id, true, true).await {
                    Ok(()) => break,
                    Err(_) if attempt + 1 < REMOVE_ATTEMPTS => {
                        sleep_cancellable(REMOVE_RETRY_DELAY, cancel, "container removal").await?;
                    }
                    Err(err) => {
                        warn!(
                            container = %name,
                            error = %err,
                            "failed to remove container after retries"
                        );
                        failures.push(format!("container {name}: {err}"));
                    }
                }
            }
        }

        Ok(())
    }

    async fn remove_networks(
        &self,
        cancel: &CancellationToken,
        failures: &mut Vec<String>,
    ) -> Result<()> {
        let filter = Filter::new().label(PROJECT_LABEL, &self.project().name);
        let networks = self.engine.list_networks(&filter).await?;

        for network in networks {
            check_cancelled(cancel, "network cleanup")?;

            // Networks may briefly refuse removal while endpoints detach.
            for attempt in 0..REMOVE_ATTEMPTS {
                check_cancelled(cancel, "network removal")?;
                match self.engine.remove_network(&network.id).await {
                    Ok(()) => {
                        let mut ids = self.network_ids.lock().await;
                        ids.retain(|_, id| id != &network.id);
                        break;
                    }
                    Err(_) if attempt + 1 < REMOVE_ATTEMPTS => {
                        sleep_cancellable(REMOVE_RETRY_DELAY, cancel, "network removal").await?;
                    }
                    Err(err) => {
                        warn!(network = %network.name, error = %err, "failed to remove network");
                        failures.push(format!("network {}: {err}", network.name));
                    }
                }
            }
        }

        Ok(())
    }

    async fn remove_volumes(
        &self,
        cancel: &CancellationToken,
        failures: &mut Vec<String>,
    ) -> Result<()> {
        let filter = Filter::new().label(PROJECT_LABEL, &self.project().name);
        let volumes = self.engine.list_volumes(&filter).await?;

        for volume in volumes {
            check_cancelled(cancel, "volume cleanup")?;
            if let Err(err) = self.engine.remove_volume(&volume.name, true).await {
                warn!(volume = %volume.name, error = %err, "failed to remove volume");
                failures.push(format!("volume {}: {err}", volume.name));
            }
        }

        Ok(())
    }
}
