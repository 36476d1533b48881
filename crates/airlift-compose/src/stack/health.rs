//! Aggregate health gating.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{check_cancelled, ComposeStack, HEALTH_POLL_INTERVAL};
use crate::error::{ComposeError, Result};

impl ComposeStack {
    /// Blocks until every declared service is simultaneously acceptable:
    /// running, and healthy when it carries a healthcheck (`starting` and
    /// `unhealthy` both fail the check).
    ///
    /// The full status is re-fetched each poll because project membership can
    /// change between polls, and completion additionally requires that every
    /// declared service has been observed; a service that never started
    /// counts as not healthy. Returns `HealthTimeout` when the deadline
    /// elapses and a cancellation error when the token fires.
    pub async fn wait_for_healthy(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            check_cancelled(cancel, "health wait")?;

            let status = self.status(cancel).await?;
            let all_acceptable = status.values().all(|info| {
                info.state == "running" && (info.health == "none" || info.health == "healthy")
            });

            if all_acceptable && status.len() == self.project().services.len() {
                info!(project = %self.project().name, "all services healthy");
                return Ok(());
            }

            debug!(
                project = %self.project().name,
                observed = status.len(),
                declared = self.project().services.len(),
                "services not yet healthy"
            );

            if tokio::time::Instant::now() >= deadline {
                return Err(ComposeError::HealthTimeout { timeout });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ComposeError::cancelled("health wait")),
                _ = tokio::time::sleep(HEALTH_POLL_INTERVAL) => {}
            }
        }
    }
}
