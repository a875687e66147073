//! Background revalidation loop.
//!
//! One scheduler per process, started explicitly by the host. The loop never
//! exits on its own: a failed or panicking cycle is logged and retried after
//! the fallback interval. Only the shutdown signal stops it.

use crate::config::RevalidationPolicy;
use crate::manager::{LicenseManager, ValidationResult};
use crate::shutdown::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

enum CycleOutcome {
    Completed,
    NoLicense,
    Failed,
    Cancelled,
}

/// Periodic re-check of the stored license against the authority.
pub struct RevalidationScheduler {
    manager: Arc<LicenseManager>,
    wake: Notify,
    started: AtomicBool,
}

impl RevalidationScheduler {
    /// Create a scheduler driving `manager`.
    pub fn new(manager: Arc<LicenseManager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            wake: Notify::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Spawn the background loop.
    ///
    /// Returns `None` if this scheduler was already started.
    pub fn start(self: &Arc<Self>, shutdown: Shutdown) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Revalidation scheduler already running");
            return None;
        }
        let scheduler = Arc::clone(self);
        Some(tokio::spawn(async move { scheduler.run(shutdown).await }))
    }

    /// Re-check immediately (e.g. after the user renewed).
    ///
    /// The background loop picks up the new due time afterwards.
    pub async fn revalidate_now(&self) -> Option<ValidationResult> {
        let result = self.manager.revalidate_stored().await;
        self.wake.notify_one();
        result
    }

    async fn run(self: Arc<Self>, mut shutdown: Shutdown) {
        let policy = self.manager.config().revalidation.clone();
        info!(
            fallback_secs = policy.fallback_interval.as_secs(),
            "Starting revalidation scheduler"
        );

        loop {
            let wait = self.time_until_due(&policy).await.unwrap_or(Duration::ZERO);
            debug!(wait_secs = wait.as_secs(), "Next revalidation scheduled");

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.wake.notified() => continue,
                _ = tokio::time::sleep(wait) => {}
            }

            let back_off = match self.run_cycle(&mut shutdown).await {
                CycleOutcome::Cancelled => break,
                CycleOutcome::NoLicense | CycleOutcome::Failed => true,
                CycleOutcome::Completed => self.time_until_due(&policy).await.is_none(),
            };

            if back_off {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(policy.fallback_interval) => {}
                }
            }
        }

        info!("Revalidation scheduler shutting down");
    }

    /// Run one engine call in its own task so a panic cannot unwind the loop.
    async fn run_cycle(&self, shutdown: &mut Shutdown) -> CycleOutcome {
        let manager = Arc::clone(&self.manager);
        let mut cycle = tokio::spawn(async move { manager.revalidate_stored().await });

        let joined = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            joined = &mut cycle => Some(joined),
        };
        let Some(joined) = joined else {
            cycle.abort();
            return CycleOutcome::Cancelled;
        };

        match joined {
            Ok(Some(result)) => {
                info!(
                    valid = result.valid,
                    used_offline = result.used_offline,
                    message = %result.message,
                    "Scheduled revalidation finished"
                );
                CycleOutcome::Completed
            }
            Ok(None) => {
                debug!("No stored license; skipping revalidation");
                CycleOutcome::NoLicense
            }
            Err(e) => {
                error!(error = %e, "Revalidation cycle failed");
                CycleOutcome::Failed
            }
        }
    }

    /// Time left until the recorded due time; `None` if it is not in the future.
    async fn time_until_due(&self, policy: &RevalidationPolicy) -> Option<Duration> {
        let now = self.manager.clock().now_utc();
        let due = self
            .manager
            .current_metadata()
            .await
            .and_then(|m| m.next_revalidation_at)
            .unwrap_or_else(|| {
                now + chrono::Duration::from_std(policy.default_interval)
                    .unwrap_or_else(|_| chrono::Duration::hours(6))
            });

        (due - now).to_std().ok().filter(|d| !d.is_zero())
    }
}
