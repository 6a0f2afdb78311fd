//! Lifecycle wiring for an execution context
//!
//! Handles:
//! - claim-on-start when the context is constructed
//! - release-on-stop when the host signals it is about to terminate
//! - periodic logging of leadership transitions

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::election::{LeaderElection, LeadershipStatus};
use crate::guard::ExclusiveGuard;

/// Owns the election for one execution context from start to unload.
pub struct ContextLifecycle {
    election: Arc<LeaderElection>,
    guard: ExclusiveGuard,
    /// Track if we were previously the leader (for logging transitions)
    was_leader: AtomicBool,
}

impl ContextLifecycle {
    /// Start the election immediately, as a context does on construction.
    pub fn begin(election: Arc<LeaderElection>) -> Self {
        let status = election.start();
        info!(holder_id = %election.holder_id(), ?status, "Execution context initialized");

        Self {
            guard: ExclusiveGuard::new(election.clone()),
            election,
            was_leader: AtomicBool::new(false),
        }
    }

    pub fn election(&self) -> &Arc<LeaderElection> {
        &self.election
    }

    pub fn guard(&self) -> &ExclusiveGuard {
        &self.guard
    }

    pub fn status(&self) -> LeadershipStatus {
        self.election.status()
    }

    /// The host is about to tear this context down: release and clean up.
    pub fn unload(&self) {
        info!(holder_id = %self.election.holder_id(), "Unloading execution context");
        self.election.stop();
    }

    /// Log leadership transitions as seen through the store-validated check
    pub fn check_and_log_transition(&self) -> bool {
        let is_now_leader = self.guard.is_current_leader();
        let was_previously_leader = self.was_leader.swap(is_now_leader, Ordering::SeqCst);

        if is_now_leader && !was_previously_leader {
            info!(
                holder_id = %self.election.holder_id(),
                "This context now owns the exclusive resource"
            );
        } else if !is_now_leader && was_previously_leader {
            warn!(
                holder_id = %self.election.holder_id(),
                status = ?self.election.status(),
                "This context no longer owns the exclusive resource"
            );
        }

        is_now_leader
    }

    /// Wait for `terminate`, then unload.
    pub async fn run_until<F>(&self, terminate: F)
    where
        F: Future<Output = ()>,
    {
        terminate.await;
        self.unload();
    }
}

/// Spawn a task that unloads the context once `terminate` resolves.
pub fn spawn_unload_hook<F>(lifecycle: Arc<ContextLifecycle>, terminate: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        lifecycle.run_until(terminate).await;
    })
}

/// Spawn a task that monitors leadership and logs transitions
pub fn spawn_leadership_monitor(
    lifecycle: Arc<ContextLifecycle>,
    interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
) -> JoinHandle<()> {
    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let is_leader = lifecycle.check_and_log_transition();
                    debug!(
                        holder_id = %lifecycle.election().holder_id(),
                        is_leader,
                        status = ?lifecycle.status(),
                        "Leadership status check"
                    );
                }
                _ = shutdown_rx.recv() => {
                    info!("Leadership monitor shutting down");
                    break;
                }
            }
        }
    })
}

/// Resolves when the process is asked to terminate (Ctrl+C, or SIGTERM on
/// unix). If a handler cannot be installed that source is ignored.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
