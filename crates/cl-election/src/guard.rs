//! Gate exclusive work on leadership

use std::future::Future;
use std::sync::Arc;

use crate::election::LeaderElection;

/// What application code holds to decide whether it may drive the
/// exclusive resource. Every check goes through
/// [`LeaderElection::is_current_leader`], never the cached role.
#[derive(Clone)]
pub struct ExclusiveGuard {
    election: Arc<LeaderElection>,
}

impl ExclusiveGuard {
    pub fn new(election: Arc<LeaderElection>) -> Self {
        Self { election }
    }

    /// Check if this context may act on the exclusive resource
    pub fn is_current_leader(&self) -> bool {
        self.election.is_current_leader()
    }

    /// Run a closure only if we're the leader
    pub fn run_if_leader<F, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> T,
    {
        self.is_current_leader().then(f)
    }

    /// Run a future only if we're the leader when it starts
    pub async fn run_if_leader_async<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self.is_current_leader() {
            Some(f().await)
        } else {
            None
        }
    }

    pub fn election(&self) -> &Arc<LeaderElection> {
        &self.election
    }
}
