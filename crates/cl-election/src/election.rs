//! Lease-based Leader Election
//!
//! Elects one execution context among siblings that share a [`LeaseStore`]
//! and a [`BroadcastBus`]:
//! - claim on start when the lease is absent or older than the timeout
//! - periodic heartbeat rewriting only the renewal timestamp
//! - release on clean stop, abandonment on abnormal termination
//! - leadership queries re-validated against the store on every call
//!
//! The store has no compare-and-swap. Two contexts starting at the same
//! instant can both claim; the later write wins in the store, and
//! [`LeaderElection::is_current_leader`] only answers true for that one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{BroadcastBus, LeaseMessage, Subscription};
use crate::clock::Clock;
use crate::error::{ElectionError, Result};
use crate::lease::{self, Lease, LeaseKeys};
use crate::store::LeaseStore;

/// Configuration for leader election
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Prefix of the two lease keys
    pub key_prefix: String,

    /// Broadcast channel for leader_change / leader_released
    pub channel: String,

    /// Heartbeat period (must be less than the lease timeout)
    pub heartbeat_interval: Duration,

    /// Age after which a lease may be taken over
    pub lease_timeout: Duration,

    /// When set, followers re-run the claim check on this period and right
    /// after a leader_released message. Off by default: without it a
    /// follower only competes again when its context is reconstructed.
    pub follower_recheck_interval: Option<Duration>,

    /// When set, a leader that hears a rival's leader_change re-reads the
    /// store and keeps leading if the store still names it. Off by default:
    /// any rival announcement makes the leader step down.
    pub confirm_rival_claims: bool,

    /// Unique identifier for this execution context
    pub holder_id: String,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            key_prefix: "cardlock.leader".to_string(),
            channel: "cardlock.leader".to_string(),
            heartbeat_interval: Duration::from_secs(5),
            lease_timeout: Duration::from_secs(10),
            follower_recheck_interval: None,
            confirm_rival_claims: false,
            holder_id: generate_holder_id(),
        }
    }
}

impl ElectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_timing(mut self, heartbeat_interval: Duration, lease_timeout: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self.lease_timeout = lease_timeout;
        self
    }

    pub fn with_follower_recheck(mut self, interval: Duration) -> Self {
        self.follower_recheck_interval = Some(interval);
        self
    }

    pub fn with_rival_confirmation(mut self) -> Self {
        self.confirm_rival_claims = true;
        self
    }

    pub fn with_holder_id(mut self, id: impl Into<String>) -> Self {
        self.holder_id = id.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() || self.lease_timeout.is_zero() {
            return Err(ElectionError::Config(
                "heartbeat interval and lease timeout must be non-zero".to_string(),
            ));
        }
        if self.heartbeat_interval >= self.lease_timeout {
            return Err(ElectionError::Config(format!(
                "heartbeat interval ({:?}) must be less than lease timeout ({:?})",
                self.heartbeat_interval, self.lease_timeout
            )));
        }
        if self.follower_recheck_interval.is_some_and(|d| d.is_zero()) {
            return Err(ElectionError::Config(
                "follower recheck interval must be non-zero".to_string(),
            ));
        }
        if self.key_prefix.is_empty() || self.channel.is_empty() || self.holder_id.is_empty() {
            return Err(ElectionError::Config(
                "key prefix, channel and holder id must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Generate a holder id from the current time plus random bits.
pub fn generate_holder_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0);
    let random = Uuid::new_v4().simple().to_string();
    format!("{millis:x}-{}", &random[..12])
}

/// Local role of this execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipStatus {
    /// Not started, or the store could not be read at start
    Uninitialized,
    /// This context claimed the lease
    Leader,
    /// Another context holds the lease
    Follower,
}

struct Inner {
    config: ElectionConfig,
    keys: LeaseKeys,
    store: Arc<dyn LeaseStore>,
    bus: Arc<dyn BroadcastBus>,
    clock: Arc<dyn Clock>,
    status_tx: watch::Sender<LeadershipStatus>,
    last_renewed: AtomicU64,
    started: AtomicBool,
    stopped: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Leader election manager for one execution context.
///
/// Dropping it without calling [`stop`](Self::stop) behaves like the
/// context being killed: background tasks end, the lease is left in the
/// store to expire.
pub struct LeaderElection {
    inner: Arc<Inner>,
}

impl LeaderElection {
    /// Create a new leader election manager. Nothing is read or written
    /// until [`start`](Self::start).
    pub fn new(
        config: ElectionConfig,
        store: Arc<dyn LeaseStore>,
        bus: Arc<dyn BroadcastBus>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let keys = LeaseKeys::with_prefix(&config.key_prefix);
        let (status_tx, _) = watch::channel(LeadershipStatus::Uninitialized);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                keys,
                store,
                bus,
                clock,
                status_tx,
                last_renewed: AtomicU64::new(0),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                heartbeat: Mutex::new(None),
                listener: Mutex::new(None),
            }),
        })
    }

    /// Run the claim check and start background tasks.
    ///
    /// Must be called from within a Tokio runtime. Only the first call has
    /// any effect; a stopped election cannot be restarted.
    pub fn start(&self) -> LeadershipStatus {
        self.inner.start()
    }

    /// Whether this context may drive the exclusive resource right now.
    ///
    /// True only when the local role is leader *and* the store still names
    /// this context *and* the lease is younger than the timeout. Never
    /// fails; store errors read as `false`.
    pub fn is_current_leader(&self) -> bool {
        self.inner.is_current_leader()
    }

    /// Clean shutdown: release the lease if leader, stop background tasks.
    pub fn stop(&self) {
        self.inner.stop()
    }

    /// Local role, without consulting the store
    pub fn status(&self) -> LeadershipStatus {
        *self.inner.status_tx.borrow()
    }

    /// Subscribe to local role changes
    pub fn subscribe(&self) -> watch::Receiver<LeadershipStatus> {
        self.inner.status_tx.subscribe()
    }

    /// The lease as currently stored, if readable
    pub fn current_lease(&self) -> Option<Lease> {
        lease::read(self.inner.store.as_ref(), &self.inner.keys)
            .ok()
            .flatten()
    }

    pub fn holder_id(&self) -> &str {
        &self.inner.config.holder_id
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.inner.config
    }
}

impl Drop for LeaderElection {
    fn drop(&mut self) {
        self.inner.abort_tasks();
    }
}

impl Inner {
    fn holder_id(&self) -> &str {
        &self.config.holder_id
    }

    fn status(&self) -> LeadershipStatus {
        *self.status_tx.borrow()
    }

    fn start(self: &Arc<Self>) -> LeadershipStatus {
        if self.stopped.load(Ordering::SeqCst) {
            warn!(
                holder_id = %self.holder_id(),
                "Election already stopped, a new context is required"
            );
            return self.status();
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(holder_id = %self.holder_id(), "Election already started");
            return self.status();
        }

        info!(
            holder_id = %self.holder_id(),
            key_prefix = %self.config.key_prefix,
            channel = %self.config.channel,
            "Starting leader election"
        );

        let status = match self.evaluate_candidacy() {
            Ok(status) => status,
            Err(e) => {
                error!(
                    holder_id = %self.holder_id(),
                    error = %e,
                    "Lease store unavailable, this context will not lead"
                );
                return self.status();
            }
        };

        match self.bus.subscribe(&self.config.channel) {
            Ok(subscription) => self.spawn_listener(subscription),
            Err(e) => {
                warn!(
                    holder_id = %self.holder_id(),
                    error = %e,
                    "Failed to subscribe to leadership channel"
                );
            }
        }

        status
    }

    /// Claim if the lease is absent or expired, otherwise follow.
    fn evaluate_candidacy(self: &Arc<Self>) -> Result<LeadershipStatus> {
        let now = self.clock.now_millis();
        let current = lease::read(self.store.as_ref(), &self.keys)?;

        if let Some(existing) = &current {
            if !existing.is_expired(now, self.config.lease_timeout) {
                debug!(
                    holder_id = %self.holder_id(),
                    leader = %existing.holder_id,
                    age_ms = existing.age_at(now).as_millis() as u64,
                    "Lease is held, following"
                );
                self.set_status(LeadershipStatus::Follower);
                return Ok(LeadershipStatus::Follower);
            }

            info!(
                holder_id = %self.holder_id(),
                previous_holder = %existing.holder_id,
                age_ms = existing.age_at(now).as_millis() as u64,
                "Taking over expired lease"
            );
        }

        match self.claim(now) {
            Ok(()) => Ok(LeadershipStatus::Leader),
            Err(e) => {
                error!(holder_id = %self.holder_id(), error = %e, "Failed to write lease claim");
                self.set_status(LeadershipStatus::Follower);
                Ok(LeadershipStatus::Follower)
            }
        }
    }

    fn claim(self: &Arc<Self>, now: u64) -> Result<()> {
        let claimed = Lease {
            holder_id: self.holder_id().to_string(),
            renewed_at: now,
        };
        lease::write(self.store.as_ref(), &self.keys, &claimed)?;

        self.last_renewed.store(now, Ordering::SeqCst);
        self.set_status(LeadershipStatus::Leader);
        self.spawn_heartbeat();
        self.publish(LeaseMessage::LeaderChange {
            holder_id: claimed.holder_id,
            timestamp: now,
        });

        Ok(())
    }

    fn spawn_heartbeat(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self.config.heartbeat_interval;
        let first_beat = Instant::now() + period;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(first_beat, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if !inner.renew() {
                    break;
                }
            }
        });

        if let Some(previous) = self.heartbeat.lock().replace(handle) {
            previous.abort();
        }
    }

    /// One heartbeat. Returns false once this context is no longer leader.
    fn renew(&self) -> bool {
        if self.status() != LeadershipStatus::Leader || self.stopped.load(Ordering::SeqCst) {
            return false;
        }

        // renewed_at never goes backwards for this holder
        let renewed_at = self
            .clock
            .now_millis()
            .max(self.last_renewed.load(Ordering::SeqCst));

        match lease::touch(self.store.as_ref(), &self.keys, renewed_at) {
            Ok(()) => {
                self.last_renewed.store(renewed_at, Ordering::SeqCst);
                debug!(holder_id = %self.holder_id(), renewed_at, "Renewed lease");
            }
            Err(e) => {
                warn!(holder_id = %self.holder_id(), error = %e, "Failed to renew lease");
            }
        }
        true
    }

    fn spawn_listener(self: &Arc<Self>, mut subscription: Subscription) {
        let weak = Arc::downgrade(self);
        let mut recheck = self.config.follower_recheck_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        let handle = tokio::spawn(async move {
            let mut bus_open = true;

            loop {
                tokio::select! {
                    message = subscription.recv(), if bus_open => {
                        match message {
                            Some(message) => {
                                let Some(inner) = weak.upgrade() else { break };
                                inner.handle_message(message);
                            }
                            None => {
                                debug!("Leadership channel closed");
                                bus_open = false;
                                if recheck.is_none() {
                                    break;
                                }
                            }
                        }
                    }
                    _ = next_tick(&mut recheck) => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.recheck_as_follower();
                    }
                }
            }
        });

        if let Some(previous) = self.listener.lock().replace(handle) {
            previous.abort();
        }
    }

    fn handle_message(self: &Arc<Self>, message: LeaseMessage) {
        if message.holder_id() == self.holder_id() {
            return;
        }

        match message {
            LeaseMessage::LeaderChange { holder_id, timestamp } => {
                if self.status() != LeadershipStatus::Leader {
                    debug!(
                        holder_id = %self.holder_id(),
                        leader = %holder_id,
                        timestamp,
                        "Leadership claimed by another context"
                    );
                } else if self.config.confirm_rival_claims {
                    self.confirm_or_step_down(&holder_id);
                } else {
                    self.step_down(&holder_id);
                }
            }
            LeaseMessage::LeaderReleased { holder_id, timestamp } => {
                info!(
                    holder_id = %self.holder_id(),
                    released_by = %holder_id,
                    timestamp,
                    "Leader released the lease"
                );
                if self.config.follower_recheck_interval.is_some() {
                    self.recheck_as_follower();
                }
            }
        }
    }

    /// A rival announced a claim while we lead. Whoever the store names
    /// keeps the lease; everyone else steps down.
    fn confirm_or_step_down(&self, rival: &str) {
        let still_ours = match lease::read(self.store.as_ref(), &self.keys) {
            Ok(Some(current)) => current.is_held_by(self.holder_id()),
            Ok(None) => false,
            Err(e) => {
                warn!(
                    holder_id = %self.holder_id(),
                    error = %e,
                    "Could not re-read lease after rival claim"
                );
                false
            }
        };

        if still_ours {
            warn!(
                holder_id = %self.holder_id(),
                rival = %rival,
                "Rival claim was overwritten, keeping leadership"
            );
            return;
        }

        self.step_down(rival);
    }

    fn step_down(&self, rival: &str) {
        warn!(
            holder_id = %self.holder_id(),
            leader = %rival,
            "Another context claimed the lease, stepping down"
        );
        self.cancel_heartbeat();
        self.set_status(LeadershipStatus::Follower);
    }

    fn recheck_as_follower(self: &Arc<Self>) {
        if self.status() != LeadershipStatus::Follower || self.stopped.load(Ordering::SeqCst) {
            return;
        }

        match self.evaluate_candidacy() {
            Ok(LeadershipStatus::Leader) => {
                info!(holder_id = %self.holder_id(), "Follower recheck acquired leadership");
            }
            Ok(_) => {}
            Err(e) => {
                debug!(
                    holder_id = %self.holder_id(),
                    error = %e,
                    "Follower recheck could not read lease"
                );
            }
        }
    }

    fn is_current_leader(&self) -> bool {
        if self.status() != LeadershipStatus::Leader {
            return false;
        }

        let now = self.clock.now_millis();
        match lease::read(self.store.as_ref(), &self.keys) {
            Ok(Some(current)) => {
                current.is_held_by(self.holder_id())
                    && current.is_live(now, self.config.lease_timeout)
            }
            Ok(None) => false,
            Err(e) => {
                debug!(
                    holder_id = %self.holder_id(),
                    error = %e,
                    "Leadership check could not read lease"
                );
                false
            }
        }
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(holder_id = %self.holder_id(), "Stopping leader election");
        self.cancel_heartbeat();

        if self.status() == LeadershipStatus::Leader {
            self.release();
        }

        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
    }

    fn release(&self) {
        match lease::clear(self.store.as_ref(), &self.keys) {
            Ok(()) => info!(holder_id = %self.holder_id(), "Released leadership"),
            Err(e) => error!(
                holder_id = %self.holder_id(),
                error = %e,
                "Failed to delete lease, it will expire on its own"
            ),
        }

        self.publish(LeaseMessage::LeaderReleased {
            holder_id: self.holder_id().to_string(),
            timestamp: self.clock.now_millis(),
        });
        self.set_status(LeadershipStatus::Follower);
    }

    fn cancel_heartbeat(&self) {
        if let Some(heartbeat) = self.heartbeat.lock().take() {
            heartbeat.abort();
        }
    }

    fn abort_tasks(&self) {
        self.cancel_heartbeat();
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
    }

    fn publish(&self, message: LeaseMessage) {
        if let Err(e) = self.bus.publish(&self.config.channel, &message) {
            warn!(
                holder_id = %self.holder_id(),
                error = %e,
                "Failed to publish leadership message"
            );
        }
    }

    /// Update leadership status
    fn set_status(&self, status: LeadershipStatus) {
        let previous = self.status_tx.send_replace(status);

        if previous != status {
            match status {
                LeadershipStatus::Leader => info!(holder_id = %self.holder_id(), "Became leader"),
                _ if previous == LeadershipStatus::Leader => {
                    info!(holder_id = %self.holder_id(), "Lost leadership")
                }
                _ => debug!(holder_id = %self.holder_id(), ?status, "Leadership status changed"),
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryBus, NullBus};
    use crate::clock::{ManualClock, TokioClock};
    use crate::store::MemoryLeaseStore;

    /// Store whose reads and/or writes can be switched to fail.
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryLeaseStore,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl LeaseStore for FaultyStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(ElectionError::Store("read refused".to_string()));
            }
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(ElectionError::Store("write refused".to_string()));
            }
            self.inner.set(key, value)
        }

        fn delete(&self, key: &str) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(ElectionError::Store("delete refused".to_string()));
            }
            self.inner.delete(key)
        }
    }

    fn config(id: &str) -> ElectionConfig {
        ElectionConfig::new().with_holder_id(id)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = ElectionConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.lease_timeout, Duration::from_secs(10));
        assert_eq!(config.key_prefix, "cardlock.leader");
        assert!(config.follower_recheck_interval.is_none());
        assert!(!config.confirm_rival_claims);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ElectionConfig::new()
            .with_key_prefix("kiosk")
            .with_channel("kiosk-bus")
            .with_holder_id("tab-1")
            .with_timing(Duration::from_secs(1), Duration::from_secs(3))
            .with_follower_recheck(Duration::from_secs(2))
            .with_rival_confirmation();

        assert_eq!(config.key_prefix, "kiosk");
        assert!(config.confirm_rival_claims);
        assert_eq!(config.channel, "kiosk-bus");
        assert_eq!(config.holder_id, "tab-1");
        assert_eq!(config.follower_recheck_interval, Some(Duration::from_secs(2)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_heartbeat_must_be_shorter_than_timeout() {
        let equal =
            ElectionConfig::new().with_timing(Duration::from_secs(10), Duration::from_secs(10));
        assert!(matches!(equal.validate(), Err(ElectionError::Config(_))));

        let zero = ElectionConfig::new().with_timing(Duration::ZERO, Duration::from_secs(10));
        assert!(zero.validate().is_err());

        let result = LeaderElection::new(
            equal,
            Arc::new(MemoryLeaseStore::new()),
            Arc::new(NullBus),
            Arc::new(ManualClock::new(0)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_holder_ids_are_unique() {
        let a = generate_holder_id();
        let b = generate_holder_id();
        assert_ne!(a, b);
        assert!(a.contains('-'));
    }

    #[tokio::test]
    async fn test_unreadable_store_never_leads() {
        let store = Arc::new(FaultyStore::default());
        store.fail_reads.store(true, Ordering::SeqCst);

        let election = LeaderElection::new(
            config("x"),
            store.clone(),
            Arc::new(NullBus),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();

        assert_eq!(election.start(), LeadershipStatus::Uninitialized);
        assert!(!election.is_current_leader());

        store.fail_reads.store(false, Ordering::SeqCst);
        assert!(!election.is_current_leader());
        election.stop();
    }

    #[tokio::test]
    async fn test_failed_claim_leaves_follower() {
        let store = Arc::new(FaultyStore::default());
        store.fail_writes.store(true, Ordering::SeqCst);

        let election = LeaderElection::new(
            config("x"),
            store.clone(),
            Arc::new(NullBus),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();

        assert_eq!(election.start(), LeadershipStatus::Follower);
        assert!(!election.is_current_leader());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let store = Arc::new(MemoryLeaseStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let election =
            LeaderElection::new(config("x"), store.clone(), Arc::new(NullBus), clock.clone())
                .unwrap();

        assert_eq!(election.start(), LeadershipStatus::Leader);
        clock.advance(1_000);
        assert_eq!(election.start(), LeadershipStatus::Leader);
        assert_eq!(election.current_lease().unwrap().renewed_at, 0);

        election.stop();
        assert_eq!(election.start(), LeadershipStatus::Follower);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_overwritten_lease_fails_leadership_check() {
        let store = Arc::new(MemoryLeaseStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let election =
            LeaderElection::new(config("x"), store.clone(), Arc::new(NullBus), clock.clone())
                .unwrap();

        election.start();
        assert!(election.is_current_leader());

        store.set("cardlock.leader.holder_id", "intruder").unwrap();
        assert_eq!(election.status(), LeadershipStatus::Leader);
        assert!(!election.is_current_leader());
    }

    #[tokio::test]
    async fn test_suspended_heartbeat_fails_leadership_check() {
        // Manual clock moves, tokio time does not: the heartbeat never fires.
        let store = Arc::new(MemoryLeaseStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let election =
            LeaderElection::new(config("x"), store, Arc::new(NullBus), clock.clone()).unwrap();

        election.start();
        clock.advance(9_999);
        assert!(election.is_current_leader());

        clock.advance(1);
        assert_eq!(election.status(), LeadershipStatus::Leader);
        assert!(!election.is_current_leader());
    }

    #[tokio::test]
    async fn test_store_failure_during_check_reads_false() {
        let store = Arc::new(FaultyStore::default());
        let election = LeaderElection::new(
            config("x"),
            store.clone(),
            Arc::new(NullBus),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();

        election.start();
        assert!(election.is_current_leader());

        store.fail_reads.store(true, Ordering::SeqCst);
        assert!(!election.is_current_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_renews_monotonically() {
        let store = Arc::new(MemoryLeaseStore::new());
        let clock = Arc::new(TokioClock::starting_at(0));
        let election =
            LeaderElection::new(config("x"), store, Arc::new(NullBus), clock).unwrap();

        election.start();
        let mut previous = election.current_lease().unwrap().renewed_at;

        for beat in 1..=4u64 {
            tokio::time::advance(Duration::from_secs(5)).await;
            settle().await;
            let renewed = election.current_lease().unwrap().renewed_at;
            assert_eq!(renewed, beat * 5_000);
            assert!(renewed >= previous);
            previous = renewed;
        }

        assert!(election.is_current_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_heartbeats_age_out_leader() {
        let store = Arc::new(FaultyStore::default());
        let clock = Arc::new(TokioClock::starting_at(0));
        let election =
            LeaderElection::new(config("x"), store.clone(), Arc::new(NullBus), clock).unwrap();

        election.start();
        store.fail_writes.store(true, Ordering::SeqCst);

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert!(election.is_current_leader());

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert!(!election.is_current_leader());

        // Recovered store: the next beat makes the lease live again.
        store.fail_writes.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert!(election.is_current_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_of_follower_leaves_lease() {
        let store = Arc::new(MemoryLeaseStore::new());
        let clock = Arc::new(TokioClock::starting_at(0));
        let hub = MemoryBus::new();

        let leader = LeaderElection::new(
            config("leader"),
            store.clone(),
            Arc::new(hub.endpoint()),
            clock.clone(),
        )
        .unwrap();
        let follower = LeaderElection::new(
            config("follower"),
            store.clone(),
            Arc::new(hub.endpoint()),
            clock,
        )
        .unwrap();

        leader.start();
        assert_eq!(follower.start(), LeadershipStatus::Follower);

        follower.stop();
        settle().await;

        assert_eq!(leader.current_lease().unwrap().holder_id, "leader");
        assert!(leader.is_current_leader());
        assert_eq!(hub.subscriber_count("cardlock.leader"), 1);
    }

    /// Leader `x` hears a leader_change from "other", then one heartbeat
    /// period passes.
    async fn leader_hearing_rival(
        election_config: ElectionConfig,
    ) -> (LeaderElection, Arc<MemoryLeaseStore>) {
        let store = Arc::new(MemoryLeaseStore::new());
        let hub = MemoryBus::new();
        let election = LeaderElection::new(
            election_config,
            store.clone(),
            Arc::new(hub.endpoint()),
            Arc::new(TokioClock::starting_at(0)),
        )
        .unwrap();
        assert_eq!(election.start(), LeadershipStatus::Leader);

        hub.endpoint()
            .publish(
                "cardlock.leader",
                &LeaseMessage::LeaderChange {
                    holder_id: "other".to_string(),
                    timestamp: 0,
                },
            )
            .unwrap();
        settle().await;

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        (election, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rival_announcement_cancels_heartbeat() {
        let (election, store) = leader_hearing_rival(config("x")).await;

        assert_eq!(election.status(), LeadershipStatus::Follower);
        assert_eq!(
            store.get("cardlock.leader.renewed_at").unwrap().as_deref(),
            Some("0")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_rival_announcement_keeps_store_holder() {
        let (election, store) = leader_hearing_rival(config("x").with_rival_confirmation()).await;

        assert_eq!(election.status(), LeadershipStatus::Leader);
        assert!(election.is_current_leader());
        assert_eq!(
            store.get("cardlock.leader.renewed_at").unwrap().as_deref(),
            Some("5000")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_subscription_sees_claim() {
        let election = LeaderElection::new(
            config("x"),
            Arc::new(MemoryLeaseStore::new()),
            Arc::new(NullBus),
            Arc::new(TokioClock::starting_at(0)),
        )
        .unwrap();

        let rx = election.subscribe();
        assert_eq!(*rx.borrow(), LeadershipStatus::Uninitialized);

        election.start();
        assert_eq!(*rx.borrow(), LeadershipStatus::Leader);

        election.stop();
        assert_eq!(*rx.borrow(), LeadershipStatus::Follower);
    }
}
