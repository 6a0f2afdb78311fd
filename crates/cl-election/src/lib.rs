//! Cardlock Leader Election
//!
//! Lets several execution contexts of one application (browser tabs,
//! kiosk processes on one machine) agree on which single context may drive
//! a non-shareable resource such as a card reader.
//!
//! # Features
//!
//! - **Lease Election**: claim, heartbeat, release and takeover of a lease in
//!   a shared key-value store with no compare-and-swap
//! - **Store Re-validation**: every leadership query re-reads the store
//! - **Broadcast Notifications**: best-effort leader_change / leader_released
//!   messages between contexts, in process or through a shared directory
//! - **Exclusive Guard**: helper to gate work on leadership
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cl_election::{
//!     ElectionConfig, ExclusiveGuard, FileBus, FileLeaseStore, LeaderElection, SystemClock,
//! };
//!
//! async fn example() -> cl_election::Result<()> {
//!     let election = Arc::new(LeaderElection::new(
//!         ElectionConfig::new().with_key_prefix("pos.card_reader"),
//!         Arc::new(FileLeaseStore::new("/var/lib/pos/lease")),
//!         Arc::new(FileBus::new("/var/lib/pos/bus")),
//!         Arc::new(SystemClock),
//!     )?);
//!     election.start();
//!
//!     let guard = ExclusiveGuard::new(election.clone());
//!     if guard.is_current_leader() {
//!         // drive the card reader
//!     }
//!
//!     election.stop();
//!     Ok(())
//! }
//! ```

mod bus;
mod clock;
mod election;
mod error;
mod file_bus;
mod guard;
pub mod lease;
mod lifecycle;
mod store;

pub use bus::{BroadcastBus, BusEndpoint, LeaseMessage, MemoryBus, NullBus, Subscription};
pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use election::{generate_holder_id, ElectionConfig, LeaderElection, LeadershipStatus};
pub use error::{ElectionError, Result};
pub use file_bus::FileBus;
pub use guard::ExclusiveGuard;
pub use lease::{Lease, LeaseKeys};
pub use lifecycle::{
    shutdown_signal, spawn_leadership_monitor, spawn_unload_hook, ContextLifecycle,
};
pub use store::{FileLeaseStore, LeaseStore, MemoryLeaseStore};
