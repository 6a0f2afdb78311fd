//! Cardlock Execution Context
//!
//! Runs one execution context that competes for the card reader lease with
//! every other `cl-context` process pointed at the same store directory.
//! Only the context whose lease validates against the store drives the
//! (simulated) card reader session.
//!
//! Leadership messages travel through a second shared directory, so a
//! context that loses a claim race learns about it and stops renewing.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CARDLOCK_CONFIG` | - | Path to a TOML config file |
//! | `CARDLOCK_STORE` | `file` | `file` or `memory` |
//! | `CARDLOCK_STORE_DIR` | `./data/lease` | Directory shared by all contexts |
//! | `CARDLOCK_BUS_DIR` | `./data/bus` | Directory for leadership messages |
//! | `CARDLOCK_BUS_POLL_MS` | `250` | How often the bus directory is read |
//! | `CARDLOCK_HEARTBEAT_INTERVAL_MS` | `5000` | Leader heartbeat period |
//! | `CARDLOCK_LEASE_TIMEOUT_MS` | `10000` | Lease expiry |
//! | `CARDLOCK_FOLLOWER_RECHECK_MS` | unset | Let followers take over stale leases |
//! | `CARDLOCK_CONFIRM_RIVAL_CLAIMS` | `false` | Leader re-reads the store before stepping down |
//! | `RUST_LOG` | `info` | Log level |
//! | `LOG_FORMAT` | text | `json` for JSON logs |

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use cl_config::{AppConfig, ConfigLoader, ElectionSettings, StoreKind};
use cl_election::{
    generate_holder_id, shutdown_signal, spawn_leadership_monitor, spawn_unload_hook,
    BroadcastBus, ContextLifecycle, ElectionConfig, ExclusiveGuard, FileBus, FileLeaseStore,
    LeaderElection, LeaseStore, MemoryBus, MemoryLeaseStore, SystemClock,
};

#[derive(Parser, Debug)]
#[command(name = "cl-context", about = "Run one card reader execution context")]
struct Args {
    /// Path to the configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Fixed holder id instead of a generated one
    #[arg(long, env = "CARDLOCK_HOLDER_ID")]
    holder_id: Option<String>,

    /// How often the session tries to process a card
    #[arg(long, default_value_t = 1000)]
    work_interval_ms: u64,

    /// Print an example configuration and exit
    #[arg(long)]
    example_config: bool,
}

/// Stand-in for the card reader / billing session that must have one owner.
#[derive(Default)]
struct CardReaderSession {
    transactions: AtomicU64,
}

impl CardReaderSession {
    fn process_next(&self, holder_id: &str) -> u64 {
        let n = self.transactions.fetch_add(1, Ordering::SeqCst) + 1;
        info!(holder_id, transaction = n, "Processed card reader transaction");
        n
    }
}

fn election_config(settings: &ElectionSettings, holder_id: Option<String>) -> ElectionConfig {
    let mut config = ElectionConfig::new()
        .with_key_prefix(settings.key_prefix.clone())
        .with_channel(settings.channel.clone())
        .with_timing(
            Duration::from_millis(settings.heartbeat_interval_ms),
            Duration::from_millis(settings.lease_timeout_ms),
        )
        .with_holder_id(holder_id.unwrap_or_else(generate_holder_id));

    if let Some(ms) = settings.follower_recheck_interval_ms.filter(|ms| *ms > 0) {
        warn!(recheck_ms = ms, "Follower recheck enabled; followers will take over stale leases");
        config = config.with_follower_recheck(Duration::from_millis(ms));
    }
    if settings.confirm_rival_claims {
        info!("Rival claims are confirmed against the store before stepping down");
        config = config.with_rival_confirmation();
    }

    config
}

/// Shared store and message bus for the configured scope.
fn lease_backend(config: &AppConfig) -> (Arc<dyn LeaseStore>, Arc<dyn BroadcastBus>) {
    let store = &config.store;
    match store.kind {
        StoreKind::File => {
            info!(dir = %store.dir, bus_dir = %store.bus_dir, "Using file lease store and bus");
            let lease_store: Arc<dyn LeaseStore> = Arc::new(FileLeaseStore::new(&store.dir));
            let bus: Arc<dyn BroadcastBus> = Arc::new(
                FileBus::new(&store.bus_dir)
                    .with_poll_interval(Duration::from_millis(store.bus_poll_interval_ms)),
            );
            (lease_store, bus)
        }
        StoreKind::Memory => {
            warn!("Using in-memory lease store; no other process can see this lease");
            let lease_store: Arc<dyn LeaseStore> = Arc::new(MemoryLeaseStore::new());
            let bus: Arc<dyn BroadcastBus> = Arc::new(MemoryBus::new().endpoint());
            (lease_store, bus)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.example_config {
        print!("{}", AppConfig::example_toml());
        return Ok(());
    }

    cl_common::logging::init_logging("cl-context");

    let loader = match &args.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load()?;

    let (store, bus) = lease_backend(&config);
    let election = Arc::new(LeaderElection::new(
        election_config(&config.election, args.holder_id.clone()),
        store,
        bus,
        Arc::new(SystemClock),
    )?);

    info!(holder_id = %election.holder_id(), "Starting Cardlock execution context");

    let lifecycle = Arc::new(ContextLifecycle::begin(election.clone()));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let monitor_handle = spawn_leadership_monitor(
        lifecycle.clone(),
        Duration::from_millis(config.election.status_log_interval_ms.max(100)),
        shutdown_tx.clone(),
    );

    let session_handle = {
        let guard = lifecycle.guard().clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let period = Duration::from_millis(args.work_interval_ms.max(10));

        tokio::spawn(async move {
            run_session(guard, period, &mut shutdown_rx).await;
        })
    };

    info!("Press Ctrl+C to shutdown");
    let unload_hook = spawn_unload_hook(lifecycle.clone(), async {
        shutdown_signal().await;
        info!("Shutdown signal received...");
    });
    if let Err(e) = unload_hook.await {
        error!(error = %e, "Unload hook did not complete");
        lifecycle.unload();
    }

    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = session_handle.await;
        let _ = monitor_handle.await;
    })
    .await;

    info!("Cardlock execution context shutdown complete");
    Ok(())
}

async fn run_session(
    guard: ExclusiveGuard,
    period: Duration,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    let session = CardReaderSession::default();
    let holder_id = guard.election().holder_id().to_string();
    let mut ticker = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if guard.run_if_leader(|| session.process_next(&holder_id)).is_none() {
                    debug!(
                        holder_id = %holder_id,
                        "Card reader owned by another context, skipping"
                    );
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Card reader session shutting down");
                break;
            }
        }
    }
}
