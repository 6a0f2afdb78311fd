//! Broadcast bus for contexts in separate processes
//!
//! Every published message is one JSON file in `<dir>/<channel>/`, named
//! `<millis>-<endpoint>-<seq>.json` so a name sort keeps each sender's
//! messages in order. Subscribers poll the directory, skip files written by
//! their own endpoint and anything already present when they subscribed.
//! Publishers prune files older than the retention window.

use std::collections::HashSet;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::bus::{BroadcastBus, LeaseMessage, Subscription};
use crate::clock::{Clock, SystemClock};
use crate::error::{ElectionError, Result};
use crate::store::file_name_for;

const MESSAGE_SUFFIX: &str = ".json";

/// Directory-backed bus. One instance per execution context; every
/// context pointing at the same directory shares the channels.
#[derive(Debug)]
pub struct FileBus {
    dir: PathBuf,
    endpoint: String,
    sequence: AtomicU64,
    poll_interval: Duration,
    retention: Duration,
}

impl FileBus {
    /// The directory is created on first publish or subscribe.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        let endpoint = Uuid::new_v4().simple().to_string();
        Self {
            dir: dir.into(),
            endpoint: endpoint[..12].to_string(),
            sequence: AtomicU64::new(0),
            poll_interval: Duration::from_millis(250),
            retention: Duration::from_secs(60),
        }
    }

    /// How often subscriptions look for new messages
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// How long published files are kept before publishers delete them
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint
    }

    fn channel_dir(&self, channel: &str) -> PathBuf {
        self.dir.join(file_name_for(channel))
    }

    fn prune(&self, dir: &Path, now: u64) {
        let names = match list_messages(dir) {
            Ok(names) => names,
            Err(e) => {
                debug!(?dir, error = %e, "Could not list bus messages for pruning");
                return;
            }
        };

        let retention_ms = self.retention.as_millis() as u64;
        for name in names {
            let Some((sent_at, _)) = parse_name(&name) else {
                continue;
            };
            if now.saturating_sub(sent_at) <= retention_ms {
                continue;
            }
            match fs::remove_file(dir.join(&name)) {
                Ok(()) => trace!(%name, "Pruned bus message"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => debug!(%name, error = %e, "Could not prune bus message"),
            }
        }
    }
}

impl BroadcastBus for FileBus {
    fn publish(&self, channel: &str, message: &LeaseMessage) -> Result<()> {
        let dir = self.channel_dir(channel);
        fs::create_dir_all(&dir).map_err(|e| bus_error("create", &dir, e))?;

        let now = SystemClock.now_millis();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let name = format!("{now:013}-{}-{seq:010}{MESSAGE_SUFFIX}", self.endpoint);

        // Readers only look at *.json, so they never see a partial write.
        let staging = dir.join(format!(".{name}.tmp"));
        fs::write(&staging, message.to_json()?).map_err(|e| bus_error("write", &staging, e))?;
        let path = dir.join(&name);
        fs::rename(&staging, &path).map_err(|e| bus_error("publish", &path, e))?;
        trace!(channel, %name, "Published bus message");

        self.prune(&dir, now);
        Ok(())
    }

    /// Must be called from within a Tokio runtime; the poller is a task
    /// that ends once the subscription is dropped.
    fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let dir = self.channel_dir(channel);
        fs::create_dir_all(&dir).map_err(|e| bus_error("create", &dir, e))?;
        let existing = list_messages(&dir).map_err(|e| bus_error("list", &dir, e))?;

        let mut poller = Poller {
            dir,
            endpoint: self.endpoint.clone(),
            seen: existing.into_iter().collect(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let period = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                poller.poll(&tx);
            }
        });

        Ok(Subscription::new(rx))
    }
}

struct Poller {
    dir: PathBuf,
    endpoint: String,
    seen: HashSet<String>,
}

impl Poller {
    fn poll(&mut self, tx: &mpsc::UnboundedSender<String>) {
        let names = match list_messages(&self.dir) {
            Ok(names) => names,
            Err(e) => {
                warn!(dir = ?self.dir, error = %e, "Failed to read bus directory");
                return;
            }
        };

        for name in &names {
            if !self.seen.insert(name.clone()) {
                continue;
            }
            match parse_name(name) {
                Some((_, endpoint)) if endpoint != self.endpoint => {}
                _ => continue,
            }

            match fs::read_to_string(self.dir.join(name)) {
                Ok(payload) => {
                    let _ = tx.send(payload);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(%name, error = %e, "Failed to read bus message"),
            }
        }

        // Forget pruned files; `names` is sorted.
        self.seen.retain(|name| names.binary_search(name).is_ok());
    }
}

/// Message file names in the channel directory, sorted.
fn list_messages(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') && name.ends_with(MESSAGE_SUFFIX) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// `(sent_at, endpoint)` from `<millis>-<endpoint>-<seq>.json`
fn parse_name(name: &str) -> Option<(u64, &str)> {
    let stem = name.strip_suffix(MESSAGE_SUFFIX)?;
    let mut parts = stem.splitn(3, '-');
    let sent_at = parts.next()?.parse().ok()?;
    let endpoint = parts.next()?;
    parts.next()?;
    Some((sent_at, endpoint))
}

fn bus_error(action: &str, path: &Path, e: io::Error) -> ElectionError {
    ElectionError::Bus(format!("failed to {action} {}: {e}", path.display()))
}
