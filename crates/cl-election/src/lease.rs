//! The shared lease record
//!
//! A lease is two independent entries in the [`LeaseStore`]: the holder's
//! id and the time of its last renewal. They are written one after the
//! other with no atomicity, so a reader may see a half-written lease; that
//! reads as no lease at all.

use std::time::Duration;

use tracing::warn;

use crate::error::Result;
use crate::store::LeaseStore;

/// Store keys for the two lease entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseKeys {
    pub holder_id: String,
    pub renewed_at: String,
}

impl LeaseKeys {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            holder_id: format!("{prefix}.holder_id"),
            renewed_at: format!("{prefix}.renewed_at"),
        }
    }
}

/// Ownership record: who holds the lease and when they last renewed it
/// (milliseconds since the Unix epoch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub holder_id: String,
    pub renewed_at: u64,
}

impl Lease {
    /// Age at `now`. A renewal stamped in the future counts as age zero.
    pub fn age_at(&self, now: u64) -> Duration {
        Duration::from_millis(now.saturating_sub(self.renewed_at))
    }

    /// Old enough to be taken over.
    pub fn is_expired(&self, now: u64, timeout: Duration) -> bool {
        self.age_at(now) > timeout
    }

    /// Young enough for its holder to act on it. Stricter than
    /// `!is_expired`: at exactly `timeout` nobody may act.
    pub fn is_live(&self, now: u64, timeout: Duration) -> bool {
        self.age_at(now) < timeout
    }

    pub fn is_held_by(&self, holder_id: &str) -> bool {
        self.holder_id == holder_id
    }
}

/// Read the lease. Missing or unparsable entries yield `None`.
pub fn read(store: &dyn LeaseStore, keys: &LeaseKeys) -> Result<Option<Lease>> {
    let holder_id = store.get(&keys.holder_id)?;
    let renewed_at = store.get(&keys.renewed_at)?;

    let (Some(holder_id), Some(renewed_at)) = (holder_id, renewed_at) else {
        return Ok(None);
    };

    match renewed_at.trim().parse::<u64>() {
        Ok(renewed_at) => Ok(Some(Lease {
            holder_id,
            renewed_at,
        })),
        Err(_) => {
            warn!(value = %renewed_at, "Ignoring lease with corrupt renewal timestamp");
            Ok(None)
        }
    }
}

/// Claim: holder first, then the timestamp.
pub fn write(store: &dyn LeaseStore, keys: &LeaseKeys, lease: &Lease) -> Result<()> {
    store.set(&keys.holder_id, &lease.holder_id)?;
    store.set(&keys.renewed_at, &lease.renewed_at.to_string())
}

/// Heartbeat: rewrite only the timestamp.
pub fn touch(store: &dyn LeaseStore, keys: &LeaseKeys, renewed_at: u64) -> Result<()> {
    store.set(&keys.renewed_at, &renewed_at.to_string())
}

/// Remove both entries. Both deletes are attempted even if the first fails.
pub fn clear(store: &dyn LeaseStore, keys: &LeaseKeys) -> Result<()> {
    let holder = store.delete(&keys.holder_id);
    let renewed = store.delete(&keys.renewed_at);
    holder.and(renewed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLeaseStore;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn keys() -> LeaseKeys {
        LeaseKeys::with_prefix("test")
    }

    #[test]
    fn test_keys_from_prefix() {
        let keys = LeaseKeys::with_prefix("cardlock.leader");
        assert_eq!(keys.holder_id, "cardlock.leader.holder_id");
        assert_eq!(keys.renewed_at, "cardlock.leader.renewed_at");
    }

    #[test]
    fn test_expiry_boundaries() {
        let lease = Lease {
            holder_id: "x".to_string(),
            renewed_at: 3_000,
        };

        assert!(!lease.is_expired(13_000, TIMEOUT));
        assert!(!lease.is_live(13_000, TIMEOUT));
        assert!(lease.is_live(12_999, TIMEOUT));
        assert!(lease.is_expired(13_001, TIMEOUT));
    }

    #[test]
    fn test_future_timestamp_is_age_zero() {
        let lease = Lease {
            holder_id: "x".to_string(),
            renewed_at: 50_000,
        };
        assert_eq!(lease.age_at(10_000), Duration::ZERO);
        assert!(lease.is_live(10_000, TIMEOUT));
    }

    #[test]
    fn test_write_touch_read_clear() {
        let store = MemoryLeaseStore::new();
        let lease = Lease {
            holder_id: "ctx".to_string(),
            renewed_at: 100,
        };

        assert_eq!(read(&store, &keys()).unwrap(), None);

        write(&store, &keys(), &lease).unwrap();
        touch(&store, &keys(), 200).unwrap();
        let read_back = read(&store, &keys()).unwrap().unwrap();
        assert_eq!(read_back.holder_id, "ctx");
        assert_eq!(read_back.renewed_at, 200);

        clear(&store, &keys()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_half_written_lease_reads_as_absent() {
        let store = MemoryLeaseStore::new();
        store.set(&keys().holder_id, "ctx").unwrap();
        assert_eq!(read(&store, &keys()).unwrap(), None);

        let store = MemoryLeaseStore::new();
        store.set(&keys().renewed_at, "100").unwrap();
        assert_eq!(read(&store, &keys()).unwrap(), None);
    }

    #[test]
    fn test_corrupt_timestamp_reads_as_absent() {
        let store = MemoryLeaseStore::new();
        store.set(&keys().holder_id, "ctx").unwrap();
        store.set(&keys().renewed_at, "yesterday").unwrap();
        assert_eq!(read(&store, &keys()).unwrap(), None);
    }
}
