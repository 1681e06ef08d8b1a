//! Lease-protected singleton: only one Scout walks a given `rootPath`
//! at a time (§5 "Lease-protected singletons").

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use uuid::Uuid;

/// Errors from lease operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LeaseError {
    /// Another holder currently owns the lease.
    #[error("lease for {key} is held by another owner")]
    HeldByOther {
        /// The contended key.
        key: String,
    },
    /// The caller tried to renew or release a lease it does not hold
    /// (already expired, or never acquired).
    #[error("caller does not own the lease for {key}")]
    NotOwner {
        /// The contended key.
        key: String,
    },
}

struct Entry {
    owner: String,
    expires_at: Instant,
}

/// A lease manager keyed by an arbitrary string (Scout uses `rootPath`).
///
/// `renew` and `release` are guarded by a compare-and-delete against
/// the caller's owner token, so a process that lost its lease to
/// expiry can never renew or release a lease it no longer owns —
/// exactly the invariant the contract requires.
#[derive(Default)]
pub struct LeaseManager {
    entries: Mutex<HashMap<String, Entry>>,
    lost: Notify,
}

/// A held lease. Dropping this does not release the lease — callers
/// must call [`LeaseManager::release`] explicitly so the release can
/// fail loudly if ownership was already lost.
#[derive(Debug, Clone)]
pub struct LeaseHandle {
    pub key: String,
    pub owner: String,
}

impl LeaseManager {
    /// Creates an empty lease manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lease for `key` if free or expired. Returns the
    /// owner token the caller must present to renew or release.
    pub fn acquire(&self, key: &str, ttl: Duration) -> Result<LeaseHandle, LeaseError> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        if let Some(existing) = entries.get(key)
            && existing.expires_at > now
        {
            return Err(LeaseError::HeldByOther { key: key.to_string() });
        }
        let owner = Uuid::new_v4().to_string();
        entries.insert(
            key.to_string(),
            Entry {
                owner: owner.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(LeaseHandle { key: key.to_string(), owner })
    }

    /// Renews `handle`'s lease for another `ttl`, provided `handle`
    /// still owns it. Loss of lease (expired and reassigned, or
    /// reassigned after this process stalled) surfaces as [`LeaseError::NotOwner`].
    pub fn renew(&self, handle: &LeaseHandle, ttl: Duration) -> Result<(), LeaseError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&handle.key) {
            Some(entry) if entry.owner == handle.owner => {
                entry.expires_at = Instant::now() + ttl;
                Ok(())
            }
            _ => {
                self.lost.notify_waiters();
                Err(LeaseError::NotOwner { key: handle.key.clone() })
            }
        }
    }

    /// Releases `handle`'s lease. Idempotent: releasing a lease the
    /// caller no longer owns is an error, not a panic, but calling it
    /// twice on the same still-owned handle simply removes the (already
    /// removed) entry the second time, which is also not an error.
    pub fn release(&self, handle: &LeaseHandle) -> Result<(), LeaseError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&handle.key) {
            Some(entry) if entry.owner == handle.owner => {
                entries.remove(&handle.key);
                Ok(())
            }
            Some(_) => Err(LeaseError::NotOwner { key: handle.key.clone() }),
            None => Ok(()),
        }
    }

    /// Resolves when any lease renewal has failed — callers awaiting
    /// this treat loss of lease as a shutdown trigger.
    pub async fn lost_lease(&self) {
        self.lost.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let manager = LeaseManager::new();
        let _first = manager.acquire("root-1", Duration::from_secs(30)).unwrap();
        let second = manager.acquire("root-1", Duration::from_secs(30));
        assert!(matches!(second, Err(LeaseError::HeldByOther { .. })));
    }

    #[test]
    fn acquire_succeeds_after_expiry() {
        let manager = LeaseManager::new();
        let _first = manager.acquire("root-1", Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(manager.acquire("root-1", Duration::from_secs(30)).is_ok());
    }

    #[test]
    fn renew_requires_current_ownership() {
        let manager = LeaseManager::new();
        let handle = manager.acquire("root-1", Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let _stolen = manager.acquire("root-1", Duration::from_secs(30)).unwrap();
        assert!(matches!(manager.renew(&handle, Duration::from_secs(30)), Err(LeaseError::NotOwner { .. })));
    }

    #[test]
    fn release_is_guarded_by_ownership() {
        let manager = LeaseManager::new();
        let handle = manager.acquire("root-1", Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let other = manager.acquire("root-1", Duration::from_secs(30)).unwrap();
        assert!(matches!(manager.release(&handle), Err(LeaseError::NotOwner { .. })));
        assert!(manager.release(&other).is_ok());
    }
}
