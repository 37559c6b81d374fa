//! Named mutual-exclusion leases.
//!
//! A secondary safety net for operations spanning multiple resources or
//! multiple steps; ordinary single-item stock deduction relies on the
//! optimistic version check alone. Leases auto-expire, so a crashed holder
//! cannot block a future acquirer past the lease duration, and releases
//! carry a fencing token so a stale holder cannot free a lock someone else
//! has since taken.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, ShopError};

struct LockState {
    token: u64,
    expires_at: Instant,
}

/// Proof of a held lease. Pass it back to `release`.
#[derive(Debug)]
pub struct LockHandle {
    key: String,
    token: u64,
    expires_at: Instant,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Lease-based lock manager.
pub struct LockManager {
    locks: Mutex<HashMap<String, LockState>>,
    freed: Notify,
    next_token: AtomicU64,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            freed: Notify::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Acquire `key`, waiting up to `wait_timeout` and holding the lease
    /// for at most `lease_timeout`. `LockTimeout` when the wait expires.
    pub async fn acquire(
        &self,
        key: &str,
        wait_timeout: Duration,
        lease_timeout: Duration,
    ) -> Result<LockHandle> {
        let deadline = Instant::now() + wait_timeout;

        loop {
            {
                let mut locks = self.locks.lock().await;
                let now = Instant::now();
                let held = locks.get(key).is_some_and(|s| s.expires_at > now);
                if !held {
                    // Free, or the previous holder's lease lapsed.
                    let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                    let expires_at = now + lease_timeout;
                    locks.insert(
                        key.to_string(),
                        LockState { token, expires_at },
                    );
                    debug!(key, token, "lock acquired");
                    return Ok(LockHandle {
                        key: key.to_string(),
                        token,
                        expires_at,
                    });
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(key, "gave up waiting for lock");
                return Err(ShopError::LockTimeout {
                    key: key.to_string(),
                });
            }

            // Wake on release, or re-check at the wait deadline / next
            // possible lease expiry.
            let nap = remaining.min(Duration::from_millis(25));
            tokio::select! {
                _ = self.freed.notified() => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    /// Release a held lease. A stale handle (expired lease that someone
    /// else has since taken) is a no-op: the fencing token no longer
    /// matches.
    pub async fn release(&self, handle: LockHandle) {
        let mut locks = self.locks.lock().await;
        match locks.get(&handle.key) {
            Some(state) if state.token == handle.token => {
                locks.remove(&handle.key);
                drop(locks);
                self.freed.notify_waiters();
                debug!(key = %handle.key, "lock released");
            }
            _ => {
                warn!(key = %handle.key, "release of stale lock handle ignored");
            }
        }
    }

    /// Run `action` while holding `key`. The lock is released whether the
    /// action succeeds or fails. An action that outlives its lease gets
    /// `LockExpired` back even on success: mutual exclusion was no longer
    /// guaranteed for its tail end.
    pub async fn with_lock<F, Fut, T>(
        &self,
        key: &str,
        wait_timeout: Duration,
        lease_timeout: Duration,
        action: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let handle = self.acquire(key, wait_timeout, lease_timeout).await?;
        let result = action().await;
        let expired = handle.is_expired();
        let key = handle.key.clone();
        self.release(handle).await;
        if expired && result.is_ok() {
            warn!(key = %key, "action outlived its lease");
            return Err(ShopError::LockExpired { key });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(50);
    const LEASE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn contended_acquire_times_out() {
        let mgr = LockManager::new();
        let _held = mgr.acquire("stock:p1", WAIT, LEASE).await.unwrap();

        let err = mgr.acquire("stock:p1", WAIT, LEASE).await.unwrap_err();
        assert!(matches!(err, ShopError::LockTimeout { .. }));
    }

    #[tokio::test]
    async fn release_unblocks_waiter() {
        let mgr = std::sync::Arc::new(LockManager::new());
        let held = mgr.acquire("stock:p1", WAIT, LEASE).await.unwrap();

        let mgr2 = mgr.clone();
        let waiter = tokio::spawn(async move {
            mgr2.acquire("stock:p1", Duration::from_secs(1), LEASE).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        mgr.release(held).await;
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn expired_lease_can_be_reacquired_and_stale_release_is_ignored() {
        let mgr = LockManager::new();
        let stale = mgr
            .acquire("stock:p1", WAIT, Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(stale.is_expired());

        // Lease lapsed: a new acquirer gets in without waiting.
        let fresh = mgr.acquire("stock:p1", WAIT, LEASE).await.unwrap();

        // The crashed holder's late release must not free the new lease.
        mgr.release(stale).await;
        let err = mgr.acquire("stock:p1", WAIT, LEASE).await.unwrap_err();
        assert!(matches!(err, ShopError::LockTimeout { .. }));

        mgr.release(fresh).await;
    }

    #[tokio::test]
    async fn overrunning_action_surfaces_lock_expired() {
        let mgr = LockManager::new();
        let result: Result<()> = mgr
            .with_lock("stock:p1", WAIT, Duration::from_millis(5), || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result.unwrap_err(), ShopError::LockExpired { .. }));
    }

    #[tokio::test]
    async fn with_lock_releases_on_error() {
        let mgr = LockManager::new();
        let result: Result<()> = mgr
            .with_lock("stock:p1", WAIT, LEASE, || async {
                Err(ShopError::Internal("boom".into()))
            })
            .await;
        assert!(result.is_err());

        // Lock is free again.
        let handle = mgr.acquire("stock:p1", WAIT, LEASE).await.unwrap();
        mgr.release(handle).await;
    }
}
