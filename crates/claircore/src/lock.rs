//! Advisory locking (§4.4): a named, cross-process mutual-exclusion lock
//! keyed on an arbitrary string (in practice, a manifest digest's string
//! form), plus a single in-process reference implementation good enough to
//! exercise the [`crate::indexer::Controller`] without a real distributed
//! lock provider.
//!
//! The tricky part is the triple-cancellation contract: the returned
//! [`tokio_util::sync::CancellationToken`] must fire when the caller's
//! parent token cancels, when `release` is called, or when the service's
//! underlying connection is lost. The reference implementation gets (a)
//! and (b) from `CancellationToken::child_token` and an explicit cancel on
//! release, and derives (c) from a connection generation counter: a lock
//! acquired under generation `N` is cancelled the moment the service's
//! generation advances past `N`.
//!
//! Every acquisition is tagged with a [`LockHolder`] identifying the caller;
//! the registry remembers which holder currently has each key, so a holder
//! re-locking a key it already has is recognized as recursion and rejected
//! with [`Error::LockBotch`] rather than treated as ordinary contention
//! against a second caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./lock_test.rs"]
mod lock_test;

/// Identifies the caller attempting to acquire a lock, so the service can
/// tell that caller re-entering a key it already holds apart from a second,
/// independent caller contending for the same key. A real backend would
/// derive this from the session/connection identity; callers of this
/// in-process reference service supply their own value and are responsible
/// for giving logically distinct callers distinct holders.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct LockHolder(u64);

impl LockHolder {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Releases an advisory lock when consumed. Also releases on drop if the
/// caller never calls [`ReleaseGuard::release`] explicitly, so a panicking
/// or early-returning caller cannot leak the lock.
pub struct ReleaseGuard {
    key: String,
    generation: u64,
    inner: Arc<Inner>,
    token: CancellationToken,
    released: AtomicBool,
}

impl ReleaseGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock. Tolerates a generation that has already advanced
    /// past this lock's (an unlock racing a reconnect) by doing nothing in
    /// that case, per the liveness contract's instruction that such races
    /// be "tolerated silently".
    pub fn release(self) {
        self.do_release();
    }

    fn do_release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.release(&self.key, self.generation);
        self.token.cancel();
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.do_release();
    }
}

/// A named lock keyed on an arbitrary string, typically a digest's string
/// form, with liveness-cancellation semantics: *if the returned token has
/// not fired, the caller still holds the lock*.
#[async_trait]
pub trait AdvisoryLockService: Send + Sync {
    /// Non-blocking. If the lock cannot be taken immediately, returns a
    /// token that is already cancelled rather than an error — contention
    /// is an expected outcome, not a failure. If `holder` already holds
    /// `key`, fails with [`Error::LockBotch`] instead: re-locking a key a
    /// caller already holds is a defect, not contention.
    async fn try_lock(&self, holder: LockHolder, parent: CancellationToken, key: &str) -> Result<(CancellationToken, ReleaseGuard)>;

    /// Blocks with bounded doubling backoff until the lock is acquired or
    /// `parent` is cancelled. Fails immediately with [`Error::LockBotch`] if
    /// `holder` already holds `key`, rather than blocking on itself forever.
    async fn lock(&self, holder: LockHolder, parent: CancellationToken, key: &str) -> Result<(CancellationToken, ReleaseGuard)>;

    /// Releases the service's own resources (its long-lived connection in
    /// a real backend). Idempotent.
    async fn close(&self) -> Result<()>;
}

struct Inner {
    held: Mutex<HashMap<String, LockHolder>>,
    generation: AtomicU64,
    /// tokens handed out for currently-held locks, pruned on release, so a
    /// simulated reconnect can cancel every lock from the dead generation.
    live: Mutex<Vec<(String, u64, CancellationToken)>>,
}

impl Inner {
    fn release(&self, key: &str, generation: u64) {
        self.held.lock().expect("lock registry mutex poisoned").remove(key);
        self.live
            .lock()
            .expect("lock registry mutex poisoned")
            .retain(|(k, g, _)| !(k == key && *g == generation));
    }
}

/// What happened when a holder attempted to acquire a key.
enum Acquisition {
    Acquired(CancellationToken, ReleaseGuard),
    Busy,
    SelfReentrant,
}

fn cancelled_token() -> CancellationToken {
    let token = CancellationToken::new();
    token.cancel();
    token
}

/// In-process reference [`AdvisoryLockService`]: a mutex-guarded registry
/// of held keys, a generation counter bumped by
/// [`InProcessLockService::simulate_reconnect`], and doubling backoff
/// bounded by `backoff_min`/`backoff_max` for `lock()`.
pub struct InProcessLockService {
    inner: Arc<Inner>,
    backoff_min: Duration,
    backoff_max: Duration,
}

impl InProcessLockService {
    pub fn new(backoff_min: Duration, backoff_max: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                held: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                live: Mutex::new(Vec::new()),
            }),
            backoff_min,
            backoff_max,
        }
    }

    /// The service's current connection generation.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Simulate the keepalive connection dying and a reconnect loop
    /// re-establishing it: bumps the generation and cancels every
    /// currently-live lock's token, exactly as a real connection loss
    /// would invalidate every lock it was backing.
    pub fn simulate_reconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let dead: Vec<_> = std::mem::take(&mut *self.inner.live.lock().expect("lock registry mutex poisoned"));
        for (_, _, token) in dead {
            token.cancel();
        }
    }

    /// `true` if this service currently holds `key` via a not-yet-cancelled
    /// lock. Exposed for tests.
    fn already_holds(&self, key: &str) -> bool {
        self.inner
            .live
            .lock()
            .expect("lock registry mutex poisoned")
            .iter()
            .any(|(k, _, token)| k == key && !token.is_cancelled())
    }

    fn try_acquire(&self, parent: &CancellationToken, key: &str, holder: LockHolder) -> Acquisition {
        let mut held = self.inner.held.lock().expect("lock registry mutex poisoned");
        if let Some(existing) = held.get(key) {
            return if *existing == holder {
                Acquisition::SelfReentrant
            } else {
                Acquisition::Busy
            };
        }
        held.insert(key.to_owned(), holder);
        drop(held);
        let generation = self.generation();
        let token = parent.child_token();
        self.inner
            .live
            .lock()
            .expect("lock registry mutex poisoned")
            .push((key.to_owned(), generation, token.clone()));
        let guard = ReleaseGuard {
            key: key.to_owned(),
            generation,
            inner: self.inner.clone(),
            token: token.clone(),
            released: AtomicBool::new(false),
        };
        Acquisition::Acquired(token, guard)
    }

    fn already_cancelled_guard(&self, key: &str) -> (CancellationToken, ReleaseGuard) {
        let token = cancelled_token();
        let guard = ReleaseGuard {
            key: key.to_owned(),
            generation: self.generation(),
            inner: self.inner.clone(),
            token: token.clone(),
            released: AtomicBool::new(true),
        };
        (token, guard)
    }
}

#[async_trait]
impl AdvisoryLockService for InProcessLockService {
    async fn try_lock(&self, holder: LockHolder, parent: CancellationToken, key: &str) -> Result<(CancellationToken, ReleaseGuard)> {
        match self.try_acquire(&parent, key, holder) {
            Acquisition::Acquired(token, guard) => Ok((token, guard)),
            Acquisition::Busy => Ok(self.already_cancelled_guard(key)),
            Acquisition::SelfReentrant => Err(Error::LockBotch(key.to_owned())),
        }
    }

    async fn lock(&self, holder: LockHolder, parent: CancellationToken, key: &str) -> Result<(CancellationToken, ReleaseGuard)> {
        let mut backoff = self.backoff_min;
        loop {
            match self.try_acquire(&parent, key, holder) {
                Acquisition::Acquired(token, guard) => return Ok((token, guard)),
                Acquisition::SelfReentrant => return Err(Error::LockBotch(key.to_owned())),
                Acquisition::Busy => {}
            }
            if parent.is_cancelled() {
                return Err(Error::Cancelled);
            }
            tokio::select! {
                _ = parent.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(jitter(backoff)) => {}
            }
            backoff = std::cmp::min(backoff * 2, self.backoff_max);
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Full jitter over `[base/2, base]`, matching the pacing model the state
/// machine's own retry backoff uses.
fn jitter(base: Duration) -> Duration {
    let millis = base.as_millis().max(1) as u64;
    let jittered = rand::thread_rng().gen_range(millis / 2..=millis);
    Duration::from_millis(jittered)
}
