//! Snapshot Lifecycle Manager
//!
//! Materialized state is kept alive by [`LiveToken`]s. Snapshots handed out to
//! consumers hold one, lazily materialized nodes hold one each, and a support
//! that is configured to retain its state holds one for itself. When the last
//! token is dropped the idle callback fires with the current generation:
//!
//! ```text
//!   acquire ─▶ live += 1                      drop ─▶ live -= 1
//!                                                       │ 1 → 0
//!                                                       ▼
//!                                        on_idle(generation) ─▶ post teardown
//!                                                       │
//!                           write task: is_idle(generation)?  ── no ─▶ no-op
//!                                                       │ yes
//!                                                       ▼
//!                                        tear down, advance()  (generation + 1)
//! ```
//!
//! The teardown itself runs later as a write task, so by the time it executes
//! a new token may have been acquired or an earlier teardown may already have
//! completed. [`Lifecycle::is_idle`] catches both cases and the stale request
//! becomes a silent no-op.

use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

type IdleCallback = Box<dyn Fn(u64) + Send + Sync>;

struct LifecycleInner {
    live: AtomicUsize,
    generation: AtomicU64,
    on_idle: IdleCallback,
}

/// Reference count over everything that keeps materialized state alive.
#[derive(Clone)]
pub(crate) struct Lifecycle {
    inner: Arc<LifecycleInner>,
}

/// Keeps the state of one generation alive while held.
pub struct LiveToken {
    inner: Arc<LifecycleInner>,
    generation: u64,
}

impl Lifecycle {
    /// Creates a lifecycle that calls `on_idle` whenever the live count drops
    /// to zero.
    pub(crate) fn new(on_idle: impl Fn(u64) + Send + Sync + 'static) -> Self {
        Lifecycle {
            inner: Arc::new(LifecycleInner {
                live: AtomicUsize::new(0),
                generation: AtomicU64::new(0),
                on_idle: Box::new(on_idle),
            }),
        }
    }

    pub(crate) fn acquire(&self) -> LiveToken {
        self.inner.live.fetch_add(1, Ordering::AcqRel);
        LiveToken {
            inner: Arc::clone(&self.inner),
            generation: self.inner.generation.load(Ordering::Acquire),
        }
    }

    pub(crate) fn live(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Whether a teardown requested for `generation` is still valid.
    pub(crate) fn is_idle(&self, generation: u64) -> bool {
        self.live() == 0 && self.generation() == generation
    }

    /// Starts a new generation after a teardown.
    pub(crate) fn advance(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("live", &self.live())
            .field("generation", &self.generation())
            .finish()
    }
}

impl LiveToken {
    /// Generation this token was issued in.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for LiveToken {
    fn drop(&mut self) {
        if self.inner.live.fetch_sub(1, Ordering::AcqRel) == 1 {
            // a token from before the last teardown may idle the state built after it
            let current = self.inner.generation.load(Ordering::Acquire);
            (self.inner.on_idle)(current);
        }
    }
}

impl fmt::Debug for LiveToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveToken")
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording() -> (Lifecycle, Arc<Mutex<Vec<u64>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let lifecycle = Lifecycle::new(move |generation| sink.lock().push(generation));
        (lifecycle, calls)
    }

    #[test]
    fn test_idle_fires_on_last_drop_only() {
        let (lifecycle, calls) = recording();
        let a = lifecycle.acquire();
        let b = lifecycle.acquire();
        assert_eq!(lifecycle.live(), 2);
        drop(a);
        assert!(calls.lock().is_empty());
        drop(b);
        assert_eq!(*calls.lock(), vec![0]);
        assert!(lifecycle.is_idle(0));
    }

    #[test]
    fn test_reacquire_makes_request_stale() {
        let (lifecycle, calls) = recording();
        drop(lifecycle.acquire());
        let again = lifecycle.acquire();
        assert_eq!(*calls.lock(), vec![0]);
        assert!(!lifecycle.is_idle(0));
        drop(again);
        assert!(lifecycle.is_idle(0));
    }

    #[test]
    fn test_advance_invalidates_older_generation() {
        let (lifecycle, calls) = recording();
        drop(lifecycle.acquire());
        lifecycle.advance();
        assert!(!lifecycle.is_idle(0));
        let token = lifecycle.acquire();
        assert_eq!(token.generation(), 1);
        drop(token);
        assert_eq!(*calls.lock(), vec![0, 1]);
        assert!(lifecycle.is_idle(1));
    }

    #[test]
    fn test_old_token_reports_current_generation() {
        let (lifecycle, calls) = recording();
        let old = lifecycle.acquire();
        lifecycle.advance();
        drop(old);
        assert_eq!(*calls.lock(), vec![1]);
        assert!(lifecycle.is_idle(1));
    }
}
