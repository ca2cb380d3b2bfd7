//! Process-wide call registry
//!
//! Tracks active calls with lock-free atomics and supports graceful drain:
//! once draining starts, no new call is admitted, in-flight calls run to
//! completion, and `wait_idle` unblocks when the last one releases.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Registry of active call sessions
pub struct CallRegistry {
    active: AtomicUsize,
    draining: AtomicBool,
    idle: Notify,
}

impl CallRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
            idle: Notify::new(),
        })
    }

    /// Admit one call unless draining
    ///
    /// The returned guard releases the slot exactly once when dropped, on
    /// every exit path including panics; there is no manual release.
    pub fn register(self: &Arc<Self>) -> Option<CallGuard> {
        if self.draining.load(Ordering::Acquire) {
            return None;
        }

        self.active.fetch_add(1, Ordering::AcqRel);

        // Lost a race with start_draining: undo the increment.
        if self.draining.load(Ordering::Acquire) {
            self.release();
            return None;
        }

        Some(CallGuard { registry: Arc::clone(self) })
    }

    /// Permanently stop admitting new calls; in-flight calls are unaffected
    pub fn start_draining(&self) {
        self.draining.store(true, Ordering::Release);
        if self.active.load(Ordering::Acquire) == 0 {
            self.idle.notify_waiters();
        }
    }

    /// Block until the active count reaches zero
    ///
    /// Callers apply their own timeout around this during shutdown.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Lock-free read for health surfaces
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Lock-free read for health surfaces
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    fn release(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Registry membership for one call; releases on drop
pub struct CallGuard {
    registry: Arc<CallRegistry>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.registry.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_register_and_release() {
        let registry = CallRegistry::new();
        assert_eq!(registry.active_count(), 0);

        let guard = registry.register().unwrap();
        assert_eq!(registry.active_count(), 1);

        drop(guard);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_draining_rejects_new_calls_forever() {
        let registry = CallRegistry::new();
        let guard = registry.register().unwrap();

        registry.start_draining();
        assert!(registry.is_draining());
        assert!(registry.register().is_none());

        // Returning to zero active does not reopen admission.
        drop(guard);
        assert_eq!(registry.active_count(), 0);
        assert!(registry.register().is_none());
    }

    #[tokio::test]
    async fn test_wait_idle_unblocks_on_last_release() {
        let registry = CallRegistry::new();
        let guard = registry.register().unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_idle().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_idle should unblock")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_when_empty() {
        let registry = CallRegistry::new();
        tokio::time::timeout(Duration::from_millis(100), registry.wait_idle())
            .await
            .expect("empty registry is idle");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_release_never_negative() {
        let registry = CallRegistry::new();
        let mut handles = Vec::new();

        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                for _ in 0..200 {
                    if let Some(guard) = registry.register() {
                        tokio::task::yield_now().await;
                        drop(guard);
                    }
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.active_count(), 0);
        registry.wait_idle().await;
    }
}
