//! Single-write, multi-read readiness signal set once schema bootstrap completes.
//!
//! Reads are cheap atomic loads so synchronous code can check readiness without
//! touching the runtime; async dependents can instead await [`ReadinessGate::wait_ready`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct ReadinessGate {
    inner: Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    ready: AtomicBool,
    tx: watch::Sender<bool>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(GateInner {
                ready: AtomicBool::new(false),
                tx,
            }),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Flip the gate. Returns `true` only for the call that actually opened it;
    /// the gate never closes again.
    pub fn mark_ready(&self) -> bool {
        if self.inner.ready.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.tx.send_replace(true);
        true
    }

    /// Resolve once the gate is open. Returns immediately if it already is.
    pub async fn wait_ready(&self) {
        if self.is_ready() {
            return;
        }
        let mut rx = self.inner.tx.subscribe();
        // The sender lives in `inner`, which we hold, so the channel cannot close.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn starts_closed_and_opens_once() {
        let gate = ReadinessGate::new();
        assert!(!gate.is_ready());
        assert!(gate.mark_ready());
        assert!(!gate.mark_ready());
        assert!(gate.is_ready());
    }

    #[test]
    fn waiters_wake_when_gate_opens() {
        let gate = ReadinessGate::new();
        let mut waiter = task::spawn(gate.wait_ready());
        assert_pending!(waiter.poll());
        gate.mark_ready();
        assert!(waiter.is_woken());
        assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn visible_across_threads() {
        let gate = ReadinessGate::new();
        let writer = gate.clone();
        tokio::task::spawn_blocking(move || writer.mark_ready())
            .await
            .unwrap();
        assert!(gate.is_ready());
        gate.wait_ready().await;
    }
}
