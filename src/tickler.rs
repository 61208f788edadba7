//! The tickler: a periodic keep-alive driver that depends on a narrow
//! `Tickle`-like trait rather than the full REST client, avoiding a cyclic
//! reference between the tickler and the engine it keeps alive. Grounded
//! on `arkin-core/src/service.rs`'s `TaskTracker` + `CancellationToken`
//! lifecycle, narrowed to a single repeating call instead of a general
//! service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, warn};

use crate::error::{GatewayError, GatewayResult};

/// The minimal capability the tickler needs: "send one keep-alive call".
/// Kept separate from `RestEngine` so the tickler does not need to know
/// about the full REST surface.
#[async_trait]
pub trait Tickle: Send + Sync {
    async fn tickle(&self) -> GatewayResult<()>;
}

pub struct Tickler {
    target: Arc<dyn Tickle>,
    interval: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Tickler {
    pub fn new(target: Arc<dyn Tickle>, interval: Duration) -> Self {
        Self {
            target,
            interval,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Idempotent: starting an already-running tickler is a no-op.
    pub fn start(&self) {
        if !self.tracker.is_empty() {
            return;
        }
        let target = self.target.clone();
        let interval = self.interval;
        let shutdown = self.shutdown.clone();
        self.tracker.reopen();
        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match target.tickle().await {
                            Ok(()) => {}
                            Err(GatewayError::TransientIo { method, url, .. }) => {
                                warn!(target: "tickler", "keep-alive timed out for {method} {url}");
                            }
                            Err(e) => {
                                error!(target: "tickler", "keep-alive call failed: {e}");
                            }
                        }
                    }
                    _ = shutdown.cancelled() => return,
                }
            }
        });
    }

    /// Idempotent: stopping a tickler that is not running is a no-op. Waits
    /// for the worker to exit before returning.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingTickle(Arc<AtomicU64>);

    #[async_trait]
    impl Tickle for CountingTickle {
        async fn tickle(&self) -> GatewayResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingTickle;

    #[async_trait]
    impl Tickle for FailingTickle {
        async fn tickle(&self) -> GatewayResult<()> {
            Err(GatewayError::Protocol("gateway unreachable".into()))
        }
    }

    #[test_log::test]
    #[tokio::test]
    async fn calls_target_repeatedly_until_stopped() {
        let count = Arc::new(AtomicU64::new(0));
        let tickler = Tickler::new(Arc::new(CountingTickle(count.clone())), Duration::from_millis(20));
        tickler.start();
        tokio::time::sleep(Duration::from_millis(70)).await;
        tickler.stop().await;
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn continues_after_tickle_errors() {
        let tickler = Tickler::new(Arc::new(FailingTickle), Duration::from_millis(20));
        tickler.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tickler.stop().await;
    }

    #[tokio::test]
    async fn starting_twice_does_not_spawn_a_second_worker() {
        let count = Arc::new(AtomicU64::new(0));
        let tickler = Tickler::new(Arc::new(CountingTickle(count.clone())), Duration::from_millis(500));
        tickler.start();
        tickler.start();
        tickler.stop().await;
    }
}
