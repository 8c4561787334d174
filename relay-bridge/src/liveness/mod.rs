//! Keeps the companion scheduler process subscribed so its cron-style
//! triggers keep firing. Nothing here is fatal to the bridge.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ledger::SchedulerMonitor;
use crate::poller::BridgeState;

pub struct LivenessCompanion {
    monitor: Arc<dyn SchedulerMonitor>,
    process_id: String,
    retry_interval: Duration,
    state: Arc<BridgeState>,
}

impl LivenessCompanion {
    pub fn new(
        monitor: Arc<dyn SchedulerMonitor>,
        process_id: impl Into<String>,
        retry_interval: Duration,
        state: Arc<BridgeState>,
    ) -> Self {
        Self {
            monitor,
            process_id: process_id.into(),
            retry_interval,
            state,
        }
    }

    /// Subscribe (retrying until it sticks), wait for shutdown, then
    /// unsubscribe once.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut attempt: u32 = 0;
        while !self.state.is_subscribed() {
            attempt += 1;
            match self.monitor.subscribe(&self.process_id).await {
                Ok(()) => {
                    self.state.set_subscribed(true);
                    info!(process_id = %self.process_id, attempt, "Scheduler subscription active");
                }
                Err(e) => {
                    warn!(
                        process_id = %self.process_id,
                        attempt,
                        "Scheduler subscription failed, retrying in {:?}: {}",
                        self.retry_interval,
                        e
                    );
                    tokio::select! {
                        biased;

                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_interval) => {}
                    }
                }
            }
        }

        cancel.cancelled().await;
        self.release().await;
    }

    /// Drop the subscription if one is held.
    pub async fn release(&self) {
        if !self.state.is_subscribed() {
            debug!("No scheduler subscription to release");
            return;
        }

        match self.monitor.unsubscribe(&self.process_id).await {
            Ok(()) => {
                self.state.set_subscribed(false);
                info!(process_id = %self.process_id, "Scheduler subscription released");
            }
            Err(e) => warn!(
                process_id = %self.process_id,
                "Failed to release scheduler subscription: {}",
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::CircuitBreaker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyMonitor {
        fail_first: u32,
        subscribes: AtomicU32,
        unsubscribes: AtomicU32,
    }

    #[async_trait]
    impl SchedulerMonitor for FlakyMonitor {
        async fn subscribe(&self, _process_id: &str) -> crate::Result<()> {
            let n = self.subscribes.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(crate::Error::ledger_write("MU unavailable"));
            }
            Ok(())
        }

        async fn unsubscribe(&self, _process_id: &str) -> crate::Result<()> {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn state() -> Arc<BridgeState> {
        Arc::new(BridgeState::new(CircuitBreaker::new(3, Duration::from_secs(60))))
    }

    #[tokio::test]
    async fn test_retries_until_subscribed_then_releases() {
        let monitor = Arc::new(FlakyMonitor {
            fail_first: 2,
            subscribes: AtomicU32::new(0),
            unsubscribes: AtomicU32::new(0),
        });
        let state = state();
        let companion = Arc::new(LivenessCompanion::new(
            monitor.clone(),
            "scheduler",
            Duration::from_millis(5),
            state.clone(),
        ));
        let cancel = CancellationToken::new();

        let task = {
            let companion = companion.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { companion.run(cancel).await })
        };

        for _ in 0..200 {
            if state.is_subscribed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(state.is_subscribed());
        assert_eq!(monitor.subscribes.load(Ordering::SeqCst), 3);

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(monitor.unsubscribes.load(Ordering::SeqCst), 1);
        assert!(!state.is_subscribed());
    }

    #[tokio::test]
    async fn test_shutdown_before_subscribing_skips_release() {
        let monitor = Arc::new(FlakyMonitor {
            fail_first: u32::MAX,
            subscribes: AtomicU32::new(0),
            unsubscribes: AtomicU32::new(0),
        });
        let companion = LivenessCompanion::new(
            monitor.clone(),
            "scheduler",
            Duration::from_secs(60),
            state(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        companion.run(cancel).await;
        assert_eq!(monitor.unsubscribes.load(Ordering::SeqCst), 0);
    }
}
