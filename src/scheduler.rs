//! Cancellable background jobs driven by a fixed ticker

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::ledger::IdempotencyGuard;
use crate::pricing::PriceCache;

/// Shortest period accepted; `tokio::time::interval` rejects zero
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Longest period accepted; keeps the next deadline representable
const MAX_PERIOD: Duration = Duration::from_secs(365 * 86_400);

/// A job run on spawn and then once per period until stopped
pub struct PeriodicTask {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.clamp(MIN_PERIOD, MAX_PERIOD);
        let (shutdown, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!(task = name, "Running periodic task");
                        job().await;
                    }
                    _ = shutdown_rx.recv() => {
                        // Explicit stop or every sender dropped
                        break;
                    }
                }
            }
            info!(task = name, "Periodic task stopped");
        });

        info!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");
        Self {
            name,
            shutdown,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task and wait for the current run to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(()).await;
        if let Err(e) = self.handle.await {
            error!(task = self.name, error = %e, "Periodic task ended abnormally");
        }
    }
}

/// Re-quote every rewarded symbol, immediately and then every `period`
pub fn spawn_price_refresh(prices: Arc<PriceCache>, period: Duration) -> PeriodicTask {
    PeriodicTask::spawn("price_refresh", period, move || {
        let prices = prices.clone();
        async move {
            if let Err(e) = prices.refresh_all().await {
                error!(error = %e, "Price refresh pass failed");
            }
        }
    })
}

/// Delete expired idempotency keys every `period`
pub fn spawn_idempotency_sweep(guard: Arc<IdempotencyGuard>, period: Duration) -> PeriodicTask {
    PeriodicTask::spawn("idempotency_sweep", period, move || {
        let guard = guard.clone();
        async move {
            guard.cleanup_expired().await;
        }
    })
}
