use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::OrderLifecycleManager;
use crate::core::PriceFeed;
use crate::core::config::SweepConfig;

/// Runs the expiry, stop-trigger and margin sweeps on fixed intervals.
pub struct Sweeper {
    manager: Arc<OrderLifecycleManager>,
    feed: Arc<dyn PriceFeed>,
    config: SweepConfig,
}

/// Handle to a spawned sweeper
pub struct SweeperHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the loop and wait for the in-flight sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!("sweeper task ended abnormally: {}", e);
        }
    }
}

impl Sweeper {
    pub fn new(manager: Arc<OrderLifecycleManager>, feed: Arc<dyn PriceFeed>, config: SweepConfig) -> Self {
        Self { manager, feed, config }
    }

    /// Must be called inside a tokio runtime.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let task = tokio::spawn(self.run(shutdown_rx));
        SweeperHandle { shutdown_tx, task }
    }

    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "🧹 Sweeper started: expiry {}ms, stops {}ms, margin {}ms",
            self.config.expiry_ms, self.config.stop_trigger_ms, self.config.margin_ms
        );

        let mut expiry = every(self.config.expiry_ms);
        let mut stops = every(self.config.stop_trigger_ms);
        let mut margin = every(self.config.margin_ms);

        loop {
            tokio::select! {
                _ = expiry.tick() => {
                    self.manager.process_expired_orders();
                }
                _ = stops.tick() => self.sweep_stops(),
                _ = margin.tick() => {
                    let flagged = self.manager.process_margin_checks();
                    if flagged > 0 {
                        debug!("margin sweep flagged {} accounts", flagged);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("🧹 Sweeper stopped");
                    break;
                }
            }
        }
    }

    /// Offer every listed symbol's mark price to its parked stops.
    pub fn sweep_stops(&self) {
        for symbol in self.manager.catalog().symbols() {
            if let Some(price) = self.feed.mark_price(&symbol) {
                self.manager.process_triggered_stop_orders(&symbol, price);
            }
        }
    }
}

fn every(ms: u64) -> tokio::time::Interval {
    let mut ticker = interval(Duration::from_millis(ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
