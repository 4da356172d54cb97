//! Notification sinks - Fire-and-forget event delivery

use tracing::{error, info, warn};

use crate::core::{Notification, NotificationSink};

/// Writes every event to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, event: Notification) {
        match &event {
            Notification::Fill { order_id, side, quantity, price, is_maker, .. } => {
                info!("🔔 Fill {} {} {} @ {} maker={}", order_id, side, quantity, price, is_maker)
            }
            Notification::Cancelled { order_id, released, .. } => {
                info!("🔔 Cancelled {} released {}", order_id, released)
            }
            Notification::Expired { order_id, .. } => info!("🔔 Expired {}", order_id),
            Notification::Triggered { order_id, price, .. } => {
                info!("🔔 Triggered {} at {}", order_id, price)
            }
            Notification::MarginCall { account_id, margin_level } => {
                warn!("⚠️ Margin call for {} (level {})", account_id, margin_level)
            }
            Notification::Liquidation { account_id, margin_level, cancelled_orders } => error!(
                "🚨 Liquidation of {} (level {}), {} orders cancelled",
                account_id, margin_level, cancelled_orders
            ),
        }
    }
}

/// Pushes events onto a flume channel without ever blocking the caller.
/// A full or disconnected channel drops the event.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: flume::Sender<Notification>,
}

impl ChannelNotifier {
    pub fn bounded(capacity: usize) -> (Self, flume::Receiver<Notification>) {
        let (tx, rx) = flume::bounded(capacity);
        (Self { tx }, rx)
    }

    pub fn unbounded() -> (Self, flume::Receiver<Notification>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, event: Notification) {
        if let Err(e) = self.tx.try_send(event) {
            match e {
                flume::TrySendError::Full(ev) => warn!("notification dropped, channel full: {:?}", ev),
                flume::TrySendError::Disconnected(_) => {}
            }
        }
    }
}

/// Sends each event to every inner sink in order
pub struct FanoutNotifier {
    sinks: Vec<std::sync::Arc<dyn NotificationSink>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<std::sync::Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

impl NotificationSink for FanoutNotifier {
    fn notify(&self, event: Notification) {
        for sink in &self.sinks {
            sink.notify(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AccountId;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn margin_call() -> Notification {
        Notification::MarginCall {
            account_id: AccountId::new(),
            margin_level: dec!(1.2),
        }
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (notifier, rx) = ChannelNotifier::bounded(1);
        notifier.notify(margin_call());
        notifier.notify(margin_call());
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_disconnected_channel_is_silent() {
        let (notifier, rx) = ChannelNotifier::unbounded();
        drop(rx);
        notifier.notify(margin_call());
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let (a, rx_a) = ChannelNotifier::unbounded();
        let (b, rx_b) = ChannelNotifier::unbounded();
        let fanout = FanoutNotifier::new(vec![Arc::new(a), Arc::new(LogNotifier), Arc::new(b)]);
        fanout.notify(margin_call());
        assert_eq!(rx_a.try_recv().ok(), rx_b.try_recv().ok());
        assert!(rx_a.is_empty());
    }
}
