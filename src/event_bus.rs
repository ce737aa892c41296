//! In-process typed pub/sub for lifecycle events.
//!
//! One `tokio::sync::broadcast` channel shared by every subscriber, publish
//! never blocks on a slow listener, and handlers run on whichever task
//! drains the channel (not on the publisher's task, since `broadcast` has
//! no synchronous callback hook — the closest safe approximation in Rust).

use tokio::sync::broadcast;
use tracing::warn;

/// Fixed catalog of lifecycle events the core emits.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    CandleClose {
        symbol: String,
        resolution: String,
    },
    ExecutionStart {
        strategy_id: String,
        interval_key: String,
    },
    ExecutionComplete {
        strategy_id: String,
        interval_key: String,
    },
    ExecutionError {
        strategy_id: String,
        interval_key: String,
        error: String,
    },
    SubscriptionCreated {
        subscription_id: String,
        strategy_id: String,
    },
    SubscriptionCancelled {
        subscription_id: String,
        strategy_id: String,
    },
    TradeCreated {
        trade_id: String,
        subscription_id: String,
    },
    TradeFilled {
        trade_id: String,
    },
    TradeClosed {
        trade_id: String,
    },
}

/// Guardrail: no single bus instance will register more than this many
/// listeners.
pub const MAX_LISTENERS: usize = 100;

pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
    listener_count: std::sync::atomic::AtomicUsize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listener_count: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Subscribe to the event catalog. Returns `None` once `MAX_LISTENERS`
    /// is reached.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<EngineEvent>> {
        use std::sync::atomic::Ordering;
        let mut current = self.listener_count.load(Ordering::SeqCst);
        loop {
            if current >= MAX_LISTENERS {
                warn!(current, "event bus listener guardrail reached");
                return None;
            }
            match self.listener_count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(self.sender.subscribe()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Publish non-blocking; if there are no subscribers this is a no-op.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_is_received_by_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe().unwrap();
        bus.publish(EngineEvent::CandleClose {
            symbol: "BTCUSDT".to_string(),
            resolution: "5".to_string(),
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(
            received,
            EngineEvent::CandleClose {
                symbol: "BTCUSDT".to_string(),
                resolution: "5".to_string(),
            }
        );
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(EngineEvent::TradeFilled {
            trade_id: "t1".to_string(),
        });
    }

    #[test]
    fn listener_guardrail_caps_subscriptions() {
        let bus = EventBus::new(16);
        let mut kept = Vec::new();
        for _ in 0..MAX_LISTENERS {
            kept.push(bus.subscribe().expect("under guardrail"));
        }
        assert!(bus.subscribe().is_none());
    }
}
