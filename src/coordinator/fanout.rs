//! Legacy fan-out: applies one strategy signal to every active subscriber,
//! placing per-user orders with per-user risk sizing. Runs concurrently
//! across subscribers via `futures_util::future::join_all`, with each
//! subscriber wrapped so one failure cannot abort the rest.

use chrono::Utc;
use futures_util::future::join_all;
use tracing::warn;
use uuid::Uuid;

use crate::broker::{BrokerClient, OrderSide};
use crate::error::{EngineError, EngineResult};
use crate::event_bus::{EngineEvent, EventBus};
use crate::runtime::signal::{Signal, SignalType};
use crate::settings::SettingsService;
use crate::store::gateway::StoreGateway;
use crate::store::models::{ActiveSubscriber, Trade, TradeSide, TradeStatus, TradingType};

pub struct FanoutDeps<'a> {
    pub store: &'a StoreGateway,
    pub settings: &'a SettingsService,
    pub broker: &'a dyn BrokerClient,
    pub events: &'a EventBus,
    pub min_order_quantity: f64,
}

pub struct FanoutReport {
    pub trades_generated: i64,
    pub errors: Vec<String>,
}

/// Applies `signal` to every subscriber. Callers are expected to have
/// already short-circuited on `signal.is_hold()`: a HOLD signal yields an
/// overall NO_SIGNAL execution, not an empty fan-out.
pub async fn run_legacy_fanout(
    deps: &FanoutDeps<'_>,
    symbol: &str,
    signal: &Signal,
    subscribers: &[ActiveSubscriber],
) -> FanoutReport {
    let results = join_all(
        subscribers
            .iter()
            .map(|subscriber| fan_out_one(deps, symbol, signal, subscriber)),
    )
    .await;

    let mut trades_generated = 0;
    let mut errors = Vec::new();
    for (subscriber, result) in subscribers.iter().zip(results) {
        match result {
            Ok(true) => trades_generated += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(
                    subscription_id = %subscriber.subscription.id,
                    error = %e,
                    "fan-out failed for subscriber, continuing with the rest"
                );
                errors.push(format!("{}: {e}", subscriber.subscription.id));
            }
        }
    }
    FanoutReport {
        trades_generated,
        errors,
    }
}

/// Returns `Ok(true)` if a trade was created, `Ok(false)` if the
/// subscriber was skipped (not an error), `Err` if the subscriber's order
/// placement genuinely failed.
async fn fan_out_one(
    deps: &FanoutDeps<'_>,
    symbol: &str,
    signal: &Signal,
    subscriber: &ActiveSubscriber,
) -> EngineResult<bool> {
    let sub = &subscriber.subscription;

    if !sub.active || sub.paused {
        return Ok(false);
    }

    let side = match signal.signal {
        SignalType::Long => OrderSide::Buy,
        SignalType::Short => OrderSide::Sell,
        // EXIT_LONG/EXIT_SHORT carry no entry action here: the entry
        // signal is persisted on the open trade precisely so a later,
        // out-of-scope exit-execution path can act on it.
        SignalType::ExitLong | SignalType::ExitShort | SignalType::Hold => return Ok(false),
    };

    let sub_settings = match deps.settings.get_subscription_settings(&sub.user_id, &sub.strategy_id).await? {
        Some(s) if s.is_active => s,
        _ => return Ok(false),
    };

    if deps.store.get_open_trade(&sub.id, symbol).await?.is_some() {
        return Ok(false);
    }

    let (risk_per_trade, leverage) = match (sub_settings.risk_per_trade, sub_settings.leverage) {
        (Some(r), Some(l)) => (r, l),
        _ => {
            warn!(
                subscription_id = %sub.id,
                "risk_per_trade/leverage unresolvable for subscriber, skipping"
            );
            return Ok(false);
        }
    };

    let entry_price = signal.price;
    let mut quantity = match signal.stop_loss.filter(|&sl| sl != 0.0) {
        Some(stop_loss) => (sub.capital * risk_per_trade / (entry_price - stop_loss).abs()) * leverage,
        None => (sub.capital * risk_per_trade * leverage) / entry_price,
    };

    if quantity <= 0.0 {
        return Ok(false);
    }
    if quantity < deps.min_order_quantity {
        warn!(
            subscription_id = %sub.id,
            computed = quantity,
            minimum = deps.min_order_quantity,
            "computed size below platform minimum, clamping up"
        );
        quantity = deps.min_order_quantity;
    }

    if sub.trading_type == TradingType::Futures {
        let instrument = deps.broker.get_instrument_info(symbol).await?;
        quantity = floor_to_increment(quantity, instrument.quantity_increment);
        if quantity <= 0.0 {
            return Err(EngineError::QuantityTooSmall);
        }
        if leverage > instrument.max_leverage {
            return Err(EngineError::LeverageExceedsLimit {
                requested: leverage,
                max: instrument.max_leverage,
            });
        }
    }

    let entry_ack = deps
        .broker
        .place_market_order(&sub.broker_credential_id, symbol, side, quantity)
        .await?;

    let mut stop_order_id = None;
    if let Some(stop_loss) = signal.stop_loss.filter(|&sl| sl != 0.0) {
        match deps
            .broker
            .place_limit_order(&sub.broker_credential_id, symbol, side.opposite(), quantity, stop_loss)
            .await
        {
            Ok(ack) => stop_order_id = Some(ack.order_id),
            Err(e) => warn!(subscription_id = %sub.id, error = %e, "stop-loss order failed, entry still stands"),
        }
    }

    let mut take_profit_order_id = None;
    if let Some(take_profit) = signal.take_profit.filter(|&tp| tp != 0.0) {
        match deps
            .broker
            .place_limit_order(&sub.broker_credential_id, symbol, side.opposite(), quantity, take_profit)
            .await
        {
            Ok(ack) => take_profit_order_id = Some(ack.order_id),
            Err(e) => warn!(subscription_id = %sub.id, error = %e, "take-profit order failed, entry still stands"),
        }
    }

    let mut position_id = None;
    let mut liquidation_price = None;
    if sub.trading_type == TradingType::Futures {
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        if let Ok(positions) = deps.broker.list_positions(&sub.broker_credential_id).await {
            if let Some(position) = positions.iter().find(|p| p.symbol == symbol) {
                position_id = Some(format!("{}:{}", sub.broker_credential_id, symbol));
                liquidation_price = position.liquidation_price;
            }
        }
    }

    let trade = Trade {
        id: Uuid::new_v4().to_string(),
        subscription_id: sub.id.clone(),
        symbol: symbol.to_string(),
        side: match signal.signal {
            SignalType::Short => TradeSide::Short,
            _ => TradeSide::Long,
        },
        quantity: entry_ack.filled_quantity,
        entry_price: entry_ack.filled_price,
        stop_loss: signal.stop_loss,
        take_profit: signal.take_profit,
        status: TradeStatus::Open,
        pnl: None,
        order_id: Some(entry_ack.order_id),
        stop_order_id,
        take_profit_order_id,
        position_id,
        liquidation_price,
        metadata: signal.metadata.as_ref().map(|m| m.to_string()),
        trading_type: sub.trading_type,
        leverage,
        opened_at: Utc::now(),
        closed_at: None,
    };

    deps.store.insert_trade(&trade).await?;
    deps.events.publish(EngineEvent::TradeCreated {
        trade_id: trade.id,
        subscription_id: sub.id.clone(),
    });

    Ok(true)
}

fn floor_to_increment(quantity: f64, increment: f64) -> f64 {
    if increment <= 0.0 {
        return quantity;
    }
    (quantity / increment).floor() * increment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_to_increment_rounds_down() {
        assert!((floor_to_increment(0.0173, 0.001) - 0.017).abs() < 1e-9);
        assert_eq!(floor_to_increment(0.0003, 0.001), 0.0);
    }

    #[test]
    fn floor_to_increment_zero_passthrough() {
        assert_eq!(floor_to_increment(1.5, 0.0), 1.5);
    }
}
