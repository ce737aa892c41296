//! Durable entity types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scalar type allowed in a strategy's free-form `extras` bag -- the
/// dynamic part of its execution config that doesn't map to a known field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ExtraScalar {
    String(String),
    Number(f64),
    Bool(bool),
}

/// The typed schema standing in for the original free-form `executionConfig`
/// hash: known fields are first-class, unknown keys are passed through
/// opaquely to the strategy runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionConfig {
    pub symbol: Option<String>,
    pub resolution: Option<String>,
    pub risk_per_trade: Option<f64>,
    pub leverage: Option<f64>,
    pub max_positions: Option<i64>,
    pub max_daily_loss: Option<f64>,
    #[serde(default)]
    pub extras: HashMap<String, ExtraScalar>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            symbol: None,
            resolution: None,
            risk_per_trade: None,
            leverage: None,
            max_positions: None,
            max_daily_loss: None,
            extras: HashMap::new(),
        }
    }
}

impl ExecutionConfig {
    pub fn is_complete(&self) -> bool {
        self.symbol.as_deref().is_some_and(|s| !s.is_empty())
            && self.resolution.as_deref().is_some_and(|r| !r.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Legacy,
    MultiTenant,
    Livetrader,
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::Legacy
    }
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Legacy => "legacy",
            StrategyKind::MultiTenant => "multi_tenant",
            StrategyKind::Livetrader => "livetrader",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "multi_tenant" => StrategyKind::MultiTenant,
            "livetrader" => StrategyKind::Livetrader,
            _ => StrategyKind::Legacy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub config: ExecutionConfig,
    pub kind: StrategyKind,
    pub subscriber_count: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TradingType {
    Spot,
    Futures,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub strategy_id: String,
    pub broker_credential_id: String,
    pub capital: f64,
    pub risk_per_trade: Option<f64>,
    pub leverage: Option<f64>,
    pub max_positions: Option<i64>,
    pub max_daily_loss: Option<f64>,
    pub sl_atr_multiplier: Option<f64>,
    pub tp_atr_multiplier: Option<f64>,
    pub trading_type: TradingType,
    pub active: bool,
    pub paused: bool,
    pub subscribed_at: DateTime<Utc>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub cumulative_pnl: f64,
    pub trade_count: i64,
}

/// A subscription joined with the strategy config needed to execute on its
/// behalf. Broker credentials are resolved separately from
/// `subscription.broker_credential_id` via `CredentialResolver` -- this
/// gateway has no vault of its own to join against.
#[derive(Debug, Clone)]
pub struct ActiveSubscriber {
    pub subscription: Subscription,
    pub strategy_config: ExecutionConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
    NoSignal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub resolution: String,
    pub interval_key: String,
    pub executed_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub signal_type: Option<String>,
    pub subscribers_count: i64,
    pub trades_generated: i64,
    pub duration_s: f64,
    pub worker_id: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeSide {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub subscription_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub status: TradeStatus,
    pub pnl: Option<f64>,
    pub order_id: Option<String>,
    pub stop_order_id: Option<String>,
    pub take_profit_order_id: Option<String>,
    pub position_id: Option<String>,
    pub liquidation_price: Option<f64>,
    pub metadata: Option<String>,
    pub trading_type: TradingType,
    pub leverage: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}
