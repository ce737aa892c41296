//! Broker capability: the small interface the coordinator's fan-out
//! depends on. The concrete vendor sits behind this trait; this crate
//! ships a [`paper::PaperBrokerAdapter`] for simulation and a
//! [`signed::SignedBrokerAdapter`] skeleton for a HMAC-authenticated REST
//! vendor.

pub mod paper;
pub mod signed;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The opposite side, used to place risk orders (stop-loss/take-profit)
    /// against an entry on `self`.
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
    pub filled_quantity: f64,
    pub filled_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub symbol: String,
    /// Smallest tradable quantity increment; position sizing floors to this.
    pub quantity_increment: f64,
    /// Exchange-enforced maximum leverage for this instrument.
    pub max_leverage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub liquidation_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub credential_id: String,
    pub available_balance: f64,
}

/// The broker capability the coordinator's fan-out requires: wallets,
/// instrument precision/leverage, market/limit order placement, order and
/// position inspection. `credential_id` identifies which of a user's
/// broker credentials to act under; adapters resolve it to API keys
/// internally.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn list_futures_wallets(&self, credential_id: &str) -> EngineResult<Vec<Wallet>>;

    async fn get_instrument_info(&self, symbol: &str) -> EngineResult<InstrumentInfo>;

    async fn place_market_order(
        &self,
        credential_id: &str,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> EngineResult<OrderAck>;

    async fn place_limit_order(
        &self,
        credential_id: &str,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
    ) -> EngineResult<OrderAck>;

    async fn get_order(&self, credential_id: &str, order_id: &str) -> EngineResult<OrderAck>;

    async fn cancel_order(&self, credential_id: &str, order_id: &str) -> EngineResult<()>;

    async fn list_positions(&self, credential_id: &str) -> EngineResult<Vec<Position>>;

    async fn list_orders(&self, credential_id: &str) -> EngineResult<Vec<OrderAck>>;
}
