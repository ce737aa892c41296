//! Paper broker adapter: simulates fills with latency, slippage and fees
//! instead of calling a real exchange -- a latency-jitter +
//! size-proportional-slippage + fee-rate model over the futures order
//! shape this engine's fan-out needs.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::{BrokerClient, InstrumentInfo, OrderAck, OrderSide, Position, Wallet};
use crate::error::EngineResult;

#[derive(Debug, Clone)]
pub struct PaperBrokerConfig {
    pub base_latency_ms: u64,
    pub latency_jitter_ms: u64,
    pub base_slippage_bps: f64,
    pub slippage_bps_per_1k_notional: f64,
    pub default_quantity_increment: f64,
    pub default_max_leverage: f64,
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            base_latency_ms: 40,
            latency_jitter_ms: 60,
            base_slippage_bps: 2.0,
            slippage_bps_per_1k_notional: 0.5,
            default_quantity_increment: 0.001,
            default_max_leverage: 20.0,
        }
    }
}

impl PaperBrokerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("PAPER_BASE_LATENCY_MS") {
            if let Ok(ms) = v.parse() {
                config.base_latency_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("PAPER_LATENCY_JITTER_MS") {
            if let Ok(ms) = v.parse() {
                config.latency_jitter_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("PAPER_SLIPPAGE_BPS_PER_1K") {
            if let Ok(bps) = v.parse() {
                config.slippage_bps_per_1k_notional = bps;
            }
        }
        config
    }
}

/// In-memory paper broker. Tracks no real state beyond open positions it
/// itself opened, so it is only suitable for dry-run / test wiring.
pub struct PaperBrokerAdapter {
    config: PaperBrokerConfig,
    positions: Mutex<HashMap<(String, String), Position>>,
}

impl PaperBrokerAdapter {
    pub fn new(config: PaperBrokerConfig) -> Self {
        Self {
            config,
            positions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for PaperBrokerAdapter {
    fn default() -> Self {
        Self::new(PaperBrokerConfig::from_env())
    }
}

#[async_trait]
impl BrokerClient for PaperBrokerAdapter {
    async fn list_futures_wallets(&self, credential_id: &str) -> EngineResult<Vec<Wallet>> {
        Ok(vec![Wallet {
            credential_id: credential_id.to_string(),
            available_balance: 100_000.0,
        }])
    }

    async fn get_instrument_info(&self, symbol: &str) -> EngineResult<InstrumentInfo> {
        Ok(InstrumentInfo {
            symbol: symbol.to_string(),
            quantity_increment: self.config.default_quantity_increment,
            max_leverage: self.config.default_max_leverage,
        })
    }

    async fn place_market_order(
        &self,
        credential_id: &str,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> EngineResult<OrderAck> {
        let mut rng = StdRng::from_entropy();
        let jitter = rng.gen_range(0..=self.config.latency_jitter_ms);
        tokio::time::sleep(Duration::from_millis(self.config.base_latency_ms + jitter)).await;

        let notional_1k = (quantity * reference_price(symbol)) / 1000.0;
        let slippage_bps = self.config.base_slippage_bps
            + self.config.slippage_bps_per_1k_notional * notional_1k;
        let slippage = slippage_bps / 10_000.0;
        let price = reference_price(symbol);
        let filled_price = match side {
            OrderSide::Buy => price * (1.0 + slippage),
            OrderSide::Sell => price * (1.0 - slippage),
        };

        let position = Position {
            symbol: symbol.to_string(),
            quantity,
            entry_price: filled_price,
            liquidation_price: None,
        };
        self.positions
            .lock()
            .insert((credential_id.to_string(), symbol.to_string()), position);

        Ok(OrderAck {
            order_id: format!("paper-{}", Uuid::new_v4()),
            status: "FILLED".to_string(),
            filled_quantity: quantity,
            filled_price,
        })
    }

    async fn place_limit_order(
        &self,
        _credential_id: &str,
        symbol: &str,
        _side: OrderSide,
        _quantity: f64,
        price: f64,
    ) -> EngineResult<OrderAck> {
        Ok(OrderAck {
            order_id: format!("paper-{}-{symbol}", Uuid::new_v4()),
            status: "OPEN".to_string(),
            filled_quantity: 0.0,
            filled_price: price,
        })
    }

    async fn get_order(&self, _credential_id: &str, order_id: &str) -> EngineResult<OrderAck> {
        Ok(OrderAck {
            order_id: order_id.to_string(),
            status: "OPEN".to_string(),
            filled_quantity: 0.0,
            filled_price: 0.0,
        })
    }

    async fn cancel_order(&self, _credential_id: &str, _order_id: &str) -> EngineResult<()> {
        Ok(())
    }

    async fn list_positions(&self, credential_id: &str) -> EngineResult<Vec<Position>> {
        Ok(self
            .positions
            .lock()
            .iter()
            .filter(|((cred, _), _)| cred == credential_id)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn list_orders(&self, _credential_id: &str) -> EngineResult<Vec<OrderAck>> {
        Ok(Vec::new())
    }
}

/// Deterministic stand-in reference price; a real adapter would read this
/// from the exchange's ticker. Kept simple since the paper adapter's job is
/// slippage/latency simulation, not price discovery.
fn reference_price(symbol: &str) -> f64 {
    if symbol.starts_with("BTC") {
        50_000.0
    } else if symbol.starts_with("ETH") {
        3_000.0
    } else {
        100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn market_buy_fills_above_reference_price() {
        let adapter = PaperBrokerAdapter::new(PaperBrokerConfig {
            base_latency_ms: 1,
            latency_jitter_ms: 1,
            ..PaperBrokerConfig::default()
        });
        let ack = adapter
            .place_market_order("cred-1", "BTCUSDT", OrderSide::Buy, 0.01)
            .await
            .unwrap();
        assert!(ack.filled_price >= 50_000.0);
        assert_eq!(ack.status, "FILLED");
    }

    #[tokio::test]
    async fn position_recorded_after_market_order() {
        let adapter = PaperBrokerAdapter::new(PaperBrokerConfig {
            base_latency_ms: 1,
            latency_jitter_ms: 1,
            ..PaperBrokerConfig::default()
        });
        adapter
            .place_market_order("cred-1", "ETHUSDT", OrderSide::Buy, 0.5)
            .await
            .unwrap();
        let positions = adapter.list_positions("cred-1").await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "ETHUSDT");
    }

    #[tokio::test]
    async fn instrument_info_has_sane_defaults() {
        let adapter = PaperBrokerAdapter::default();
        let info = adapter.get_instrument_info("BTCUSDT").await.unwrap();
        assert!(info.quantity_increment > 0.0);
        assert!(info.max_leverage > 0.0);
    }
}
