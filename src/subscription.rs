//! Subscription Service: create/cancel/pause/resume membership in a
//! strategy, and the active-subscriber query the coordinator fans out
//! over.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::event_bus::{EngineEvent, EventBus};
use crate::registry::StrategyRegistry;
use crate::settings::{SettingsService, SubscriptionSettings};
use crate::store::change::{apply_cache_sync, StrategyChange};
use crate::store::disk;
use crate::store::gateway::StoreGateway;
use crate::store::models::{ActiveSubscriber, Subscription, TradingType};
use crate::cache::CacheClient;

const DEFAULT_MAX_POSITIONS: i64 = 1;
const DEFAULT_MAX_DAILY_LOSS: f64 = 0.05;

pub struct CreateSubscriptionParams {
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
    pub trading_type: Option<TradingType>,
}

pub struct SubscriptionService {
    store: Arc<StoreGateway>,
    cache: CacheClient,
    registry: Arc<StrategyRegistry>,
    settings: Arc<SettingsService>,
    events: Arc<EventBus>,
    strategies_dir: String,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<StoreGateway>,
        cache: CacheClient,
        registry: Arc<StrategyRegistry>,
        settings: Arc<SettingsService>,
        events: Arc<EventBus>,
        strategies_dir: String,
    ) -> Self {
        Self {
            store,
            cache,
            registry,
            settings,
            events,
            strategies_dir,
        }
    }

    pub async fn create(&self, params: CreateSubscriptionParams) -> EngineResult<Subscription> {
        let strategy = self.store.get_strategy(&params.strategy_id).await?;
        if !strategy.active {
            return Err(EngineError::MissingStrategyConfig {
                strategy_id: strategy.id.clone(),
                field: "active".to_string(),
            });
        }

        let existing = self.store.find_subscription_for_user_strategy(&params.user_id, &params.strategy_id).await?;
        if let Some(existing) = &existing {
            if existing.active {
                return Err(EngineError::AlreadySubscribed {
                    user_id: params.user_id.clone(),
                    strategy_id: params.strategy_id.clone(),
                });
            }
        }
        let is_reactivation = existing.is_some();

        let trading_type = params.trading_type.unwrap_or_else(|| infer_trading_type(&params.strategy_id, &strategy.config));

        let risk_per_trade = params
            .risk_per_trade
            .or(strategy.config.risk_per_trade)
            .ok_or_else(|| EngineError::MissingStrategyConfig {
                strategy_id: strategy.id.clone(),
                field: "risk_per_trade".to_string(),
            })?;
        let leverage = params
            .leverage
            .or(strategy.config.leverage)
            .ok_or_else(|| EngineError::MissingStrategyConfig {
                strategy_id: strategy.id.clone(),
                field: "leverage".to_string(),
            })?;
        let max_positions = params.max_positions.or(strategy.config.max_positions).unwrap_or(DEFAULT_MAX_POSITIONS);
        let max_daily_loss = params.max_daily_loss.or(strategy.config.max_daily_loss).unwrap_or(DEFAULT_MAX_DAILY_LOSS);

        let subscription = Subscription {
            id: existing.as_ref().map(|e| e.id.clone()).unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_id: params.user_id.clone(),
            strategy_id: params.strategy_id.clone(),
            broker_credential_id: params.broker_credential_id,
            capital: params.capital,
            // NULL (None) means "use the strategy default" -- persist the
            // caller's raw override, not the resolved value, so a later
            // change to the strategy default propagates.
            risk_per_trade: params.risk_per_trade,
            leverage: params.leverage,
            max_positions: params.max_positions,
            max_daily_loss: params.max_daily_loss,
            sl_atr_multiplier: params.sl_atr_multiplier,
            tp_atr_multiplier: params.tp_atr_multiplier,
            trading_type,
            active: true,
            paused: false,
            subscribed_at: Utc::now(),
            unsubscribed_at: None,
            cumulative_pnl: 0.0,
            trade_count: 0,
        };

        if is_reactivation {
            self.store.reactivate_subscription(&subscription).await?;
        } else {
            self.store.insert_subscription(&subscription).await?;
        }

        self.store.increment_subscriber_count(&strategy.id, 1).await?;

        self.settings
            .initialize_subscription(
                &subscription.user_id,
                &subscription.strategy_id,
                &SubscriptionSettings {
                    user_id: subscription.user_id.clone(),
                    strategy_id: subscription.strategy_id.clone(),
                    risk_per_trade: Some(risk_per_trade),
                    leverage: Some(leverage),
                    max_positions: Some(max_positions),
                    max_daily_loss: Some(max_daily_loss),
                    is_active: true,
                },
            )
            .await?;

        let refreshed = self.store.get_strategy(&strategy.id).await?;
        if refreshed.subscriber_count == 1 {
            let mut config = refreshed.config.clone();
            if !config.is_complete() {
                if let Some(synced) = disk::sync_execution_config_from_disk(&self.strategies_dir, &strategy.id) {
                    config = synced;
                    self.store.update_strategy_config(&strategy.id, &config).await?;
                }
            }
            if config.is_complete() {
                self.settings.initialize_strategy(&strategy.id, &config, 1).await?;
                apply_cache_sync(
                    &StrategyChange::Created {
                        strategy: crate::store::models::Strategy {
                            config: config.clone(),
                            active: true,
                            ..refreshed.clone()
                        },
                    },
                    &self.registry,
                    &self.cache,
                )
                .await?;
            } else {
                tracing::warn!(
                    strategy_id = %strategy.id,
                    "first subscriber added but execution config is incomplete and could not be auto-synced; strategy will not execute until repaired"
                );
            }
        }

        self.events.publish(EngineEvent::SubscriptionCreated {
            subscription_id: subscription.id.clone(),
            strategy_id: subscription.strategy_id.clone(),
        });

        Ok(subscription)
    }

    pub async fn cancel(&self, subscription_id: &str) -> EngineResult<()> {
        let subscription = self.store.get_subscription(subscription_id).await?;
        if !subscription.active {
            return Ok(()); // idempotent
        }

        self.store.set_subscription_active(subscription_id, false).await?;
        self.store.increment_subscriber_count(&subscription.strategy_id, -1).await?;
        self.settings
            .update_subscription_settings(
                &subscription.user_id,
                &subscription.strategy_id,
                [("is_active".to_string(), "false".to_string())].into_iter().collect(),
            )
            .await?;

        let strategy = self.store.get_strategy(&subscription.strategy_id).await?;
        if strategy.subscriber_count == 0 && strategy.config.is_complete() {
            self.registry
                .unregister(
                    &strategy.id,
                    strategy.config.symbol.as_deref().unwrap(),
                    strategy.config.resolution.as_deref().unwrap(),
                )
                .await?;
        }

        self.events.publish(EngineEvent::SubscriptionCancelled {
            subscription_id: subscription_id.to_string(),
            strategy_id: subscription.strategy_id.clone(),
        });
        Ok(())
    }

    pub async fn pause(&self, subscription_id: &str) -> EngineResult<()> {
        self.store.set_subscription_paused(subscription_id, true).await
    }

    pub async fn resume(&self, subscription_id: &str) -> EngineResult<()> {
        self.store.set_subscription_paused(subscription_id, false).await
    }

    pub async fn get_active_subscribers(&self, strategy_id: &str) -> EngineResult<Vec<ActiveSubscriber>> {
        self.store.get_active_subscribers(strategy_id).await
    }
}

fn infer_trading_type(_strategy_id: &str, config: &crate::store::models::ExecutionConfig) -> TradingType {
    let symbol = config.symbol.as_deref().unwrap_or("");
    if symbol.ends_with("PERP") || symbol.ends_with("-PERP") || symbol.contains("FUT") {
        TradingType::Futures
    } else {
        TradingType::Spot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_trading_type_from_symbol_suffix() {
        let mut config = crate::store::models::ExecutionConfig::default();
        config.symbol = Some("BTCUSDTPERP".to_string());
        assert_eq!(infer_trading_type("s1", &config), TradingType::Futures);

        config.symbol = Some("BTCUSDT".to_string());
        assert_eq!(infer_trading_type("s1", &config), TradingType::Spot);
    }
}
