//! Write-interceptor for the durable Strategy entity: every mutation to a
//! strategy's `active`/config is described as a [`StrategyChange`], and a
//! single reducer (`apply_cache_sync`) turns that descriptor into
//! registry/settings operations. Callers (the subscription and settings
//! services, and any admin surface) build the descriptor; they never poke
//! the registry directly.

use tracing::warn;

use crate::cache::CacheClient;
use crate::error::EngineResult;
use crate::registry::StrategyRegistry;
use crate::store::models::{ExecutionConfig, Strategy};

#[derive(Debug, Clone)]
pub enum StrategyChange {
    Created {
        strategy: Strategy,
    },
    Updated {
        before: Strategy,
        after: Strategy,
    },
    Deleted {
        strategy: Strategy,
    },
    /// `deleteMany`/`updateMany` or any shape the caller can't describe
    /// precisely -- the safe fallback is a full reconcile.
    BulkOrUnknown,
}

/// Signal to the caller that a full reconciliation pass is warranted
/// (emitted for [`StrategyChange::BulkOrUnknown`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileTrigger {
    None,
    Full,
}

pub async fn apply_cache_sync(
    change: &StrategyChange,
    registry: &StrategyRegistry,
    cache: &CacheClient,
) -> EngineResult<ReconcileTrigger> {
    let trigger = match change {
        StrategyChange::Created { strategy } => {
            if strategy.active && strategy.config.is_complete() {
                register_from_config(registry, &strategy.id, &strategy.config).await?;
            }
            ReconcileTrigger::None
        }
        StrategyChange::Updated { before, after } => {
            if before.active && !after.active {
                unregister_from_config(registry, &before.id, &before.config).await?;
            } else if !before.active && after.active {
                let source = if after.config.is_complete() { &after.config } else { &before.config };
                register_from_config(registry, &after.id, source).await?;
            } else if after.active && configs_differ(&before.config, &after.config) {
                if before.config.is_complete() && after.config.is_complete() {
                    registry
                        .update_registration(
                            &after.id,
                            before.config.symbol.as_deref().unwrap(),
                            before.config.resolution.as_deref().unwrap(),
                            after.config.symbol.as_deref().unwrap(),
                            after.config.resolution.as_deref().unwrap(),
                        )
                        .await?;
                } else if after.config.is_complete() {
                    register_from_config(registry, &after.id, &after.config).await?;
                } else if before.config.is_complete() {
                    unregister_from_config(registry, &before.id, &before.config).await?;
                }
            }
            ReconcileTrigger::None
        }
        StrategyChange::Deleted { strategy } => {
            if strategy.config.is_complete() {
                unregister_from_config(registry, &strategy.id, &strategy.config).await?;
            }
            cache.del(&format!("strategy:{}:config", strategy.id)).await?;
            cache.del(&format!("strategy:{}:settings", strategy.id)).await?;
            ReconcileTrigger::None
        }
        StrategyChange::BulkOrUnknown => {
            warn!("bulk or unrecognized strategy mutation, deferring to full reconcile");
            ReconcileTrigger::Full
        }
    };

    // Irrespective of the branch taken, the derived settings hash is
    // stale and must be dropped so the next read re-hydrates.
    let strategy_id = match change {
        StrategyChange::Created { strategy } | StrategyChange::Deleted { strategy } => Some(strategy.id.clone()),
        StrategyChange::Updated { after, .. } => Some(after.id.clone()),
        StrategyChange::BulkOrUnknown => None,
    };
    if let Some(id) = strategy_id {
        cache.del(&format!("strategy:{id}:settings")).await?;
    }

    Ok(trigger)
}

fn configs_differ(a: &ExecutionConfig, b: &ExecutionConfig) -> bool {
    a.symbol != b.symbol || a.resolution != b.resolution
}

async fn register_from_config(registry: &StrategyRegistry, strategy_id: &str, config: &ExecutionConfig) -> EngineResult<()> {
    if let (Some(symbol), Some(resolution)) = (config.symbol.as_deref(), config.resolution.as_deref()) {
        registry.register(strategy_id, symbol, resolution).await?;
    }
    Ok(())
}

async fn unregister_from_config(registry: &StrategyRegistry, strategy_id: &str, config: &ExecutionConfig) -> EngineResult<()> {
    if let (Some(symbol), Some(resolution)) = (config.symbol.as_deref(), config.resolution.as_deref()) {
        registry.unregister(strategy_id, symbol, resolution).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configs_differ_detects_symbol_change() {
        let a = ExecutionConfig { symbol: Some("BTCUSDT".into()), ..Default::default() };
        let b = ExecutionConfig { symbol: Some("ETHUSDT".into()), ..Default::default() };
        assert!(configs_differ(&a, &b));
        assert!(!configs_differ(&a, &a.clone()));
    }

    #[test]
    fn identical_configs_do_not_differ() {
        let a = ExecutionConfig {
            symbol: Some("BTCUSDT".into()),
            resolution: Some("5".into()),
            ..Default::default()
        };
        let b = a.clone();
        assert!(!configs_differ(&a, &b));
    }
}
