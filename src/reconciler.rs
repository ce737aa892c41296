//! Reconciler: a bidirectional heal between the
//! registry's cache-resident candle membership and the durable store's
//! view of active, fully-configured strategies. Idempotent -- running it
//! twice in a row with no intervening writes produces a clean second
//! pass.

use tracing::warn;

use crate::context::EngineContext;
use crate::error::EngineResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub orphaned: u64,
    pub missing: u64,
    pub errors: Vec<String>,
}

/// Runs one full reconciliation pass:
/// 1. Orphan removal -- for every candle the registry tracks, drop
///    members that are empty strings, whose strategy no longer exists,
///    whose strategy is inactive, or whose strategy's config no longer
///    matches that candle. Delete the candle key entirely once empty.
/// 2. Missing-member addition -- for every active, fully-configured
///    strategy with at least one subscriber, ensure it is a member of
///    its candle.
pub async fn reconcile(ctx: &EngineContext) -> EngineResult<ReconcileReport> {
    let mut report = ReconcileReport::default();

    let candles = ctx.registry.active_candles().await?;
    for key in &candles {
        let members = ctx.cache.smembers(&key.cache_key()).await?;
        for member in members {
            if member.is_empty() {
                report.orphaned += 1;
                // Never a validly-registered member, so there is nothing
                // for `StrategyRegistry::unregister` (which rejects an
                // empty strategy id) to notify peers about -- drop it
                // from the cache set directly.
                if let Err(e) = ctx.cache.srem(&key.cache_key(), &member).await {
                    report.errors.push(format!("srem empty member: {e}"));
                }
                continue;
            }
            match ctx.store.get_strategy(&member).await {
                Ok(strategy) => {
                    let matches_candle = strategy.config.symbol.as_deref() == Some(key.symbol.as_str())
                        && strategy.config.resolution.as_deref() == Some(key.resolution.as_str());
                    if !strategy.active || !matches_candle {
                        report.orphaned += 1;
                        if let Err(e) = ctx.registry.unregister(&member, &key.symbol, &key.resolution).await {
                            report.errors.push(format!("unregister stale member {member}: {e}"));
                        }
                    }
                }
                Err(_) => {
                    report.orphaned += 1;
                    if let Err(e) = ctx.registry.unregister(&member, &key.symbol, &key.resolution).await {
                        report.errors.push(format!("unregister missing strategy {member}: {e}"));
                    }
                }
            }
        }

        if let Ok(0) = ctx.cache.scard(&key.cache_key()).await {
            if let Err(e) = ctx.cache.del(&key.cache_key()).await {
                report.errors.push(format!("delete emptied candle key {}: {e}", key.cache_key()));
            }
        }
    }

    // Direct `cache.srem`/`del` calls above bypass the registry's local
    // cache; resync it before the missing-member pass reads it.
    if let Err(e) = ctx.registry.refresh().await {
        report.errors.push(format!("refresh registry local cache: {e}"));
    }

    let strategies = match ctx.store.list_schedulable_strategies().await {
        Ok(s) => s,
        Err(e) => {
            report.errors.push(format!("list schedulable strategies: {e}"));
            return Ok(report);
        }
    };

    for strategy in strategies {
        if !strategy.active || strategy.subscriber_count <= 0 || !strategy.config.is_complete() {
            continue;
        }
        let symbol = strategy.config.symbol.as_deref().unwrap();
        let resolution = strategy.config.resolution.as_deref().unwrap();

        match ctx.registry.get_for_candle(symbol, resolution).await {
            Ok(members) if members.iter().any(|m| m == &strategy.id) => {}
            Ok(_) => {
                report.missing += 1;
                if let Err(e) = ctx.registry.register(&strategy.id, symbol, resolution).await {
                    report.errors.push(format!("register missing strategy {}: {e}", strategy.id));
                }
            }
            Err(e) => {
                report.errors.push(format!("read candle membership for {}: {e}", strategy.id));
            }
        }
    }

    if !report.errors.is_empty() {
        warn!(errors = ?report.errors, "reconciliation completed with errors");
    }

    Ok(report)
}
