//! Settings Service: the hydrate/version/publish layer over strategy and
//! subscription configuration, plus the distributed execution lock.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use crate::cache::CacheClient;
use crate::error::{EngineError, EngineResult};
use crate::store::gateway::StoreGateway;
use crate::store::models::ExecutionConfig;

pub const STRATEGY_UPDATE_CHANNEL_PREFIX: &str = "strategy";
const SUBSCRIPTION_SETTINGS_TTL_SECONDS: i64 = 86_400;

/// Hydrated, cache-resident view of a strategy's execution settings.
/// `symbol`/`resolution` are required once hydrated -- a hash missing
/// either field is treated as absent by [`SettingsService::get_strategy_settings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySettings {
    pub strategy_id: String,
    pub symbol: String,
    pub resolution: String,
    pub risk_per_trade: Option<f64>,
    pub leverage: Option<f64>,
    pub max_positions: Option<i64>,
    pub max_daily_loss: Option<f64>,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    pub user_id: String,
    pub strategy_id: String,
    pub risk_per_trade: Option<f64>,
    pub leverage: Option<f64>,
    pub max_positions: Option<i64>,
    pub max_daily_loss: Option<f64>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStatusFields {
    pub last_run_at: Option<chrono::DateTime<Utc>>,
    pub last_signal: Option<String>,
    pub last_duration_s: Option<f64>,
}

pub struct SettingsService {
    cache: CacheClient,
    store: std::sync::Arc<StoreGateway>,
}

impl SettingsService {
    pub fn new(cache: CacheClient, store: std::sync::Arc<StoreGateway>) -> Self {
        Self { cache, store }
    }

    fn strategy_key(id: &str) -> String {
        format!("strategy:{id}:settings")
    }

    fn subscription_key(user_id: &str, strategy_id: &str) -> String {
        format!("subscription:{user_id}:{strategy_id}:settings")
    }

    fn lock_key(strategy_id: &str, interval_key: &str) -> String {
        format!("lock:strategy:{strategy_id}:run:{interval_key}")
    }

    fn execution_status_key(strategy_id: &str) -> String {
        format!("strategy:{strategy_id}:execution_status")
    }

    pub async fn initialize_strategy(&self, strategy_id: &str, config: &ExecutionConfig, version: u64) -> EngineResult<()> {
        let (symbol, resolution) = config
            .symbol
            .clone()
            .zip(config.resolution.clone())
            .ok_or_else(|| EngineError::MissingStrategyConfig {
                strategy_id: strategy_id.to_string(),
                field: "symbol/resolution".to_string(),
            })?;

        let fields = strategy_settings_fields(strategy_id, &symbol, &resolution, config, version);
        self.cache.hset_multiple(&Self::strategy_key(strategy_id), &fields).await
    }

    pub async fn get_strategy_settings(&self, strategy_id: &str) -> EngineResult<StrategySettings> {
        let key = Self::strategy_key(strategy_id);
        let hash = self.cache.hgetall(&key).await?;
        if let Some(settings) = parse_strategy_settings(strategy_id, &hash) {
            return Ok(settings);
        }

        // Cache miss or incomplete: hydrate from durable store.
        let strategy = self.store.get_strategy(strategy_id).await?;
        if !strategy.config.is_complete() {
            return Err(EngineError::MissingStrategyConfig {
                strategy_id: strategy_id.to_string(),
                field: "symbol/resolution".to_string(),
            });
        }
        self.initialize_strategy(strategy_id, &strategy.config, 1).await?;
        let hash = self.cache.hgetall(&key).await?;
        parse_strategy_settings(strategy_id, &hash).ok_or_else(|| {
            EngineError::MissingStrategyConfig {
                strategy_id: strategy_id.to_string(),
                field: "symbol/resolution".to_string(),
            }
        })
    }

    /// Partial update; bumps `version` and publishes
    /// `strategy:{id}:settings:updated` unless `publish` is false.
    pub async fn update_strategy_settings(
        &self,
        strategy_id: &str,
        patch: HashMap<String, String>,
        publish: bool,
    ) -> EngineResult<()> {
        let key = Self::strategy_key(strategy_id);
        let current = self.cache.hgetall(&key).await?;
        let next_version: u64 = current
            .get("version")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;

        for (field, value) in &patch {
            self.cache.hset(&key, field, value).await?;
        }
        self.cache.hset(&key, "version", &next_version.to_string()).await?;

        if publish {
            let channel = format!("{STRATEGY_UPDATE_CHANNEL_PREFIX}:{strategy_id}:settings:updated");
            self.cache.publish(&channel, &next_version.to_string()).await?;
        }
        Ok(())
    }

    pub async fn initialize_subscription(
        &self,
        user_id: &str,
        strategy_id: &str,
        settings: &SubscriptionSettings,
    ) -> EngineResult<()> {
        let key = Self::subscription_key(user_id, strategy_id);
        let fields = subscription_settings_fields(settings);
        self.cache.hset_multiple(&key, &fields).await?;
        self.cache.expire(&key, SUBSCRIPTION_SETTINGS_TTL_SECONDS).await
    }

    pub async fn get_subscription_settings(&self, user_id: &str, strategy_id: &str) -> EngineResult<Option<SubscriptionSettings>> {
        let hash = self.cache.hgetall(&Self::subscription_key(user_id, strategy_id)).await?;
        Ok(parse_subscription_settings(user_id, strategy_id, &hash))
    }

    pub async fn update_subscription_settings(
        &self,
        user_id: &str,
        strategy_id: &str,
        patch: HashMap<String, String>,
    ) -> EngineResult<()> {
        let key = Self::subscription_key(user_id, strategy_id);
        for (field, value) in patch {
            self.cache.hset(&key, &field, &value).await?;
        }
        self.cache.expire(&key, SUBSCRIPTION_SETTINGS_TTL_SECONDS).await
    }

    /// Atomic create-if-absent + expire. Returns `true` on success.
    pub async fn acquire_lock(&self, strategy_id: &str, interval_key: &str, ttl: Duration, worker_id: &str) -> EngineResult<bool> {
        let key = Self::lock_key(strategy_id, interval_key);
        self.cache.set_nx_ex(&key, worker_id, ttl.as_secs().max(1)).await
    }

    /// Best-effort release; holders SHOULD prefer letting the TTL expire
    /// rather than relying on this.
    pub async fn release_lock(&self, strategy_id: &str, interval_key: &str) -> EngineResult<()> {
        let key = Self::lock_key(strategy_id, interval_key);
        if let Err(e) = self.cache.del(&key).await {
            warn!(strategy_id, interval_key, error = %e, "failed to release lock, relying on TTL expiry");
        }
        Ok(())
    }

    pub async fn update_execution_status(&self, strategy_id: &str, fields: &ExecutionStatusFields) -> EngineResult<()> {
        let key = Self::execution_status_key(strategy_id);
        let mut kv = Vec::new();
        if let Some(t) = fields.last_run_at {
            kv.push(("last_run_at", t.to_rfc3339()));
        }
        if let Some(signal) = &fields.last_signal {
            kv.push(("last_signal", signal.clone()));
        }
        if let Some(d) = fields.last_duration_s {
            kv.push(("last_duration_s", d.to_string()));
        }
        if !kv.is_empty() {
            self.cache.hset_multiple(&key, &kv).await?;
        }
        Ok(())
    }

    pub async fn get_execution_status(&self, strategy_id: &str) -> EngineResult<ExecutionStatusFields> {
        let hash = self.cache.hgetall(&Self::execution_status_key(strategy_id)).await?;
        Ok(ExecutionStatusFields {
            last_run_at: hash
                .get("last_run_at")
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc)),
            last_signal: hash.get("last_signal").cloned(),
            last_duration_s: hash.get("last_duration_s").and_then(|s| s.parse().ok()),
        })
    }
}

fn strategy_settings_fields(
    strategy_id: &str,
    symbol: &str,
    resolution: &str,
    config: &ExecutionConfig,
    version: u64,
) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("strategy_id", strategy_id.to_string()),
        ("symbol", symbol.to_string()),
        ("resolution", resolution.to_string()),
        ("version", version.to_string()),
    ];
    if let Some(v) = config.risk_per_trade {
        fields.push(("risk_per_trade", v.to_string()));
    }
    if let Some(v) = config.leverage {
        fields.push(("leverage", v.to_string()));
    }
    if let Some(v) = config.max_positions {
        fields.push(("max_positions", v.to_string()));
    }
    if let Some(v) = config.max_daily_loss {
        fields.push(("max_daily_loss", v.to_string()));
    }
    fields
}

fn parse_strategy_settings(strategy_id: &str, hash: &HashMap<String, String>) -> Option<StrategySettings> {
    let symbol = hash.get("symbol")?.clone();
    let resolution = hash.get("resolution")?.clone();
    if symbol.is_empty() || resolution.is_empty() {
        return None;
    }
    Some(StrategySettings {
        strategy_id: strategy_id.to_string(),
        symbol,
        resolution,
        risk_per_trade: hash.get("risk_per_trade").and_then(|s| s.parse().ok()),
        leverage: hash.get("leverage").and_then(|s| s.parse().ok()),
        max_positions: hash.get("max_positions").and_then(|s| s.parse().ok()),
        max_daily_loss: hash.get("max_daily_loss").and_then(|s| s.parse().ok()),
        version: hash.get("version").and_then(|s| s.parse().ok()).unwrap_or(0),
    })
}

fn subscription_settings_fields(settings: &SubscriptionSettings) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("user_id", settings.user_id.clone()),
        ("strategy_id", settings.strategy_id.clone()),
        ("is_active", settings.is_active.to_string()),
    ];
    if let Some(v) = settings.risk_per_trade {
        fields.push(("risk_per_trade", v.to_string()));
    }
    if let Some(v) = settings.leverage {
        fields.push(("leverage", v.to_string()));
    }
    if let Some(v) = settings.max_positions {
        fields.push(("max_positions", v.to_string()));
    }
    if let Some(v) = settings.max_daily_loss {
        fields.push(("max_daily_loss", v.to_string()));
    }
    fields
}

fn parse_subscription_settings(user_id: &str, strategy_id: &str, hash: &HashMap<String, String>) -> Option<SubscriptionSettings> {
    if hash.is_empty() {
        return None;
    }
    Some(SubscriptionSettings {
        user_id: user_id.to_string(),
        strategy_id: strategy_id.to_string(),
        risk_per_trade: hash.get("risk_per_trade").and_then(|s| s.parse().ok()),
        leverage: hash.get("leverage").and_then(|s| s.parse().ok()),
        max_positions: hash.get("max_positions").and_then(|s| s.parse().ok()),
        max_daily_loss: hash.get("max_daily_loss").and_then(|s| s.parse().ok()),
        is_active: hash.get("is_active").map(|s| s == "true").unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strategy_settings_requires_symbol_and_resolution() {
        let mut hash = HashMap::new();
        hash.insert("symbol".to_string(), "BTCUSDT".to_string());
        // resolution missing
        assert!(parse_strategy_settings("s1", &hash).is_none());

        hash.insert("resolution".to_string(), "5".to_string());
        let settings = parse_strategy_settings("s1", &hash).unwrap();
        assert_eq!(settings.symbol, "BTCUSDT");
        assert_eq!(settings.version, 0);
    }

    #[test]
    fn parse_strategy_settings_rejects_empty_strings() {
        let mut hash = HashMap::new();
        hash.insert("symbol".to_string(), String::new());
        hash.insert("resolution".to_string(), "5".to_string());
        assert!(parse_strategy_settings("s1", &hash).is_none());
    }

    #[test]
    fn parse_subscription_settings_reads_is_active_flag() {
        let mut hash = HashMap::new();
        hash.insert("is_active".to_string(), "true".to_string());
        hash.insert("risk_per_trade".to_string(), "0.02".to_string());
        let settings = parse_subscription_settings("u1", "s1", &hash).unwrap();
        assert!(settings.is_active);
        assert_eq!(settings.risk_per_trade, Some(0.02));
    }

    #[test]
    fn empty_subscription_hash_is_none() {
        assert!(parse_subscription_settings("u1", "s1", &HashMap::new()).is_none());
    }
}
