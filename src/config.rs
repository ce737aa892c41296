//! Engine configuration, loaded from the environment.
//!
//! `.env` is loaded first, every variable has a sane default, and parse
//! failures fall back to the default rather than aborting startup.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub worker_id: String,
    pub node_env: String,

    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,
    pub redis_db: u8,

    pub database_url: String,

    /// Directory holding `strategies/{strategy_id}/*.py` strategy code.
    pub strategies_dir: String,

    /// Safety margin subtracted from a candle's resolution when computing
    /// the execution lock TTL.
    pub lock_safety_margin: Duration,
    /// Maximum acceptable drift between a scheduled fire and actual fire
    /// before a warning is logged.
    pub max_drift: Duration,

    pub legacy_runtime_timeout: Duration,
    pub fanout_runtime_timeout: Duration,

    pub scheduler_refresh_interval: Duration,
    pub scheduler_reconcile_interval: Duration,
    pub scheduler_heartbeat_interval: Duration,

    /// Platform minimum order size, e.g. for the primary futures pair.
    pub min_order_quantity: f64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let worker_id = std::env::var("WORKER_ID")
            .unwrap_or_else(|_| format!("scheduler-{}", std::process::id()));

        let node_env = std::env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string());

        let redis_host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let redis_port = std::env::var("REDIS_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(6379);
        let redis_password = std::env::var("REDIS_PASSWORD").ok();
        let redis_db = std::env::var("REDIS_DB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "./xcoinalgo.db".to_string());

        let strategies_dir =
            std::env::var("STRATEGIES_DIR").unwrap_or_else(|_| "./strategies".to_string());

        let lock_safety_margin = Duration::from_secs(
            std::env::var("LOCK_SAFETY_MARGIN_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        );

        let max_drift = Duration::from_millis(
            std::env::var("MAX_DRIFT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2000),
        );

        let legacy_runtime_timeout = Duration::from_secs(
            std::env::var("LEGACY_RUNTIME_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5 * 60),
        );

        let fanout_runtime_timeout = Duration::from_secs(
            std::env::var("FANOUT_RUNTIME_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10 * 60),
        );

        let scheduler_refresh_interval = Duration::from_secs(
            std::env::var("SCHEDULER_REFRESH_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        );

        let scheduler_reconcile_interval = Duration::from_secs(
            std::env::var("SCHEDULER_RECONCILE_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5 * 60),
        );

        let scheduler_heartbeat_interval = Duration::from_secs(
            std::env::var("SCHEDULER_HEARTBEAT_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        );

        let min_order_quantity = std::env::var("MIN_ORDER_QUANTITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.007);

        Ok(Self {
            worker_id,
            node_env,
            redis_host,
            redis_port,
            redis_password,
            redis_db,
            database_url,
            strategies_dir,
            lock_safety_margin,
            max_drift,
            legacy_runtime_timeout,
            fanout_runtime_timeout,
            scheduler_refresh_interval,
            scheduler_reconcile_interval,
            scheduler_heartbeat_interval,
            min_order_quantity,
        })
    }

    pub fn redis_url(&self) -> String {
        let auth = self
            .redis_password
            .as_ref()
            .map(|p| format!(":{p}@"))
            .unwrap_or_default();
        format!(
            "redis://{}{}:{}/{}",
            auth, self.redis_host, self.redis_port, self.redis_db
        )
    }

    pub fn is_production(&self) -> bool {
        self.node_env == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_without_password() {
        let mut cfg = bare_config();
        cfg.redis_password = None;
        assert_eq!(cfg.redis_url(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn redis_url_with_password() {
        let mut cfg = bare_config();
        cfg.redis_password = Some("secret".to_string());
        assert_eq!(cfg.redis_url(), "redis://:secret@127.0.0.1:6379/0");
    }

    fn bare_config() -> Config {
        Config {
            worker_id: "test-worker".to_string(),
            node_env: "test".to_string(),
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            redis_password: None,
            redis_db: 0,
            database_url: ":memory:".to_string(),
            strategies_dir: "./strategies".to_string(),
            lock_safety_margin: Duration::from_secs(5),
            max_drift: Duration::from_secs(2),
            legacy_runtime_timeout: Duration::from_secs(300),
            fanout_runtime_timeout: Duration::from_secs(600),
            scheduler_refresh_interval: Duration::from_secs(60),
            scheduler_reconcile_interval: Duration::from_secs(300),
            scheduler_heartbeat_interval: Duration::from_secs(60),
            min_order_quantity: 0.007,
        }
    }
}
