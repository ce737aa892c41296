//! Execution Coordinator: the hardest subsystem. Per candle close, for
//! every strategy registered under that (symbol, resolution): acquire the
//! distributed lock, invoke the external strategy runtime once, fan
//! signals out, size positions, place orders, and record the outcome
//! (load config -> invoke -> fan out -> persist -> emit).

pub mod fanout;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::broker::signed::CredentialResolver;
use crate::broker::BrokerClient;
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::event_bus::{EngineEvent, EventBus};
use crate::registry::StrategyRegistry;
use crate::runtime::process::{run_subprocess, RuntimeInvocation};
use crate::runtime::signal::Signal;
use crate::settings::{ExecutionStatusFields, SettingsService};
use crate::store::gateway::StoreGateway;
use crate::store::models::{Execution, ExecutionStatus, Strategy, StrategyKind};
use crate::subscription::SubscriptionService;
use crate::time::{interval_key, lock_ttl, validate_timing};

pub struct ExecutionCoordinator {
    store: Arc<StoreGateway>,
    settings: Arc<SettingsService>,
    registry: Arc<StrategyRegistry>,
    subscriptions: Arc<SubscriptionService>,
    events: Arc<EventBus>,
    broker: Arc<dyn BrokerClient>,
    credentials: Arc<dyn CredentialResolver>,
    config: Config,
}

impl ExecutionCoordinator {
    pub fn new(
        store: Arc<StoreGateway>,
        settings: Arc<SettingsService>,
        registry: Arc<StrategyRegistry>,
        subscriptions: Arc<SubscriptionService>,
        events: Arc<EventBus>,
        broker: Arc<dyn BrokerClient>,
        credentials: Arc<dyn CredentialResolver>,
        config: Config,
    ) -> Self {
        Self {
            store,
            settings,
            registry,
            subscriptions,
            events,
            broker,
            credentials,
            config,
        }
    }

    /// Scheduler entry point for one candle boundary: runs every strategy
    /// registered under (symbol, resolution). Per-strategy failures are
    /// logged and do not stop the rest of the candle's strategies.
    pub async fn execute_candle_strategies(&self, symbol: &str, resolution: &str, scheduled: DateTime<Utc>) {
        let strategy_ids = match self.registry.get_for_candle(symbol, resolution).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(symbol, resolution, error = %e, "failed to read candle membership, skipping this tick");
                return;
            }
        };

        for strategy_id in strategy_ids {
            if let Err(e) = self.execute_strategy(&strategy_id, scheduled).await {
                error!(strategy_id = %strategy_id, error = %e, "strategy execution failed");
            }
        }
    }

    /// The per-(strategy, interval) execution algorithm: drift check, lock
    /// acquisition, subscriber fan-out, execution recording.
    #[instrument(skip(self), fields(strategy_id = %strategy_id))]
    pub async fn execute_strategy(&self, strategy_id: &str, scheduled: DateTime<Utc>) -> EngineResult<()> {
        let start = Instant::now();
        let now = Utc::now();

        // Step 1: drift check. Logged, never fatal.
        let (within_tolerance, drift_seconds) = validate_timing(scheduled, now, self.config.max_drift);
        if !within_tolerance {
            warn!(strategy_id, drift_seconds, "scheduled fire drifted beyond tolerance");
        }

        // Step 2: load settings, require symbol/resolution.
        let settings = self.settings.get_strategy_settings(strategy_id).await?;
        let interval_key = interval_key(scheduled, &settings.resolution)?;

        // Step 3: acquire the distributed lock.
        let ttl = lock_ttl(&settings.resolution, self.config.lock_safety_margin)?;
        let acquired = self
            .settings
            .acquire_lock(strategy_id, &interval_key, ttl, &self.config.worker_id)
            .await?;
        if !acquired {
            self.record_execution(
                strategy_id,
                &settings.symbol,
                &settings.resolution,
                &interval_key,
                ExecutionStatus::Skipped,
                None,
                0,
                0,
                start.elapsed(),
                Some("lock_held".to_string()),
            )
            .await?;
            return Ok(());
        }

        // Step 4.
        self.events.publish(EngineEvent::ExecutionStart {
            strategy_id: strategy_id.to_string(),
            interval_key: interval_key.clone(),
        });

        // Step 5: active subscribers.
        let subscribers = self.subscriptions.get_active_subscribers(strategy_id).await?;
        if subscribers.is_empty() {
            self.record_execution(
                strategy_id,
                &settings.symbol,
                &settings.resolution,
                &interval_key,
                ExecutionStatus::Skipped,
                None,
                0,
                0,
                start.elapsed(),
                Some("no_subscribers".to_string()),
            )
            .await?;
            return Ok(());
        }

        // Step 6: strategy code on disk. Fatal if missing.
        let code_path = crate::store::disk::locate_strategy_source(&self.config.strategies_dir, strategy_id)
            .ok_or_else(|| EngineError::Invariant(format!("no strategy source found for {strategy_id}")))?;

        let strategy = self.store.get_strategy(strategy_id).await?;

        // Step 7: dispatch by kind.
        let outcome = match strategy.kind {
            StrategyKind::MultiTenant => {
                self.run_multi_tenant(&strategy, &code_path, &interval_key, &subscribers, scheduled).await
            }
            StrategyKind::Livetrader => {
                self.run_livetrader(&strategy, &code_path, &interval_key, &subscribers, scheduled).await
            }
            StrategyKind::Legacy => {
                self.run_legacy(&strategy, &code_path, &interval_key, &subscribers, scheduled).await
            }
        };

        let duration = start.elapsed();
        let result = match outcome {
            Ok((status, signal_type, trades_generated)) => {
                self.record_execution(
                    strategy_id,
                    &settings.symbol,
                    &settings.resolution,
                    &interval_key,
                    status,
                    signal_type,
                    subscribers.len() as i64,
                    trades_generated,
                    duration,
                    None,
                )
                .await?;
                self.events.publish(EngineEvent::ExecutionComplete {
                    strategy_id: strategy_id.to_string(),
                    interval_key: interval_key.clone(),
                });
                Ok(())
            }
            Err(e) => {
                self.record_execution(
                    strategy_id,
                    &settings.symbol,
                    &settings.resolution,
                    &interval_key,
                    ExecutionStatus::Failed,
                    None,
                    subscribers.len() as i64,
                    0,
                    duration,
                    Some(e.to_string()),
                )
                .await?;
                self.events.publish(EngineEvent::ExecutionError {
                    strategy_id: strategy_id.to_string(),
                    interval_key: interval_key.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        };

        result
    }

    async fn run_legacy(
        &self,
        strategy: &Strategy,
        code_path: &std::path::Path,
        interval_key: &str,
        subscribers: &[crate::store::models::ActiveSubscriber],
        scheduled: DateTime<Utc>,
    ) -> EngineResult<(ExecutionStatus, Option<String>, i64)> {
        let input = serde_json::json!({
            "strategy_id": strategy.id,
            "execution_time": scheduled.to_rfc3339(),
            "settings": strategy.config,
        });

        let output = run_subprocess(RuntimeInvocation {
            program: "python3".to_string(),
            args: vec![code_path.display().to_string()],
            input,
            timeout: self.config.legacy_runtime_timeout,
        })
        .await?;

        let success = output.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
        if !success {
            let error = output
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("strategy runtime reported failure")
                .to_string();
            return Err(EngineError::RuntimeSubprocessFailed(error));
        }

        let signal_value = match output.get("signal") {
            Some(v) if !v.is_null() => v,
            _ => return Ok((ExecutionStatus::NoSignal, None, 0)),
        };
        let signal: Signal = serde_json::from_value(signal_value.clone())?;
        let signal_type_str = format!("{:?}", signal.signal).to_uppercase();

        if signal.is_hold() {
            return Ok((ExecutionStatus::NoSignal, Some(signal_type_str), 0));
        }

        let symbol = strategy
            .config
            .symbol
            .clone()
            .ok_or_else(|| EngineError::MissingStrategyConfig {
                strategy_id: strategy.id.clone(),
                field: "symbol".to_string(),
            })?;

        let deps = fanout::FanoutDeps {
            store: &self.store,
            settings: &self.settings,
            broker: self.broker.as_ref(),
            events: &self.events,
            min_order_quantity: self.config.min_order_quantity,
        };
        let report = fanout::run_legacy_fanout(&deps, &symbol, &signal, subscribers).await;
        if !report.errors.is_empty() {
            warn!(strategy_id = %strategy.id, interval_key, errors = ?report.errors, "some subscribers failed during fan-out");
        }

        Ok((ExecutionStatus::Success, Some(signal_type_str), report.trades_generated))
    }

    /// Resolves each subscriber's `broker_credential_id` into real API
    /// credentials for the wrapper payload. A subscriber whose credentials
    /// don't resolve is skipped with a warning, not a hard failure -- the
    /// same tie-break the legacy fan-out applies for missing credentials.
    async fn resolve_subscriber_payload<'a>(
        &self,
        subscribers: impl IntoIterator<Item = &'a crate::store::models::ActiveSubscriber>,
    ) -> Vec<serde_json::Value> {
        let mut payload = Vec::new();
        for s in subscribers {
            let creds = match self.credentials.resolve(&s.subscription.broker_credential_id).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        subscription_id = %s.subscription.id,
                        credential_id = %s.subscription.broker_credential_id,
                        error = %e,
                        "no resolvable broker credentials, skipping subscriber"
                    );
                    continue;
                }
            };
            payload.push(serde_json::json!({
                "user_id": s.subscription.user_id,
                "subscription_id": s.subscription.id,
                "api_key": creds.api_key,
                "api_secret": creds.api_secret,
                "capital": s.subscription.capital,
                "risk_per_trade": s.subscription.risk_per_trade.or(s.strategy_config.risk_per_trade),
                "leverage": s.subscription.leverage.or(s.strategy_config.leverage),
            }));
        }
        payload
    }

    async fn run_multi_tenant(
        &self,
        strategy: &Strategy,
        code_path: &std::path::Path,
        _interval_key: &str,
        subscribers: &[crate::store::models::ActiveSubscriber],
        scheduled: DateTime<Utc>,
    ) -> EngineResult<(ExecutionStatus, Option<String>, i64)> {
        let subscriber_payload = self.resolve_subscriber_payload(subscribers).await;
        if subscriber_payload.is_empty() {
            return Ok((ExecutionStatus::Skipped, None, 0));
        }

        let strategy_code = std::fs::read_to_string(code_path)?;
        let input = serde_json::json!({
            "strategy_code": strategy_code,
            "settings": strategy.config,
            "strategy_id": strategy.id,
            "execution_time": scheduled.to_rfc3339(),
            "subscribers": subscriber_payload,
        });

        let output = run_subprocess(RuntimeInvocation {
            program: "python3".to_string(),
            args: vec!["-c".to_string(), "import sys,json; exec(json.load(sys.stdin)['strategy_code'])".to_string()],
            input,
            timeout: self.config.fanout_runtime_timeout,
        })
        .await?;

        let success = output.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
        if !success {
            let error = output
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("multi-tenant wrapper reported failure")
                .to_string();
            return Err(EngineError::RuntimeSubprocessFailed(error));
        }

        // trades_generated is the payload's subscriber count on wrapper
        // success, not the wrapper-reported count, regardless of
        // `subscribers_processed`/`trades_attempted`.
        Ok((ExecutionStatus::Success, None, subscriber_payload.len() as i64))
    }

    async fn run_livetrader(
        &self,
        strategy: &Strategy,
        code_path: &std::path::Path,
        _interval_key: &str,
        subscribers: &[crate::store::models::ActiveSubscriber],
        scheduled: DateTime<Utc>,
    ) -> EngineResult<(ExecutionStatus, Option<String>, i64)> {
        let symbol = strategy.config.symbol.clone().unwrap_or_default();
        let mut filtered = Vec::new();
        for s in subscribers {
            let has_open = self.store.get_open_trade(&s.subscription.id, &symbol).await?;
            if has_open.is_none() {
                filtered.push(s);
            }
        }
        if filtered.is_empty() {
            return Ok((ExecutionStatus::Skipped, None, 0));
        }

        let subscriber_payload = self.resolve_subscriber_payload(filtered.iter().copied()).await;
        if subscriber_payload.is_empty() {
            return Ok((ExecutionStatus::Skipped, None, 0));
        }

        let strategy_code = std::fs::read_to_string(code_path)?;
        let input = serde_json::json!({
            "strategy_code": strategy_code,
            "settings": strategy.config,
            "strategy_id": strategy.id,
            "execution_time": scheduled.to_rfc3339(),
            "subscribers": subscriber_payload,
        });

        let output = run_subprocess(RuntimeInvocation {
            program: "python3".to_string(),
            args: vec!["-c".to_string(), "import sys,json; exec(json.load(sys.stdin)['strategy_code'])".to_string()],
            input,
            timeout: self.config.fanout_runtime_timeout,
        })
        .await?;

        let success = output.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
        if !success {
            let error = output
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("livetrader wrapper reported failure")
                .to_string();
            return Err(EngineError::RuntimeSubprocessFailed(error));
        }

        Ok((ExecutionStatus::Success, None, subscriber_payload.len() as i64))
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_execution(
        &self,
        strategy_id: &str,
        symbol: &str,
        resolution: &str,
        interval_key: &str,
        status: ExecutionStatus,
        signal_type: Option<String>,
        subscribers_count: i64,
        trades_generated: i64,
        duration: Duration,
        error: Option<String>,
    ) -> EngineResult<()> {
        let execution = Execution {
            id: Uuid::new_v4().to_string(),
            strategy_id: strategy_id.to_string(),
            symbol: symbol.to_string(),
            resolution: resolution.to_string(),
            interval_key: interval_key.to_string(),
            executed_at: Utc::now(),
            status,
            signal_type: signal_type.clone(),
            subscribers_count,
            trades_generated,
            duration_s: duration.as_secs_f64(),
            worker_id: self.config.worker_id.clone(),
            error,
        };
        self.store.record_execution(&execution).await?;

        self.settings
            .update_execution_status(
                strategy_id,
                &ExecutionStatusFields {
                    last_run_at: Some(execution.executed_at),
                    last_signal: signal_type,
                    last_duration_s: Some(execution.duration_s),
                },
            )
            .await?;

        info!(
            strategy_id,
            interval_key,
            ?status,
            subscribers_count,
            trades_generated,
            duration_s = execution.duration_s,
            "execution recorded"
        );
        Ok(())
    }
}
