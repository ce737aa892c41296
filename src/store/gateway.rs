//! Durable store gateway: the sqlite-backed system of record. A single
//! `rusqlite::Connection` behind `Arc<tokio::sync::Mutex<_>>`, schema
//! created eagerly in `new()`, every accessor taking the lock for the
//! duration of one statement.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::store::models::{
    ActiveSubscriber, Execution, ExecutionConfig, ExecutionStatus, Strategy, StrategyKind,
    Subscription, Trade, TradeSide, TradeStatus, TradingType,
};

pub struct StoreGateway {
    conn: Arc<Mutex<Connection>>,
}

impl StoreGateway {
    pub fn open(database_url: &str) -> EngineResult<Self> {
        let conn = Connection::open(database_url)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS strategies (
                id               TEXT PRIMARY KEY,
                name             TEXT NOT NULL,
                active           INTEGER NOT NULL DEFAULT 0,
                config_json      TEXT NOT NULL,
                kind             TEXT NOT NULL DEFAULT 'legacy',
                subscriber_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS subscriptions (
                id                    TEXT PRIMARY KEY,
                user_id               TEXT NOT NULL,
                strategy_id           TEXT NOT NULL,
                broker_credential_id  TEXT NOT NULL,
                capital               REAL NOT NULL,
                risk_per_trade        REAL,
                leverage              REAL,
                max_positions         INTEGER,
                max_daily_loss        REAL,
                sl_atr_multiplier     REAL,
                tp_atr_multiplier     REAL,
                trading_type          TEXT NOT NULL DEFAULT 'spot',
                active                INTEGER NOT NULL DEFAULT 1,
                paused                INTEGER NOT NULL DEFAULT 0,
                subscribed_at         TEXT NOT NULL,
                unsubscribed_at       TEXT,
                cumulative_pnl        REAL NOT NULL DEFAULT 0,
                trade_count           INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_subscriptions_strategy ON subscriptions(strategy_id);
            CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id);

            CREATE TABLE IF NOT EXISTS executions (
                id                TEXT PRIMARY KEY,
                strategy_id       TEXT NOT NULL,
                symbol            TEXT NOT NULL,
                resolution        TEXT NOT NULL,
                interval_key      TEXT NOT NULL,
                executed_at       TEXT NOT NULL,
                status            TEXT NOT NULL,
                signal_type       TEXT,
                subscribers_count INTEGER NOT NULL DEFAULT 0,
                trades_generated  INTEGER NOT NULL DEFAULT 0,
                duration_s        REAL NOT NULL DEFAULT 0,
                worker_id         TEXT NOT NULL,
                error             TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_dedup
                ON executions(strategy_id, interval_key);

            CREATE TABLE IF NOT EXISTS trades (
                id                     TEXT PRIMARY KEY,
                subscription_id        TEXT NOT NULL,
                symbol                 TEXT NOT NULL,
                side                   TEXT NOT NULL,
                quantity               REAL NOT NULL,
                entry_price            REAL NOT NULL,
                stop_loss              REAL,
                take_profit            REAL,
                status                 TEXT NOT NULL,
                pnl                    REAL,
                order_id               TEXT,
                stop_order_id          TEXT,
                take_profit_order_id   TEXT,
                position_id            TEXT,
                liquidation_price      REAL,
                metadata               TEXT,
                trading_type           TEXT NOT NULL DEFAULT 'spot',
                leverage               REAL NOT NULL DEFAULT 1,
                opened_at              TEXT NOT NULL,
                closed_at              TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_trades_subscription ON trades(subscription_id);
            CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(subscription_id, status);
            ",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> EngineResult<Self> {
        Self::open(":memory:")
    }

    // --- strategies -------------------------------------------------------------

    pub async fn get_strategy(&self, strategy_id: &str) -> EngineResult<Strategy> {
        let conn = self.conn.lock().await;
        row_to_strategy(&conn, strategy_id)
    }

    pub async fn list_schedulable_strategies(&self) -> EngineResult<Vec<Strategy>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, active, config_json, kind, subscriber_count FROM strategies WHERE active = 1",
        )?;
        let rows = stmt.query_map([], map_strategy_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub async fn set_strategy_active(&self, strategy_id: &str, active: bool) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        let n = conn.execute(
            "UPDATE strategies SET active = ?1 WHERE id = ?2",
            params![active, strategy_id],
        )?;
        if n == 0 {
            return Err(EngineError::NotFound(format!("strategy {strategy_id}")));
        }
        Ok(())
    }

    pub async fn update_strategy_config(&self, strategy_id: &str, config: &ExecutionConfig) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(config)?;
        conn.execute(
            "UPDATE strategies SET config_json = ?1 WHERE id = ?2",
            params![json, strategy_id],
        )?;
        Ok(())
    }

    pub async fn increment_subscriber_count(&self, strategy_id: &str, delta: i64) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE strategies SET subscriber_count = MAX(0, subscriber_count + ?1) WHERE id = ?2",
            params![delta, strategy_id],
        )?;
        Ok(())
    }

    // --- subscriptions ------------------------------------------------------------

    pub async fn insert_subscription(&self, sub: &Subscription) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO subscriptions (
                id, user_id, strategy_id, broker_credential_id, capital, risk_per_trade,
                leverage, max_positions, max_daily_loss, sl_atr_multiplier, tp_atr_multiplier,
                trading_type, active, paused, subscribed_at, unsubscribed_at, cumulative_pnl, trade_count
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
            params![
                sub.id,
                sub.user_id,
                sub.strategy_id,
                sub.broker_credential_id,
                sub.capital,
                sub.risk_per_trade,
                sub.leverage,
                sub.max_positions,
                sub.max_daily_loss,
                sub.sl_atr_multiplier,
                sub.tp_atr_multiplier,
                trading_type_str(sub.trading_type),
                sub.active,
                sub.paused,
                sub.subscribed_at.to_rfc3339(),
                sub.unsubscribed_at.map(|t| t.to_rfc3339()),
                sub.cumulative_pnl,
                sub.trade_count,
            ],
        )?;
        Ok(())
    }

    pub async fn get_subscription(&self, subscription_id: &str) -> EngineResult<Subscription> {
        let conn = self.conn.lock().await;
        row_to_subscription(&conn, subscription_id)
    }

    /// Finds the subscriber's row for this strategy regardless of
    /// `active`, so the caller can distinguish "never subscribed" from
    /// "cancelled and eligible for reactivation" from "already active".
    pub async fn find_subscription_for_user_strategy(&self, user_id: &str, strategy_id: &str) -> EngineResult<Option<Subscription>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, strategy_id, broker_credential_id, capital, risk_per_trade,
                    leverage, max_positions, max_daily_loss, sl_atr_multiplier, tp_atr_multiplier,
                    trading_type, active, paused, subscribed_at, unsubscribed_at, cumulative_pnl, trade_count
             FROM subscriptions WHERE user_id = ?1 AND strategy_id = ?2",
        )?;
        let sub = stmt
            .query_row(params![user_id, strategy_id], map_subscription_row)
            .optional()?;
        Ok(sub)
    }

    pub async fn set_subscription_active(&self, subscription_id: &str, active: bool) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        let unsubscribed_at = if active { None } else { Some(Utc::now().to_rfc3339()) };
        conn.execute(
            "UPDATE subscriptions SET active = ?1, unsubscribed_at = ?2 WHERE id = ?3",
            params![active, unsubscribed_at, subscription_id],
        )?;
        Ok(())
    }

    /// Re-subscribing a previously-cancelled row: flips `active` back on,
    /// clears `unsubscribed_at`, stamps a fresh `subscribed_at`, persists
    /// the caller's new overrides/credential/capital, and resets the
    /// cumulative PnL/trade counters to zero.
    #[allow(clippy::too_many_arguments)]
    pub async fn reactivate_subscription(&self, sub: &Subscription) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE subscriptions SET
                broker_credential_id = ?1, capital = ?2, risk_per_trade = ?3, leverage = ?4,
                max_positions = ?5, max_daily_loss = ?6, sl_atr_multiplier = ?7, tp_atr_multiplier = ?8,
                trading_type = ?9, active = 1, paused = 0, subscribed_at = ?10, unsubscribed_at = NULL,
                cumulative_pnl = 0, trade_count = 0
             WHERE id = ?11",
            params![
                sub.broker_credential_id,
                sub.capital,
                sub.risk_per_trade,
                sub.leverage,
                sub.max_positions,
                sub.max_daily_loss,
                sub.sl_atr_multiplier,
                sub.tp_atr_multiplier,
                trading_type_str(sub.trading_type),
                sub.subscribed_at.to_rfc3339(),
                sub.id,
            ],
        )?;
        Ok(())
    }

    pub async fn set_subscription_paused(&self, subscription_id: &str, paused: bool) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE subscriptions SET paused = ?1 WHERE id = ?2",
            params![paused, subscription_id],
        )?;
        Ok(())
    }

    pub async fn record_subscription_pnl(&self, subscription_id: &str, pnl_delta: f64) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE subscriptions SET cumulative_pnl = cumulative_pnl + ?1, trade_count = trade_count + 1 WHERE id = ?2",
            params![pnl_delta, subscription_id],
        )?;
        Ok(())
    }

    pub async fn list_subscriptions_for_user(&self, user_id: &str) -> EngineResult<Vec<Subscription>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, strategy_id, broker_credential_id, capital, risk_per_trade,
                    leverage, max_positions, max_daily_loss, sl_atr_multiplier, tp_atr_multiplier,
                    trading_type, active, paused, subscribed_at, unsubscribed_at, cumulative_pnl, trade_count
             FROM subscriptions WHERE user_id = ?1 ORDER BY subscribed_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], map_subscription_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Join active, unpaused subscriptions for a strategy with that
    /// strategy's config. Each subscription carries a `broker_credential_id`
    /// the caller resolves into real credentials via `CredentialResolver`.
    pub async fn get_active_subscribers(&self, strategy_id: &str) -> EngineResult<Vec<ActiveSubscriber>> {
        let conn = self.conn.lock().await;
        let strategy = row_to_strategy(&conn, strategy_id)?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, strategy_id, broker_credential_id, capital, risk_per_trade,
                    leverage, max_positions, max_daily_loss, sl_atr_multiplier, tp_atr_multiplier,
                    trading_type, active, paused, subscribed_at, unsubscribed_at, cumulative_pnl, trade_count
             FROM subscriptions WHERE strategy_id = ?1 AND active = 1 AND paused = 0",
        )?;
        let rows = stmt.query_map(params![strategy_id], map_subscription_row)?;
        let mut out = Vec::new();
        for r in rows {
            let subscription = r?;
            out.push(ActiveSubscriber {
                subscription,
                strategy_config: strategy.config.clone(),
            });
        }
        Ok(out)
    }

    // --- executions ---------------------------------------------------------------

    pub async fn record_execution(&self, execution: &Execution) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO executions (
                id, strategy_id, symbol, resolution, interval_key, executed_at, status,
                signal_type, subscribers_count, trades_generated, duration_s, worker_id, error
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
            ON CONFLICT(strategy_id, interval_key) DO UPDATE SET
                status = excluded.status,
                signal_type = excluded.signal_type,
                subscribers_count = excluded.subscribers_count,
                trades_generated = excluded.trades_generated,
                duration_s = excluded.duration_s,
                worker_id = excluded.worker_id,
                error = excluded.error",
            params![
                execution.id,
                execution.strategy_id,
                execution.symbol,
                execution.resolution,
                execution.interval_key,
                execution.executed_at.to_rfc3339(),
                execution_status_str(execution.status),
                execution.signal_type,
                execution.subscribers_count,
                execution.trades_generated,
                execution.duration_s,
                execution.worker_id,
                execution.error,
            ],
        )?;
        Ok(())
    }

    /// `true` if an execution already exists for this (strategy, interval)
    /// pair -- the dedup check behind the coordinator's idempotence guarantee.
    pub async fn execution_exists(&self, strategy_id: &str, interval_key: &str) -> EngineResult<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM executions WHERE strategy_id = ?1 AND interval_key = ?2",
            params![strategy_id, interval_key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // --- trades ---------------------------------------------------------------------

    pub async fn insert_trade(&self, trade: &Trade) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO trades (
                id, subscription_id, symbol, side, quantity, entry_price, stop_loss, take_profit,
                status, pnl, order_id, stop_order_id, take_profit_order_id, position_id,
                liquidation_price, metadata, trading_type, leverage, opened_at, closed_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)",
            params![
                trade.id,
                trade.subscription_id,
                trade.symbol,
                trade_side_str(trade.side),
                trade.quantity,
                trade.entry_price,
                trade.stop_loss,
                trade.take_profit,
                trade_status_str(trade.status),
                trade.pnl,
                trade.order_id,
                trade.stop_order_id,
                trade.take_profit_order_id,
                trade.position_id,
                trade.liquidation_price,
                trade.metadata,
                trading_type_str(trade.trading_type),
                trade.leverage,
                trade.opened_at.to_rfc3339(),
                trade.closed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub async fn get_open_trade(&self, subscription_id: &str, symbol: &str) -> EngineResult<Option<Trade>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, subscription_id, symbol, side, quantity, entry_price, stop_loss, take_profit,
                    status, pnl, order_id, stop_order_id, take_profit_order_id, position_id,
                    liquidation_price, metadata, trading_type, leverage, opened_at, closed_at
             FROM trades WHERE subscription_id = ?1 AND symbol = ?2 AND status = 'OPEN'",
        )?;
        let trade = stmt.query_row(params![subscription_id, symbol], map_trade_row).optional()?;
        Ok(trade)
    }

    pub async fn close_trade(&self, trade_id: &str, pnl: f64) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        let n = conn.execute(
            "UPDATE trades SET status = 'CLOSED', pnl = ?1, closed_at = ?2 WHERE id = ?3",
            params![pnl, Utc::now().to_rfc3339(), trade_id],
        )?;
        if n == 0 {
            return Err(EngineError::NotFound(format!("trade {trade_id}")));
        }
        Ok(())
    }

    pub async fn list_open_trades_for_subscription(&self, subscription_id: &str) -> EngineResult<Vec<Trade>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, subscription_id, symbol, side, quantity, entry_price, stop_loss, take_profit,
                    status, pnl, order_id, stop_order_id, take_profit_order_id, position_id,
                    liquidation_price, metadata, trading_type, leverage, opened_at, closed_at
             FROM trades WHERE subscription_id = ?1 AND status = 'OPEN'",
        )?;
        let rows = stmt.query_map(params![subscription_id], map_trade_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

fn row_to_strategy(conn: &Connection, strategy_id: &str) -> EngineResult<Strategy> {
    conn.query_row(
        "SELECT id, name, active, config_json, kind, subscriber_count FROM strategies WHERE id = ?1",
        params![strategy_id],
        map_strategy_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::NotFound(format!("strategy {strategy_id}")))
}

fn row_to_subscription(conn: &Connection, subscription_id: &str) -> EngineResult<Subscription> {
    conn.query_row(
        "SELECT id, user_id, strategy_id, broker_credential_id, capital, risk_per_trade,
                leverage, max_positions, max_daily_loss, sl_atr_multiplier, tp_atr_multiplier,
                trading_type, active, paused, subscribed_at, unsubscribed_at, cumulative_pnl, trade_count
         FROM subscriptions WHERE id = ?1",
        params![subscription_id],
        map_subscription_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::NotFound(format!("subscription {subscription_id}")))
}

fn map_strategy_row(row: &rusqlite::Row) -> rusqlite::Result<Strategy> {
    let config_json: String = row.get(3)?;
    let kind: String = row.get(4)?;
    let config: ExecutionConfig = serde_json::from_str(&config_json).unwrap_or_default();
    Ok(Strategy {
        id: row.get(0)?,
        name: row.get(1)?,
        active: row.get(2)?,
        config,
        kind: StrategyKind::from_str(&kind),
        subscriber_count: row.get(5)?,
    })
}

fn map_subscription_row(row: &rusqlite::Row) -> rusqlite::Result<Subscription> {
    let trading_type: String = row.get(11)?;
    let subscribed_at: String = row.get(14)?;
    let unsubscribed_at: Option<String> = row.get(15)?;
    Ok(Subscription {
        id: row.get(0)?,
        user_id: row.get(1)?,
        strategy_id: row.get(2)?,
        broker_credential_id: row.get(3)?,
        capital: row.get(4)?,
        risk_per_trade: row.get(5)?,
        leverage: row.get(6)?,
        max_positions: row.get(7)?,
        max_daily_loss: row.get(8)?,
        sl_atr_multiplier: row.get(9)?,
        tp_atr_multiplier: row.get(10)?,
        trading_type: parse_trading_type(&trading_type),
        active: row.get(12)?,
        paused: row.get(13)?,
        subscribed_at: parse_dt(&subscribed_at),
        unsubscribed_at: unsubscribed_at.map(|s| parse_dt(&s)),
        cumulative_pnl: row.get(16)?,
        trade_count: row.get(17)?,
    })
}

fn map_trade_row(row: &rusqlite::Row) -> rusqlite::Result<Trade> {
    let side: String = row.get(3)?;
    let status: String = row.get(8)?;
    let trading_type: String = row.get(16)?;
    let opened_at: String = row.get(18)?;
    let closed_at: Option<String> = row.get(19)?;
    Ok(Trade {
        id: row.get(0)?,
        subscription_id: row.get(1)?,
        symbol: row.get(2)?,
        side: if side == "SHORT" { TradeSide::Short } else { TradeSide::Long },
        quantity: row.get(4)?,
        entry_price: row.get(5)?,
        stop_loss: row.get(6)?,
        take_profit: row.get(7)?,
        status: if status == "CLOSED" { TradeStatus::Closed } else { TradeStatus::Open },
        pnl: row.get(9)?,
        order_id: row.get(10)?,
        stop_order_id: row.get(11)?,
        take_profit_order_id: row.get(12)?,
        position_id: row.get(13)?,
        liquidation_price: row.get(14)?,
        metadata: row.get(15)?,
        trading_type: parse_trading_type(&trading_type),
        leverage: row.get(17)?,
        opened_at: parse_dt(&opened_at),
        closed_at: closed_at.map(|s| parse_dt(&s)),
    })
}

fn parse_dt(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_trading_type(s: &str) -> TradingType {
    if s == "futures" {
        TradingType::Futures
    } else {
        TradingType::Spot
    }
}

fn trading_type_str(t: TradingType) -> &'static str {
    match t {
        TradingType::Spot => "spot",
        TradingType::Futures => "futures",
    }
}

fn execution_status_str(s: ExecutionStatus) -> &'static str {
    match s {
        ExecutionStatus::Success => "SUCCESS",
        ExecutionStatus::Failed => "FAILED",
        ExecutionStatus::Skipped => "SKIPPED",
        ExecutionStatus::NoSignal => "NO_SIGNAL",
    }
}

fn trade_side_str(s: TradeSide) -> &'static str {
    match s {
        TradeSide::Long => "LONG",
        TradeSide::Short => "SHORT",
    }
}

fn trade_status_str(s: TradeStatus) -> &'static str {
    match s {
        TradeStatus::Open => "OPEN",
        TradeStatus::Closed => "CLOSED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{ExecutionConfig, TradeSide, TradeStatus};

    fn sample_strategy(id: &str) -> Strategy {
        Strategy {
            id: id.to_string(),
            name: "demo".to_string(),
            active: true,
            config: ExecutionConfig {
                symbol: Some("BTCUSDT".to_string()),
                resolution: Some("5".to_string()),
                ..Default::default()
            },
            kind: StrategyKind::Legacy,
            subscriber_count: 0,
        }
    }

    async fn seed_strategy(gw: &StoreGateway, strategy: &Strategy) {
        let conn = gw.conn.lock().await;
        conn.execute(
            "INSERT INTO strategies (id, name, active, config_json, kind, subscriber_count) VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                strategy.id,
                strategy.name,
                strategy.active,
                serde_json::to_string(&strategy.config).unwrap(),
                strategy.kind.as_str(),
                strategy.subscriber_count,
            ],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn strategy_roundtrip_and_not_found() {
        let gw = StoreGateway::open_in_memory().unwrap();
        let strategy = sample_strategy("s1");
        seed_strategy(&gw, &strategy).await;

        let fetched = gw.get_strategy("s1").await.unwrap();
        assert_eq!(fetched.config.symbol.as_deref(), Some("BTCUSDT"));

        let err = gw.get_strategy("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn subscriber_count_never_goes_negative() {
        let gw = StoreGateway::open_in_memory().unwrap();
        seed_strategy(&gw, &sample_strategy("s1")).await;
        gw.increment_subscriber_count("s1", -5).await.unwrap();
        let s = gw.get_strategy("s1").await.unwrap();
        assert_eq!(s.subscriber_count, 0);
    }

    #[tokio::test]
    async fn execution_dedup_upserts_in_place() {
        let gw = StoreGateway::open_in_memory().unwrap();
        let exec = Execution {
            id: "e1".to_string(),
            strategy_id: "s1".to_string(),
            symbol: "BTCUSDT".to_string(),
            resolution: "5".to_string(),
            interval_key: "2025-01-01T00:05:00.000Z".to_string(),
            executed_at: Utc::now(),
            status: ExecutionStatus::Success,
            signal_type: Some("long".to_string()),
            subscribers_count: 2,
            trades_generated: 1,
            duration_s: 0.5,
            worker_id: "w1".to_string(),
            error: None,
        };
        gw.record_execution(&exec).await.unwrap();
        assert!(gw.execution_exists("s1", &exec.interval_key).await.unwrap());

        let mut updated = exec.clone();
        updated.status = ExecutionStatus::Failed;
        updated.error = Some("boom".to_string());
        gw.record_execution(&updated).await.unwrap();

        let conn = gw.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM executions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn trade_lifecycle() {
        let gw = StoreGateway::open_in_memory().unwrap();
        let trade = Trade {
            id: "t1".to_string(),
            subscription_id: "sub1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: TradeSide::Long,
            quantity: 0.01,
            entry_price: 50000.0,
            stop_loss: None,
            take_profit: None,
            status: TradeStatus::Open,
            pnl: None,
            order_id: Some("o1".to_string()),
            stop_order_id: None,
            take_profit_order_id: None,
            position_id: None,
            liquidation_price: None,
            metadata: None,
            trading_type: TradingType::Spot,
            leverage: 1.0,
            opened_at: Utc::now(),
            closed_at: None,
        };
        gw.insert_trade(&trade).await.unwrap();

        let open = gw.get_open_trade("sub1", "BTCUSDT").await.unwrap();
        assert!(open.is_some());

        gw.close_trade("t1", 12.5).await.unwrap();
        let open_after = gw.get_open_trade("sub1", "BTCUSDT").await.unwrap();
        assert!(open_after.is_none());
    }

    fn sample_subscription(id: &str, user_id: &str, strategy_id: &str) -> Subscription {
        Subscription {
            id: id.to_string(),
            user_id: user_id.to_string(),
            strategy_id: strategy_id.to_string(),
            broker_credential_id: "cred1".to_string(),
            capital: 1000.0,
            risk_per_trade: None,
            leverage: None,
            max_positions: None,
            max_daily_loss: None,
            sl_atr_multiplier: None,
            tp_atr_multiplier: None,
            trading_type: TradingType::Spot,
            active: true,
            paused: false,
            subscribed_at: Utc::now(),
            unsubscribed_at: None,
            cumulative_pnl: 0.0,
            trade_count: 0,
        }
    }

    #[tokio::test]
    async fn find_subscription_for_user_strategy_sees_cancelled_rows() {
        let gw = StoreGateway::open_in_memory().unwrap();
        let sub = sample_subscription("sub1", "u1", "s1");
        gw.insert_subscription(&sub).await.unwrap();
        gw.set_subscription_active("sub1", false).await.unwrap();

        let found = gw.find_subscription_for_user_strategy("u1", "s1").await.unwrap();
        assert!(found.is_some(), "a cancelled subscription must still be findable for reactivation");
        assert!(!found.unwrap().active);

        let none = gw.find_subscription_for_user_strategy("u1", "missing-strategy").await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn reactivate_subscription_resets_counters_and_applies_new_overrides() {
        let gw = StoreGateway::open_in_memory().unwrap();
        let mut sub = sample_subscription("sub1", "u1", "s1");
        gw.insert_subscription(&sub).await.unwrap();
        gw.record_subscription_pnl("sub1", 42.0).await.unwrap();
        gw.set_subscription_active("sub1", false).await.unwrap();

        let cancelled = gw.get_subscription("sub1").await.unwrap();
        assert_eq!(cancelled.cumulative_pnl, 42.0);
        assert_eq!(cancelled.trade_count, 1);
        assert!(!cancelled.active);
        assert!(cancelled.unsubscribed_at.is_some());

        sub.broker_credential_id = "cred2".to_string();
        sub.capital = 2500.0;
        sub.risk_per_trade = Some(0.02);
        gw.reactivate_subscription(&sub).await.unwrap();

        let reactivated = gw.get_subscription("sub1").await.unwrap();
        assert!(reactivated.active);
        assert!(reactivated.unsubscribed_at.is_none());
        assert_eq!(reactivated.cumulative_pnl, 0.0, "reactivation must reset cumulative PnL");
        assert_eq!(reactivated.trade_count, 0, "reactivation must reset trade count");
        assert_eq!(reactivated.broker_credential_id, "cred2");
        assert_eq!(reactivated.capital, 2500.0);
        assert_eq!(reactivated.risk_per_trade, Some(0.02));
    }
}
