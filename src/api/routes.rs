//! Route handlers for the engine's HTTP surface.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    middleware as axum_mw,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::auth::{auth_middleware, CallerId};
use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::store::models::TradingType;
use crate::subscription::CreateSubscriptionParams;

pub fn router(ctx: Arc<EngineContext>) -> Router {
    Router::new()
        .route("/api/strategies/deploy", post(deploy))
        .route("/api/strategies/:id/subscribe", post(subscribe))
        .route("/api/strategies/:id/settings", put(update_strategy_settings))
        .route("/api/strategies/:id/stats", get(strategy_stats))
        .route("/api/strategies/subscriptions", get(list_subscriptions))
        .route("/api/strategies/subscriptions/:id", put(update_subscription))
        .route("/api/strategies/subscriptions/:id", delete(cancel_subscription))
        .route("/api/strategies/subscriptions/:id/pause", post(pause_subscription))
        .route("/api/strategies/subscriptions/:id/resume", post(resume_subscription))
        .layer(axum_mw::from_fn(auth_middleware))
        .with_state(ctx)
}

#[derive(Deserialize)]
struct DeployRequest {
    strategy_id: String,
}

#[derive(Serialize)]
struct DeployResponse {
    strategy_id: String,
    symbol: String,
    resolution: String,
    version: u64,
}

async fn deploy(
    State(ctx): State<Arc<EngineContext>>,
    Json(req): Json<DeployRequest>,
) -> EngineResult<Json<DeployResponse>> {
    let strategy = ctx.store.get_strategy(&req.strategy_id).await?;
    if !strategy.config.is_complete() {
        return Err(EngineError::MissingStrategyConfig {
            strategy_id: strategy.id,
            field: "symbol/resolution".to_string(),
        });
    }

    ctx.settings.initialize_strategy(&strategy.id, &strategy.config, 1).await?;
    if strategy.active {
        ctx.registry
            .register(
                &strategy.id,
                strategy.config.symbol.as_deref().unwrap(),
                strategy.config.resolution.as_deref().unwrap(),
            )
            .await?;
    }

    let settings = ctx.settings.get_strategy_settings(&strategy.id).await?;
    Ok(Json(DeployResponse {
        strategy_id: strategy.id,
        symbol: settings.symbol,
        resolution: settings.resolution,
        version: settings.version,
    }))
}

#[derive(Deserialize)]
struct SubscribeRequest {
    broker_credential_id: String,
    capital: f64,
    risk_per_trade: Option<f64>,
    leverage: Option<f64>,
    max_positions: Option<i64>,
    max_daily_loss: Option<f64>,
    sl_atr_multiplier: Option<f64>,
    tp_atr_multiplier: Option<f64>,
    trading_type: Option<TradingType>,
}

async fn subscribe(
    State(ctx): State<Arc<EngineContext>>,
    Extension(caller): Extension<CallerId>,
    Path(strategy_id): Path<String>,
    Json(req): Json<SubscribeRequest>,
) -> EngineResult<Json<crate::store::models::Subscription>> {
    let wallets = ctx.broker.list_futures_wallets(&req.broker_credential_id).await?;
    let available: f64 = wallets.iter().map(|w| w.available_balance).sum();
    if available < req.capital {
        return Err(EngineError::BrokerCallFailed(format!(
            "broker wallet balance {available} is below requested capital {}",
            req.capital
        )));
    }

    let subscription = ctx
        .subscriptions
        .create(CreateSubscriptionParams {
            user_id: caller.0,
            strategy_id,
            broker_credential_id: req.broker_credential_id,
            capital: req.capital,
            risk_per_trade: req.risk_per_trade,
            leverage: req.leverage,
            max_positions: req.max_positions,
            max_daily_loss: req.max_daily_loss,
            sl_atr_multiplier: req.sl_atr_multiplier,
            tp_atr_multiplier: req.tp_atr_multiplier,
            trading_type: req.trading_type,
        })
        .await?;

    Ok(Json(subscription))
}

async fn update_strategy_settings(
    State(ctx): State<Arc<EngineContext>>,
    Path(strategy_id): Path<String>,
    Json(patch): Json<HashMap<String, String>>,
) -> EngineResult<Json<serde_json::Value>> {
    ctx.settings.update_strategy_settings(&strategy_id, patch, true).await?;
    let settings = ctx.settings.get_strategy_settings(&strategy_id).await?;
    Ok(Json(serde_json::to_value(settings)?))
}

async fn update_subscription(
    State(ctx): State<Arc<EngineContext>>,
    Path(subscription_id): Path<String>,
    Json(patch): Json<HashMap<String, String>>,
) -> EngineResult<Json<serde_json::Value>> {
    let subscription = ctx.store.get_subscription(&subscription_id).await?;
    ctx.settings
        .update_subscription_settings(&subscription.user_id, &subscription.strategy_id, patch)
        .await?;
    let settings = ctx
        .settings
        .get_subscription_settings(&subscription.user_id, &subscription.strategy_id)
        .await?;
    Ok(Json(serde_json::to_value(settings)?))
}

async fn pause_subscription(
    State(ctx): State<Arc<EngineContext>>,
    Path(subscription_id): Path<String>,
) -> EngineResult<Json<serde_json::Value>> {
    ctx.subscriptions.pause(&subscription_id).await?;
    Ok(Json(serde_json::json!({"status": "paused"})))
}

async fn resume_subscription(
    State(ctx): State<Arc<EngineContext>>,
    Path(subscription_id): Path<String>,
) -> EngineResult<Json<serde_json::Value>> {
    ctx.subscriptions.resume(&subscription_id).await?;
    Ok(Json(serde_json::json!({"status": "resumed"})))
}

async fn cancel_subscription(
    State(ctx): State<Arc<EngineContext>>,
    Path(subscription_id): Path<String>,
) -> EngineResult<Json<serde_json::Value>> {
    ctx.subscriptions.cancel(&subscription_id).await?;
    Ok(Json(serde_json::json!({"status": "cancelled"})))
}

#[derive(Serialize)]
struct SubscriptionView {
    id: String,
    strategy_id: String,
    capital: f64,
    active: bool,
    paused: bool,
    realized_pnl: f64,
    unrealized_pnl: f64,
}

async fn list_subscriptions(
    State(ctx): State<Arc<EngineContext>>,
    Extension(caller): Extension<CallerId>,
) -> EngineResult<Json<Vec<SubscriptionView>>> {
    let subscriptions = ctx.store.list_subscriptions_for_user(&caller.0).await?;
    let mut views = Vec::with_capacity(subscriptions.len());
    for sub in subscriptions {
        let open_trades = ctx.store.list_open_trades_for_subscription(&sub.id).await?;
        let unrealized_pnl: f64 = open_trades.iter().filter_map(|t| t.pnl).sum();
        views.push(SubscriptionView {
            id: sub.id,
            strategy_id: sub.strategy_id,
            capital: sub.capital,
            active: sub.active,
            paused: sub.paused,
            realized_pnl: sub.cumulative_pnl,
            unrealized_pnl,
        });
    }
    Ok(Json(views))
}

#[derive(Serialize)]
struct StrategyStatsResponse {
    strategy_id: String,
    active: bool,
    subscriber_count: i64,
    last_run_at: Option<chrono::DateTime<chrono::Utc>>,
    last_signal: Option<String>,
    last_duration_s: Option<f64>,
}

async fn strategy_stats(
    State(ctx): State<Arc<EngineContext>>,
    Path(strategy_id): Path<String>,
) -> EngineResult<Json<StrategyStatsResponse>> {
    let strategy = ctx.store.get_strategy(&strategy_id).await?;
    let status = ctx.settings.get_execution_status(&strategy_id).await?;
    Ok(Json(StrategyStatsResponse {
        strategy_id: strategy.id,
        active: strategy.active,
        subscriber_count: strategy.subscriber_count,
        last_run_at: status.last_run_at,
        last_signal: status.last_signal,
        last_duration_s: status.last_duration_s,
    }))
}
