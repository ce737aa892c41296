//! xcoinalgo strategy execution engine entrypoint: wires an [`EngineContext`],
//! then either runs one reconciliation pass, runs the scheduler and HTTP
//! surface together, or (with `--once`) performs a single settle-and-exit
//! pass for operational scripting.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xcoinalgo_engine::config::Config;
use xcoinalgo_engine::context::EngineContext;
use xcoinalgo_engine::middleware::logging::request_logging_simple;
use xcoinalgo_engine::scheduler::Scheduler;
use xcoinalgo_engine::{api, reconciler};

#[derive(Parser, Debug)]
#[command(name = "xcoinalgo-engine", about = "multi-tenant strategy execution engine")]
struct Cli {
    /// Overrides WORKER_ID for this process; otherwise read from the environment.
    #[arg(long, env = "WORKER_ID")]
    worker_id: Option<String>,

    /// Runs one reconciliation pass and exits without starting the scheduler or HTTP server.
    #[arg(long)]
    reconcile_only: bool,

    /// Runs a single reconcile-and-refresh pass and exits instead of entering the run loop.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(worker_id) = cli.worker_id {
        config.worker_id = worker_id;
    }

    info!(worker_id = %config.worker_id, "starting xcoinalgo engine");

    let ctx = EngineContext::build(config)
        .await
        .context("failed to build engine context")?;

    if cli.reconcile_only {
        let report = reconciler::reconcile(&ctx).await.context("reconciliation failed")?;
        info!(
            orphaned = report.orphaned,
            missing = report.missing,
            errors = ?report.errors,
            "reconcile-only pass complete"
        );
        return Ok(());
    }

    if cli.once {
        ctx.registry.refresh().await.context("registry refresh failed")?;
        let report = reconciler::reconcile(&ctx).await.context("reconciliation failed")?;
        info!(
            orphaned = report.orphaned,
            missing = report.missing,
            "--once pass complete, exiting without entering the scheduler loop"
        );
        return Ok(());
    }

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(api::router(Arc::clone(&ctx)))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(request_logging_simple));

    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind HTTP listener")?;
    info!(addr, "API server listening");

    let scheduler = Arc::new(Scheduler::new(Arc::clone(&ctx)));
    let scheduler_task = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run().await })
    };
    let server_task = tokio::spawn(async move {
        axum::serve(listener, app).await.context("HTTP server error")
    });

    tokio::select! {
        res = scheduler_task => {
            res.context("scheduler task panicked")?.context("scheduler loop failed")?;
        }
        res = server_task => {
            res.context("HTTP server task panicked")?.context("HTTP server failed")?;
        }
    }

    info!("xcoinalgo engine shutting down");
    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xcoinalgo_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
