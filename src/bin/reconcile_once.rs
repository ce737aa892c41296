//! Standalone reconciliation pass: builds an [`EngineContext`], runs one
//! reconcile, prints the report, and exits. For cron-driven ops scripting
//! where running the full scheduler binary would be overkill.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xcoinalgo_engine::config::Config;
use xcoinalgo_engine::context::EngineContext;
use xcoinalgo_engine::reconciler;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xcoinalgo_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    let ctx = EngineContext::build(config)
        .await
        .context("failed to build engine context")?;

    let report = reconciler::reconcile(&ctx).await.context("reconciliation failed")?;
    println!(
        "{}",
        serde_json::json!({
            "orphaned": report.orphaned,
            "missing": report.missing,
            "errors": report.errors,
        })
    );

    if !report.errors.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
