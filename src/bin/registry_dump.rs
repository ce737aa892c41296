//! Dumps the strategy registry's current candle membership as JSON, for
//! operators diagnosing why a strategy isn't firing.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xcoinalgo_engine::config::Config;
use xcoinalgo_engine::context::EngineContext;

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

    let candles = ctx.registry.active_candles().await.context("failed to list active candles")?;
    let mut dump = serde_json::Map::new();
    for key in candles {
        let members = ctx
            .registry
            .get_for_candle(&key.symbol, &key.resolution)
            .await
            .context("failed to read candle membership")?;
        dump.insert(key.cache_key(), serde_json::json!(members));
    }

    println!("{}", serde_json::to_string_pretty(&serde_json::Value::Object(dump))?);
    Ok(())
}
