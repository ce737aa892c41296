//! Cache client: connection to the shared key-value + pub/sub store.
//!
//! Wraps `redis::aio::ConnectionManager` (which already retries with
//! backoff internally) for ordinary commands, and keeps a dedicated
//! connection for subscriptions, since pub/sub needs a connection of its
//! own. Reconnection of the pubsub side is handled by an explicit backoff
//! loop around resubscription.

use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::{EngineError, EngineResult};

#[derive(Clone)]
pub struct CacheClient {
    manager: redis::aio::ConnectionManager,
    client: redis::Client,
}

impl CacheClient {
    pub async fn connect(redis_url: &str) -> EngineResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| EngineError::CacheUnavailable(e.to_string()))?;
        let manager = redis::aio::ConnectionManager::new(client.clone())
            .await
            .map_err(|e| EngineError::CacheUnavailable(e.to_string()))?;
        Ok(Self { manager, client })
    }

    // --- strings -------------------------------------------------------------

    pub async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    pub async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    pub async fn del(&self, key: &str) -> EngineResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    // --- hashes ----------------------------------------------------------------

    pub async fn hgetall(&self, key: &str) -> EngineResult<std::collections::HashMap<String, String>> {
        let mut conn = self.manager.clone();
        Ok(conn.hgetall(key).await?)
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> EngineResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    pub async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> EngineResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    pub async fn hdel(&self, key: &str, field: &str) -> EngineResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.hdel(key, field).await?;
        Ok(())
    }

    pub async fn expire(&self, key: &str, seconds: i64) -> EngineResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.expire(key, seconds).await?;
        Ok(())
    }

    // --- sets ------------------------------------------------------------------

    pub async fn sadd(&self, key: &str, member: &str) -> EngineResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    pub async fn srem(&self, key: &str, member: &str) -> EngineResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.srem(key, member).await?;
        Ok(())
    }

    pub async fn smembers(&self, key: &str) -> EngineResult<Vec<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.smembers(key).await?)
    }

    pub async fn scard(&self, key: &str) -> EngineResult<usize> {
        let mut conn = self.manager.clone();
        Ok(conn.scard(key).await?)
    }

    pub async fn sismember(&self, key: &str, member: &str) -> EngineResult<bool> {
        let mut conn = self.manager.clone();
        Ok(conn.sismember(key, member).await?)
    }

    /// Admin-only: enumerate keys matching a glob pattern.
    pub async fn keys(&self, pattern: &str) -> EngineResult<Vec<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.keys(pattern).await?)
    }

    // --- distributed lock --------------------------------------------------------

    /// Atomic create-if-absent + expire, for the execution lock.
    pub async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> EngineResult<bool> {
        let mut conn = self.manager.clone();
        let ok: bool = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map(|v: Option<String>| v.is_some())?;
        Ok(ok)
    }

    // --- pub/sub ------------------------------------------------------------------

    pub async fn publish(&self, channel: &str, message: &str) -> EngineResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.publish(channel, message).await?;
        Ok(())
    }

    /// Subscribe to `channel` on a dedicated connection, forwarding
    /// messages into the returned receiver. Automatically reconnects with
    /// backoff if the pubsub connection drops.
    pub fn subscribe(&self, channel: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(256);
        let client = self.client.clone();
        let channel = channel.to_string();

        tokio::spawn(async move {
            let mut backoff = Duration::from_millis(200);
            loop {
                match client.get_async_pubsub().await {
                    Ok(mut pubsub) => {
                        if let Err(e) = pubsub.subscribe(&channel).await {
                            warn!(error = %e, channel = %channel, "pubsub subscribe failed");
                        } else {
                            info!(channel = %channel, "subscribed to cache channel");
                            backoff = Duration::from_millis(200);
                            let mut stream = pubsub.on_message();
                            use futures_util::StreamExt;
                            while let Some(msg) = stream.next().await {
                                if let Ok(payload) = msg.get_payload::<String>() {
                                    if tx.send(payload).await.is_err() {
                                        return; // receiver dropped
                                    }
                                }
                            }
                            warn!(channel = %channel, "pubsub stream ended, reconnecting");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, channel = %channel, "pubsub connect failed");
                    }
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(10));
            }
        });

        rx
    }
}
