//! HMAC-signed REST broker adapter skeleton: timestamp + method + path +
//! body signed with HMAC-SHA256, base64 encoded into an auth header. The
//! concrete vendor is out of scope; this type demonstrates the signing and
//! transport shape behind `BrokerClient` without committing to one vendor's
//! endpoint contracts.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::time::Duration;

use super::{BrokerClient, InstrumentInfo, OrderAck, OrderSide, Position, Wallet};
use crate::error::{EngineError, EngineResult};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct BrokerCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Resolves an opaque `credential_id` to broker API credentials. A real
/// deployment would back this with the subscription's stored (and
/// decrypted) credential; kept as a trait so the HTTP surface and the
/// coordinator do not depend on how credentials are stored.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, credential_id: &str) -> EngineResult<BrokerCredentials>;
}

/// Resolves credentials from the environment: `BROKER_CRED_{ID}_KEY` /
/// `BROKER_CRED_{ID}_SECRET`, with `{ID}` the credential id upper-cased and
/// with every non-alphanumeric byte replaced by `_`. Standing in for the
/// encrypted-vault account system that owns real credential storage (out
/// of scope for this core), this keeps the engine itself working off the
/// same env-var configuration idiom as `Config::from_env`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialResolver;

impl EnvCredentialResolver {
    fn env_key(credential_id: &str, suffix: &str) -> String {
        let normalized: String = credential_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("BROKER_CRED_{normalized}_{suffix}")
    }
}

#[async_trait]
impl CredentialResolver for EnvCredentialResolver {
    async fn resolve(&self, credential_id: &str) -> EngineResult<BrokerCredentials> {
        if credential_id.is_empty() {
            return Err(EngineError::BrokerCallFailed("empty broker_credential_id".to_string()));
        }
        let api_key = std::env::var(Self::env_key(credential_id, "KEY")).map_err(|_| {
            EngineError::BrokerCallFailed(format!("no credentials configured for {credential_id}"))
        })?;
        let api_secret = std::env::var(Self::env_key(credential_id, "SECRET")).map_err(|_| {
            EngineError::BrokerCallFailed(format!("no credentials configured for {credential_id}"))
        })?;
        Ok(BrokerCredentials { api_key, api_secret })
    }
}

pub struct SignedBrokerAdapter<R: CredentialResolver> {
    client: Client,
    base_url: String,
    credentials: R,
}

impl<R: CredentialResolver> SignedBrokerAdapter<R> {
    pub fn new(base_url: String, credentials: R) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("broker HTTP client always builds");
        Self {
            client,
            base_url,
            credentials,
        }
    }

    fn sign(secret: &str, method: &str, path: &str, body: &str) -> EngineResult<(String, String)> {
        let timestamp = Utc::now().timestamp().to_string();
        let message = format!("{timestamp}{method}{path}{body}");
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| EngineError::BrokerCallFailed(format!("invalid signing key: {e}")))?;
        mac.update(message.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());
        Ok((timestamp, signature))
    }

    async fn signed_request(
        &self,
        credential_id: &str,
        method: reqwest::Method,
        path: &str,
        body: serde_json::Value,
    ) -> EngineResult<serde_json::Value> {
        let creds = self.credentials.resolve(credential_id).await?;
        let body_str = if body.is_null() {
            String::new()
        } else {
            serde_json::to_string(&body)?
        };
        let (timestamp, signature) = Self::sign(&creds.api_secret, method.as_str(), path, &body_str)?;
        let url = format!("{}{}", self.base_url, path);

        let mut request = self
            .client
            .request(method, &url)
            .header("X-API-KEY", &creds.api_key)
            .header("X-API-TIMESTAMP", &timestamp)
            .header("X-API-SIGNATURE", &signature);
        if !body_str.is_empty() {
            request = request.body(body_str).header("Content-Type", "application/json");
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::BrokerCallFailed(e.to_string()))?;
        let status = response.status();
        let value: serde_json::Value = response
            .json()
            .await
            .unwrap_or_else(|_| serde_json::json!({}));
        if !status.is_success() {
            return Err(EngineError::BrokerCallFailed(format!(
                "broker returned {status}: {value}"
            )));
        }
        Ok(value)
    }
}

#[async_trait]
impl<R: CredentialResolver + Send + Sync> BrokerClient for SignedBrokerAdapter<R> {
    async fn list_futures_wallets(&self, credential_id: &str) -> EngineResult<Vec<Wallet>> {
        let value = self
            .signed_request(credential_id, reqwest::Method::GET, "/wallets", serde_json::Value::Null)
            .await?;
        let balance = value.get("balance").and_then(|v| v.as_f64()).unwrap_or(0.0);
        Ok(vec![Wallet {
            credential_id: credential_id.to_string(),
            available_balance: balance,
        }])
    }

    async fn get_instrument_info(&self, symbol: &str) -> EngineResult<InstrumentInfo> {
        let path = format!("/instruments/{symbol}");
        let value = self
            .signed_request("", reqwest::Method::GET, &path, serde_json::Value::Null)
            .await?;
        Ok(InstrumentInfo {
            symbol: symbol.to_string(),
            quantity_increment: value
                .get("quantity_increment")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.001),
            max_leverage: value.get("max_leverage").and_then(|v| v.as_f64()).unwrap_or(20.0),
        })
    }

    async fn place_market_order(
        &self,
        credential_id: &str,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> EngineResult<OrderAck> {
        let body = serde_json::json!({
            "symbol": symbol,
            "side": side,
            "type": "MARKET",
            "quantity": quantity,
        });
        let value = self
            .signed_request(credential_id, reqwest::Method::POST, "/orders", body)
            .await?;
        parse_order_ack(&value)
    }

    async fn place_limit_order(
        &self,
        credential_id: &str,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
    ) -> EngineResult<OrderAck> {
        let body = serde_json::json!({
            "symbol": symbol,
            "side": side,
            "type": "LIMIT",
            "quantity": quantity,
            "price": price,
        });
        let value = self
            .signed_request(credential_id, reqwest::Method::POST, "/orders", body)
            .await?;
        parse_order_ack(&value)
    }

    async fn get_order(&self, credential_id: &str, order_id: &str) -> EngineResult<OrderAck> {
        let path = format!("/orders/{order_id}");
        let value = self
            .signed_request(credential_id, reqwest::Method::GET, &path, serde_json::Value::Null)
            .await?;
        parse_order_ack(&value)
    }

    async fn cancel_order(&self, credential_id: &str, order_id: &str) -> EngineResult<()> {
        let path = format!("/orders/{order_id}");
        self.signed_request(credential_id, reqwest::Method::DELETE, &path, serde_json::Value::Null)
            .await?;
        Ok(())
    }

    async fn list_positions(&self, credential_id: &str) -> EngineResult<Vec<Position>> {
        let value = self
            .signed_request(credential_id, reqwest::Method::GET, "/positions", serde_json::Value::Null)
            .await?;
        let positions = value
            .as_array()
            .map(|arr| arr.iter().filter_map(parse_position).collect())
            .unwrap_or_default();
        Ok(positions)
    }

    async fn list_orders(&self, credential_id: &str) -> EngineResult<Vec<OrderAck>> {
        let value = self
            .signed_request(credential_id, reqwest::Method::GET, "/orders", serde_json::Value::Null)
            .await?;
        let orders = value
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| parse_order_ack(v).ok()).collect())
            .unwrap_or_default();
        Ok(orders)
    }
}

fn parse_order_ack(value: &serde_json::Value) -> EngineResult<OrderAck> {
    Ok(OrderAck {
        order_id: value
            .get("order_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::BrokerCallFailed("missing order_id in response".to_string()))?
            .to_string(),
        status: value.get("status").and_then(|v| v.as_str()).unwrap_or("UNKNOWN").to_string(),
        filled_quantity: value.get("filled_quantity").and_then(|v| v.as_f64()).unwrap_or(0.0),
        filled_price: value.get("filled_price").and_then(|v| v.as_f64()).unwrap_or(0.0),
    })
}

fn parse_position(value: &serde_json::Value) -> Option<Position> {
    Some(Position {
        symbol: value.get("symbol")?.as_str()?.to_string(),
        quantity: value.get("quantity")?.as_f64()?,
        entry_price: value.get("entry_price")?.as_f64()?,
        liquidation_price: value.get("liquidation_price").and_then(|v| v.as_f64()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticResolver;

    #[async_trait]
    impl CredentialResolver for StaticResolver {
        async fn resolve(&self, _credential_id: &str) -> EngineResult<BrokerCredentials> {
            Ok(BrokerCredentials {
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
            })
        }
    }

    #[test]
    fn signature_is_deterministic_for_fixed_timestamp() {
        let (_, sig1) = SignedBrokerAdapter::<StaticResolver>::sign("secret", "GET", "/wallets", "").unwrap();
        let (_, sig2) = SignedBrokerAdapter::<StaticResolver>::sign("secret", "GET", "/wallets", "").unwrap();
        // Different timestamps mean different signatures even with identical
        // inputs otherwise; both must at least be well-formed base64.
        assert!(!sig1.is_empty());
        assert!(!sig2.is_empty());
    }

    #[test]
    fn parse_order_ack_requires_order_id() {
        let value = serde_json::json!({"status": "FILLED"});
        assert!(parse_order_ack(&value).is_err());
    }

    #[tokio::test]
    async fn env_resolver_reads_normalized_var_names() {
        std::env::set_var("BROKER_CRED_USER_42_KEY", "envkey");
        std::env::set_var("BROKER_CRED_USER_42_SECRET", "envsecret");
        let creds = EnvCredentialResolver.resolve("user-42").await.unwrap();
        assert_eq!(creds.api_key, "envkey");
        assert_eq!(creds.api_secret, "envsecret");
        std::env::remove_var("BROKER_CRED_USER_42_KEY");
        std::env::remove_var("BROKER_CRED_USER_42_SECRET");
    }

    #[tokio::test]
    async fn env_resolver_fails_when_unconfigured() {
        let err = EnvCredentialResolver.resolve("unconfigured-id").await.unwrap_err();
        assert!(matches!(err, EngineError::BrokerCallFailed(_)));
    }

    #[tokio::test]
    async fn env_resolver_rejects_empty_credential_id() {
        let err = EnvCredentialResolver.resolve("").await.unwrap_err();
        assert!(matches!(err, EngineError::BrokerCallFailed(_)));
    }

    #[test]
    fn parse_order_ack_reads_full_shape() {
        let value = serde_json::json!({
            "order_id": "o1",
            "status": "FILLED",
            "filled_quantity": 0.5,
            "filled_price": 50000.0
        });
        let ack = parse_order_ack(&value).unwrap();
        assert_eq!(ack.order_id, "o1");
        assert_eq!(ack.filled_quantity, 0.5);
    }
}
