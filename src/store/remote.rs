//! Redis REST client.
//!
//! Speaks the Upstash REST protocol: each command is POSTed as a JSON array
//! with a bearer token and answered with `{"result": ...}` or
//! `{"error": "..."}`. No retries; the HTTP client's timeout bounds every call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{KvStore, StoreError};

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct RestReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Remote [`KvStore`].
#[derive(Debug, Clone)]
pub struct RemoteStore {
    http: Client,
    url: String,
    token: String,
}

impl RemoteStore {
    /// Client for a REST endpoint.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Result<Self, StoreError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn command(&self, args: Value) -> Result<Value, StoreError> {
        debug!(command = %args[0], "store command");

        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = resp.status();
        let reply: RestReply = resp
            .json()
            .await
            .map_err(|e| StoreError::Protocol(format!("status {}: {}", status, e)))?;

        match reply.error {
            Some(err) => Err(StoreError::Protocol(err)),
            None => Ok(reply.result),
        }
    }
}

/// Numbers come back as strings from most commands.
fn parse_number(value: &Value) -> Result<Option<f64>, StoreError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => s
            .parse::<f64>()
            .map(Some)
            .map_err(|_| StoreError::Protocol(format!("not a number: {}", s))),
        other => Err(StoreError::Protocol(format!("unexpected value: {}", other))),
    }
}

/// Flat `[member, score, member, score, ...]` reply.
fn parse_scored(value: Value) -> Result<Vec<(String, f64)>, StoreError> {
    let Value::Array(items) = value else {
        return Err(StoreError::Protocol("expected array".into()));
    };
    if items.len() % 2 != 0 {
        return Err(StoreError::Protocol("odd scored reply".into()));
    }

    items
        .chunks(2)
        .map(|pair| {
            let member = pair[0]
                .as_str()
                .ok_or_else(|| StoreError::Protocol("member is not a string".into()))?
                .to_string();
            let score = parse_number(&pair[1])?
                .ok_or_else(|| StoreError::Protocol("missing score".into()))?;
            Ok((member, score))
        })
        .collect()
}

#[async_trait]
impl KvStore for RemoteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.command(json!(["GET", key])).await? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Ok(Some(other.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let args = match ttl {
            Some(ttl) => json!(["SET", key, value, "EX", ttl.as_secs().max(1)]),
            None => json!(["SET", key, value]),
        };
        self.command(args).await.map(|_| ())
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError> {
        self.command(json!(["ZADD", key, score, member])).await.map(|_| ())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        parse_number(&self.command(json!(["ZSCORE", key, member])).await?)
    }

    async fn zrevrank(&self, key: &str, member: &str) -> Result<Option<u64>, StoreError> {
        match self.command(json!(["ZREVRANK", key, member])).await? {
            Value::Null => Ok(None),
            Value::Number(n) => Ok(n.as_u64()),
            other => Err(StoreError::Protocol(format!("unexpected rank: {}", other))),
        }
    }

    async fn zrevrange_with_scores(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        parse_scored(
            self.command(json!(["ZRANGE", key, start, stop, "REV", "WITHSCORES"]))
                .await?,
        )
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        parse_scored(
            self.command(json!(["ZREVRANGEBYSCORE", key, max, min, "WITHSCORES"]))
                .await?,
        )
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let reply = self.command(json!(["EXPIRE", key, ttl.as_secs().max(1)])).await?;
        Ok(reply.as_i64() == Some(1))
    }
}
