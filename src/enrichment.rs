// src/enrichment.rs
//! Etherscan-style read-only lookups. This is the only client that retries:
//! transient failures back off exponentially, everything else fails fast.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::EnrichmentConfig;
use crate::error::{ProbeError, Result};
use crate::models::TokenMetadata;
use crate::parser;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// `base * 2^attempt`, saturating and capped at `MAX_BACKOFF`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

impl ExplorerResponse {
    /// First element of a successful list result, or the object itself.
    fn first(self) -> Option<Value> {
        if self.status != "1" {
            debug!("Explorer returned status {} ({})", self.status, self.message);
            return None;
        }
        match self.result {
            Value::Array(items) => items.into_iter().next(),
            obj @ Value::Object(_) => Some(obj),
            _ => None,
        }
    }
}

/// Earliest and latest transaction timestamps (unix seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxBounds {
    pub earliest_tx_ts: Option<i64>,
    pub latest_tx_ts: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct EnrichmentClient {
    client: Client,
    base_url: String,
    api_key: String,
    retries: u32,
    backoff: Duration,
}

impl EnrichmentClient {
    /// `None` when no API key is configured.
    pub fn new(cfg: &EnrichmentConfig) -> Result<Option<Self>> {
        let Some(api_key) = cfg.api_key.clone() else {
            return Ok(None);
        };
        let client = Client::builder().timeout(cfg.timeout).build()?;
        Ok(Some(Self {
            client,
            base_url: cfg.base_url.clone(),
            api_key,
            retries: cfg.retries.max(1),
            backoff: cfg.backoff,
        }))
    }

    async fn get_once(&self, params: &[(&str, &str)]) -> Result<ExplorerResponse> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(params)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ProbeError::Transient(format!("HTTP {} from explorer", status)));
        }
        if !status.is_success() {
            return Err(ProbeError::Http {
                status: status.as_u16(),
                url: self.base_url.clone(),
            });
        }
        Ok(resp.json().await?)
    }

    async fn get_json(&self, params: &[(&str, &str)]) -> Result<ExplorerResponse> {
        let mut attempt = 0u32;
        loop {
            match self.get_once(params).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt + 1 < self.retries => {
                    let delay = backoff_delay(self.backoff, attempt);
                    warn!(
                        "Explorer attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt + 1,
                        self.retries,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn tx_timestamp(&self, address: &str, sort: &str) -> Result<Option<i64>> {
        let body = self
            .get_json(&[
                ("module", "account"),
                ("action", "txlist"),
                ("address", address),
                ("page", "1"),
                ("offset", "1"),
                ("sort", sort),
            ])
            .await?;
        Ok(body
            .first()
            .and_then(|tx| tx.get("timeStamp").and_then(parser::parse_quantity))
            .filter(|ts| *ts > 0)
            .map(|ts| ts as i64))
    }

    pub async fn tx_bounds(&self, address: &str) -> Result<TxBounds> {
        let earliest_tx_ts = self.tx_timestamp(address, "asc").await?;
        let latest_tx_ts = self.tx_timestamp(address, "desc").await?;
        Ok(TxBounds {
            earliest_tx_ts,
            latest_tx_ts,
        })
    }

    pub async fn token_info(&self, contract: &str) -> Result<Option<TokenMetadata>> {
        let body = self
            .get_json(&[
                ("module", "token"),
                ("action", "tokeninfo"),
                ("contractaddress", contract),
            ])
            .await?;
        Ok(body
            .first()
            .and_then(|item| serde_json::from_value::<TokenMetadata>(item).ok()))
    }
}
