// src/rpc.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::RpcConfig;
use crate::error::{ProbeError, Result};
use crate::models::{BlockInfo, TokenBalances, TokenMetadata, Transfer, TransferCategory, ALL_CATEGORIES};
use crate::parser;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RpcResponse<T> {
    // Error first: an error body would otherwise match `Success { result: None }`.
    Error { error: RpcErrorBody },
    // A missing `result` deserializes as `None`.
    Success { result: Option<T> },
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Address is the sender.
    Outgoing,
    /// Address is the recipient.
    Incoming,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Outgoing, Direction::Incoming];
}

/// One page request against the transfer index.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferQuery {
    pub from_block: String,
    pub to_block: String,
    pub category: Vec<TransferCategory>,
    pub with_metadata: bool,
    pub exclude_zero_value: bool,
    pub max_count: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<SortOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_address: Option<String>,
}

impl TransferQuery {
    pub fn new(address: &str, direction: Direction, from_block: String, to_block: String, max_count: u64) -> Self {
        let (from_address, to_address) = match direction {
            Direction::Outgoing => (Some(address.to_string()), None),
            Direction::Incoming => (None, Some(address.to_string())),
        };
        TransferQuery {
            from_block,
            to_block,
            category: ALL_CATEGORIES.to_vec(),
            with_metadata: true,
            exclude_zero_value: false,
            max_count: format!("0x{:x}", max_count.max(1)),
            order: Some(SortOrder::Desc),
            page_key: None,
            from_address,
            to_address,
        }
    }

    pub fn direction(&self) -> Direction {
        if self.from_address.is_some() {
            Direction::Outgoing
        } else {
            Direction::Incoming
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPage {
    #[serde(default)]
    pub transfers: Vec<Transfer>,
    #[serde(default)]
    pub page_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    #[serde(default)]
    timestamp: Value,
}

/// Chain data source used by the resolver, fetcher and crawler.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn block_number(&self) -> Result<u64>;

    async fn block_by_number(&self, number: u64) -> Result<BlockInfo>;

    async fn asset_transfers(&self, query: &TransferQuery) -> Result<TransferPage>;

    async fn token_balances(&self, address: &str) -> Result<TokenBalances>;

    /// `None` when the provider knows nothing about the contract.
    async fn token_metadata(&self, contract: &str) -> Result<Option<TokenMetadata>>;
}

/// JSON-RPC over HTTP POST. Never retries; callers decide.
#[derive(Debug, Clone)]
pub struct HttpRpc {
    client: Client,
    url: String,
}

impl HttpRpc {
    pub fn new(cfg: &RpcConfig) -> Result<Self> {
        let client = Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self {
            client,
            url: cfg.url.clone(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!("📡 Sending {}", method);

        let resp = self.client.post(&self.url).json(&payload).send().await?;
        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ProbeError::Transient(format!("HTTP {} from {}", status, method)));
        }
        if !status.is_success() {
            return Err(ProbeError::Http {
                status: status.as_u16(),
                url: method.to_string(),
            });
        }

        let text = resp.text().await?;
        let parsed: RpcResponse<T> = serde_json::from_str(&text).map_err(|e| {
            ProbeError::resolution(method, format!("malformed response: {}", e))
        })?;

        match parsed {
            RpcResponse::Success { result } => Ok(result),
            RpcResponse::Error { error } => Err(ProbeError::Rpc {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            }),
        }
    }
}

#[async_trait]
impl ChainRpc for HttpRpc {
    async fn block_number(&self) -> Result<u64> {
        let result: Value = self
            .call("eth_blockNumber", json!([]))
            .await?
            .ok_or_else(|| ProbeError::resolution("eth_blockNumber", "empty result"))?;
        parser::parse_quantity(&result)
            .ok_or_else(|| ProbeError::resolution("eth_blockNumber", format!("bad quantity {}", result)))
    }

    async fn block_by_number(&self, number: u64) -> Result<BlockInfo> {
        let header: BlockHeader = self
            .call("eth_getBlockByNumber", json!([format!("0x{:x}", number), false]))
            .await?
            .ok_or_else(|| ProbeError::resolution("eth_getBlockByNumber", format!("no block {}", number)))?;
        let timestamp = parser::parse_quantity(&header.timestamp).ok_or_else(|| {
            ProbeError::resolution("eth_getBlockByNumber", format!("no timestamp for block {}", number))
        })?;
        Ok(BlockInfo {
            number,
            timestamp: timestamp as i64,
        })
    }

    async fn asset_transfers(&self, query: &TransferQuery) -> Result<TransferPage> {
        self.call("alchemy_getAssetTransfers", json!([query]))
            .await?
            .ok_or_else(|| ProbeError::resolution("alchemy_getAssetTransfers", "empty result"))
    }

    async fn token_balances(&self, address: &str) -> Result<TokenBalances> {
        self.call("alchemy_getTokenBalances", json!([address]))
            .await?
            .ok_or_else(|| ProbeError::resolution("alchemy_getTokenBalances", "empty result"))
    }

    async fn token_metadata(&self, contract: &str) -> Result<Option<TokenMetadata>> {
        self.call("alchemy_getTokenMetadata", json!([contract])).await
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted chain for tests: a monotonic block sequence plus per-address
    //! transfer lists served in pages.

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::models::sort_transfers_desc;

    #[derive(Default)]
    pub struct MockRpc {
        pub block_timestamps: Vec<i64>,
        /// Transfers indexed by lowercased address (either side).
        pub transfers: Vec<Transfer>,
        pub page_size: usize,
        pub balances: HashMap<String, TokenBalances>,
        pub metadata: HashMap<String, TokenMetadata>,
        /// Block numbers that answer with an empty result.
        pub missing_blocks: Vec<u64>,
        /// Addresses whose transfer queries fail.
        pub failing_addresses: Vec<String>,
        pub block_calls: AtomicUsize,
        pub transfer_calls: AtomicUsize,
        pub queried: Mutex<Vec<String>>,
    }

    impl MockRpc {
        pub fn with_blocks(timestamps: Vec<i64>) -> Self {
            MockRpc {
                block_timestamps: timestamps,
                page_size: 2,
                ..Default::default()
            }
        }

        pub fn block_calls(&self) -> usize {
            self.block_calls.load(Ordering::SeqCst)
        }
    }

    fn matches(t: &Transfer, q: &TransferQuery) -> bool {
        match (&q.from_address, &q.to_address) {
            (Some(a), _) => t.from == a.to_lowercase(),
            (_, Some(a)) => t.to == a.to_lowercase(),
            _ => false,
        }
    }

    fn block_bound(s: &str, latest: u64) -> u64 {
        if s == "latest" {
            latest
        } else {
            parser::parse_quantity_str(s).unwrap_or(0)
        }
    }

    #[async_trait]
    impl ChainRpc for MockRpc {
        async fn block_number(&self) -> Result<u64> {
            if self.block_timestamps.is_empty() {
                return Err(ProbeError::resolution("eth_blockNumber", "empty chain"));
            }
            Ok(self.block_timestamps.len() as u64 - 1)
        }

        async fn block_by_number(&self, number: u64) -> Result<BlockInfo> {
            self.block_calls.fetch_add(1, Ordering::SeqCst);
            if self.missing_blocks.contains(&number) {
                return Err(ProbeError::resolution("eth_getBlockByNumber", "missing"));
            }
            self.block_timestamps
                .get(number as usize)
                .map(|ts| BlockInfo {
                    number,
                    timestamp: *ts,
                })
                .ok_or_else(|| ProbeError::resolution("eth_getBlockByNumber", "out of range"))
        }

        async fn asset_transfers(&self, query: &TransferQuery) -> Result<TransferPage> {
            self.transfer_calls.fetch_add(1, Ordering::SeqCst);
            let subject = query
                .from_address
                .clone()
                .or_else(|| query.to_address.clone())
                .unwrap_or_default()
                .to_lowercase();
            if let Ok(mut q) = self.queried.lock() {
                q.push(subject.clone());
            }
            if self.failing_addresses.contains(&subject) {
                return Err(ProbeError::resolution("alchemy_getAssetTransfers", "boom"));
            }

            let latest = self.block_timestamps.len().saturating_sub(1) as u64;
            let lo = block_bound(&query.from_block, latest);
            let hi = block_bound(&query.to_block, latest);
            let mut selected: Vec<Transfer> = self
                .transfers
                .iter()
                .filter(|t| matches(t, query))
                .filter(|t| {
                    let b = t.block_num.unwrap_or(0);
                    b >= lo && b <= hi
                })
                .cloned()
                .collect();
            sort_transfers_desc(&mut selected);
            if query.order == Some(SortOrder::Asc) {
                selected.reverse();
            }

            let page_size = parser::parse_quantity_str(&query.max_count)
                .map(|n| n as usize)
                .unwrap_or(self.page_size)
                .min(self.page_size.max(1));
            let offset = query
                .page_key
                .as_deref()
                .and_then(|k| k.parse::<usize>().ok())
                .unwrap_or(0);
            let end = (offset + page_size).min(selected.len());
            let page = selected.get(offset..end).map(|s| s.to_vec()).unwrap_or_default();
            let page_key = (end < selected.len()).then(|| end.to_string());
            Ok(TransferPage {
                transfers: page,
                page_key,
            })
        }

        async fn token_balances(&self, address: &str) -> Result<TokenBalances> {
            Ok(self
                .balances
                .get(&address.to_lowercase())
                .cloned()
                .unwrap_or_default())
        }

        async fn token_metadata(&self, contract: &str) -> Result<Option<TokenMetadata>> {
            Ok(self.metadata.get(&contract.to_lowercase()).cloned())
        }
    }
}
