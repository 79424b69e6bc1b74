// src/models.rs
use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::FanoutConfig;
use crate::parser::{self, TransferRecord};

/// Transfer categories requested from the indexer on every query.
pub const ALL_CATEGORIES: [TransferCategory; 5] = [
    TransferCategory::External,
    TransferCategory::Internal,
    TransferCategory::Erc20,
    TransferCategory::Erc721,
    TransferCategory::Erc1155,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferCategory {
    External,
    Internal,
    Erc20,
    Erc721,
    Erc1155,
    #[default]
    #[serde(other)]
    Unknown,
}

impl TransferCategory {
    /// Token- or contract-driven movement (anything but a plain value transfer).
    pub fn is_contract_driven(&self) -> bool {
        matches!(
            self,
            TransferCategory::Internal
                | TransferCategory::Erc20
                | TransferCategory::Erc721
                | TransferCategory::Erc1155
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawContract {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Raw integer value, usually hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(
        default,
        alias = "decimals",
        deserialize_with = "parser::de_opt_quantity_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub decimal: Option<u32>,
}

/// One observed value movement. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TransferRecord", rename_all = "camelCase")]
pub struct Transfer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    pub hash: Option<String>,
    /// Lowercased; empty when the indexer reported no sender (mints).
    pub from: String,
    /// Lowercased; empty when the indexer reported no recipient (burns).
    pub to: String,
    pub value: Option<f64>,
    pub asset: Option<String>,
    pub category: TransferCategory,
    pub block_num: Option<u64>,
    pub transaction_index: Option<u64>,
    pub log_index: Option<u64>,
    /// Unix seconds, resolved from the block metadata.
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_contract: Option<RawContract>,
}

/// Deduplication key across paginated, bidirectional queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferKey {
    pub id: String,
    pub log_index: Option<u64>,
    pub from: String,
    pub to: String,
}

impl Transfer {
    pub fn key(&self) -> TransferKey {
        TransferKey {
            id: self
                .unique_id
                .clone()
                .or_else(|| self.hash.clone())
                .unwrap_or_default(),
            log_index: self.log_index,
            from: self.from.clone(),
            to: self.to.clone(),
        }
    }

    /// `(block, txIndex, logIndex)`; missing parts count as zero.
    pub fn order_key(&self) -> (u64, u64, u64) {
        (
            self.block_num.unwrap_or(0),
            self.transaction_index.unwrap_or(0),
            self.log_index.unwrap_or(0),
        )
    }

    pub fn contract_address(&self) -> Option<&str> {
        self.raw_contract
            .as_ref()
            .and_then(|c| c.address.as_deref())
            .filter(|a| !a.is_empty())
    }

    /// The other side of this transfer relative to `address`, if it touches it.
    pub fn counterparty(&self, address: &str) -> Option<&str> {
        if self.from.is_empty() || self.to.is_empty() {
            return None;
        }
        if self.from == address {
            Some(&self.to)
        } else if self.to == address {
            Some(&self.from)
        } else {
            None
        }
    }
}

/// Sort descending by `(block, txIndex, logIndex)`. Stable.
pub fn sort_transfers_desc(transfers: &mut [Transfer]) {
    transfers.sort_by(|a, b| b.order_key().cmp(&a.order_key()));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub number: u64,
    pub timestamp: i64,
}

/// Per-address summary over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Aggregate {
    pub address: String,
    pub first_seen: Option<i64>,
    pub first_seen_iso: Option<String>,
    pub last_seen: Option<i64>,
    pub last_seen_iso: Option<String>,
    pub active_days: usize,
    pub tx_count: usize,
    pub unique_counterparties: usize,
    pub total_in: Decimal,
    pub total_out: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressNode {
    pub address: String,
    pub level: u32,
    pub window_days: Option<u32>,
    pub aggregates: Option<Aggregate>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A transfer reinterpreted as a directed edge, kept for provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub hash: Option<String>,
    pub block_num: Option<u64>,
    pub transaction_index: Option<u64>,
    pub log_index: Option<u64>,
    pub timestamp: Option<i64>,
    pub timestamp_iso: Option<String>,
    pub category: TransferCategory,
    pub asset: Option<String>,
}

impl From<&Transfer> for Edge {
    fn from(t: &Transfer) -> Self {
        Edge {
            from: t.from.clone(),
            to: t.to.clone(),
            hash: t.hash.clone(),
            block_num: t.block_num,
            transaction_index: t.transaction_index,
            log_index: t.log_index,
            timestamp: t.timestamp,
            timestamp_iso: t.timestamp.and_then(parser::format_iso),
            category: t.category,
            asset: t.asset.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutGraph {
    pub config: FanoutConfig,
    pub nodes: Vec<AddressNode>,
    pub edges: Vec<Edge>,
    /// Partial graph: the node cap stopped the crawl.
    pub capped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub token_balance: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalances {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub token_balances: Vec<TokenBalance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TokenMetadata {
    #[serde(
        default,
        alias = "divisor",
        alias = "tokenDecimal",
        deserialize_with = "parser::de_opt_quantity_u32"
    )]
    pub decimals: Option<u32>,
    #[serde(default, alias = "tokenName")]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

/// Cached token metadata for one contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadataEntry {
    pub contract_address: String,
    #[serde(default)]
    pub metadata: TokenMetadata,
    #[serde(default)]
    pub fetched_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub from_block: String,
    pub from_timestamp: i64,
    pub from_iso: Option<String>,
    pub to_block: String,
    pub to_timestamp: i64,
    pub to_iso: Option<String>,
}

impl Window {
    pub fn new(start: BlockInfo, end: BlockInfo) -> Self {
        Window {
            from_block: format!("0x{:x}", start.number),
            from_timestamp: start.timestamp,
            from_iso: parser::format_iso(start.timestamp),
            to_block: format!("0x{:x}", end.number),
            to_timestamp: end.timestamp,
            to_iso: parser::format_iso(end.timestamp),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Counts {
    #[serde(default)]
    pub transfers: usize,
    #[serde(default)]
    pub token_balances: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirstTransfer {
    pub block_num: Option<String>,
    pub timestamp: Option<i64>,
    pub iso: Option<String>,
    pub hash: Option<String>,
    pub category: Option<TransferCategory>,
}

impl From<&Transfer> for FirstTransfer {
    fn from(t: &Transfer) -> Self {
        FirstTransfer {
            block_num: t.block_num.map(|n| format!("0x{:x}", n)),
            timestamp: t.timestamp,
            iso: t.timestamp.and_then(parser::format_iso),
            hash: t.hash.clone(),
            category: Some(t.category),
        }
    }
}

/// Everything the feature extractor and infra detectors consume for one address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExtractionPayload {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub window_days: u32,
    #[serde(default)]
    pub window: Option<Window>,
    #[serde(default)]
    pub counts: Counts,
    #[serde(default)]
    pub transfers_truncated: bool,
    #[serde(default)]
    pub first_transfer: Option<FirstTransfer>,
    #[serde(default)]
    pub all_time_transfers: Option<u64>,
    #[serde(default)]
    pub all_time_transfers_truncated: Option<bool>,
    #[serde(default)]
    pub token_metadata: BTreeMap<String, TokenMetadataEntry>,
    #[serde(default)]
    pub transfers: Vec<Transfer>,
    #[serde(default)]
    pub token_balances: TokenBalances,
    #[serde(default)]
    pub fetched_at: Option<i64>,
    #[serde(default)]
    pub fetched_at_iso: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fanout: Option<FanoutGraph>,
}
