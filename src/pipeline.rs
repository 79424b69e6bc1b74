// src/pipeline.rs
//! Extraction (network) and analysis (pure) for one address, plus a batch
//! driver that isolates per-address failures.

use std::collections::BTreeSet;
use std::sync::Arc;

use alloy::primitives::Address;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::blocks::BlockResolver;
use crate::config::{ExtractOptions, FanoutConfig, FeatureConfig};
use crate::crawler::{Crawler, Seed};
use crate::enrichment::{EnrichmentClient, TxBounds};
use crate::error::{ProbeError, Result};
use crate::features::{extract_features, FeatureInput};
use crate::fetcher::{count_transfers, fetch_first_transfer, fetch_transfers};
use crate::infra::{summarize_infra, InfraSummary};
use crate::lists::{is_flagged, FlaggedSet, Stablecoins};
use crate::models::{Counts, ExtractionPayload, FirstTransfer, Window};
use crate::parser;
use crate::rpc::ChainRpc;
use crate::scoring::{analyze, AnalysisResult};
use crate::token_cache::TokenCache;

const DAY_SECS: i64 = 24 * 60 * 60;
const WINDOW_COUNT_MAX_PAGES: usize = 50;

/// Lowercased `0x`-prefixed form of a valid address.
pub fn normalize_seed_address(address: &str) -> Result<String> {
    address
        .trim()
        .parse::<Address>()
        .map(|a| format!("{:#x}", a))
        .map_err(|_| ProbeError::InvalidAddress(address.to_string()))
}

/// Curated lists consulted during analysis.
#[derive(Debug, Clone, Default)]
pub struct Lists {
    pub stablecoins: Stablecoins,
    pub flagged: FlaggedSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(flatten)]
    pub result: AnalysisResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infra: Option<InfraSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<TxBounds>,
}

pub fn analyze_report(
    payload: &ExtractionPayload,
    lists: &Lists,
    cfg: &FeatureConfig,
    include_infra: bool,
) -> AnalysisReport {
    let features = extract_features(&FeatureInput::from_payload(payload), &lists.stablecoins, cfg);
    let result = analyze(&payload.address, features);
    let infra = include_infra.then(|| {
        let flagged = is_flagged(&lists.flagged, &payload.address);
        summarize_infra(payload, flagged)
    });
    info!(
        "Analyzed {}: score={} label={:?} reasons={}",
        result.address,
        result.score,
        result.label,
        result.reasons.len()
    );
    AnalysisReport {
        result,
        infra,
        enrichment: None,
    }
}

/// Transfer counts without the transfers themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferCount {
    pub address: String,
    pub days: u32,
    pub window: Window,
    pub window_count: u64,
    pub window_truncated: bool,
    #[serde(default)]
    pub all_time_count: Option<u64>,
    #[serde(default)]
    pub all_time_truncated: Option<bool>,
}

pub struct Extractor {
    rpc: Arc<dyn ChainRpc>,
    tokens: Arc<TokenCache>,
    enrichment: Option<EnrichmentClient>,
    options: ExtractOptions,
    fanout: FanoutConfig,
}

impl Extractor {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        tokens: Arc<TokenCache>,
        enrichment: Option<EnrichmentClient>,
        options: ExtractOptions,
        fanout: FanoutConfig,
    ) -> Self {
        Self {
            rpc,
            tokens,
            enrichment,
            options,
            fanout,
        }
    }

    pub fn enrichment(&self) -> Option<&EnrichmentClient> {
        self.enrichment.as_ref()
    }

    pub async fn extract(&self, address: &str) -> Result<ExtractionPayload> {
        self.extract_at(address, Utc::now().timestamp()).await
    }

    pub async fn count(&self, address: &str, days: u32, include_all_time: bool) -> Result<TransferCount> {
        self.count_at(address, days, include_all_time, Utc::now().timestamp())
            .await
    }

    /// Window transfer count over the last `days`, plus the all-time count on request.
    pub async fn count_at(
        &self,
        address: &str,
        days: u32,
        include_all_time: bool,
        now_ts: i64,
    ) -> Result<TransferCount> {
        let address = normalize_seed_address(address)?;
        let rpc = &*self.rpc;
        let days = days.max(1);
        info!("Counting transfers for {} ({}d window)", address, days);

        let resolver = BlockResolver::new(rpc);
        let start = resolver
            .find_block_by_timestamp(now_ts - days as i64 * DAY_SECS)
            .await?;
        let end = resolver.latest().await?;

        let (window_count, window_truncated) = count_transfers(
            rpc,
            &address,
            start.number,
            end.number,
            self.options.max_count,
            WINDOW_COUNT_MAX_PAGES,
        )
        .await?;

        let (all_time_count, all_time_truncated) = if include_all_time {
            let (count, truncated) = count_transfers(
                rpc,
                &address,
                0,
                end.number,
                self.options.max_count,
                self.options.all_time_max_pages,
            )
            .await?;
            (Some(count), Some(truncated))
        } else {
            (None, None)
        };

        Ok(TransferCount {
            address,
            days,
            window: Window::new(start, end),
            window_count,
            window_truncated,
            all_time_count,
            all_time_truncated,
        })
    }

    /// Full extraction with `now_ts` as the window's right edge reference.
    pub async fn extract_at(&self, address: &str, now_ts: i64) -> Result<ExtractionPayload> {
        let address = normalize_seed_address(address)?;
        let rpc = &*self.rpc;
        let opts = &self.options;
        info!("Extracting {} ({}d window)", address, opts.days);

        let resolver = BlockResolver::new(rpc);
        let start = resolver
            .find_block_by_timestamp(now_ts - opts.days as i64 * DAY_SECS)
            .await?;
        let end = resolver.latest().await?;
        info!(
            "Window 0x{:x} → 0x{:x} ({}d)",
            start.number, end.number, opts.days
        );

        let fetched = fetch_transfers(
            rpc,
            &address,
            start.number,
            end.number,
            opts.max_count,
            opts.max_total_transfers,
        )
        .await?;
        let token_balances = rpc.token_balances(&address).await?;
        let first_transfer = fetch_first_transfer(rpc, &address).await?;

        let contracts: Vec<String> = fetched
            .transfers
            .iter()
            .filter_map(|t| t.contract_address())
            .chain(
                token_balances
                    .token_balances
                    .iter()
                    .filter_map(|b| b.contract_address.as_deref()),
            )
            .filter(|c| !c.is_empty())
            .map(str::to_lowercase)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let token_metadata = self
            .tokens
            .resolve_all(rpc, self.enrichment.as_ref(), &contracts, now_ts)
            .await;
        if let Err(e) = self.tokens.persist() {
            warn!("Failed to persist token cache: {}", e);
        }

        let (all_time_transfers, all_time_transfers_truncated) = if opts.include_all_time_count {
            let (count, truncated) = count_transfers(
                rpc,
                &address,
                0,
                end.number,
                opts.max_count,
                opts.all_time_max_pages,
            )
            .await?;
            (Some(count), Some(truncated))
        } else {
            (None, None)
        };

        let mut payload = ExtractionPayload {
            address: address.clone(),
            window_days: opts.days,
            window: Some(Window::new(start, end)),
            counts: Counts {
                transfers: fetched.transfers.len(),
                token_balances: token_balances.token_balances.len(),
            },
            transfers_truncated: fetched.truncated,
            first_transfer: first_transfer.as_ref().map(FirstTransfer::from),
            all_time_transfers,
            all_time_transfers_truncated,
            token_metadata,
            transfers: fetched.transfers,
            token_balances,
            fetched_at: Some(now_ts),
            fetched_at_iso: parser::format_iso(now_ts),
            fanout: None,
        };

        if self.fanout.levels > 0 {
            let crawler = Crawler::new(
                rpc,
                self.fanout.clone(),
                opts.max_count,
                opts.max_total_transfers,
            );
            let seed = Seed {
                address: &payload.address,
                transfers: &payload.transfers,
                window_days: opts.days,
                truncated: payload.transfers_truncated,
            };
            let graph = crawler.crawl(seed, now_ts).await?;
            payload.fanout = Some(graph);
        }

        info!(
            "Extracted {}: {} transfers (truncated={}), {} balances, {} token metadata",
            address,
            payload.counts.transfers,
            payload.transfers_truncated,
            payload.counts.token_balances,
            payload.token_metadata.len()
        );
        Ok(payload)
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchOutcome {
    Ok {
        payload: Box<ExtractionPayload>,
        report: Box<AnalysisReport>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Serialize)]
pub struct BatchEntry {
    pub address: String,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

/// Split a newline address list into normalized addresses and rejected
/// lines. Blank lines and `#` comments are ignored.
pub fn parse_address_list(text: &str) -> (Vec<String>, Vec<String>) {
    let mut valid = Vec::new();
    let mut rejected = Vec::new();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        match normalize_seed_address(line) {
            Ok(address) => valid.push(address),
            Err(_) => rejected.push(line.to_string()),
        }
    }
    (valid, rejected)
}

/// An extraction payload from a saved document: either the payload itself or
/// a batch entry wrapping it under `payload`.
pub fn payload_from_json(value: serde_json::Value) -> Result<ExtractionPayload> {
    let inner = match value {
        serde_json::Value::Object(mut obj) if obj.get("payload").is_some_and(|p| p.is_object()) => {
            obj.remove("payload").unwrap_or_default()
        }
        other => other,
    };
    Ok(serde_json::from_value(inner)?)
}

/// Extract and analyze every address in order, handing each entry to
/// `on_entry` as soon as it is ready. One address failing never stops the
/// batch; it is reported in its own entry.
pub async fn run_batch<F>(
    extractor: &Extractor,
    addresses: &[String],
    lists: &Lists,
    features: &FeatureConfig,
    include_infra: bool,
    mut on_entry: F,
) -> Vec<BatchEntry>
where
    F: FnMut(&BatchEntry),
{
    let mut entries = Vec::with_capacity(addresses.len());
    for (i, address) in addresses.iter().enumerate() {
        info!("[{}/{}] {}", i + 1, addresses.len(), address);
        let outcome = match extractor.extract(address).await {
            Ok(payload) => {
                let report = analyze_report(&payload, lists, features, include_infra);
                BatchOutcome::Ok {
                    payload: Box::new(payload),
                    report: Box::new(report),
                }
            }
            Err(e) => {
                error!("Extraction failed for {}: {}", address, e);
                BatchOutcome::Failed { error: e.to_string() }
            }
        };
        let entry = BatchEntry {
            address: address.clone(),
            outcome,
        };
        on_entry(&entry);
        entries.push(entry);
    }
    entries
}
