// src/token_cache.rs
//! Read-through, write-on-miss token metadata cache backed by a JSON file.
//!
//! Entries are immutable once fetched, so concurrent writers racing on the
//! same contract are harmless (last writer wins).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::enrichment::EnrichmentClient;
use crate::error::Result;
use crate::models::{TokenMetadata, TokenMetadataEntry};
use crate::rpc::ChainRpc;

const LOOKUP_CONCURRENCY: usize = 4;

pub struct TokenCache {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, TokenMetadataEntry>>,
    dirty: AtomicBool,
    write_guard: Mutex<()>,
}

impl TokenCache {
    /// Missing or malformed files load as an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<BTreeMap<String, TokenMetadataEntry>>(&text) {
                Ok(map) => map
                    .into_iter()
                    .map(|(k, v)| (k.to_lowercase(), v))
                    .collect(),
                Err(e) => {
                    warn!("Token cache {} is corrupt ({}); starting empty", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(_) => {
                debug!("No token cache at {}", path.display());
                BTreeMap::new()
            }
        };
        info!("Token cache: {} entries from {}", entries.len(), path.display());
        Self {
            path,
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
            write_guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, contract: &str) -> Option<TokenMetadataEntry> {
        self.entries
            .read()
            .ok()
            .and_then(|e| e.get(&contract.to_lowercase()).cloned())
    }

    pub fn insert(&self, contract: &str, metadata: TokenMetadata, fetched_at: i64) -> TokenMetadataEntry {
        let key = contract.to_lowercase();
        let entry = TokenMetadataEntry {
            contract_address: key.clone(),
            metadata,
            fetched_at,
        };
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key, entry.clone());
            self.dirty.store(true, Ordering::SeqCst);
        }
        entry
    }

    /// Write the file if anything was added since load. Returns whether it wrote.
    pub fn persist(&self) -> Result<bool> {
        let _guard = self.write_guard.lock().unwrap_or_else(|p| p.into_inner());
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        let text = {
            let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
            serde_json::to_string_pretty(&*entries)?
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if let Err(e) = fs::write(&self.path, text) {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e.into());
        }
        debug!("Persisted token cache to {}", self.path.display());
        Ok(true)
    }

    async fn fetch<R: ChainRpc + ?Sized>(
        rpc: &R,
        enrichment: Option<&EnrichmentClient>,
        contract: &str,
    ) -> Option<TokenMetadata> {
        match rpc.token_metadata(contract).await {
            Ok(Some(meta)) if meta != TokenMetadata::default() => return Some(meta),
            Ok(_) => {}
            Err(e) => warn!("Token metadata RPC failed for {}: {}", contract, e),
        }
        let client = enrichment?;
        match client.token_info(contract).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Explorer token info failed for {}: {}", contract, e);
                None
            }
        }
    }

    /// Metadata for every contract, fetching misses. Contracts nobody knows
    /// about are left out; lookup failures never fail the caller.
    pub async fn resolve_all<R: ChainRpc + ?Sized>(
        &self,
        rpc: &R,
        enrichment: Option<&EnrichmentClient>,
        contracts: &[String],
        now_ts: i64,
    ) -> BTreeMap<String, TokenMetadataEntry> {
        let mut found = BTreeMap::new();
        let mut misses = Vec::new();
        for contract in contracts {
            match self.get(contract) {
                Some(entry) => {
                    found.insert(contract.to_lowercase(), entry);
                }
                None => misses.push(contract.to_lowercase()),
            }
        }
        let hits = found.len();

        let fetched: Vec<(String, Option<TokenMetadata>)> = stream::iter(misses)
            .map(|contract| async move {
                let meta = Self::fetch(rpc, enrichment, &contract).await;
                (contract, meta)
            })
            .buffer_unordered(LOOKUP_CONCURRENCY)
            .collect()
            .await;

        let miss_count = fetched.len();
        for (contract, meta) in fetched {
            if let Some(meta) = meta {
                let entry = self.insert(&contract, meta, now_ts);
                found.insert(contract, entry);
            }
        }

        info!("Token metadata cache hits={} misses={}", hits, miss_count);
        found
    }
}
