// src/lists.rs
//! Externally curated address lists, loaded once per process.
//!
//! Both loaders fail open: a missing or unreadable file yields an empty list
//! and a warning, never an error.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Stablecoin {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub chain: Option<String>,
}

/// Keyed by lowercased contract address.
pub type Stablecoins = HashMap<String, Stablecoin>;

pub type FlaggedSet = HashSet<Address>;

#[derive(Debug, Deserialize)]
struct StablecoinFile {
    #[serde(default)]
    stablecoins: Vec<Value>,
}

fn read_optional(path: &Path, what: &str) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("No {} list at {} ({}); using empty list", what, path.display(), e);
            None
        }
    }
}

/// `{"stablecoins": [{"address": ..., "name": ..., "symbol": ...}]}`
pub fn load_stablecoins(path: &Path) -> Stablecoins {
    let Some(text) = read_optional(path, "stablecoin") else {
        return Stablecoins::new();
    };
    let parsed: StablecoinFile = match serde_json::from_str(&text) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Malformed stablecoin list {}: {}", path.display(), e);
            return Stablecoins::new();
        }
    };

    let mut skipped = 0usize;
    let map: Stablecoins = parsed
        .stablecoins
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<Stablecoin>(entry) {
            Ok(coin) if !coin.address.trim().is_empty() => Some(coin),
            _ => {
                skipped += 1;
                None
            }
        })
        .map(|s| (s.address.trim().to_lowercase(), s))
        .collect();
    info!(
        "Loaded {} stablecoins from {} ({} skipped)",
        map.len(),
        path.display(),
        skipped
    );
    map
}

fn parse_flagged(text: &str) -> Vec<String> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        let entries = match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Array(items)) => items,
            Ok(Value::Object(mut obj)) => match obj.remove("addresses") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        return entries
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Object(mut o) => o.remove("address").and_then(|a| a.as_str().map(str::to_string)),
                _ => None,
            })
            .collect();
    }

    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Newline text (with `#` comments), a JSON array, or `{"addresses": [...]}`.
/// Entries that are not valid addresses are skipped.
pub fn load_flagged(path: &Path) -> FlaggedSet {
    let Some(text) = read_optional(path, "flagged-address") else {
        return FlaggedSet::new();
    };

    let mut skipped = 0usize;
    let set: FlaggedSet = parse_flagged(&text)
        .into_iter()
        .filter_map(|entry| match entry.parse::<Address>() {
            Ok(addr) => Some(addr),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .collect();

    info!(
        "Loaded {} flagged addresses from {} ({} skipped)",
        set.len(),
        path.display(),
        skipped
    );
    set
}

/// Whether `address` (any case) is in the flagged set.
pub fn is_flagged(set: &FlaggedSet, address: &str) -> bool {
    address
        .trim()
        .parse::<Address>()
        .map(|a| set.contains(&a))
        .unwrap_or(false)
}
