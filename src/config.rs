use dotenvy::dotenv;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf, str::FromStr, time::Duration};
use tracing::info;

const ALCHEMY_MAINNET: &str = "https://eth-mainnet.g.alchemy.com/v2/";

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
}

/// Window and paging limits for one extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    pub days: u32,
    /// Page size requested from the indexer.
    pub max_count: u64,
    /// Stop collecting once this many unique transfers are held.
    pub max_total_transfers: usize,
    pub include_all_time_count: bool,
    pub all_time_max_pages: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            days: 30,
            max_count: 1000,
            max_total_transfers: 1000,
            include_all_time_count: false,
            all_time_max_pages: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Crawl depth; 0 disables the crawl.
    pub levels: u32,
    pub base_days: u32,
    pub base_tx: usize,
    pub decay: f64,
    pub max_nodes: usize,
    pub max_neighbors_per_node: usize,
    /// Nodes fetched concurrently; expansion itself stays serialized.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    4
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            levels: 0,
            base_days: 30,
            base_tx: 100,
            decay: 0.5,
            max_nodes: 300,
            max_neighbors_per_node: 100,
            concurrency: default_concurrency(),
        }
    }
}

impl FanoutConfig {
    /// Lookback days and transfer cap for a crawl level, halves rounding to
    /// even. Depends on level only.
    pub fn limits(&self, level: u32) -> (u32, usize) {
        let factor = self.decay.powi(level.saturating_sub(1) as i32);
        let days = (self.base_days as f64 * factor).round_ties_even().max(1.0) as u32;
        let tx_cap = (self.base_tx as f64 * factor).round_ties_even().max(1.0) as usize;
        (days, tx_cap)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccelerationConfig {
    pub recent_days: u32,
    pub baseline_days: u32,
    /// Recent-window transfers needed before a ratio is reported at all.
    pub min_recent_total: usize,
    pub ratio: f64,
}

impl Default for AccelerationConfig {
    fn default() -> Self {
        Self {
            recent_days: 7,
            baseline_days: 14,
            min_recent_total: 25,
            ratio: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureConfig {
    pub dust_threshold: f64,
    pub fresh_wallet_days: i64,
    pub burst_tx_count: usize,
    pub min_sample_tx: usize,
    pub acceleration: AccelerationConfig,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            dust_threshold: 0.001,
            fresh_wallet_days: 7,
            burst_tx_count: 20,
            min_sample_tx: 5,
            acceleration: AccelerationConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: String,
    pub refresh: Duration,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc: RpcConfig,
    pub enrichment: EnrichmentConfig,
    pub extract: ExtractOptions,
    pub fanout: FanoutConfig,
    pub features: FeatureConfig,
    pub store: StoreConfig,
    pub port: u16,
    pub token_cache_path: PathBuf,
    pub stablecoins_path: PathBuf,
    pub flagged_path: PathBuf,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn days(n: u64) -> Duration {
    Duration::from_secs(n * 24 * 60 * 60)
}

fn features_from_env() -> FeatureConfig {
    let defaults = FeatureConfig::default();
    FeatureConfig {
        dust_threshold: env_or("DUST_THRESHOLD", defaults.dust_threshold),
        acceleration: AccelerationConfig {
            recent_days: env_or("ACCEL_RECENT_DAYS", defaults.acceleration.recent_days).max(1),
            baseline_days: env_or("ACCEL_BASELINE_DAYS", defaults.acceleration.baseline_days)
                .max(1),
            min_recent_total: env_or(
                "ACCEL_MIN_RECENT_TOTAL",
                defaults.acceleration.min_recent_total,
            ),
            ratio: env_or("ACCEL_RATIO", defaults.acceleration.ratio),
        },
        ..defaults
    }
}

fn path_or(key: &str, default: &str) -> PathBuf {
    env::var(key).unwrap_or_else(|_| default.to_string()).into()
}

fn stablecoins_path() -> PathBuf {
    path_or("STABLECOINS_PATH", "data/stablecoins.json")
}

fn flagged_path() -> PathBuf {
    path_or("FLAGGED_ADDRESSES_PATH", "data/flagged_addresses.txt")
}

/// Settings for analyzing saved payloads; needs no RPC endpoint.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub features: FeatureConfig,
    pub stablecoins_path: PathBuf,
    pub flagged_path: PathBuf,
}

pub fn load_analysis() -> AnalysisConfig {
    dotenv().ok();
    AnalysisConfig {
        features: features_from_env(),
        stablecoins_path: stablecoins_path(),
        flagged_path: flagged_path(),
    }
}

pub fn load() -> Result<Config> {
    dotenv().ok();

    // Explicit URL wins; otherwise build the Alchemy endpoint from the key.
    let rpc_url = match env::var("RPC_HTTP_URL") {
        Ok(url) if !url.trim().is_empty() => url,
        _ => match env::var("ALCHEMY_API_KEY") {
            Ok(key) if !key.trim().is_empty() => format!("{}{}", ALCHEMY_MAINNET, key.trim()),
            _ => eyre::bail!("RPC_HTTP_URL or ALCHEMY_API_KEY must be set"),
        },
    };

    let defaults = ExtractOptions::default();
    let extract = ExtractOptions {
        days: env_or("EXTRACT_DAYS", defaults.days),
        max_count: env_or("EXTRACT_MAX_COUNT", defaults.max_count),
        max_total_transfers: env_or("EXTRACT_MAX_TOTAL_TRANSFERS", defaults.max_total_transfers),
        include_all_time_count: env_bool("EXTRACT_ALL_TIME_COUNT", defaults.include_all_time_count),
        all_time_max_pages: env_or("EXTRACT_ALL_TIME_MAX_PAGES", defaults.all_time_max_pages),
    };

    let defaults = FanoutConfig::default();
    let fanout = FanoutConfig {
        levels: env_or("FANOUT_LEVELS", defaults.levels),
        base_days: env_or("FANOUT_BASE_DAYS", defaults.base_days),
        base_tx: env_or("FANOUT_BASE_TX", defaults.base_tx),
        decay: env_or("FANOUT_DECAY", defaults.decay),
        max_nodes: env_or("FANOUT_MAX_NODES", defaults.max_nodes),
        max_neighbors_per_node: env_or(
            "FANOUT_MAX_NEIGHBORS_PER_NODE",
            defaults.max_neighbors_per_node,
        ),
        concurrency: env_or("FANOUT_CONCURRENCY", defaults.concurrency).max(1),
    };

    let features = features_from_env();

    let cfg = Config {
        rpc: RpcConfig {
            url: rpc_url,
            timeout: Duration::from_secs(env_or("RPC_TIMEOUT_SECS", 20)),
        },
        enrichment: EnrichmentConfig {
            base_url: env::var("ETHERSCAN_API_URL")
                .unwrap_or_else(|_| "https://api.etherscan.io/api".to_string()),
            api_key: env::var("ETHERSCAN_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            timeout: Duration::from_secs(env_or("ENRICH_TIMEOUT_SECS", 10)),
            retries: env_or("ENRICH_RETRIES", 3u32).max(1),
            backoff: Duration::from_millis(env_or("ENRICH_BACKOFF_MS", 1000)),
        },
        extract,
        fanout,
        features,
        store: StoreConfig {
            db_path: env::var("DATABASE_URL").unwrap_or_else(|_| "trustscope.db".to_string()),
            refresh: days(env_or("STORE_REFRESH_DAYS", 14)),
            ttl: days(env_or("STORE_TTL_DAYS", 30)),
        },
        port: env_or("PORT", 8080),
        token_cache_path: path_or("TOKEN_CACHE_PATH", "data/token_metadata_cache.json"),
        stablecoins_path: stablecoins_path(),
        flagged_path: flagged_path(),
    };

    info!(
        "Loaded config: window={}d max_total={} fanout_levels={} db={}",
        cfg.extract.days, cfg.extract.max_total_transfers, cfg.fanout.levels, cfg.store.db_path
    );

    Ok(cfg)
}
