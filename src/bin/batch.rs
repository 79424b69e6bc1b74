//! Batch extraction and offline analysis.
//!
//! Usage:
//!   batch extract <addresses.txt> <out_dir>
//!       Extract and analyze each address, writing `<address>.json` as each
//!       result arrives.
//!   batch analyze <out_dir> <payload.json>...
//!       Re-analyze saved extraction payloads (or batch entries) without
//!       touching the network, writing `<address>.analysis.json`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use trustscope::config::{self, AnalysisConfig, Config};
use trustscope::enrichment::EnrichmentClient;
use trustscope::lists;
use trustscope::pipeline::{
    analyze_report, normalize_seed_address, parse_address_list, payload_from_json, run_batch, BatchOutcome,
    Extractor, Lists,
};
use trustscope::rpc::HttpRpc;
use trustscope::token_cache::TokenCache;

const USAGE: &str = "usage: batch extract <addresses.txt> <out_dir> | batch analyze <out_dir> <payload.json>...";

fn load_lists(stablecoins: &Path, flagged: &Path) -> Lists {
    Lists {
        stablecoins: lists::load_stablecoins(stablecoins),
        flagged: lists::load_flagged(flagged),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?).with_context(|| format!("writing {}", path.display()))
}

async fn extract(cfg: &Config, address_file: &Path, out_dir: &Path) -> Result<()> {
    let text = fs::read_to_string(address_file).with_context(|| format!("reading {}", address_file.display()))?;
    let (addresses, rejected) = parse_address_list(&text);
    for line in &rejected {
        warn!("Skipping invalid address {:?}", line);
    }

    let extractor = Extractor::new(
        Arc::new(HttpRpc::new(&cfg.rpc)?),
        Arc::new(TokenCache::load(cfg.token_cache_path.clone())),
        EnrichmentClient::new(&cfg.enrichment)?,
        cfg.extract.clone(),
        cfg.fanout.clone(),
    );
    let lists = load_lists(&cfg.stablecoins_path, &cfg.flagged_path);

    info!("Batch: {} addresses -> {}", addresses.len(), out_dir.display());
    let mut failed = 0usize;
    let entries = run_batch(&extractor, &addresses, &lists, &cfg.features, true, |entry| {
        if let BatchOutcome::Failed { error } = &entry.outcome {
            error!("{}: {}", entry.address, error);
            failed += 1;
        }
        let path = out_dir.join(format!("{}.json", entry.address));
        if let Err(e) = write_json(&path, entry) {
            error!("{:#}", e);
        }
    })
    .await;

    info!(
        "Batch done: {} ok, {} failed, {} skipped",
        entries.len() - failed,
        failed,
        rejected.len()
    );
    Ok(())
}

fn analyze_offline(cfg: &AnalysisConfig, out_dir: &Path, inputs: &[String]) -> Result<()> {
    let lists = load_lists(&cfg.stablecoins_path, &cfg.flagged_path);
    let mut failed = 0usize;
    for input in inputs {
        let path = Path::new(input);
        let result = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))
            .and_then(|text| Ok(serde_json::from_str(&text)?))
            .and_then(|value| Ok(payload_from_json(value)?))
            .and_then(|payload| {
                let address = normalize_seed_address(&payload.address)?;
                let report = analyze_report(&payload, &lists, &cfg.features, true);
                write_json(&out_dir.join(format!("{}.analysis.json", address)), &report)?;
                Ok(report)
            });
        match result {
            Ok(report) => info!(
                "{}: score={} label={:?}",
                report.result.address, report.result.score, report.result.label
            ),
            Err(e) => {
                error!("{}: {:#}", path.display(), e);
                failed += 1;
            }
        }
    }
    info!("Offline analysis done: {} ok, {} failed", inputs.len() - failed, failed);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("extract") if args.len() == 3 => {
            let out_dir = PathBuf::from(&args[2]);
            fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
            let cfg = config::load().map_err(|e| anyhow::anyhow!("{e}"))?;
            extract(&cfg, Path::new(&args[1]), &out_dir).await
        }
        Some("analyze") if args.len() >= 3 => {
            let out_dir = PathBuf::from(&args[1]);
            fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
            analyze_offline(&config::load_analysis(), &out_dir, &args[2..])
        }
        _ => bail!(USAGE),
    }
}
