use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use trustscope::api::{self, AppState};
use trustscope::config;
use trustscope::enrichment::EnrichmentClient;
use trustscope::lists;
use trustscope::pipeline::{Extractor, Lists};
use trustscope::rpc::HttpRpc;
use trustscope::store;
use trustscope::token_cache::TokenCache;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    info!("Trustscope starting...");

    let cfg = config::load()?;
    info!("Loaded config:");
    info!("  DB Path: {}", cfg.store.db_path);
    info!("  Port: {}", cfg.port);
    info!("  Window: {}d, fan-out levels: {}", cfg.extract.days, cfg.fanout.levels);
    info!("  Explorer enrichment: {}", cfg.enrichment.api_key.is_some());

    // Run DB migrations once at startup
    {
        let conn = store::connect(&cfg.store.db_path)?;
        store::run_migrations(&conn)?;
        store::purge_expired(&conn, Utc::now().timestamp())?;
    }
    let shared_conn = Arc::new(Mutex::new(store::connect(&cfg.store.db_path)?));

    let rpc = Arc::new(HttpRpc::new(&cfg.rpc)?);
    let tokens = Arc::new(TokenCache::load(cfg.token_cache_path.clone()));
    let enrichment = EnrichmentClient::new(&cfg.enrichment)?;
    let lists = Lists {
        stablecoins: lists::load_stablecoins(&cfg.stablecoins_path),
        flagged: lists::load_flagged(&cfg.flagged_path),
    };
    info!(
        "  Lists: {} stablecoins, {} flagged addresses",
        lists.stablecoins.len(),
        lists.flagged.len()
    );

    let state = AppState {
        extractor: Arc::new(Extractor::new(
            rpc,
            tokens,
            enrichment,
            cfg.extract.clone(),
            cfg.fanout.clone(),
        )),
        lists: Arc::new(lists),
        features: cfg.features.clone(),
        store_cfg: cfg.store.clone(),
        conn: shared_conn,
    };

    let api_handle = tokio::spawn({
        let port = cfg.port;
        async move { api::serve(port, state).await }
    });

    // Graceful shutdown
    tokio::select! {
        res = api_handle => match res {
            Ok(Ok(_)) => info!("API exited cleanly"),
            Ok(Err(e)) => error!("API error: {:?}", e),
            Err(e) => error!("API task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    info!("Trustscope stopped.");
    Ok(())
}
