use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::task;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::{FeatureConfig, StoreConfig};
use crate::error::ProbeError;
use crate::models::ExtractionPayload;
use crate::pipeline::{
    analyze_report, normalize_seed_address, AnalysisReport, Extractor, Lists, TransferCount,
};
use crate::store::{self, RecordType};

#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<Extractor>,
    pub lists: Arc<Lists>,
    pub features: FeatureConfig,
    pub store_cfg: StoreConfig,
    pub conn: Arc<Mutex<Connection>>,
}

fn default_true() -> bool {
    true
}

fn default_count_days() -> u32 {
    30
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub payload: Option<ExtractionPayload>,
    #[serde(default = "default_true")]
    pub include_infra: bool,
    #[serde(default)]
    pub enrich: bool,
    #[serde(default)]
    pub dust_threshold: Option<f64>,
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExtractionRequest {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub payload: Option<ExtractionPayload>,
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

#[derive(Debug, Deserialize)]
pub struct CountRequest {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_count_days", alias = "count_days")]
    pub days: u32,
    #[serde(default, alias = "count_include_all_time")]
    pub all_time: bool,
}

#[derive(Debug, Serialize)]
pub struct ExtractionResponse {
    pub address: String,
    pub source: String,
    pub payload: ExtractionPayload,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl From<ProbeError> for ApiError {
    fn from(e: ProbeError) -> Self {
        match e {
            ProbeError::InvalidAddress(_) => Self::bad_request(e.to_string()),
            other => Self {
                status: StatusCode::BAD_GATEWAY,
                detail: format!("Extraction failed: {}", other),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .route("/analyze", post(analyze))
        .route("/extraction", post(extraction))
        .route("/extract-count", get(extract_count_query).post(extract_count))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(port: u16, state: AppState) -> eyre::Result<()> {
    let app = router(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Inline payload (checked against the request address) or a fresh record /
/// live extraction for the address. Returns the payload and where it came from.
async fn resolve_payload(
    state: &AppState,
    address: Option<&str>,
    payload: Option<ExtractionPayload>,
    use_cache: bool,
) -> Result<(ExtractionPayload, &'static str), ApiError> {
    if let Some(mut payload) = payload {
        let req_addr = address.map(|a| a.trim().to_lowercase()).filter(|a| !a.is_empty());
        let payload_addr = payload.address.trim().to_lowercase();
        if let Some(req_addr) = req_addr {
            if !payload_addr.is_empty() && req_addr != payload_addr {
                return Err(ApiError::bad_request("Address mismatch between request and payload."));
            }
            if payload_addr.is_empty() {
                payload.address = req_addr;
            }
        }
        return Ok((payload, "payload"));
    }

    let Some(address) = address.filter(|a| !a.trim().is_empty()) else {
        return Err(ApiError::bad_request("Provide address or payload."));
    };
    let address = normalize_seed_address(address)?;

    if use_cache {
        if let Some(payload) = load_record::<ExtractionPayload>(state, &address, RecordType::Extraction).await {
            info!("Cache hit (extraction) for {}", address);
            return Ok((payload, "cache"));
        }
    }
    let payload = state.extractor.extract(&address).await?;
    Ok((payload, "extract"))
}

async fn analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalysisReport>, ApiError> {
    info!(
        "analyze address={:?} inline_payload={} include_infra={}",
        req.address,
        req.payload.is_some(),
        req.include_infra
    );

    if req.payload.is_none() && req.use_cache {
        if let Some(address) = req.address.as_deref().and_then(|a| normalize_seed_address(a).ok()) {
            if let Some(report) = load_record::<AnalysisReport>(&state, &address, RecordType::Analysis).await {
                info!("Cache hit (analysis) for {}", address);
                return Ok(Json(report));
            }
        }
    }

    let (payload, source) = resolve_payload(&state, req.address.as_deref(), req.payload, req.use_cache).await?;
    if source != "cache" {
        save_record(&state, payload.address.clone(), RecordType::Extraction, source, payload.clone()).await;
    }

    let mut features = state.features.clone();
    if let Some(dust) = req.dust_threshold {
        features.dust_threshold = dust;
    }
    let mut report = analyze_report(&payload, &state.lists, &features, req.include_infra);

    if req.enrich {
        if let Some(client) = state.extractor.enrichment() {
            match client.tx_bounds(&report.result.address).await {
                Ok(bounds) => report.enrichment = Some(bounds),
                Err(e) => warn!("Enrichment failed for {}: {}", report.result.address, e),
            }
        }
    }

    save_record(&state, report.result.address.clone(), RecordType::Analysis, source, report.clone()).await;
    info!(
        "analyze complete address={} score={} label={:?}",
        report.result.address, report.result.score, report.result.label
    );
    Ok(Json(report))
}

async fn extraction(
    State(state): State<AppState>,
    Json(req): Json<ExtractionRequest>,
) -> Result<Json<ExtractionResponse>, ApiError> {
    info!("extraction address={:?} inline_payload={}", req.address, req.payload.is_some());
    let (payload, source) = resolve_payload(&state, req.address.as_deref(), req.payload, req.use_cache).await?;
    if source != "cache" {
        save_record(&state, payload.address.clone(), RecordType::Extraction, source, payload.clone()).await;
    }
    Ok(Json(ExtractionResponse {
        address: payload.address.clone(),
        source: source.to_string(),
        payload,
    }))
}

async fn extract_count_query(
    State(state): State<AppState>,
    Query(req): Query<CountRequest>,
) -> Result<Json<TransferCount>, ApiError> {
    count(&state, req).await
}

async fn extract_count(
    State(state): State<AppState>,
    Json(req): Json<CountRequest>,
) -> Result<Json<TransferCount>, ApiError> {
    count(&state, req).await
}

async fn count(state: &AppState, req: CountRequest) -> Result<Json<TransferCount>, ApiError> {
    let Some(address) = req.address.as_deref().filter(|a| !a.trim().is_empty()) else {
        return Err(ApiError::bad_request("Provide address."));
    };
    info!("extract-count start address={} days={}", address, req.days);
    let result = state.extractor.count(address, req.days, req.all_time).await?;
    info!(
        "extract-count complete address={} window_count={} all_time={:?}",
        result.address, result.window_count, result.all_time_count
    );
    Ok(Json(result))
}

// ---------- Store wrappers (spawn_blocking) ----------

async fn load_record<T: DeserializeOwned + Send + 'static>(
    state: &AppState,
    address: &str,
    record_type: RecordType,
) -> Option<T> {
    let conn = Arc::clone(&state.conn);
    let address = address.to_string();
    let refresh = state.store_cfg.refresh;
    let res = task::spawn_blocking(move || -> eyre::Result<Option<T>> {
        let db = conn.lock().map_err(|_| eyre::eyre!("store lock poisoned"))?;
        let rec = store::get_fresh_record::<T>(&db, &address, record_type, Utc::now().timestamp(), refresh)?;
        Ok(rec.map(|r| r.body))
    })
    .await;

    match res {
        Ok(Ok(body)) => body,
        Ok(Err(e)) => {
            error!("Store read failed: {:?}", e);
            None
        }
        Err(e) => {
            error!("Store read task panicked: {:?}", e);
            None
        }
    }
}

/// Store failures are logged and never fail the request.
async fn save_record<T: Serialize + Send + 'static>(
    state: &AppState,
    address: String,
    record_type: RecordType,
    source: &'static str,
    body: T,
) {
    if address.is_empty() {
        return;
    }
    let conn = Arc::clone(&state.conn);
    let ttl = state.store_cfg.ttl;
    let res = task::spawn_blocking(move || -> eyre::Result<()> {
        let db = conn.lock().map_err(|_| eyre::eyre!("store lock poisoned"))?;
        store::put_record(&db, &address, record_type, Some(source), &body, Utc::now().timestamp(), ttl)
    })
    .await;

    match res {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Store write failed: {:?}", e),
        Err(e) => error!("Store write task panicked: {:?}", e),
    }
}
