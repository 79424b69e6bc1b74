use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    // Upstream answered but gave us nothing we can use. Never retried.
    #[error("No usable result from {method}: {detail}")]
    Resolution { method: String, detail: String },

    #[error("RPC error {code} from {method}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    // Timeouts, refused connections, 5xx / 429
    #[error("Transient network failure: {0}")]
    Transient(String),

    #[error("HTTP error {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    pub fn resolution(method: &str, detail: impl Into<String>) -> Self {
        ProbeError::Resolution {
            method: method.to_string(),
            detail: detail.into(),
        }
    }

    /// Whether the enrichment client may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProbeError::Transient(_))
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            return ProbeError::Transient(e.to_string());
        }
        if let Some(status) = e.status() {
            if status.is_server_error() || status.as_u16() == 429 {
                return ProbeError::Transient(format!("HTTP {}", status));
            }
            return ProbeError::Http {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        if e.is_decode() {
            return ProbeError::Resolution {
                method: "decode".to_string(),
                detail: e.to_string(),
            };
        }
        ProbeError::Transient(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;
