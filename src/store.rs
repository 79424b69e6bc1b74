// src/store.rs
//! SQLite-backed record store for extraction payloads and analysis results.
//! Records go stale after the refresh window and are purged after the TTL.

use eyre::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS records (
  address     TEXT NOT NULL,
  record_type TEXT NOT NULL CHECK (record_type IN ('extraction','analysis')),
  source      TEXT,
  body        TEXT NOT NULL, -- JSON
  updated_at  INTEGER NOT NULL,
  expires_at  INTEGER NOT NULL,
  PRIMARY KEY (address, record_type)
);

CREATE INDEX IF NOT EXISTS records_expires_at ON records (expires_at);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Extraction,
    Analysis,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Extraction => "extraction",
            RecordType::Analysis => "analysis",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord<T> {
    pub source: Option<String>,
    pub body: T,
    pub updated_at: i64,
}

/// Connect to SQLite (with WAL mode for performance)
pub fn connect(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(conn)
}

/// Run schema migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(INIT_SQL)?;
    Ok(())
}

/// Insert or replace the record for `(address, record_type)`.
pub fn put_record<T: Serialize>(
    conn: &Connection,
    address: &str,
    record_type: RecordType,
    source: Option<&str>,
    body: &T,
    now_ts: i64,
    ttl: Duration,
) -> Result<()> {
    let body = serde_json::to_string(body)?;
    let expires_at = now_ts + ttl.as_secs() as i64;
    conn.execute(
        r#"
        INSERT INTO records (address, record_type, source, body, updated_at, expires_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(address, record_type) DO UPDATE SET
            source     = excluded.source,
            body       = excluded.body,
            updated_at = excluded.updated_at,
            expires_at = excluded.expires_at
        "#,
        params![
            address.to_lowercase(),
            record_type.as_str(),
            source,
            body,
            now_ts,
            expires_at
        ],
    )?;
    debug!("Stored {} record for {}", record_type.as_str(), address);
    Ok(())
}

/// The record if it was written within `refresh` of `now_ts`. Stale,
/// expired and unparseable records are misses.
pub fn get_fresh_record<T: DeserializeOwned>(
    conn: &Connection,
    address: &str,
    record_type: RecordType,
    now_ts: i64,
    refresh: Duration,
) -> Result<Option<StoredRecord<T>>> {
    let row = conn
        .query_row(
            "SELECT source, body, updated_at, expires_at
             FROM records WHERE address = ?1 AND record_type = ?2",
            params![address.to_lowercase(), record_type.as_str()],
            |r| {
                Ok((
                    r.get::<_, Option<String>>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((source, body, updated_at, expires_at)) = row else {
        debug!("Store miss ({}) for {}", record_type.as_str(), address);
        return Ok(None);
    };
    if now_ts - updated_at > refresh.as_secs() as i64 || expires_at <= now_ts {
        debug!("Store stale ({}) for {}", record_type.as_str(), address);
        return Ok(None);
    }
    match serde_json::from_str(&body) {
        Ok(body) => {
            debug!("Store hit ({}) for {}", record_type.as_str(), address);
            Ok(Some(StoredRecord {
                source,
                body,
                updated_at,
            }))
        }
        Err(e) => {
            debug!("Unreadable {} record for {}: {}", record_type.as_str(), address, e);
            Ok(None)
        }
    }
}

/// Delete records past their TTL. Returns how many went.
pub fn purge_expired(conn: &Connection, now_ts: i64) -> Result<usize> {
    let n = conn.execute("DELETE FROM records WHERE expires_at <= ?1", params![now_ts])?;
    if n > 0 {
        info!("Purged {} expired records", n);
    }
    Ok(n)
}
