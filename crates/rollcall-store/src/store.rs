//! SQLite-backed record store.
//!
//! A single connection lives on a `tokio-rusqlite` background thread, so
//! every statement is serialized. Only inserts and reads are exposed.

use crate::scan_log::{NewScanLog, ScanLogEntry, ScanType};
use chrono::{SecondsFormat, Utc};
use rollcall_core::{Embedding, FaceCandidate, Identity, IdentityRecord};
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("lookup token already registered")]
    DuplicateToken,
    #[error("cannot create database directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    email       TEXT NOT NULL,
    roll_no     TEXT NOT NULL,
    face_vector TEXT,
    qr_key      TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS scan_logs (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    scanner_email TEXT NOT NULL,
    scan_type     TEXT NOT NULL,
    matched_name  TEXT,
    matched_email TEXT,
    created_at    TEXT NOT NULL
);
";

/// Handle to the identity and scan-log tables. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: tokio_rusqlite::Connection,
}

impl Store {
    /// Open (or create) the database file, creating parent directories as needed.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
                path: dir.display().to_string(),
                source,
            })?;
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = Self { conn };
        store.init_schema().await?;
        tracing::info!(path = %path.display(), "record store opened");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Insert a newly registered person.
    ///
    /// Fails with [`StoreError::DuplicateToken`] if the token is already taken.
    pub async fn insert_identity(
        &self,
        identity: Identity,
        embedding: Embedding,
        lookup_token: String,
    ) -> Result<IdentityRecord> {
        let record = IdentityRecord {
            id: uuid::Uuid::new_v4().to_string(),
            identity,
            embedding,
            lookup_token,
            created_at: now_rfc3339(),
        };
        let vector_json = serde_json::to_string(&record.embedding).map_err(|e| StoreError::Corrupt {
            table: "users",
            reason: format!("embedding not serializable: {e}"),
        })?;

        let row = record.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (id, name, email, roll_no, face_vector, qr_key, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        row.id,
                        row.identity.name,
                        row.identity.email,
                        row.identity.roll_no,
                        vector_json,
                        row.lookup_token,
                        row.created_at,
                    ],
                )?;
                Ok(())
            })
            .await;

        match inserted {
            Ok(()) => Ok(record),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::DuplicateToken),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up the identity projection for a decoded lookup token.
    pub async fn find_by_token(&self, lookup_token: &str) -> Result<Option<Identity>> {
        let token = lookup_token.to_string();
        let found = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT name, email, roll_no FROM users WHERE qr_key = ?1",
                        params![token],
                        |row| {
                            Ok(Identity {
                                name: row.get(0)?,
                                email: row.get(1)?,
                                roll_no: row.get(2)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(found)
    }

    /// Snapshot every registered face, in registration order.
    ///
    /// Rows without a stored vector come back with an empty embedding; rows
    /// whose vector cannot be parsed are skipped with a warning.
    pub async fn load_gallery(&self) -> Result<Vec<FaceCandidate>> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, email, roll_no, face_vector FROM users ORDER BY rowid",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            Identity {
                                name: row.get(1)?,
                                email: row.get(2)?,
                                roll_no: row.get(3)?,
                            },
                            row.get::<_, Option<String>>(4)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        let mut gallery = Vec::with_capacity(rows.len());
        for (id, identity, vector_json) in rows {
            let embedding = match vector_json {
                None => Embedding::default(),
                Some(json) => match serde_json::from_str::<Embedding>(&json) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(id = %id, error = %e, "skipping user with unreadable face vector");
                        continue;
                    }
                },
            };
            gallery.push(FaceCandidate {
                id,
                identity,
                embedding,
            });
        }
        Ok(gallery)
    }

    pub async fn count_identities(&self) -> Result<usize> {
        let n = self
            .conn
            .call(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
                Ok(n)
            })
            .await?;
        Ok(n.max(0) as usize)
    }

    /// Append a scan to the log, returning its row id.
    pub async fn record_scan(&self, entry: NewScanLog) -> Result<i64> {
        let created_at = now_rfc3339();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO scan_logs (scanner_email, scan_type, matched_name, matched_email, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        entry.scanner_email,
                        entry.scan_type.as_str(),
                        entry.matched_name,
                        entry.matched_email,
                        created_at,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    /// Most recent scans first, at most `limit` entries.
    pub async fn recent_scans(&self, limit: usize) -> Result<Vec<ScanLogEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, scanner_email, scan_type, matched_name, matched_email, created_at
                     FROM scan_logs ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(id, scanner_email, scan_type, matched_name, matched_email, created_at)| {
                let scan_type = scan_type
                    .parse::<ScanType>()
                    .map_err(|reason| StoreError::Corrupt {
                        table: "scan_logs",
                        reason,
                    })?;
                Ok(ScanLogEntry {
                    id,
                    scanner_email,
                    scan_type,
                    matched_name,
                    matched_email,
                    created_at,
                })
            })
            .collect()
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn is_constraint_violation(err: &tokio_rusqlite::Error) -> bool {
    matches!(
        err,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
