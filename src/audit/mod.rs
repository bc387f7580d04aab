//! Audit log of vault-level events.
//!
//! `init`, `rotate-key`, `sync`, `migrate` and `trust` append one row each
//! to `<data_dir>/audit.db`. Rows carry the event name, an optional domain
//! and a short summary; passwords, KGKs and key material never reach the
//! log. Only the newest `MAX_ENTRIES` rows are kept.
//!
//! Recording is best effort: `log_audit` swallows every failure so a
//! broken log never blocks a sync or a key rotation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::debug;

use crate::errors::{Result, SesamError};

/// Rows kept after each insert.
const MAX_ENTRIES: i64 = 1000;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS events (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    at      INTEGER NOT NULL,
    event   TEXT NOT NULL,
    domain  TEXT,
    summary TEXT
);";

/// One recorded event.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub domain: Option<String>,
    pub details: Option<String>,
}

pub struct AuditLog {
    conn: Connection,
}

impl AuditLog {
    /// Open the log under `data_dir`, creating it owner-readable only.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = Self::db_path(data_dir);
        if !path.exists() {
            create_private(&path)
                .map_err(|e| SesamError::AuditError(format!("{}: {e}", path.display())))?;
        }
        let conn = Connection::open(&path).map_err(audit_err)?;
        conn.execute_batch(SCHEMA).map_err(audit_err)?;
        Ok(Self { conn })
    }

    pub fn db_path(data_dir: &Path) -> PathBuf {
        data_dir.join("audit.db")
    }

    /// Append an event and drop rows beyond the retention limit.
    pub fn record(
        &self,
        operation: &str,
        domain: Option<&str>,
        details: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO events (at, event, domain, summary) VALUES (?1, ?2, ?3, ?4)",
                params![Utc::now().timestamp(), operation, domain, details],
            )
            .map_err(audit_err)?;
        self.conn
            .execute(
                "DELETE FROM events WHERE id <= (SELECT MAX(id) FROM events) - ?1",
                params![MAX_ENTRIES],
            )
            .map_err(audit_err)?;
        Ok(())
    }

    /// The `limit` newest events, newest first.
    pub fn query(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare("SELECT id, at, event, domain, summary FROM events ORDER BY id DESC LIMIT ?1")
            .map_err(audit_err)?;
        let entries = stmt
            .query_map([limit], entry_from_row)
            .map_err(audit_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(audit_err)?;
        Ok(entries)
    }
}

/// Record one event under `data_dir`. Never fails.
pub fn log_audit(data_dir: &Path, operation: &str, domain: Option<&str>, details: Option<&str>) {
    let recorded =
        AuditLog::open(data_dir).and_then(|log| log.record(operation, domain, details));
    if let Err(e) = recorded {
        debug!(error = %e, operation, "audit event not recorded");
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    let at: i64 = row.get(1)?;
    Ok(AuditEntry {
        id: row.get(0)?,
        timestamp: DateTime::from_timestamp(at, 0).unwrap_or_default(),
        operation: row.get(2)?,
        domain: row.get(3)?,
        details: row.get(4)?,
    })
}

fn audit_err(e: rusqlite::Error) -> SesamError {
    SesamError::AuditError(e.to_string())
}

/// Create an empty file that only the owner can read.
fn create_private(path: &Path) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path).map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn events_come_back_newest_first() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::open(dir.path()).unwrap();

        log.record("init", None, Some("created")).unwrap();
        log.record("sync", None, Some("merged")).unwrap();
        log.record("migrate", Some("bank.example"), Some("frozen")).unwrap();

        let entries = log.query(10).unwrap();
        let ops: Vec<_> = entries.iter().map(|e| e.operation.as_str()).collect();
        assert_eq!(ops, ["migrate", "sync", "init"]);
        assert_eq!(entries[0].domain.as_deref(), Some("bank.example"));
        assert!(entries[2].domain.is_none());
        assert!(entries[0].timestamp <= Utc::now());
    }

    #[test]
    fn query_honours_limit() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::open(dir.path()).unwrap();
        for _ in 0..5 {
            log.record("sync", None, None).unwrap();
        }
        assert_eq!(log.query(3).unwrap().len(), 3);
    }

    #[test]
    fn old_events_are_pruned() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::open(dir.path()).unwrap();
        for _ in 0..MAX_ENTRIES + 5 {
            log.record("sync", None, None).unwrap();
        }
        let entries = log.query(usize::MAX).unwrap();
        assert_eq!(entries.len() as i64, MAX_ENTRIES);
        assert_eq!(entries.last().unwrap().id, 6);
    }

    #[test]
    fn log_audit_survives_reopen() {
        let dir = TempDir::new().unwrap();
        log_audit(dir.path(), "trust", None, Some("sync.example.org AA:BB"));
        let entries = AuditLog::open(dir.path()).unwrap().query(1).unwrap();
        assert_eq!(entries[0].operation, "trust");
        assert_eq!(entries[0].details.as_deref(), Some("sync.example.org AA:BB"));
    }

    #[test]
    fn missing_directory_is_an_error_but_logging_is_silent() {
        let missing = Path::new("/nonexistent/sesam-audit");
        assert!(matches!(AuditLog::open(missing), Err(SesamError::AuditError(_))));
        log_audit(missing, "init", None, None);
    }

    #[cfg(unix)]
    #[test]
    fn database_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        AuditLog::open(dir.path()).unwrap();
        let mode = std::fs::metadata(AuditLog::db_path(dir.path()))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
