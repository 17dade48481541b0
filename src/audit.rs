//! Tamper-evident audit log, partitioned by event class.
//!
//! Three categories: `normal` (successful administrative/protocol events),
//! `updates` (firmware delivery outcomes, success or failure), `incidents`
//! (security-relevant rejections). Appends are serialized under one mutex
//! and persist the whole document before the entry becomes visible, so the
//! snapshot on disk never trails what a reader was shown.

use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;
use tracing::error;
use tracing::warn;

use crate::storage;

/// Errors from audit queries.
#[derive(Debug, Snafu)]
pub enum AuditError {
    /// The requested category does not exist.
    #[snafu(display("no logs found for type: {category}"))]
    UnknownCategory {
        /// The category the caller asked for.
        category: String,
    },
}

/// Event class an entry is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditCategory {
    /// Successful protocol and administrative events.
    Normal,
    /// Firmware delivery outcomes.
    Updates,
    /// Security-relevant rejections.
    Incidents,
}

impl AuditCategory {
    /// Wire/storage name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::Normal => "normal",
            AuditCategory::Updates => "updates",
            AuditCategory::Incidents => "incidents",
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// HTTP-style status code of the event (200 for successes).
    pub code: u16,
    /// Peer address the request came from.
    pub remote_addr: String,
    /// Serial number involved, possibly empty.
    pub serial_number: String,
    /// Short human-readable description.
    pub description: String,
    /// RFC3339 event time.
    pub timestamp: DateTime<Utc>,
    /// Optional free-form detail (e.g. the underlying error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Capability trait for audit producers and readers.
pub trait AuditSink: Send + Sync {
    /// Append an entry to `category`.
    fn append(
        &self,
        category: AuditCategory,
        remote_addr: &str,
        serial_number: &str,
        description: &str,
        code: u16,
        detail: Option<String>,
    );

    /// Snapshot copy of a category, by its wire name.
    fn query(&self, category: &str) -> Result<Vec<AuditEntry>, AuditError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct AuditSnapshot {
    #[serde(default)]
    normal: Vec<AuditEntry>,
    #[serde(default)]
    updates: Vec<AuditEntry>,
    #[serde(default)]
    incidents: Vec<AuditEntry>,
}

impl AuditSnapshot {
    fn entries_mut(&mut self, category: AuditCategory) -> &mut Vec<AuditEntry> {
        match category {
            AuditCategory::Normal => &mut self.normal,
            AuditCategory::Updates => &mut self.updates,
            AuditCategory::Incidents => &mut self.incidents,
        }
    }
}

/// Durable categorized audit log.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    state: Mutex<AuditSnapshot>,
}

impl AuditLog {
    /// Open the audit log at `path`, restoring any existing snapshot.
    pub fn open(path: PathBuf) -> Self {
        let state = match storage::read_json::<AuditSnapshot>(&path) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => AuditSnapshot::default(),
            Err(e) => {
                warn!(error = %e, "unreadable audit snapshot, starting fresh");
                AuditSnapshot::default()
            }
        };
        Self {
            path,
            state: Mutex::new(state),
        }
    }
}

impl AuditSink for AuditLog {
    fn append(
        &self,
        category: AuditCategory,
        remote_addr: &str,
        serial_number: &str,
        description: &str,
        code: u16,
        detail: Option<String>,
    ) {
        let entry = AuditEntry {
            code,
            remote_addr: remote_addr.to_string(),
            serial_number: serial_number.to_string(),
            description: description.to_string(),
            timestamp: Utc::now(),
            detail,
        };

        let mut state = self.state.lock();
        let mut next = state.clone();
        next.entries_mut(category).push(entry);

        // Retry transient I/O once; if the snapshot still cannot be written
        // the entry is dropped so memory matches the last durable state.
        if let Err(first) = storage::write_json_atomic(&self.path, &next) {
            warn!(error = %first, "audit snapshot write failed, retrying");
            if let Err(second) = storage::write_json_atomic(&self.path, &next) {
                error!(error = %second, category = category.as_str(), "dropping audit entry");
                return;
            }
        }
        *state = next;
    }

    fn query(&self, category: &str) -> Result<Vec<AuditEntry>, AuditError> {
        let state = self.state.lock();
        match category {
            "normal" => Ok(state.normal.clone()),
            "updates" => Ok(state.updates.clone()),
            "incidents" => Ok(state.incidents.clone()),
            other => Err(AuditError::UnknownCategory {
                category: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_log() -> (tempfile::TempDir, AuditLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.json"));
        (dir, log)
    }

    #[test]
    fn test_append_and_query_preserve_order() {
        let (_dir, log) = open_log();
        log.append(AuditCategory::Incidents, "1.2.3.4", "0000000001", "first", 401, None);
        log.append(AuditCategory::Incidents, "1.2.3.4", "0000000001", "second", 400, None);

        let entries = log.query("incidents").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].description, "first");
        assert_eq!(entries[1].description, "second");
    }

    #[test]
    fn test_categories_are_isolated() {
        let (_dir, log) = open_log();
        log.append(AuditCategory::Updates, "1.2.3.4", "0000000001", "success", 200, None);

        assert_eq!(log.query("updates").unwrap().len(), 1);
        assert!(log.query("normal").unwrap().is_empty());
        assert!(log.query("incidents").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_category_errors() {
        let (_dir, log) = open_log();
        assert!(matches!(
            log.query("warnings"),
            Err(AuditError::UnknownCategory { .. })
        ));
    }

    #[test]
    fn test_detail_is_optional() {
        let (_dir, log) = open_log();
        log.append(
            AuditCategory::Incidents,
            "1.2.3.4",
            "0000000001",
            "bad signature",
            401,
            Some("hmac mismatch".to_string()),
        );
        let entries = log.query("incidents").unwrap();
        assert_eq!(entries[0].detail.as_deref(), Some("hmac mismatch"));
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.json");

        {
            let log = AuditLog::open(path.clone());
            log.append(AuditCategory::Normal, "1.2.3.4", "0000000001", "success", 200, None);
        }

        let log = AuditLog::open(path);
        assert_eq!(log.query("normal").unwrap().len(), 1);
    }
}
