//! Append-only audit trail of authorization decisions
//!
//! Every processed request produces exactly one [`AuditEntry`]. Driver
//! tokens are stored only as a BLAKE3 digest. Write failures are logged and
//! counted under `audit{write_error}`; they never reach the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::metrics::{category, MetricsRegistry};
use crate::types::{AuthorizationDecision, AuthorizationStatus, ChargingRequest};

/// CSV column order
pub const AUDIT_HEADER: [&str; 7] = [
    "timestamp",
    "request_id",
    "station_id",
    "driver_token_hash",
    "status",
    "reason",
    "processing_time_ms",
];

/// One audited decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
    pub station_id: String,
    pub driver_token_hash: String,
    pub status: AuthorizationStatus,
    pub reason: Option<String>,
    pub processing_time_ms: u64,
}

impl AuditEntry {
    pub fn new(request: &ChargingRequest, decision: &AuthorizationDecision) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: decision.request_id,
            station_id: decision.station_id.clone(),
            driver_token_hash: hash_token(&request.driver_token),
            status: decision.status,
            reason: decision.reason.clone(),
            processing_time_ms: decision.processing_time_ms,
        }
    }
}

/// Deterministic one-way digest of a driver token (hex BLAKE3)
pub fn hash_token(driver_token: &str) -> String {
    blake3::hash(driver_token.as_bytes()).to_hex().to_string()
}

/// Sink for audit entries
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append the entry for one decision; failures are absorbed
    async fn record(&self, request: &ChargingRequest, decision: &AuthorizationDecision);
}

type SharedCsvWriter = Arc<Mutex<csv::Writer<File>>>;

/// CSV file audit log
///
/// Appends are serialized through a mutex so rows never interleave. The async
/// [`AuditLog::record`] path runs the write on the blocking thread pool.
pub struct CsvAuditLog {
    path: PathBuf,
    writer: SharedCsvWriter,
    metrics: Arc<MetricsRegistry>,
}

impl CsvAuditLog {
    /// Open `path` for appending, writing the header if the file is new
    pub fn open(path: impl AsRef<Path>, metrics: Arc<MetricsRegistry>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_new = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_new {
            writer
                .write_record(AUDIT_HEADER)
                .map_err(|e| PipelineError::AuditWrite(e.to_string()))?;
            writer.flush()?;
        }

        info!(path = %path.display(), new_file = is_new, "Audit log opened");

        Ok(Self {
            path,
            writer: Arc::new(Mutex::new(writer)),
            metrics,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and flush it to disk, blocking the calling thread
    pub fn append(&self, entry: &AuditEntry) -> Result<()> {
        write_entry(&self.writer, entry)
    }

    async fn append_blocking(&self, entry: AuditEntry) -> Result<()> {
        let writer = self.writer.clone();

        tokio::task::spawn_blocking(move || write_entry(&writer, &entry))
            .await
            .map_err(|e| PipelineError::AuditWrite(e.to_string()))?
    }

    /// Read back every entry in the file
    pub fn read_entries(&self) -> Result<Vec<AuditEntry>> {
        read_csv_entries(&self.path)
    }
}

fn write_entry(writer: &Mutex<csv::Writer<File>>, entry: &AuditEntry) -> Result<()> {
    let mut writer = writer.lock();
    writer
        .serialize(entry)
        .map_err(|e| PipelineError::AuditWrite(e.to_string()))?;
    writer.flush()?;
    Ok(())
}

/// Parse an audit CSV file written by [`CsvAuditLog`]
pub fn read_csv_entries(path: impl AsRef<Path>) -> Result<Vec<AuditEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path.as_ref())
        .map_err(|e| PipelineError::AuditWrite(e.to_string()))?;

    reader
        .deserialize()
        .map(|row| row.map_err(|e| PipelineError::AuditWrite(e.to_string())))
        .collect()
}

#[async_trait]
impl AuditLog for CsvAuditLog {
    async fn record(&self, request: &ChargingRequest, decision: &AuthorizationDecision) {
        let entry = AuditEntry::new(request, decision);
        let request_id = entry.request_id;
        let status = entry.status;

        match self.append_blocking(entry).await {
            Ok(()) => debug!(request_id = %request_id, status = %status, "Decision audited"),
            Err(e) => {
                self.metrics.increment(category::AUDIT, "write_error");
                error!(
                    request_id = %request_id,
                    path = %self.path.display(),
                    error = %e,
                    "Failed to write audit entry"
                );
            }
        }
    }
}

/// In-memory audit log, lost on restart
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in write order
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }

    /// Entries bearing `request_id`
    pub fn entries_for(&self, request_id: Uuid) -> Vec<AuditEntry> {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.request_id == request_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, request: &ChargingRequest, decision: &AuthorizationDecision) {
        let entry = AuditEntry::new(request, decision);
        debug!(request_id = %entry.request_id, status = %entry.status, "Decision audited");
        self.entries.write().push(entry);
    }
}
