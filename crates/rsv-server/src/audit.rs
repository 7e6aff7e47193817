//! Append-only audit log of connection, security and dispatch events.
//!
//! Features:
//! - Pluggable logs (memory buffer, JSON Lines file)
//! - Sequential entry ids that continue across restarts of the file log
//! - One entry per accepted operation, written before the operation runs

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

/// Operation recorded when a handshake completes.
pub const OP_CONNECTION: &str = "Connection";
/// Operation recorded when a session ends.
pub const OP_DISCONNECTION: &str = "Disconnection";
/// Operation recorded for rejected frames.
pub const OP_SECURITY: &str = "Security";

/// Resource of session lifecycle and security entries.
pub const RESOURCE_SYSTEM: &str = "System";
/// Resource of dispatched operations.
pub const RESOURCE_API: &str = "API";

/// Errors from audit operations.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: u64,
    pub client_id: String,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub resource: String,
    pub details: String,
}

/// Destination of audit entries.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one entry and return it with its assigned id.
    async fn log_operation(
        &self,
        client_id: &str,
        operation: &str,
        resource: &str,
        details: &str,
    ) -> Result<AuditEntry, AuditError>;
}

/// In-memory audit log for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }

    /// Entries whose operation matches `operation` exactly.
    pub async fn by_operation(&self, operation: &str) -> Vec<AuditEntry> {
        self.filtered(|e| e.operation == operation).await
    }

    /// Entries recorded for `client_id`.
    pub async fn by_client(&self, client_id: &str) -> Vec<AuditEntry> {
        self.filtered(|e| e.client_id == client_id).await
    }

    async fn filtered(&self, keep: impl Fn(&AuditEntry) -> bool) -> Vec<AuditEntry> {
        self.entries.read().await.iter().filter(|e| keep(*e)).cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn log_operation(
        &self,
        client_id: &str,
        operation: &str,
        resource: &str,
        details: &str,
    ) -> Result<AuditEntry, AuditError> {
        let mut entries = self.entries.write().await;
        let entry = AuditEntry {
            id: entries.len() as u64 + 1,
            client_id: client_id.to_string(),
            timestamp: Utc::now(),
            operation: operation.to_string(),
            resource: resource.to_string(),
            details: details.to_string(),
        };
        entries.push(entry.clone());
        Ok(entry)
    }
}

/// Audit log appending one JSON object per line to a file.
pub struct JsonLinesAuditLog {
    path: PathBuf,
    /// Id of the last written entry; the lock also serializes appends.
    last_id: Mutex<u64>,
}

impl JsonLinesAuditLog {
    /// Open `path`, creating it on first write. Ids continue after the
    /// highest id already in the file.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let last_id = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content
                .lines()
                .filter_map(|line| serde_json::from_str::<AuditEntry>(line).ok())
                .map(|e| e.id)
                .max()
                .unwrap_or(0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), last_id, "audit log opened");
        Ok(Self {
            path,
            last_id: Mutex::new(last_id),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every entry in the file.
    pub async fn read_all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        let _guard = self.last_id.lock().await;
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(AuditError::from))
            .collect()
    }

    /// Entries recorded for `client_id`, in file order.
    pub async fn by_client(&self, client_id: &str) -> Result<Vec<AuditEntry>, AuditError> {
        let mut entries = self.read_all().await?;
        entries.retain(|e| e.client_id == client_id);
        Ok(entries)
    }

    /// Entries whose operation matches `operation` exactly, in file order.
    pub async fn by_operation(&self, operation: &str) -> Result<Vec<AuditEntry>, AuditError> {
        let mut entries = self.read_all().await?;
        entries.retain(|e| e.operation == operation);
        Ok(entries)
    }

    async fn append_line(&self, line: &str) -> Result<(), AuditError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        Ok(())
    }
}

impl std::fmt::Debug for JsonLinesAuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesAuditLog")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl AuditLog for JsonLinesAuditLog {
    async fn log_operation(
        &self,
        client_id: &str,
        operation: &str,
        resource: &str,
        details: &str,
    ) -> Result<AuditEntry, AuditError> {
        let mut last_id = self.last_id.lock().await;
        let entry = AuditEntry {
            id: *last_id + 1,
            client_id: client_id.to_string(),
            timestamp: Utc::now(),
            operation: operation.to_string(),
            resource: resource.to_string(),
            details: details.to_string(),
        };
        self.append_line(&serde_json::to_string(&entry)?).await?;
        *last_id = entry.id;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_log_assigns_ids() {
        let log = MemoryAuditLog::new();
        let a = log.log_operation("c1", OP_CONNECTION, RESOURCE_SYSTEM, "hello").await.unwrap();
        let b = log.log_operation("c1", "create", RESOURCE_API, "{}").await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(log.by_operation(OP_CONNECTION).await.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_log_by_client() {
        let log = MemoryAuditLog::new();
        log.log_operation("c1", OP_CONNECTION, RESOURCE_SYSTEM, "").await.unwrap();
        log.log_operation("c2", OP_CONNECTION, RESOURCE_SYSTEM, "").await.unwrap();
        log.log_operation("c1", "delete", RESOURCE_API, r#"{"id":3}"#).await.unwrap();

        let c1 = log.by_client("c1").await;
        assert_eq!(c1.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(log.by_client("c2").await.len(), 1);
        assert!(log.by_client("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn test_file_log_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonLinesAuditLog::open(dir.path().join("audit.log")).await.unwrap();
        log.log_operation("c1", OP_SECURITY, RESOURCE_SYSTEM, "bad signature")
            .await
            .unwrap();

        let raw = std::fs::read_to_string(log.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(raw.trim_end()).unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(value["clientId"], "c1");
        assert_eq!(value["operation"], "Security");
        assert_eq!(value["resource"], "System");
        assert_eq!(value["details"], "bad signature");
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_file_log_ids_continue_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        {
            let log = JsonLinesAuditLog::open(&path).await.unwrap();
            for i in 0..3 {
                log.log_operation("c1", "list", RESOURCE_API, &i.to_string()).await.unwrap();
            }
        }

        let log = JsonLinesAuditLog::open(&path).await.unwrap();
        let entry = log.log_operation("c2", "get", RESOURCE_API, "{}").await.unwrap();
        assert_eq!(entry.id, 4);

        let all = log.read_all().await.unwrap();
        assert_eq!(all.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(all[0].details, "0");
    }

    #[tokio::test]
    async fn test_file_log_queries() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonLinesAuditLog::open(dir.path().join("audit.log")).await.unwrap();
        assert!(log.by_client("c1").await.unwrap().is_empty());

        log.log_operation("c1", OP_CONNECTION, RESOURCE_SYSTEM, "").await.unwrap();
        log.log_operation("c2", "create", RESOURCE_API, "{}").await.unwrap();
        log.log_operation("c1", "create", RESOURCE_API, "{}").await.unwrap();
        log.log_operation("c2", OP_DISCONNECTION, RESOURCE_SYSTEM, "peer closed").await.unwrap();

        let c2 = log.by_client("c2").await.unwrap();
        assert_eq!(c2.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 4]);

        let creates = log.by_operation("create").await.unwrap();
        assert_eq!(creates.iter().map(|e| e.client_id.as_str()).collect::<Vec<_>>(), vec!["c2", "c1"]);
        assert!(log.by_operation("Create").await.unwrap().is_empty());
    }
}
