//! Reservation records persisted as one JSON array on disk.

use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Utc};
use rsv_proto::{Reservation, ValidationError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table {table} is already reserved at {at}")]
    Conflict { at: NaiveDateTime, table: i32 },

    #[error("reservation {0} not found")]
    NotFound(i64),

    #[error("invalid reservation: {0}")]
    Invalid(#[from] ValidationError),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage format error: {0}")]
    Json(#[from] serde_json::Error),
}

/// File-backed reservation store.
///
/// All records are held in memory behind one async mutex. Every change is
/// written to disk first and only applied in memory once the write
/// succeeded, so the file always matches what callers have been told.
#[derive(Debug)]
pub struct ReservationStore {
    path: PathBuf,
    records: Mutex<Vec<Reservation>>,
}

impl ReservationStore {
    /// Load the store from `path`. A missing or empty file is an empty store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read(&path).await {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), count = records.len(), "reservation store opened");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn list(&self) -> Vec<Reservation> {
        self.records.lock().await.clone()
    }

    pub async fn get(&self, id: i64) -> Result<Reservation, StoreError> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    /// Insert a new record, assigning `id` and `createdAt`.
    pub async fn create(&self, mut reservation: Reservation) -> Result<Reservation, StoreError> {
        reservation.validate()?;
        let mut records = self.records.lock().await;

        reservation.id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        ensure_slot_free(&records, &reservation)?;
        reservation.created_at = Utc::now();
        reservation.last_modified_at = None;

        let mut next = records.clone();
        next.push(reservation.clone());
        self.persist(&next).await?;
        *records = next;
        debug!(id = reservation.id, table = reservation.table_number, "reservation created");
        Ok(reservation)
    }

    /// Replace record `id`, keeping its `createdAt` and stamping
    /// `lastModifiedAt`.
    pub async fn update(&self, id: i64, mut reservation: Reservation) -> Result<Reservation, StoreError> {
        reservation.validate()?;
        let mut records = self.records.lock().await;

        let index = records
            .iter()
            .position(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        reservation.id = id;
        ensure_slot_free(&records, &reservation)?;
        reservation.created_at = records[index].created_at;
        reservation.last_modified_at = Some(Utc::now());

        let mut next = records.clone();
        next[index] = reservation.clone();
        self.persist(&next).await?;
        *records = next;
        debug!(id, "reservation updated");
        Ok(reservation)
    }

    pub async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let index = records
            .iter()
            .position(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        let mut next = records.clone();
        next.remove(index);
        self.persist(&next).await?;
        *records = next;
        debug!(id, "reservation deleted");
        Ok(())
    }

    async fn persist(&self, records: &[Reservation]) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn ensure_slot_free(records: &[Reservation], candidate: &Reservation) -> Result<(), StoreError> {
    if records.iter().any(|r| r.conflicts_with(candidate)) {
        return Err(StoreError::Conflict {
            at: candidate.reservation_date_time,
            table: candidate.table_number,
        });
    }
    Ok(())
}
