use std::path::Path;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::collector::CollectorHandle;
use crate::db::StorageError;
use crate::export;
use crate::notify::Notification;
use crate::record::ImageRecord;
use crate::settings;
use crate::storage::{LocalStorage, COLLECTED_DATA};

pub const CLEAR_PROMPT: &str =
    "Are you sure you want to clear all collected data? This cannot be undone.";

/// Count, toggle, export and clear. Reads storage directly and mutates
/// records only through the collector.
pub struct SummaryPanel {
    storage: LocalStorage,
    collector: CollectorHandle,
}

impl SummaryPanel {
    pub fn new(storage: LocalStorage, collector: CollectorHandle) -> Self {
        Self { storage, collector }
    }

    pub fn records(&self) -> Result<Vec<ImageRecord>, StorageError> {
        Ok(self.storage.get(COLLECTED_DATA)?.unwrap_or_default())
    }

    pub fn count(&self) -> Result<usize, StorageError> {
        read_count(&self.storage)
    }

    pub fn is_enabled(&self) -> Result<bool, StorageError> {
        settings::is_enabled(&self.storage)
    }

    /// Export and clear are only offered when something is stored.
    pub fn has_data(&self) -> Result<bool, StorageError> {
        Ok(self.count()? > 0)
    }

    pub fn toggle(&self) -> Notification {
        match settings::toggle(&self.storage) {
            Ok(true) => Notification::success("Collection enabled"),
            Ok(false) => Notification::success("Collection disabled"),
            Err(e) => Notification::error(format!("Failed to update setting: {}", e)),
        }
    }

    pub fn export(&self, dir: &Path) -> Notification {
        let records = match self.records() {
            Ok(records) => records,
            Err(e) => return Notification::error(format!("Failed to read collected data: {}", e)),
        };
        if records.is_empty() {
            return Notification::error("No data collected yet!");
        }
        match export::write(dir, &records, Utc::now()) {
            Ok(path) => {
                info!("exported {} records to {}", records.len(), path.display());
                Notification::success(format!("Downloaded {} images", records.len()))
            }
            Err(e) => Notification::error(format!("Export failed: {:#}", e)),
        }
    }

    /// Clear everything, but only once the user has confirmed.
    pub async fn clear(&self, confirmed: bool) -> Option<Notification> {
        match self.has_data() {
            Ok(true) => {}
            Ok(false) => return Some(Notification::error("Nothing to clear")),
            Err(e) => return Some(Notification::error(format!("Failed to read collected data: {}", e))),
        }
        if !confirmed {
            return None;
        }
        Some(match self.collector.clear().await {
            Ok(reply) if reply.success => Notification::success("All data cleared"),
            Ok(_) => Notification::error("Failed to clear data"),
            Err(e) => {
                warn!("clear_data not delivered: {}", e);
                Notification::error("Failed to clear data")
            }
        })
    }

    /// Live record count, refreshed on every write to the records key from
    /// any holder of the storage.
    pub fn watch_count(&self) -> Result<watch::Receiver<usize>, StorageError> {
        let mut changes = self.storage.subscribe();
        let (tx, rx) = watch::channel(self.count()?);
        let reader = self.storage.reader();

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = tx.closed() => break,
                    received = changes.recv() => received,
                };
                let count = match received {
                    Ok(change) if change.key == COLLECTED_DATA => {
                        change.new_value.as_array().map_or(0, Vec::len)
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        match reader.get::<Vec<serde_json::Value>>(COLLECTED_DATA) {
                            Ok(records) => records.map_or(0, |r| r.len()),
                            Err(e) => {
                                warn!("failed to re-read record count: {}", e);
                                continue;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if tx.send(count).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

fn read_count(storage: &LocalStorage) -> Result<usize, StorageError> {
    let records: Option<Vec<serde_json::Value>> = storage.get(COLLECTED_DATA)?;
    Ok(records.map_or(0, |r| r.len()))
}

// ── Tests ──
