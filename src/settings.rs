use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::db::StorageError;
use crate::storage::{LocalStorage, IS_ENABLED};

/// Collection is on unless explicitly switched off.
pub fn is_enabled(storage: &LocalStorage) -> Result<bool, StorageError> {
    Ok(storage.get::<bool>(IS_ENABLED)?.unwrap_or(true))
}

pub fn set_enabled(storage: &LocalStorage, enabled: bool) -> Result<(), StorageError> {
    storage.set(IS_ENABLED, &enabled)
}

/// Flip the flag and return the new value.
pub fn toggle(storage: &LocalStorage) -> Result<bool, StorageError> {
    let next = !is_enabled(storage)?;
    set_enabled(storage, next)?;
    Ok(next)
}

/// Live view of the flag. The receiver is updated whenever any holder of
/// the storage writes `isEnabled`. The watcher stops once every receiver
/// is dropped or the last storage handle goes away.
pub fn watch_enabled(storage: &LocalStorage) -> Result<watch::Receiver<bool>, StorageError> {
    // Subscribe before the initial read so no write can slip in between.
    let mut changes = storage.subscribe();
    let (tx, rx) = watch::channel(is_enabled(storage)?);
    let reader = storage.reader();

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = tx.closed() => break,
                received = changes.recv() => received,
            };
            let enabled = match received {
                Ok(change) if change.key == IS_ENABLED => {
                    change.new_value.as_bool().unwrap_or(true)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "settings watcher lagged, re-reading isEnabled");
                    match reader.get::<bool>(IS_ENABLED) {
                        Ok(enabled) => enabled.unwrap_or(true),
                        Err(e) => {
                            warn!("failed to re-read isEnabled: {}", e);
                            continue;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            debug!(enabled, "isEnabled changed");
            if tx.send(enabled).is_err() {
                break;
            }
        }
        debug!("settings watcher stopped");
    });

    Ok(rx)
}
