use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::db::StorageError;
use crate::record::ImageRecord;
use crate::storage::{LocalStorage, COLLECTED_DATA};

const MAILBOX: usize = 32;

/// Messages the collector understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    CollectGenerationData { data: ImageRecord },
    ClearData,
    CountRecords,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectResponse {
    pub success: bool,
    /// The id was already stored and its record was replaced in place.
    pub is_duplicate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Collect(CollectResponse),
    Clear(ClearResponse),
    Count(CountResponse),
}

/// The collector could not be reached or did not answer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not establish connection: receiving end does not exist")]
    Disconnected,
    #[error("the message port closed before a response was received")]
    NoResponse,
    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),
}

struct Envelope {
    request: Request,
    reply: oneshot::Sender<Response>,
}

/// Sending side of the collector's mailbox. Cheap to clone.
#[derive(Clone)]
pub struct CollectorHandle {
    tx: mpsc::Sender<Envelope>,
}

impl CollectorHandle {
    /// Send one request and wait for its single response.
    pub async fn send(&self, request: Request) -> Result<Response, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| TransportError::Disconnected)?;
        rx.await.map_err(|_| TransportError::NoResponse)
    }

    pub async fn collect(&self, data: ImageRecord) -> Result<CollectResponse, TransportError> {
        match self.send(Request::CollectGenerationData { data }).await? {
            Response::Collect(r) => Ok(r),
            _ => Err(TransportError::UnexpectedResponse("collect_generation_data")),
        }
    }

    pub async fn clear(&self) -> Result<ClearResponse, TransportError> {
        match self.send(Request::ClearData).await? {
            Response::Clear(r) => Ok(r),
            _ => Err(TransportError::UnexpectedResponse("clear_data")),
        }
    }

    pub async fn count(&self) -> Result<usize, TransportError> {
        match self.send(Request::CountRecords).await? {
            Response::Count(r) => Ok(r.count),
            _ => Err(TransportError::UnexpectedResponse("count_records")),
        }
    }

    /// A handle whose collector is already gone.
    #[cfg(test)]
    pub(crate) fn disconnected() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx }
    }
}

/// Ordered, id-unique record list mirrored to storage on every change.
///
/// Every change re-reads the stored list inside the write transaction, so
/// another collector running on the same database file cannot lose records
/// this one has acknowledged, or the other way round.
pub struct CollectorStore {
    records: Vec<ImageRecord>,
    storage: LocalStorage,
}

impl CollectorStore {
    /// Rebuild state from storage. Safe to repeat after any restart.
    pub fn load(storage: LocalStorage) -> Result<Self, StorageError> {
        let records: Vec<ImageRecord> = storage.get(COLLECTED_DATA)?.unwrap_or_default();
        info!("Loaded {} items from storage", records.len());
        Ok(Self { records, storage })
    }

    #[cfg(test)]
    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    /// Insert or replace by `image_id`; returns whether it replaced.
    ///
    /// The new list is persisted before it becomes visible, so a failed
    /// write leaves the store exactly as it was.
    pub fn upsert(&mut self, record: ImageRecord) -> Result<bool, StorageError> {
        let (next, replaced) =
            self.storage
                .update(COLLECTED_DATA, |stored: Option<Vec<ImageRecord>>| {
                    let mut next = stored.unwrap_or_default();
                    let replaced = match next.iter().position(|r| r.image_id == record.image_id) {
                        Some(idx) => {
                            next[idx] = record;
                            true
                        }
                        None => {
                            next.push(record);
                            false
                        }
                    };
                    (next, replaced)
                })?;
        self.records = next;
        Ok(replaced)
    }

    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.storage.set(COLLECTED_DATA, &Vec::<ImageRecord>::new())?;
        self.records.clear();
        Ok(())
    }

    /// Stored record count, falling back to the last known list when the
    /// backend cannot be read.
    fn count(&mut self) -> usize {
        match self.storage.get::<Vec<ImageRecord>>(COLLECTED_DATA) {
            Ok(stored) => self.records = stored.unwrap_or_default(),
            Err(e) => warn!("Failed to re-read collected data: {}", e),
        }
        self.records.len()
    }

    fn handle(&mut self, request: Request) -> Response {
        match request {
            Request::CollectGenerationData { data } => {
                let image_id = data.image_id.clone();
                match self.upsert(data) {
                    Ok(is_duplicate) => {
                        if is_duplicate {
                            info!("Updated image data: {}", image_id);
                        } else {
                            info!("Added image data: {}", image_id);
                        }
                        Response::Collect(CollectResponse {
                            success: true,
                            is_duplicate,
                        })
                    }
                    Err(e) => {
                        error!("Failed to persist image {}: {}", image_id, e);
                        Response::Collect(CollectResponse {
                            success: false,
                            is_duplicate: false,
                        })
                    }
                }
            }
            Request::ClearData => match self.clear() {
                Ok(()) => {
                    info!("Cleared all collected data");
                    Response::Clear(ClearResponse { success: true })
                }
                Err(e) => {
                    error!("Failed to clear collected data: {}", e);
                    Response::Clear(ClearResponse { success: false })
                }
            },
            Request::CountRecords => Response::Count(CountResponse {
                count: self.count(),
            }),
        }
    }

    /// Move the store into its own task. Requests are handled one at a
    /// time, in arrival order, and each reply is sent only after the
    /// corresponding storage write has finished.
    pub fn spawn(self) -> CollectorHandle {
        let (tx, mut rx) = mpsc::channel::<Envelope>(MAILBOX);
        let mut store = self;

        tokio::spawn(async move {
            while let Some(Envelope { request, reply }) = rx.recv().await {
                let response = store.handle(request);
                if reply.send(response).is_err() {
                    warn!("caller went away before the collector replied");
                }
            }
            debug!("collector mailbox closed");
        });

        CollectorHandle { tx }
    }
}

/// Load the store from storage and start serving requests.
pub fn start(storage: LocalStorage) -> Result<CollectorHandle, StorageError> {
    Ok(CollectorStore::load(storage)?.spawn())
}

// ── Tests ──
