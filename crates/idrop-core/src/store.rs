// SPDX-License-Identifier: AGPL-3.0
// iDrop Core - Document store
//
// The app only needs four primitives from its backing store: add a document,
// read a whole collection, delete one document by reference, and a timestamp
// range query. Nothing here is transactional.

use crate::types::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Collection holding pending transfers
pub const TRANSFERS_COLLECTION: &str = "database";
/// Collection holding the analytics event log
pub const ANALYTICS_COLLECTION: &str = "analytics";

/// Field the time queries filter and order on
const TIMESTAMP_FIELD: &str = "timestamp";

pub type StoreResult<T> = Result<T, AppError>;

/// Store-assigned reference to one document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub collection: String,
    pub key: String,
}

/// A document as returned by reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub reference: DocumentRef,
    pub body: Value,
}

impl Document {
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.body
            .get(TIMESTAMP_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

/// Filter and ordering on the `timestamp` field
#[derive(Debug, Clone, Default)]
pub struct TimeQuery {
    /// Keep documents with `timestamp >= since`
    pub since: Option<DateTime<Utc>>,
    /// Order by `timestamp`, newest first
    pub newest_first: bool,
}

impl TimeQuery {
    pub fn newest_first() -> Self {
        Self {
            since: None,
            newest_first: true,
        }
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    fn apply(&self, mut docs: Vec<Document>) -> Vec<Document> {
        if let Some(since) = self.since {
            docs.retain(|doc| doc.timestamp().is_some_and(|ts| ts >= since));
        }
        if self.newest_first {
            // Documents without a timestamp sort last
            docs.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        }
        docs
    }
}

/// The document store seam
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document, returning its new reference
    async fn add(&self, collection: &str, body: Value) -> StoreResult<DocumentRef>;

    /// Read every document of a collection, in no particular order
    async fn get_all(&self, collection: &str) -> StoreResult<Vec<Document>>;

    /// Remove one document. Removing an absent document is not an error.
    async fn delete(&self, reference: &DocumentRef) -> StoreResult<()>;

    /// Time-filtered and optionally ordered read
    async fn query(&self, collection: &str, query: &TimeQuery) -> StoreResult<Vec<Document>> {
        Ok(query.apply(self.get_all(collection).await?))
    }
}

/// Collections keyed by name, shared by the in-memory and file stores
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct Collections(HashMap<String, Vec<Document>>);

impl Collections {
    fn add(&mut self, collection: &str, body: Value) -> DocumentRef {
        let reference = DocumentRef {
            collection: collection.to_string(),
            key: Uuid::new_v4().to_string(),
        };
        self.0
            .entry(collection.to_string())
            .or_default()
            .push(Document {
                reference: reference.clone(),
                body,
            });
        reference
    }

    fn get_all(&self, collection: &str) -> Vec<Document> {
        self.0.get(collection).cloned().unwrap_or_default()
    }

    fn delete(&mut self, reference: &DocumentRef) -> bool {
        match self.0.get_mut(&reference.collection) {
            Some(docs) => {
                let before = docs.len();
                docs.retain(|doc| doc.reference.key != reference.key);
                docs.len() != before
            }
            None => false,
        }
    }
}

/// Volatile store living in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn add(&self, collection: &str, body: Value) -> StoreResult<DocumentRef> {
        Ok(self.collections.write().await.add(collection, body))
    }

    async fn get_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        Ok(self.collections.read().await.get_all(collection))
    }

    async fn delete(&self, reference: &DocumentRef) -> StoreResult<()> {
        self.collections.write().await.delete(reference);
        Ok(())
    }
}

/// Store persisted to a single JSON file after every mutation
pub struct JsonFileStore {
    collections: RwLock<Collections>,
    file_path: PathBuf,
}

impl JsonFileStore {
    /// Open the store, loading existing contents if the file is present
    pub async fn open(file_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let file_path = file_path.into();

        let collections = match tokio::fs::read_to_string(&file_path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse store file, starting fresh: {}", e);
                Collections::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Collections::default(),
            Err(e) => {
                return Err(AppError::StoreRead(format!(
                    "Failed to read {}: {}",
                    file_path.display(),
                    e
                )))
            }
        };

        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::FileIo(format!("Failed to create data dir: {}", e)))?;
        }

        tracing::info!("Opened file store at {}", file_path.display());

        Ok(Self {
            collections: RwLock::new(collections),
            file_path,
        })
    }

    async fn persist(&self, collections: &Collections) -> StoreResult<()> {
        let content = serde_json::to_string_pretty(collections)
            .map_err(|e| AppError::StoreWrite(format!("Failed to serialize store: {}", e)))?;

        tokio::fs::write(&self.file_path, content)
            .await
            .map_err(|e| AppError::StoreWrite(format!("Failed to write store: {}", e)))
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn add(&self, collection: &str, body: Value) -> StoreResult<DocumentRef> {
        let mut collections = self.collections.write().await;
        let reference = collections.add(collection, body);
        if let Err(e) = self.persist(&collections).await {
            collections.delete(&reference);
            return Err(e);
        }
        Ok(reference)
    }

    async fn get_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        Ok(self.collections.read().await.get_all(collection))
    }

    async fn delete(&self, reference: &DocumentRef) -> StoreResult<()> {
        let mut collections = self.collections.write().await;
        // Readers keep seeing the document until the file no longer has it
        let mut remaining = collections.clone();
        if remaining.delete(reference) {
            self.persist(&remaining).await?;
            *collections = remaining;
        }
        Ok(())
    }
}
