// SPDX-License-Identifier: AGPL-3.0
// iDrop Core - Pending transfers
//
// A transfer record lives in the `database` collection from the moment it is
// sent until the next retention sweep. Receiving never mutates or removes it.

use crate::payload::{decode_data_url, DecodedFile, FileAttachment};
use crate::store::{DocumentRef, DocumentStore, TRANSFERS_COLLECTION};
use crate::types::AppError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 4-digit code identifying a pending transfer
pub type TransferId = u16;

/// Payload kind as recorded in analytics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    File,
    Text,
    Unknown,
}

/// One pending transfer as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub id: TransferId,
    /// Raw text, or a data URL when `is_file`
    pub data: String,
    pub is_file: bool,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
}

impl TransferRecord {
    pub fn text(id: TransferId, text: impl Into<String>) -> Self {
        Self {
            id,
            data: text.into(),
            is_file: false,
            file_name: None,
            file_type: None,
        }
    }

    pub fn file(id: TransferId, file: &FileAttachment) -> Self {
        Self {
            id,
            data: file.data_url.clone(),
            is_file: true,
            file_name: Some(file.name.clone()),
            file_type: Some(file.mime_type.clone()),
        }
    }

    pub fn kind(&self) -> PayloadKind {
        if self.is_file {
            PayloadKind::File
        } else {
            PayloadKind::Text
        }
    }

    /// Rebuild the original file from a file payload
    pub fn decode_file(&self) -> Result<DecodedFile, AppError> {
        if !self.is_file {
            return Err(AppError::InvalidPayload(format!(
                "transfer {} holds text, not a file",
                self.id
            )));
        }

        let (encoded_type, bytes) = decode_data_url(&self.data)?;
        Ok(DecodedFile {
            name: self
                .file_name
                .clone()
                .unwrap_or_else(|| format!("idrop-{}", self.id)),
            mime_type: self.file_type.clone().unwrap_or(encoded_type),
            bytes,
        })
    }
}

/// A record together with the reference needed to delete it
#[derive(Debug, Clone)]
pub struct StoredTransfer {
    pub reference: DocumentRef,
    pub record: TransferRecord,
}

/// Data access for the `database` collection
#[derive(Clone)]
pub struct TransferRepository {
    store: Arc<dyn DocumentStore>,
}

impl TransferRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Insert a new pending transfer
    pub async fn create(&self, record: &TransferRecord) -> Result<DocumentRef, AppError> {
        let body = serde_json::to_value(record)
            .map_err(|e| AppError::StoreWrite(format!("Failed to encode transfer: {}", e)))?;
        let reference = self.store.add(TRANSFERS_COLLECTION, body).await?;
        tracing::debug!("Created transfer {} as {}", record.id, reference.key);
        Ok(reference)
    }

    /// Every pending transfer, in no particular order
    pub async fn list_all(&self) -> Result<Vec<StoredTransfer>, AppError> {
        let docs = self.store.get_all(TRANSFERS_COLLECTION).await?;

        Ok(docs
            .into_iter()
            .filter_map(|doc| match serde_json::from_value(doc.body) {
                Ok(record) => Some(StoredTransfer {
                    reference: doc.reference,
                    record,
                }),
                Err(e) => {
                    tracing::warn!("Skipping malformed transfer {}: {}", doc.reference.key, e);
                    None
                }
            })
            .collect())
    }

    /// First pending transfer whose ID matches the entered code
    pub async fn find_by_id(&self, id: &str) -> Result<Option<StoredTransfer>, AppError> {
        let wanted = id.trim();
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .find(|t| t.record.id.to_string() == wanted))
    }

    /// Remove one transfer. Failures are logged, never returned.
    pub async fn delete(&self, reference: &DocumentRef) -> bool {
        match self.store.delete(reference).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Error deleting transfer {}: {}", reference.key, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn repo() -> (Arc<MemoryStore>, TransferRepository) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), TransferRepository::new(store))
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let value = serde_json::to_value(TransferRecord::text(4821, "hi")).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 4821,
                "data": "hi",
                "isFile": false,
                "fileName": null,
                "fileType": null
            })
        );
    }

    #[tokio::test]
    async fn test_find_by_id_normalizes_input() {
        let (_, repo) = repo();
        repo.create(&TransferRecord::text(4821, "hello")).await.unwrap();
        repo.create(&TransferRecord::text(1234, "other")).await.unwrap();

        let found = repo.find_by_id(" 4821 ").await.unwrap().unwrap();
        assert_eq!(found.record.data, "hello");
        assert!(repo.find_by_id("9999").await.unwrap().is_none());
        assert!(repo.find_by_id("48210").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_all_skips_malformed_documents() {
        let (store, repo) = repo();
        repo.create(&TransferRecord::text(1000, "ok")).await.unwrap();
        store
            .add(TRANSFERS_COLLECTION, json!({"id": "not a number"}))
            .await
            .unwrap();

        let all = repo.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].record.id, 1000);
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let (_, repo) = repo();
        let reference = repo.create(&TransferRecord::text(2000, "x")).await.unwrap();
        assert!(repo.delete(&reference).await);
        assert!(repo.list_all().await.unwrap().is_empty());
    }

    #[test]
    fn test_decode_file_round_trip() {
        let attachment = FileAttachment::from_bytes("a.bin", Some("application/x-test"), &[9, 8, 7]);
        let record = TransferRecord::file(3000, &attachment);
        let decoded = record.decode_file().unwrap();
        assert_eq!(decoded.name, "a.bin");
        assert_eq!(decoded.mime_type, "application/x-test");
        assert_eq!(decoded.bytes, vec![9, 8, 7]);
    }

    #[test]
    fn test_decode_text_record_is_rejected() {
        let record = TransferRecord::text(3000, "plain");
        assert!(matches!(
            record.decode_file(),
            Err(AppError::InvalidPayload(_))
        ));
    }
}
