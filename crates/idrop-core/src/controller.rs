// SPDX-License-Identifier: AGPL-3.0
// iDrop Core - Send and receive flows
//
// Form state is owned by the caller and passed in explicitly. Each attempt
// that gets past input validation records exactly one analytics event,
// whether it succeeds or fails.

use crate::allocator::IdAllocator;
use crate::analytics::{AnalyticsEvent, AnalyticsLog};
use crate::payload::{DecodedFile, FileAttachment};
use crate::store::DocumentStore;
use crate::transfer::{PayloadKind, TransferId, TransferRecord, TransferRepository};
use crate::types::AppError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shown in place of a payload when a code matches nothing
pub const NOT_FOUND_MESSAGE: &str = "No data found for this ID";
/// Error recorded for a receive miss
pub const NOT_FOUND_REASON: &str = "ID not found";

/// State of the send tab
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendForm {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub file: Option<FileAttachment>,
    /// Code handed out by the last successful send
    #[serde(default)]
    pub issued_id: Option<TransferId>,
}

impl SendForm {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_file(file: FileAttachment) -> Self {
        Self {
            file: Some(file),
            ..Self::default()
        }
    }

    fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.file.is_none()
    }

    fn kind(&self) -> PayloadKind {
        if self.file.is_some() {
            PayloadKind::File
        } else {
            PayloadKind::Text
        }
    }

    /// Size of what would be stored, in characters
    fn payload_size(&self) -> u64 {
        match &self.file {
            Some(file) => file.data_url.chars().count() as u64,
            None => self.text.chars().count() as u64,
        }
    }

    fn file_name(&self) -> Option<String> {
        self.file.as_ref().map(|f| f.name.clone())
    }

    /// A file takes precedence over text when both are filled in
    fn to_record(&self, id: TransferId) -> TransferRecord {
        match &self.file {
            Some(file) => TransferRecord::file(id, file),
            None => TransferRecord::text(id, self.text.clone()),
        }
    }

    fn reset_inputs(&mut self) {
        self.text.clear();
        self.file = None;
    }
}

/// Result of looking up a code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Found(TransferRecord),
    NotFound,
}

impl ReceiveOutcome {
    /// What the receive tab shows as the payload
    pub fn display_text(&self) -> &str {
        match self {
            Self::Found(record) => &record.data,
            Self::NotFound => NOT_FOUND_MESSAGE,
        }
    }

    pub fn record(&self) -> Option<&TransferRecord> {
        match self {
            Self::Found(record) => Some(record),
            Self::NotFound => None,
        }
    }
}

/// State of the receive tab
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveForm {
    pub id: String,
    /// Last lookup result, cleared while a new lookup runs
    pub outcome: Option<ReceiveOutcome>,
}

impl ReceiveForm {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: None,
        }
    }
}

/// Orchestrates allocation, storage and analytics for both tabs
#[derive(Clone)]
pub struct TransferController {
    transfers: TransferRepository,
    allocator: IdAllocator,
    analytics: AnalyticsLog,
}

impl TransferController {
    pub fn new(store: Arc<dyn DocumentStore>, max_id_attempts: u32) -> Self {
        let transfers = TransferRepository::new(store.clone());
        Self {
            allocator: IdAllocator::new(transfers.clone(), max_id_attempts),
            transfers,
            analytics: AnalyticsLog::new(store),
        }
    }

    pub fn transfers(&self) -> &TransferRepository {
        &self.transfers
    }

    pub fn analytics(&self) -> &AnalyticsLog {
        &self.analytics
    }

    /// Store the form's payload under a fresh code.
    ///
    /// On success the inputs are cleared and `issued_id` is set. A blank form
    /// is rejected before anything is written.
    pub async fn send(&self, form: &mut SendForm) -> Result<TransferId, AppError> {
        if form.is_blank() {
            return Err(AppError::Validation(
                "Please enter some text or select a file to send.".to_string(),
            ));
        }

        let kind = form.kind();
        let size = form.payload_size();
        let file_name = form.file_name();

        let stored = match self.allocator.allocate().await {
            Ok(id) => self
                .transfers
                .create(&form.to_record(id))
                .await
                .map(|_| id),
            Err(e) => Err(e),
        };

        match stored {
            Ok(id) => {
                tracing::info!("Sent {:?} transfer {} ({} chars)", kind, id, size);
                form.reset_inputs();
                form.issued_id = Some(id);
                self.track(AnalyticsEvent::send_succeeded(kind, id, size, file_name))
                    .await;
                Ok(id)
            }
            Err(e) => {
                tracing::error!("Error sending data: {}", e);
                self.track(AnalyticsEvent::send_failed(
                    kind,
                    e.to_string(),
                    size,
                    file_name,
                ))
                .await;
                Err(e)
            }
        }
    }

    /// Look up the form's code and store the outcome in the form
    pub async fn receive(&self, form: &mut ReceiveForm) -> Result<ReceiveOutcome, AppError> {
        let entered = form.id.trim().to_string();
        if entered.is_empty() {
            return Err(AppError::Validation(
                "Please enter an ID to receive data.".to_string(),
            ));
        }

        form.outcome = None;
        let found = match self.transfers.find_by_id(&entered).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!("Error receiving data: {}", e);
                self.track(AnalyticsEvent::receive_failed(e.to_string(), &entered))
                    .await;
                return Err(e);
            }
        };

        let outcome = match found {
            Some(transfer) => {
                self.track(AnalyticsEvent::receive_succeeded(
                    transfer.record.kind(),
                    &entered,
                ))
                .await;
                ReceiveOutcome::Found(transfer.record)
            }
            None => {
                tracing::debug!("No pending transfer for {}", entered);
                self.track(AnalyticsEvent::receive_failed(NOT_FOUND_REASON, &entered))
                    .await;
                ReceiveOutcome::NotFound
            }
        };

        form.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    /// Decode a pending file transfer for download. Not tracked.
    pub async fn download(&self, id: &str) -> Result<Option<DecodedFile>, AppError> {
        match self.transfers.find_by_id(id).await? {
            Some(transfer) => transfer.record.decode_file().map(Some),
            None => Ok(None),
        }
    }

    async fn track(&self, event: AnalyticsEvent) {
        if let Err(e) = self.analytics.record(&event).await {
            tracing::warn!("Failed to record analytics event: {}", e);
        }
    }
}
