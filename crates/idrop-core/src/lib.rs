// SPDX-License-Identifier: AGPL-3.0
// iDrop Core - Shared logic for all frontends
//
// This crate provides:
// - AppSettings and AppError types, SettingsStore for persistent settings
// - DocumentStore, the seam over the backing document database
// - TransferController for the send and receive flows
// - RetentionSweeper, which periodically wipes pending transfers
// - AnalyticsLog and Aggregator for the admin dashboard
// - AdminGate, a shared-password gate in front of that dashboard
//
// Frontend-specific code lives in separate crates.

pub mod admin;
pub mod allocator;
pub mod analytics;
pub mod controller;
pub mod payload;
pub mod settings;
pub mod store;
pub mod sweeper;
pub mod transfer;
pub mod types;

// Re-export commonly used items
pub use admin::{AdminGate, AdminShortcut, KeyChord};
pub use allocator::IdAllocator;
pub use analytics::{
    Aggregator, AnalyticsEvent, AnalyticsLog, DailyCount, DashboardRefresher, DashboardSnapshot,
};
pub use controller::{
    ReceiveForm, ReceiveOutcome, SendForm, TransferController, NOT_FOUND_MESSAGE,
};
pub use payload::{DecodedFile, FileAttachment};
pub use settings::SettingsStore;
pub use store::{DocumentStore, JsonFileStore, MemoryStore};
pub use sweeper::{CleanupStatus, RetentionSweeper, SweepReport, SweepSchedule, SweeperHandle};
pub use transfer::{PayloadKind, TransferId, TransferRecord, TransferRepository};
pub use types::{AppError, AppSettings, StoreBackend};

use std::sync::Arc;

/// Open the document store selected in settings
pub async fn open_store(settings: &AppSettings) -> Result<Arc<dyn DocumentStore>, AppError> {
    match settings.store_backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::File => {
            let path = settings.resolve_store_path()?;
            Ok(Arc::new(JsonFileStore::open(path).await?))
        }
    }
}
