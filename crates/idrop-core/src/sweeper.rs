// SPDX-License-Identifier: AGPL-3.0
// iDrop Core - Retention sweep
//
// Pending transfers are not expired one by one. Instead the whole `database`
// collection is wiped on a fixed schedule, whatever the age of each record.
// Transfers created while a sweep is running may or may not survive it.

use crate::transfer::TransferRepository;
use crate::types::{AppError, AppSettings};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// User-visible cleanup indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CleanupStatus {
    Idle,
    Sweeping,
    Complete,
}

impl CleanupStatus {
    /// Banner text, empty when nothing should be shown
    pub fn message(&self) -> &'static str {
        match self {
            Self::Idle => "",
            Self::Sweeping => "Cleaning up old data...",
            Self::Complete => "Cleanup complete",
        }
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

/// When sweeps run
#[derive(Debug, Clone, Copy)]
pub struct SweepSchedule {
    /// Delay before the first sweep and between sweeps
    pub interval: Duration,
    /// Keep sweeping after the first run
    pub recurring: bool,
    /// How long the completion message stays up
    pub status_linger: Duration,
}

impl SweepSchedule {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.sweep_interval_secs),
            recurring: settings.sweep_recurring,
            status_linger: Duration::from_secs(settings.status_linger_secs),
        }
    }
}

impl Default for SweepSchedule {
    fn default() -> Self {
        Self::from_settings(&AppSettings::default())
    }
}

/// Wipes every pending transfer
#[derive(Clone)]
pub struct RetentionSweeper {
    transfers: TransferRepository,
    status_tx: Arc<watch::Sender<CleanupStatus>>,
}

impl RetentionSweeper {
    pub fn new(transfers: TransferRepository) -> Self {
        let (status_tx, _) = watch::channel(CleanupStatus::Idle);
        Self {
            transfers,
            status_tx: Arc::new(status_tx),
        }
    }

    pub fn status(&self) -> CleanupStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CleanupStatus> {
        self.status_tx.subscribe()
    }

    /// Delete all pending transfers concurrently.
    ///
    /// A failed delete is logged and counted; it never stops the others.
    /// Leaves the status at `Complete` on success.
    pub async fn sweep(&self) -> Result<SweepReport, AppError> {
        self.status_tx.send_replace(CleanupStatus::Sweeping);

        let pending = match self.transfers.list_all().await {
            Ok(pending) => pending,
            Err(e) => {
                self.status_tx.send_replace(CleanupStatus::Idle);
                return Err(e);
            }
        };

        let results = join_all(
            pending
                .iter()
                .map(|transfer| self.transfers.delete(&transfer.reference)),
        )
        .await;

        let removed = results.iter().filter(|ok| **ok).count();
        let report = SweepReport {
            removed,
            failed: results.len() - removed,
        };

        self.status_tx.send_replace(CleanupStatus::Complete);
        Ok(report)
    }

    /// Run sweeps on `schedule` until the handle is shut down or dropped
    pub fn spawn(self, schedule: SweepSchedule) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + schedule.interval, schedule.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => break,
                }

                match self.sweep().await {
                    Ok(report) => {
                        tracing::info!(
                            "Retention sweep removed {} transfers ({} failed)",
                            report.removed,
                            report.failed
                        );
                        self.clear_status_after(schedule.status_linger);
                    }
                    Err(e) => tracing::error!("Retention sweep failed: {}", e),
                }

                if !schedule.recurring {
                    tracing::info!("One-shot retention sweep done, not re-arming");
                    break;
                }
            }
        });

        SweeperHandle {
            stop_tx,
            task: Some(task),
        }
    }

    fn clear_status_after(&self, linger: Duration) {
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            status_tx.send_if_modified(|status| {
                if *status == CleanupStatus::Complete {
                    *status = CleanupStatus::Idle;
                    true
                } else {
                    false
                }
            });
        });
    }
}

/// Keeps the scheduled sweep alive
pub struct SweeperHandle {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Cancel future sweeps. A sweep already running finishes first.
    pub async fn shutdown(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Document, DocumentRef, DocumentStore, MemoryStore, StoreResult};
    use crate::transfer::TransferRecord;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Fails deletes for chosen documents
    #[derive(Default)]
    struct StubbornStore {
        inner: MemoryStore,
        undeletable: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl DocumentStore for StubbornStore {
        async fn add(&self, collection: &str, body: Value) -> StoreResult<DocumentRef> {
            self.inner.add(collection, body).await
        }

        async fn get_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
            self.inner.get_all(collection).await
        }

        async fn delete(&self, reference: &DocumentRef) -> StoreResult<()> {
            if self.undeletable.lock().unwrap().contains(&reference.key) {
                return Err(AppError::StoreWrite("permission denied".to_string()));
            }
            self.inner.delete(reference).await
        }
    }

    fn schedule(recurring: bool) -> SweepSchedule {
        SweepSchedule {
            interval: Duration::from_secs(600),
            recurring,
            status_linger: Duration::from_secs(3),
        }
    }

    async fn seeded(ids: &[u16]) -> TransferRepository {
        let repo = TransferRepository::new(Arc::new(MemoryStore::new()));
        for id in ids {
            repo.create(&TransferRecord::text(*id, "x")).await.unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn test_sweep_removes_everything() {
        let repo = seeded(&[1000, 2000, 3000]).await;
        let sweeper = RetentionSweeper::new(repo.clone());

        let report = sweeper.sweep().await.unwrap();
        assert_eq!(report, SweepReport { removed: 3, failed: 0 });
        assert!(repo.list_all().await.unwrap().is_empty());
        assert_eq!(sweeper.status(), CleanupStatus::Complete);
    }

    #[tokio::test]
    async fn test_failed_delete_does_not_stop_siblings() {
        let store = Arc::new(StubbornStore::default());
        let repo = TransferRepository::new(store.clone());
        let stuck = repo.create(&TransferRecord::text(1000, "a")).await.unwrap();
        repo.create(&TransferRecord::text(2000, "b")).await.unwrap();
        repo.create(&TransferRecord::text(3000, "c")).await.unwrap();
        store.undeletable.lock().unwrap().insert(stuck.key.clone());

        let report = RetentionSweeper::new(repo.clone()).sweep().await.unwrap();
        assert_eq!(report, SweepReport { removed: 2, failed: 1 });

        let left = repo.list_all().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].record.id, 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_sweep_fires_after_interval_and_rearms() {
        let repo = seeded(&[1000]).await;
        let sweeper = RetentionSweeper::new(repo.clone());
        let status = sweeper.clone();
        let handle = sweeper.spawn(schedule(true));

        tokio::time::sleep(Duration::from_secs(599)).await;
        assert_eq!(repo.list_all().await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(repo.list_all().await.unwrap().is_empty());
        assert_eq!(status.status(), CleanupStatus::Complete);
        assert_eq!(status.status().message(), "Cleanup complete");

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(status.status(), CleanupStatus::Idle);

        repo.create(&TransferRecord::text(2000, "later")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(repo.list_all().await.unwrap().is_empty());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_sweep_does_not_rearm() {
        let repo = seeded(&[1000]).await;
        let handle = RetentionSweeper::new(repo.clone()).spawn(schedule(false));

        tokio::time::sleep(Duration::from_secs(601)).await;
        assert!(repo.list_all().await.unwrap().is_empty());
        assert!(handle.is_finished());

        repo.create(&TransferRecord::text(2000, "survivor")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1800)).await;
        assert_eq!(repo.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_sweep() {
        let repo = seeded(&[1000]).await;
        let handle = RetentionSweeper::new(repo.clone()).spawn(schedule(true));

        tokio::time::sleep(Duration::from_secs(60)).await;
        handle.shutdown().await;

        tokio::time::sleep(Duration::from_secs(1200)).await;
        assert_eq!(repo.list_all().await.unwrap().len(), 1);
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(CleanupStatus::Idle.message(), "");
        assert_eq!(CleanupStatus::Sweeping.message(), "Cleaning up old data...");
    }
}
