// SPDX-License-Identifier: AGPL-3.0
// iDrop Server - Application State

use idrop_core::{
    AdminGate, Aggregator, AnalyticsLog, AppSettings, DashboardRefresher, DashboardSnapshot,
    DocumentStore, RetentionSweeper, SettingsStore, TransferController,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// State shared across handlers
pub struct AppState {
    /// Effective settings at startup
    pub settings: AppSettings,
    pub settings_store: SettingsStore,
    pub controller: TransferController,
    pub sweeper: RetentionSweeper,
    pub admin: AdminGate,
    aggregator: Aggregator,
    /// Running only while the dashboard is unlocked
    dashboard: Mutex<Option<DashboardRefresher>>,
}

impl AppState {
    pub fn new(
        settings_store: SettingsStore,
        store: Arc<dyn DocumentStore>,
        admin: AdminGate,
    ) -> Self {
        let settings = settings_store.get();
        let controller = TransferController::new(store.clone(), settings.max_id_attempts);
        let sweeper = RetentionSweeper::new(controller.transfers().clone());
        let aggregator = Aggregator::new(
            AnalyticsLog::new(store),
            Duration::from_secs(settings.active_window_secs),
        );

        Self {
            settings,
            settings_store,
            controller,
            sweeper,
            admin,
            aggregator,
            dashboard: Mutex::new(None),
        }
    }

    /// Begin periodic dashboard refreshes if not already running
    pub async fn start_dashboard(&self) {
        let mut dashboard = self.dashboard.lock().await;
        if dashboard.is_none() {
            tracing::info!("Starting dashboard refresher");
            *dashboard = Some(DashboardRefresher::start(
                self.aggregator.clone(),
                Duration::from_secs(self.settings.dashboard_refresh_secs),
            ));
        }
    }

    pub async fn stop_dashboard(&self) {
        let refresher = self.dashboard.lock().await.take();
        if let Some(refresher) = refresher {
            tracing::info!("Stopping dashboard refresher");
            refresher.stop().await;
        }
    }

    /// Latest refreshed snapshot, computing one on demand before the first
    /// refresh lands
    pub async fn dashboard_snapshot(&self) -> Result<DashboardSnapshot, idrop_core::AppError> {
        let latest = self
            .dashboard
            .lock()
            .await
            .as_ref()
            .and_then(DashboardRefresher::latest);

        match latest {
            Some(snapshot) => Ok(snapshot),
            None => self.aggregator.snapshot().await,
        }
    }
}
