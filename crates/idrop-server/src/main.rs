// SPDX-License-Identifier: AGPL-3.0
// iDrop Server - Main entry point
//
// Serves the send/receive API, runs the retention sweep and, once unlocked,
// keeps the admin dashboard fresh.

mod server;
mod state;

use idrop_core::{AdminGate, AppError, SettingsStore, SweepSchedule};
use state::AppState;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("idrop_server=info,idrop_core=info")),
        )
        .init();

    let settings_store = SettingsStore::new()?;
    let settings = settings_store.get();
    if settings.admin_password.is_none() {
        tracing::warn!("No admin password configured, dashboard login is disabled");
    }

    let store = idrop_core::open_store(&settings).await?;
    let admin = AdminGate::new(settings.admin_password.clone())?;
    let port = settings.port;
    let schedule = SweepSchedule::from_settings(&settings);

    let app_state = Arc::new(AppState::new(settings_store, store, admin));
    if app_state.admin.is_unlocked() {
        app_state.start_dashboard().await;
    }

    let sweeper = app_state.sweeper.clone().spawn(schedule);
    tracing::info!(
        "Retention sweep every {}s ({})",
        schedule.interval.as_secs(),
        if schedule.recurring { "recurring" } else { "one-shot" }
    );

    let result = server::start_server(app_state.clone(), port).await;

    sweeper.shutdown().await;
    app_state.stop_dashboard().await;
    result
}
