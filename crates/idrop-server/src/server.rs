// SPDX-License-Identifier: AGPL-3.0
// iDrop Server - HTTP API
//
// Thin JSON surface over the core controller. Error messages for store
// failures are deliberately generic; the details go to the log.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use idrop_core::{
    AdminShortcut, AppError, AppSettings, FileAttachment, KeyChord, ReceiveForm, ReceiveOutcome,
    SendForm, TransferId,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

const SEND_FAILED_MESSAGE: &str = "Error sending data. Please try again.";
const RECEIVE_FAILED_MESSAGE: &str = "Error receiving data.";

/// Error body returned by every failing handler
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Map a core error, hiding store details behind `generic`
    fn from_app(err: AppError, generic: &str) -> Self {
        match err {
            AppError::Validation(message) | AppError::InvalidConfig(message) => {
                Self::new(StatusCode::BAD_REQUEST, message)
            }
            AppError::InvalidPayload(message) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
            }
            other => {
                tracing::error!("Request failed: {}", other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, generic)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    file: Option<FileAttachment>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    id: TransferId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadParams {
    name: String,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveRequest {
    id: String,
}

/// `{found: true, id, data, isFile, ...}` on a hit, `{found: false, message}` on a miss
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveResponse {
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<TransferId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_file: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl From<ReceiveOutcome> for ReceiveResponse {
    fn from(outcome: ReceiveOutcome) -> Self {
        match outcome {
            ReceiveOutcome::Found(record) => Self {
                found: true,
                id: Some(record.id),
                data: Some(record.data),
                is_file: Some(record.is_file),
                file_name: record.file_name,
                file_type: record.file_type,
                message: None,
            },
            ReceiveOutcome::NotFound => Self {
                message: Some(ReceiveOutcome::NotFound.display_text().to_string()),
                ..Self::default()
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    password: String,
}

/// Create the Axum router for the iDrop API
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check - useful for testing connectivity
        .route("/health", get(health_handler))
        // Send tab
        .route("/send", post(send_handler))
        .route("/send/file", post(send_file_handler))
        // Receive tab
        .route("/receive", post(receive_handler))
        .route("/transfers/{id}/download", get(download_handler))
        // Cleanup banner
        .route("/status", get(status_handler))
        // Admin dashboard
        .route("/admin/login", post(admin_login_handler))
        .route("/admin/logout", post(admin_logout_handler))
        .route("/admin/dashboard", get(admin_dashboard_handler))
        .route("/admin/shortcut", post(admin_shortcut_handler))
        .route(
            "/admin/settings",
            get(admin_settings_handler).put(update_settings_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "app": "idrop",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn send_form(state: &AppState, mut form: SendForm) -> ApiResult<Json<SendResponse>> {
    let id = state
        .controller
        .send(&mut form)
        .await
        .map_err(|e| ApiError::from_app(e, SEND_FAILED_MESSAGE))?;
    Ok(Json(SendResponse { id }))
}

/// Send text and/or an already encoded file
async fn send_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendRequest>,
) -> ApiResult<Json<SendResponse>> {
    let form = SendForm {
        text: request.text,
        file: request.file,
        issued_id: None,
    };
    send_form(&state, form).await
}

/// Send a raw file body, encoded here into a data URL
async fn send_file_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FileUploadParams>,
    body: Bytes,
) -> ApiResult<Json<SendResponse>> {
    if body.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Uploaded file is empty."));
    }

    let file = FileAttachment::from_bytes(&params.name, params.mime_type.as_deref(), &body);
    tracing::info!("Received upload {} ({} bytes)", file.name, body.len());
    send_form(&state, SendForm::with_file(file)).await
}

async fn receive_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReceiveRequest>,
) -> ApiResult<Json<ReceiveResponse>> {
    let mut form = ReceiveForm::with_id(request.id);
    let outcome = state
        .controller
        .receive(&mut form)
        .await
        .map_err(|e| ApiError::from_app(e, RECEIVE_FAILED_MESSAGE))?;
    Ok(Json(outcome.into()))
}

/// Rebuild a file transfer and hand it out as an attachment
async fn download_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let file = state
        .controller
        .download(&id)
        .await
        .map_err(|e| ApiError::from_app(e, RECEIVE_FAILED_MESSAGE))?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, idrop_core::NOT_FOUND_MESSAGE))?;

    Ok((
        [
            (header::CONTENT_TYPE, file.content_type()),
            (header::CONTENT_DISPOSITION, file.content_disposition()),
        ],
        file.bytes,
    )
        .into_response())
}

async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.sweeper.status();
    Json(serde_json::json!({
        "status": status,
        "message": status.message(),
    }))
}

async fn admin_login_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let authorized = state
        .admin
        .login(&request.password)
        .map_err(|e| ApiError::from_app(e, "Could not save admin session."))?;

    if !authorized {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "Wrong password."));
    }

    state.start_dashboard().await;
    Ok(Json(serde_json::json!({ "authorized": true })))
}

async fn admin_logout_handler(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    state
        .admin
        .logout()
        .map_err(|e| ApiError::from_app(e, "Could not clear admin session."))?;
    state.stop_dashboard().await;
    Ok(StatusCode::NO_CONTENT)
}

fn require_admin(state: &AppState) -> ApiResult<()> {
    if state.admin.is_unlocked() {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::FORBIDDEN, "Admin login required."))
    }
}

/// Settings as handed to clients, never carrying the admin password
fn redacted(mut settings: AppSettings) -> AppSettings {
    settings.admin_password = None;
    settings
}

/// Whether a key press should reveal the admin login screen
async fn admin_shortcut_handler(Json(chord): Json<KeyChord>) -> impl IntoResponse {
    Json(serde_json::json!({ "showLogin": AdminShortcut::matches(&chord) }))
}

async fn admin_settings_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<AppSettings>> {
    require_admin(&state)?;
    Ok(Json(redacted(state.settings_store.get())))
}

/// Persist new settings. They take effect on the next start.
async fn update_settings_handler(
    State(state): State<Arc<AppState>>,
    Json(mut settings): Json<AppSettings>,
) -> ApiResult<Json<AppSettings>> {
    require_admin(&state)?;

    // An omitted password keeps the current one
    if settings.admin_password.is_none() {
        settings.admin_password = state.settings_store.get().admin_password;
    }

    state
        .settings_store
        .update(settings.clone())
        .map_err(|e| ApiError::from_app(e, "Could not save settings."))?;
    tracing::info!("Settings saved, changes apply on next start");
    Ok(Json(redacted(settings)))
}

async fn admin_dashboard_handler(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    require_admin(&state)?;

    let snapshot = state
        .dashboard_snapshot()
        .await
        .map_err(|e| ApiError::from_app(e, "Error fetching analytics."))?;
    Ok(Json(snapshot).into_response())
}

/// Start the HTTP server and run until Ctrl-C
pub async fn start_server(state: Arc<AppState>, port: u16) -> Result<(), AppError> {
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Starting server on port {}", port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Network(format!("Failed to bind to port {}: {}", port, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
        })
        .await
        .map_err(|e| AppError::Network(format!("Server error: {}", e)))?;

    Ok(())
}
