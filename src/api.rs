// 🌐 REST API - axum router over the intake service
//
// Every /api route except /api/health needs `Authorization: Bearer <token>`.
// Responses use one envelope: { success, data, error? }

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Extension, Router,
};
use base64::Engine;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::auth::{Authenticator, Identity};
use crate::entities::{Courier, ManualChoice, AMBIGUOUS_PAIR, MANUAL_CHOICES};
use crate::error::IntakeError;
use crate::intake::{self, Intake};
use crate::pipeline::ManifestFailure;
use crate::rules::{Classification, RuleEngine};
use crate::storage::DocumentStorage;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub storage: Arc<dyn DocumentStorage + Send + Sync>,
    pub rules: Arc<RuleEngine>,
    pub auth: Arc<Authenticator>,
    pub folder_id: Arc<str>,
}

impl AppState {
    fn lock_db(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".to_string()))
    }
}

/// API Response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Intake(IntakeError),
    Manifest(ManifestFailure),
    Internal(String),
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        ApiError::Intake(err)
    }
}

fn status_for(err: &IntakeError) -> StatusCode {
    match err {
        IntakeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        IntakeError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        IntakeError::SequenceOverflow { .. } => StatusCode::CONFLICT,
        IntakeError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        IntakeError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Intake(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    error!(error = %err, "request failed");
                }
                (
                    status,
                    serde_json::json!({ "success": false, "data": null, "error": err.to_string() }),
                )
            }
            ApiError::Manifest(failure) => (
                status_for(&failure.error),
                serde_json::json!({
                    "success": false,
                    "data": null,
                    "error": failure.to_string(),
                    "failedAt": failure.stage,
                    "uploaded": failure.uploaded,
                }),
            ),
            ApiError::Internal(detail) => {
                error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "success": false, "data": null, "error": "An internal error occurred" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// AUTH MIDDLEWARE
// ============================================================================

/// Verify the bearer token and hand the identity to handlers
async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match state.auth.authorize_header(header) {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(err) => {
            warn!(path = %req.uri().path(), error = %err, "request rejected");
            ApiError::from(err).into_response()
        }
    }
}

// ============================================================================
// REQUEST / RESPONSE BODIES
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyRequest {
    #[serde(default)]
    tracking_number: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryRequest {
    #[serde(default)]
    tracking_number: String,
    #[serde(default)]
    courier: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouriersResponse {
    manual_choices: Vec<&'static str>,
    ambiguous: [Courier; 2],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryResponse {
    tracking_number: String,
    courier: Courier,
    timestamp: i64,
    href: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResponse {
    courier: Courier,
    count: usize,
    tracking_numbers: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestResponse {
    bin_number: String,
    parcel_count: usize,
    pdf_file_id: Option<String>,
    csv_file_id: Option<String>,
    pdf_base64: String,
    csv: String,
}

fn entry_href(courier: Courier, tracking_number: &str) -> String {
    format!(
        "/api/entries/{}/{}",
        urlencoding::encode(courier.name()),
        urlencoding::encode(tracking_number)
    )
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/couriers - manual-selection menu and the ambiguous pair
async fn list_couriers() -> ApiResult<CouriersResponse> {
    Ok(Json(ApiResponse::ok(CouriersResponse {
        manual_choices: MANUAL_CHOICES.iter().map(ManualChoice::label).collect(),
        ambiguous: AMBIGUOUS_PAIR,
    })))
}

/// POST /api/classify
async fn classify(State(state): State<AppState>, Json(body): Json<ClassifyRequest>) -> ApiResult<Classification> {
    let classification = state.rules.classify(&body.tracking_number)?;
    Ok(Json(ApiResponse::ok(classification)))
}

/// POST /api/entries - log a resolved entry
async fn log_entry(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<LogEntryRequest>,
) -> Result<(StatusCode, Json<ApiResponse<EntryResponse>>), ApiError> {
    let conn = state.lock_db()?;
    let service = Intake::new(&*conn, &*conn, &*state.storage, &state.rules, &state.folder_id, &identity.email);

    let (now, _) = intake::now();
    let entry = service.log_entry(&body.tracking_number, &body.courier, now)?;

    let response = EntryResponse {
        href: entry_href(entry.courier, &entry.tracking_number),
        tracking_number: entry.tracking_number,
        courier: entry.courier,
        timestamp: entry.timestamp,
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(response))))
}

/// GET /api/entries - pending sets grouped by courier
async fn list_entries(State(state): State<AppState>) -> ApiResult<Vec<PendingResponse>> {
    let conn = state.lock_db()?;
    let sets = crate::db::RecordStore::list_all(&*conn)?;

    let response = sets
        .into_iter()
        .map(|set| PendingResponse {
            courier: set.courier,
            count: set.count(),
            tracking_numbers: set.tracking_numbers(),
        })
        .collect();

    Ok(Json(ApiResponse::ok(response)))
}

/// DELETE /api/entries/:courier/:tracking_number
async fn remove_entry(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((courier, tracking_number)): Path<(String, String)>,
) -> ApiResult<bool> {
    let courier: Courier = courier.parse()?;
    let conn = state.lock_db()?;
    let service = Intake::new(&*conn, &*conn, &*state.storage, &state.rules, &state.folder_id, &identity.email);

    Ok(Json(ApiResponse::ok(service.remove_entry(courier, &tracking_number)?)))
}

/// DELETE /api/entries/:courier - clear a pending set
async fn clear_entries(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(courier): Path<String>,
) -> ApiResult<usize> {
    let courier: Courier = courier.parse()?;
    let conn = state.lock_db()?;
    let service = Intake::new(&*conn, &*conn, &*state.storage, &state.rules, &state.folder_id, &identity.email);

    Ok(Json(ApiResponse::ok(service.clear_pending(courier)?)))
}

/// POST /api/manifests/:courier - build, upload and clear
async fn generate_manifest(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(courier): Path<String>,
) -> ApiResult<ManifestResponse> {
    let courier: Courier = courier.parse()?;
    let conn = state.lock_db()?;
    let service = Intake::new(&*conn, &*conn, &*state.storage, &state.rules, &state.folder_id, &identity.email);

    let (_, printed_at) = intake::now();
    let receipt = service
        .generate_manifest(courier, printed_at, |_| {})
        .map_err(ApiError::Manifest)?;

    let response = ManifestResponse {
        bin_number: receipt.bin_number.to_string(),
        parcel_count: receipt.parcel_count,
        pdf_file_id: receipt.file_id(crate::pipeline::DocumentKind::Pdf).map(str::to_string),
        csv_file_id: receipt.file_id(crate::pipeline::DocumentKind::Csv).map(str::to_string),
        pdf_base64: base64::engine::general_purpose::STANDARD.encode(&receipt.documents.pdf),
        csv: String::from_utf8_lossy(&receipt.documents.csv).into_owned(),
    };

    Ok(Json(ApiResponse::ok(response)))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/couriers", get(list_couriers))
        .route("/classify", post(classify))
        .route("/entries", get(list_entries).post(log_entry))
        .route("/entries/:courier", delete(clear_entries))
        .route("/entries/:courier/:tracking_number", delete(remove_entry))
        .route("/manifests/:courier", post(generate_manifest))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    let api = Router::new().route("/health", get(health_check)).merge(protected);

    Router::new().nest("/api", api).layer(CorsLayer::permissive())
}

// ============================================================================
// TESTS
// ============================================================================
