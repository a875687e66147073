//! HTTP surface of the issuing authority.
//!
//! `validate`, `public-key` and `health` are anonymous; every other route
//! requires `Authorization: Bearer <operator token>`.

use crate::authority::service::LicenseAuthority;
use crate::protocol::models::{
    IssueRequest, LicenseRecord, SignedLicense, UpdateRequest, ValidateRequest, ValidateResponse,
};
use crate::LicenseError;
use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

/// Header carrying the issuance idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    authority: Arc<LicenseAuthority>,
    operator_token_digest: [u8; 32],
}

impl AppState {
    /// Wrap an authority and the operator token that guards mutations.
    pub fn new(authority: Arc<LicenseAuthority>, operator_token: &str) -> Self {
        let mut operator_token_digest = [0u8; 32];
        operator_token_digest.copy_from_slice(&Sha256::digest(operator_token.trim().as_bytes()));
        Self {
            authority,
            operator_token_digest,
        }
    }
}

type ApiError = (StatusCode, String);

/// Public key distribution body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    /// Hex Ed25519 public key.
    pub public_key_hex: String,
    /// Hex SHA-256 fingerprint of the key.
    pub key_fingerprint: String,
}

/// Health check body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "healthy" when served.
    pub status: String,
    /// Crate version.
    pub version: String,
}

/// Create the authority router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/licenses", license_routes())
        .route("/health", get(health))
        .with_state(state)
}

fn license_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_licenses))
        .route("/public-key", get(public_key))
        .route("/issue", post(issue_license))
        .route("/validate", post(validate_license))
        .route("/revoke/{id}", post(revoke_license))
        .route("/suspend/{id}", post(suspend_license))
        .route("/activate/{id}", post(activate_license))
        .route("/update/{id}", post(update_license))
        .route("/assign/{id}/{user_id}", post(assign_license))
}

fn require_operator(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| Sha256::digest(token.trim().as_bytes()));

    match presented {
        Some(digest) if digest.as_slice() == state.operator_token_digest.as_slice() => Ok(()),
        _ => {
            warn!("Rejected operator request");
            Err(error_response(LicenseError::Unauthorized))
        }
    }
}

fn error_response(error: LicenseError) -> ApiError {
    let status = match &error {
        LicenseError::NotFound(_) => StatusCode::NOT_FOUND,
        LicenseError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        LicenseError::Unauthorized => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string())
}

/// Validate an artifact. Always answers with a verdict body.
async fn validate_license(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Json<ValidateResponse> {
    Json(state.authority.validate(&request))
}

/// Issue and sign a license.
async fn issue_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<IssueRequest>,
) -> Result<Json<SignedLicense>, ApiError> {
    require_operator(&state, &headers)?;
    let idempotency_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty());

    state
        .authority
        .issue(request, idempotency_key)
        .map(Json)
        .map_err(error_response)
}

/// List all license records.
async fn list_licenses(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<LicenseRecord>>, ApiError> {
    require_operator(&state, &headers)?;
    Ok(Json(state.authority.list()))
}

async fn revoke_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<LicenseRecord>, ApiError> {
    require_operator(&state, &headers)?;
    state.authority.revoke(&id).map(Json).map_err(error_response)
}

async fn suspend_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<LicenseRecord>, ApiError> {
    require_operator(&state, &headers)?;
    state.authority.suspend(&id).map(Json).map_err(error_response)
}

async fn activate_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<LicenseRecord>, ApiError> {
    require_operator(&state, &headers)?;
    state.authority.activate(&id).map(Json).map_err(error_response)
}

async fn update_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<LicenseRecord>, ApiError> {
    require_operator(&state, &headers)?;
    state
        .authority
        .update(&id, request)
        .map(Json)
        .map_err(error_response)
}

async fn assign_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<Json<LicenseRecord>, ApiError> {
    require_operator(&state, &headers)?;
    state
        .authority
        .assign(&id, &user_id)
        .map(Json)
        .map_err(error_response)
}

/// Trust anchor distribution.
async fn public_key(State(state): State<AppState>) -> Json<PublicKeyResponse> {
    Json(PublicKeyResponse {
        public_key_hex: state.authority.public_key_hex().to_string(),
        key_fingerprint: state.authority.key_fingerprint().to_string(),
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
