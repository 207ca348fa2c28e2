use crate::api::{ApiError, AppState};
use crate::crypto;
use crate::storage::{KeyRecordSummary, KeyStore};
use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap},
    response::Json,
};
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteKeyResponse {
    pub deleted: bool,
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ApiError::forbidden("Admin API disabled"));
    };
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default();

    // compare digests so the check does not short-circuit on the first byte
    if crypto::hash(provided.as_bytes()) != crypto::hash(expected.as_bytes()) {
        return Err(ApiError::unauthorized("Invalid admin token"));
    }
    Ok(())
}

pub async fn list_keys(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Vec<String>>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(state.service.store().list_ids().await?))
}

pub async fn get_key_summary(
    State(state): State<AppState>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> Result<Json<KeyRecordSummary>, ApiError> {
    authorize(&state, &headers)?;
    let record = state.service.store().get_full(&cid).await?;
    Ok(Json(record.summary()))
}

pub async fn delete_key(
    State(state): State<AppState>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DeleteKeyResponse>, ApiError> {
    authorize(&state, &headers)?;
    let deleted = state.service.store().delete(&cid).await?;
    if deleted {
        info!("Key record for content {} deleted by admin request", cid);
    }
    Ok(Json(DeleteKeyResponse { deleted }))
}
