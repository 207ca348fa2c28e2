use crate::api::{ApiError, AppState};
use crate::ledger::MarketItem;
use crate::policy::{KeyRequest, ReleasedKey};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

/// Key fields are empty strings whenever `success` is false
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DecryptionKeyResponse {
    pub key: String,
    pub iv: String,
    pub data_hash: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ReleasedKey> for DecryptionKeyResponse {
    fn from(released: ReleasedKey) -> Self {
        Self {
            key: released.key.to_base64(),
            iv: released.iv.to_base64(),
            data_hash: released.data_hash.clone(),
            success: true,
            error: None,
        }
    }
}

pub async fn request_decryption_key(
    State(state): State<AppState>,
    Json(request): Json<KeyRequest>,
) -> (StatusCode, Json<DecryptionKeyResponse>) {
    match state.service.release_key(&request).await {
        Ok(released) => (StatusCode::OK, Json(released.into())),
        Err(e) => {
            let err = ApiError::from(e);
            (
                err.status(),
                Json(DecryptionKeyResponse {
                    error: Some(err.message),
                    ..DecryptionKeyResponse::default()
                }),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyIntegrityRequest {
    pub item_id: u64,
    pub data_hash: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct VerifyIntegrityResponse {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn verify_integrity(
    State(state): State<AppState>,
    Json(request): Json<VerifyIntegrityRequest>,
) -> (StatusCode, Json<VerifyIntegrityResponse>) {
    match state
        .service
        .verify_integrity(request.item_id, &request.data_hash)
        .await
    {
        Ok(report) => (
            StatusCode::OK,
            Json(VerifyIntegrityResponse {
                valid: report.valid,
                error: report
                    .stored_hash
                    .is_none()
                    .then(|| "Could not retrieve item data from blockchain".to_string()),
                stored_hash: report.stored_hash,
            }),
        ),
        Err(e) => {
            let err = ApiError::from(e);
            (
                err.status(),
                Json(VerifyIntegrityResponse {
                    error: Some(err.message),
                    ..VerifyIntegrityResponse::default()
                }),
            )
        }
    }
}

/// Listing details as recorded on the ledger
pub async fn get_item(
    State(state): State<AppState>,
    Path(item_id): Path<u64>,
) -> Result<Json<MarketItem>, ApiError> {
    Ok(Json(state.service.item_info(item_id).await?))
}
