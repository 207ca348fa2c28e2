use crate::api::{ApiError, AppState};
use crate::policy::{AccessError, EncryptedContent};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        Form, Multipart, State,
    },
    http::StatusCode,
    response::Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::{Deserialize, Serialize};

fn default_filename() -> String {
    "data.csv".to_string()
}

#[derive(Debug, Deserialize)]
pub struct EncryptDataRequest {
    /// Base64 of the plaintext
    pub file_content: String,
    pub item_cid: String,
    #[serde(default = "default_filename")]
    pub filename: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EncryptDataResponse {
    pub encrypted_content: String,
    pub data_hash: String,
    pub iv: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EncryptDataResponse {
    fn encrypted(content: EncryptedContent, filename: Option<String>) -> Self {
        Self {
            encrypted_content: BASE64_STANDARD.encode(&content.ciphertext),
            data_hash: content.data_hash,
            iv: content.iv.to_base64(),
            filename,
            success: true,
            error: None,
        }
    }

    fn failed(err: ApiError) -> (StatusCode, Json<Self>) {
        (
            err.status(),
            Json(Self {
                error: Some(err.message),
                ..Self::default()
            }),
        )
    }
}

/// Encrypt base64 content posted as JSON
pub async fn encrypt_data(
    State(state): State<AppState>,
    request: Result<Json<EncryptDataRequest>, JsonRejection>,
) -> (StatusCode, Json<EncryptDataResponse>) {
    let request = match request {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return EncryptDataResponse::failed(rejection_error(
                rejection.status(),
                rejection.body_text(),
                state.max_upload_bytes,
            ))
        }
    };
    let plaintext = match BASE64_STANDARD.decode(request.file_content.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return EncryptDataResponse::failed(ApiError::bad_request("file_content is not valid base64")),
    };

    match state
        .service
        .encrypt_content(&plaintext, &request.item_cid, Some(&request.filename))
        .await
    {
        Ok(content) => (StatusCode::OK, Json(EncryptDataResponse::encrypted(content, None))),
        Err(e) => EncryptDataResponse::failed(e.into()),
    }
}

/// Encrypt an uploaded file (multipart fields `file` and `item_cid`)
pub async fn encrypt_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> (StatusCode, Json<EncryptDataResponse>) {
    let limit = state.max_upload_bytes;
    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            return EncryptDataResponse::failed(rejection_error(rejection.status(), rejection.body_text(), limit))
        }
    };

    match encrypt_upload(&state, multipart).await {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(err) => EncryptDataResponse::failed(err),
    }
}

async fn encrypt_upload(state: &AppState, mut multipart: Multipart) -> Result<EncryptDataResponse, ApiError> {
    let limit = state.max_upload_bytes;
    let mut file: Option<(Option<String>, Vec<u8>)> = None;
    let mut item_cid: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                file = Some((filename, bytes.to_vec()));
            }
            "item_cid" => item_cid = Some(field.text().await.map_err(|e| multipart_error(e, limit))?),
            _ => {}
        }
    }

    let (filename, plaintext) = file.ok_or_else(|| ApiError::bad_request("missing multipart field: file"))?;
    let item_cid = item_cid.ok_or_else(|| ApiError::bad_request("missing multipart field: item_cid"))?;

    let content = state
        .service
        .encrypt_content(&plaintext, item_cid.trim(), filename.as_deref())
        .await?;
    Ok(EncryptDataResponse::encrypted(content, filename))
}

fn multipart_error(err: MultipartError, limit: usize) -> ApiError {
    rejection_error(err.status(), err.body_text(), limit)
}

/// Body limit rejections carry the configured limit; anything else keeps the
/// extractor's own status and text
fn rejection_error(status: StatusCode, body_text: String, limit: usize) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large(limit)
    } else {
        ApiError::new(status.as_u16(), body_text)
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemIdForm {
    pub cid: String,
    pub item_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateItemIdResponse {
    pub success: bool,
    pub message: String,
}

/// Bind a listed item id to previously encrypted content
pub async fn update_key_item_id(
    State(state): State<AppState>,
    Form(form): Form<UpdateItemIdForm>,
) -> Result<Json<UpdateItemIdResponse>, ApiError> {
    match state.service.bind_listing(&form.cid, form.item_id).await {
        Ok(()) => Ok(Json(UpdateItemIdResponse {
            success: true,
            message: "Key updated with item ID".to_string(),
        })),
        Err(AccessError::NotFound(_)) => Err(ApiError::not_found("Key not found for this CID")),
        Err(e) => Err(e.into()),
    }
}
