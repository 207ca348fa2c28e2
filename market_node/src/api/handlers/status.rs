use crate::api::AppState;
use crate::ledger::Ledger;
use crate::storage::KeyStore;
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub blockchain_connected: bool,
    /// Key store backend in use
    pub key_store: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let blockchain_connected = state.service.ledger().is_connected().await;

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        blockchain_connected,
        key_store: state.service.store().backend_name().to_string(),
    })
}
