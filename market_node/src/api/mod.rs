//! HTTP surface of the key custody node

use crate::policy::KeyReleaseService;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub mod errors;
pub mod handlers;

pub use errors::ApiError;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<KeyReleaseService>,
    pub max_upload_bytes: usize,
    /// Bearer token for `/admin`; the admin routes refuse every call when unset
    pub admin_token: Option<String>,
}

impl AppState {
    pub fn new(service: Arc<KeyReleaseService>, max_upload_bytes: usize) -> Self {
        Self {
            service,
            max_upload_bytes,
            admin_token: None,
        }
    }

    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }
}

pub fn router(state: AppState) -> Router {
    use handlers::{admin, buyer, seller, status};

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Seller
        .route("/encrypt_data", post(seller::encrypt_data))
        .route("/encrypt_file", post(seller::encrypt_file))
        .route("/update_key_item_id", post(seller::update_key_item_id))
        // Buyer
        .route("/request_decryption_key", post(buyer::request_decryption_key))
        .route("/verify_integrity", post(buyer::verify_integrity))
        .route("/item/:item_id", get(buyer::get_item))
        // Operations
        .route("/health", get(status::health))
        .route("/admin/keys", get(admin::list_keys))
        .route(
            "/admin/keys/:cid",
            get(admin::get_key_summary).delete(admin::delete_key),
        )
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
