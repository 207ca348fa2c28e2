mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use common::{CountingLedger, Wallet};
use market_node::api::{self, AppState};
use market_node::crypto::{self, EncryptionKey, Iv};
use market_node::storage::MemoryKeyStore;
use market_node::KeyReleaseService;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "test-admin-token";

fn app(ledger: Arc<CountingLedger>) -> Router {
    let service = Arc::new(KeyReleaseService::new(Arc::new(MemoryKeyStore::new()), ledger));
    api::router(AppState::new(service, 1024 * 1024).with_admin_token(ADMIN_TOKEN))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_form(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn admin(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn encrypt(app: &Router, cid: &str, plaintext: &[u8]) -> Value {
    let (status, body) = send(
        app,
        post_json(
            "/encrypt_data",
            json!({ "file_content": BASE64_STANDARD.encode(plaintext), "item_cid": cid }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body
}

#[tokio::test]
async fn test_purchase_flow_over_http() {
    let ledger = Arc::new(CountingLedger::new());
    let app = app(ledger.clone());
    let buyer = Wallet::random();

    let encrypted = encrypt(&app, "Qm123", b"dataset-bytes").await;
    assert_eq!(encrypted["success"], true);
    assert_eq!(encrypted["data_hash"], crypto::hash(b"dataset-bytes"));

    let (status, body) = send(&app, post_form("/update_key_item_id", "cid=Qm123&item_id=7")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    ledger.list(7, buyer.address, &crypto::hash(b"dataset-bytes"));
    let request = serde_json::to_value(buyer.request_key(7)).unwrap();
    let (status, body) = send(&app, post_json("/request_decryption_key", request)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["iv"], encrypted["iv"]);

    let key = EncryptionKey::from_base64(body["key"].as_str().unwrap()).unwrap();
    let iv = Iv::from_base64(body["iv"].as_str().unwrap()).unwrap();
    let ciphertext = BASE64_STANDARD
        .decode(encrypted["encrypted_content"].as_str().unwrap())
        .unwrap();
    assert_eq!(crypto::decrypt(&ciphertext, &key, &iv).unwrap(), b"dataset-bytes");

    let (status, body) = send(
        &app,
        post_json(
            "/verify_integrity",
            json!({ "item_id": 7, "data_hash": format!("0x{}", crypto::hash(b"dataset-bytes")) }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
}

#[tokio::test]
async fn test_denials_map_to_status_codes_with_empty_keys() {
    let ledger = Arc::new(CountingLedger::new());
    let app = app(ledger.clone());
    let buyer = Wallet::random();
    let stranger = Wallet::random();

    encrypt(&app, "Qm123", b"dataset-bytes").await;
    send(&app, post_form("/update_key_item_id", "cid=Qm123&item_id=7")).await;
    ledger.list(7, buyer.address, &crypto::hash(b"dataset-bytes"));
    ledger.list(8, buyer.address, &crypto::hash(b"other"));

    let mut forged = serde_json::to_value(stranger.request_key(7)).unwrap();
    forged["wallet_address"] = json!(buyer.address_hex());
    let not_owner = serde_json::to_value(stranger.request_key(7)).unwrap();
    let unbound = serde_json::to_value(buyer.request_key(8)).unwrap();

    for (request, expected) in [
        (forged, StatusCode::UNAUTHORIZED),
        (not_owner, StatusCode::FORBIDDEN),
        (unbound, StatusCode::NOT_FOUND),
    ] {
        let (status, body) = send(&app, post_json("/request_decryption_key", request)).await;
        assert_eq!(status, expected, "{}", body);
        assert_eq!(body["success"], false);
        assert_eq!(body["key"], "");
        assert_eq!(body["iv"], "");
        assert_eq!(body["data_hash"], "");
        assert!(body["error"].is_string());
    }
    assert_eq!(ledger.ownership_calls(), 2);
}

#[tokio::test]
async fn test_ledger_outage_is_503() {
    let ledger = Arc::new(CountingLedger::new());
    let app = app(ledger.clone());
    let buyer = Wallet::random();
    ledger.set_offline(true);

    let request = serde_json::to_value(buyer.request_key(7)).unwrap();
    let (status, body) = send(&app, post_json("/request_decryption_key", request)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["key"], "");

    let (status, body) = send(&app, post_json("/verify_integrity", json!({ "item_id": 7, "data_hash": "ab" }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["valid"], false);

    let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["blockchain_connected"], false);
    assert_eq!(body["key_store"], "memory");
}

#[tokio::test]
async fn test_item_lookup() {
    let ledger = Arc::new(CountingLedger::new());
    let app = app(ledger.clone());
    let owner = Wallet::random();
    ledger.list(7, owner.address, &crypto::hash(b"dataset-bytes"));

    let (status, body) = send(&app, Request::get("/item/7").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["item_id"], 7);
    assert_eq!(body["owner"], owner.address_hex().to_lowercase());
    assert_eq!(body["data_hash"], crypto::hash(b"dataset-bytes"));
    assert_eq!(body["price"], "1000000000000000000");

    let (status, body) = send(&app, Request::get("/item/99").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Item not found");

    ledger.set_offline(true);
    let (status, _) = send(&app, Request::get("/item/7").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_seller_input_errors() {
    let app = app(Arc::new(CountingLedger::new()));

    let (status, body) = send(
        &app,
        post_json("/encrypt_data", json!({ "file_content": "%%%", "item_cid": "Qm1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["encrypted_content"], "");

    let (status, _) = send(
        &app,
        post_json("/encrypt_data", json!({ "file_content": "", "item_cid": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, post_form("/update_key_item_id", "cid=QmMissing&item_id=3")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    encrypt(&app, "QmA", b"a").await;
    encrypt(&app, "QmB", b"b").await;
    send(&app, post_form("/update_key_item_id", "cid=QmA&item_id=5")).await;
    let (status, body) = send(&app, post_form("/update_key_item_id", "cid=QmB&item_id=5")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["details"]["content_id"], "QmA");
}

#[tokio::test]
async fn test_encrypt_file_multipart() {
    let app = app(Arc::new(CountingLedger::new()));
    let boundary = "X-MARKET-BOUNDARY";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"item_cid\"\r\n\r\nQmUpload\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"train.csv\"\r\n\
         Content-Type: text/csv\r\n\r\na,b\n1,2\n\r\n--{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/encrypt_file")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["filename"], "train.csv");
    assert_eq!(body["data_hash"], crypto::hash(b"a,b\n1,2\n"));

    let (status, summary) = send(&app, admin(Method::GET, "/admin/keys/QmUpload", Some(ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["metadata"]["filename"], "train.csv");
}

#[tokio::test]
async fn test_admin_endpoints() {
    let app = app(Arc::new(CountingLedger::new()));
    encrypt(&app, "QmAdmin", b"secret dataset").await;

    let (status, _) = send(&app, admin(Method::GET, "/admin/keys", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, admin(Method::GET, "/admin/keys", Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, admin(Method::GET, "/admin/keys", Some(ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["QmAdmin"]));

    let (status, summary) = send(&app, admin(Method::GET, "/admin/keys/QmAdmin", Some(ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["content_id"], "QmAdmin");
    assert!(summary.get("key").is_none());
    assert!(summary.get("iv").is_none());

    let (status, body) = send(&app, admin(Method::DELETE, "/admin/keys/QmAdmin", Some(ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);
    let (_, body) = send(&app, admin(Method::DELETE, "/admin/keys/QmAdmin", Some(ADMIN_TOKEN))).await;
    assert_eq!(body["deleted"], false);

    let (status, _) = send(&app, admin(Method::GET, "/admin/keys/QmAdmin", Some(ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_disabled_without_token() {
    let service = Arc::new(KeyReleaseService::new(
        Arc::new(MemoryKeyStore::new()),
        Arc::new(CountingLedger::new()),
    ));
    let app = api::router(AppState::new(service, 1024));

    let (status, _) = send(&app, admin(Method::GET, "/admin/keys", Some(ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let service = Arc::new(KeyReleaseService::new(
        Arc::new(MemoryKeyStore::new()),
        Arc::new(CountingLedger::new()),
    ));
    let app = api::router(AppState::new(service, 1024));

    let request = post_json(
        "/encrypt_data",
        json!({ "file_content": BASE64_STANDARD.encode(vec![0u8; 4096]), "item_cid": "QmHuge" }),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["success"], false);
    assert_eq!(body["encrypted_content"], "");
    assert_eq!(body["iv"], "");
    assert_eq!(body["error"], "Upload too large");
}

#[tokio::test]
async fn test_oversized_multipart_upload_is_rejected() {
    let service = Arc::new(KeyReleaseService::new(
        Arc::new(MemoryKeyStore::new()),
        Arc::new(CountingLedger::new()),
    ));
    let app = api::router(AppState::new(service, 1024));
    let boundary = "X-MARKET-BOUNDARY";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"item_cid\"\r\n\r\nQmHuge\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"big.bin\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n{data}\r\n--{b}--\r\n",
        b = boundary,
        data = "x".repeat(4096)
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/encrypt_file")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["success"], false);
    assert_eq!(body["encrypted_content"], "");
    assert_eq!(body["error"], "Upload too large");
}

#[tokio::test]
async fn test_multipart_without_file_is_bad_request() {
    let app = app(Arc::new(CountingLedger::new()));
    let boundary = "X-MARKET-BOUNDARY";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"item_cid\"\r\n\r\nQmEmpty\r\n--{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/encrypt_file")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "missing multipart field: file");
}
