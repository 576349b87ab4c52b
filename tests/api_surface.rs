//! Handler-level tests over the assembled router: auth gates, request
//! validation, and the webhook's fail-closed behavior. The pool is lazy and
//! never connects — every request here must be decided before any query.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, EncodingKey, Header};
use sqlx::postgres::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use trekko_server::app_state::AppState;
use trekko_server::checkout::CheckoutService;
use trekko_server::completion::CompletionService;
use trekko_server::config::{MercadoPagoConfig, StorageConfig};
use trekko_server::mercadopago::MercadoPagoClient;
use trekko_server::middleware::auth::{AuthClaims, Role, UserType};
use trekko_server::routes;
use trekko_server::storage::BlobStorage;
use trekko_server::store::ReservationStore;
use trekko_server::webhook::WebhookService;

const JWT_SECRET: &str = "test-jwt-secret";

fn test_app(webhook_secret: Option<&str>) -> Router {
    let pool = PgPool::connect_lazy("postgres://localhost/trekko_test")
        .expect("lazy pool construction");
    let store = Arc::new(ReservationStore::new(pool));
    let mp = Arc::new(
        MercadoPagoClient::new(&MercadoPagoConfig {
            access_token: "TEST-TOKEN".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_ms: 500,
        })
        .expect("mp client"),
    );
    let storage = Arc::new(
        BlobStorage::new(&StorageConfig {
            base_url: "http://127.0.0.1:9/bucket".to_string(),
            public_base_url: "http://127.0.0.1:9/bucket".to_string(),
            access_token: String::new(),
        })
        .expect("storage client"),
    );

    let checkout = Arc::new(CheckoutService::new(
        store.clone(),
        mp.clone(),
        "http://localhost:3001".to_string(),
    ));
    let webhook = Arc::new(WebhookService::new(store.clone(), mp.clone()));
    let completion = Arc::new(CompletionService::new(store.clone(), mp.clone()));

    let state = AppState::new(
        store,
        checkout,
        webhook,
        completion,
        mp,
        storage,
        JWT_SECRET.to_string(),
        webhook_secret.map(|s| s.to_string()),
    );

    routes::router(state)
}

fn token(role: Role, user_type: UserType) -> String {
    let claims = AuthClaims {
        sub: Uuid::new_v4(),
        role,
        user_type,
        email: Some("trekker@example.com".to_string()),
        name: Some("Test User".to_string()),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("token encoding")
}

fn json_request(method: &str, uri: &str, bearer: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

#[tokio::test]
async fn checkout_requires_authentication() {
    let app = test_app(Some("whsec"));
    let request = json_request(
        "POST",
        "/api/checkout",
        None,
        &format!(r#"{{"expedition_id":"{}","quantity":1}}"#, Uuid::new_v4()),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn checkout_rejects_zero_quantity() {
    let app = test_app(Some("whsec"));
    let t = token(Role::User, UserType::Trekker);
    let request = json_request(
        "POST",
        "/api/checkout",
        Some(&t),
        &format!(r#"{{"expedition_id":"{}","quantity":0}}"#, Uuid::new_v4()),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn checkout_rejects_quantity_above_ten() {
    let app = test_app(Some("whsec"));
    let t = token(Role::User, UserType::Trekker);
    let request = json_request(
        "POST",
        "/api/checkout",
        Some(&t),
        &format!(r#"{{"expedition_id":"{}","quantity":11}}"#, Uuid::new_v4()),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn checkout_rejects_invalid_token() {
    let app = test_app(Some("whsec"));
    let request = json_request(
        "POST",
        "/api/checkout",
        Some("definitely-not-a-jwt"),
        &format!(r#"{{"expedition_id":"{}","quantity":1}}"#, Uuid::new_v4()),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn guide_routes_reject_trekkers() {
    let app = test_app(Some("whsec"));
    let t = token(Role::User, UserType::Trekker);
    let request = Request::builder()
        .method("GET")
        .uri("/api/guide/payouts")
        .header(header::AUTHORIZATION, format!("Bearer {t}"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_routes_reject_regular_users() {
    let app = test_app(Some("whsec"));
    let t = token(Role::User, UserType::Guide);
    let request = Request::builder()
        .method("GET")
        .uri("/api/admin/settings")
        .header(header::AUTHORIZATION, format!("Bearer {t}"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn webhook_fails_closed_without_secret() {
    let app = test_app(None);
    let request = json_request(
        "POST",
        "/api/webhooks/mercadopago",
        None,
        r#"{"type":"payment","data":{"id":"123"}}"#,
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn webhook_acknowledges_non_payment_events() {
    let app = test_app(Some("whsec"));
    let request = json_request(
        "POST",
        "/api/webhooks/mercadopago",
        None,
        r#"{"type":"test"}"#,
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_rejects_missing_payment_id() {
    let app = test_app(Some("whsec"));
    let request = json_request(
        "POST",
        "/api/webhooks/mercadopago",
        None,
        r#"{"type":"payment","data":{}}"#,
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_rejects_unsigned_payment_events() {
    let app = test_app(Some("whsec"));
    let request = json_request(
        "POST",
        "/api/webhooks/mercadopago",
        None,
        r#"{"type":"payment","data":{"id":"123"}}"#,
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn contestation_requires_minimum_description() {
    let app = test_app(Some("whsec"));
    let t = token(Role::User, UserType::Trekker);
    let request = json_request(
        "POST",
        &format!("/api/reservations/{}/contest", Uuid::new_v4()),
        Some(&t),
        r#"{"reason":"safety_issues","description":"curto"}"#,
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn verification_document_rejects_unknown_kind() {
    let app = test_app(Some("whsec"));
    let t = token(Role::User, UserType::Guide);
    let request = Request::builder()
        .method("PUT")
        .uri("/api/guide/verification/documents/selfie")
        .header(header::AUTHORIZATION, format!("Bearer {t}"))
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from(vec![0u8; 16]))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
