//! Trekko Reservations Backend Server
//!
//! Main entry point: loads configuration, connects to Postgres, runs the
//! schema migrations, starts the background jobs, and serves the API.

use axum::http::{HeaderValue, Method};
use axum::routing::get;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod app_state;
mod checkout;
mod completion;
mod config;
mod fees;
mod handlers;
mod mercadopago;
mod middleware;
mod models;
mod routes;
mod storage;
mod store;
mod webhook;
mod workers;

use app_state::AppState;
use checkout::CheckoutService;
use completion::CompletionService;
use config::Config;
use mercadopago::MercadoPagoClient;
use storage::BlobStorage;
use store::ReservationStore;
use webhook::WebhookService;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trekko_server=info,tower_http=info".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env().expect("invalid configuration");

    // Initialize database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Database connected successfully");

    // Initialize services
    let store = Arc::new(ReservationStore::new(db_pool.clone()));
    let mp = Arc::new(MercadoPagoClient::new(&config.mercadopago).expect("mercado pago client"));
    let blob_storage = Arc::new(BlobStorage::new(&config.storage).expect("blob storage client"));

    let checkout_service = Arc::new(CheckoutService::new(
        store.clone(),
        mp.clone(),
        config.public_base_url.clone(),
    ));
    let webhook_service = Arc::new(WebhookService::new(store.clone(), mp.clone()));
    let completion_service = Arc::new(CompletionService::new(store.clone(), mp.clone()));

    // Create shared app state
    let app_state = AppState::new(
        store,
        checkout_service,
        webhook_service,
        completion_service,
        mp,
        blob_storage,
        config.jwt_secret.clone(),
        config.webhook_secret.clone(),
    );

    // Start background jobs (expiry sweep, lifecycle advancement, release
    // sweep, payout dispatch)
    let _scheduler = workers::start(app_state.clone())
        .await
        .expect("Failed to start background jobs");

    // Create the app router
    let app = axum::Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .merge(routes::router(app_state))
        .layer(TraceLayer::new_for_http())
        .layer(configure_cors(&config));

    let addr = config.listen_addr();
    tracing::info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listen address");
    axum::serve(listener, app).await.expect("server error");
}

async fn root() -> &'static str {
    "Trekko API Server"
}

async fn health_check() -> &'static str {
    "OK"
}

fn configure_cors(config: &Config) -> CorsLayer {
    if config.cors_allowed_origins.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .map(|s| s.parse().expect("Invalid CORS origin"))
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}
