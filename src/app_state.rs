//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::checkout::CheckoutService;
use crate::completion::CompletionService;
use crate::mercadopago::MercadoPagoClient;
use crate::storage::BlobStorage;
use crate::store::ReservationStore;
use crate::webhook::WebhookService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ReservationStore>,
    pub checkout: Arc<CheckoutService>,
    pub webhook: Arc<WebhookService>,
    pub completion: Arc<CompletionService>,
    pub mp: Arc<MercadoPagoClient>,
    pub storage: Arc<BlobStorage>,
    pub jwt_secret: String,
    pub webhook_secret: Option<String>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ReservationStore>,
        checkout: Arc<CheckoutService>,
        webhook: Arc<WebhookService>,
        completion: Arc<CompletionService>,
        mp: Arc<MercadoPagoClient>,
        storage: Arc<BlobStorage>,
        jwt_secret: String,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            store,
            checkout,
            webhook,
            completion,
            mp,
            storage,
            jwt_secret,
            webhook_secret,
        }
    }
}

impl FromRef<AppState> for Arc<ReservationStore> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.store.clone()
    }
}

impl FromRef<AppState> for Arc<CheckoutService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.checkout.clone()
    }
}

impl FromRef<AppState> for Arc<WebhookService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.webhook.clone()
    }
}

impl FromRef<AppState> for Arc<CompletionService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.completion.clone()
    }
}

impl FromRef<AppState> for Arc<MercadoPagoClient> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.mp.clone()
    }
}

impl FromRef<AppState> for Arc<BlobStorage> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.storage.clone()
    }
}
