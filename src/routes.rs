//! Route definitions for the Trekko API

use axum::routing::{get, post, put};
use axum::Router;

use crate::app_state::AppState;
use crate::handlers::*;

// Checkout and reservation routes
pub fn reservation_routes() -> Router<AppState> {
    Router::new()
        .route("/api/checkout", post(create_checkout))
        .route("/api/payments/settings", get(payment_settings))
        .route(
            "/api/payments/cancellation-policies",
            get(cancellation_policies),
        )
        .route("/api/reservations", get(my_reservations))
        .route("/api/reservations/:id", get(get_reservation))
        .route("/api/reservations/:id/cancel", post(cancel_reservation))
        .route("/api/reservations/:id/contest", post(open_contestation))
}

// Expedition lifecycle routes (guide actions + public availability)
pub fn expedition_routes() -> Router<AppState> {
    Router::new()
        .route("/api/expeditions/:id/availability", get(expedition_availability))
        .route("/api/expeditions/:id/complete", post(complete_expedition))
        .route(
            "/api/expeditions/:id/no-show/:reservation_id",
            post(mark_no_show),
        )
}

// Guide financial routes
pub fn guide_routes() -> Router<AppState> {
    Router::new()
        .route("/api/guide/payouts", get(guide_payouts))
        .route(
            "/api/guide/verification",
            get(get_verification).post(submit_verification),
        )
        .route(
            "/api/guide/verification/documents/:kind",
            put(upload_verification_document),
        )
        .route("/api/contestations/:id/respond", post(respond_contestation))
}

// Payment processor webhook
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/api/webhooks/mercadopago", post(mercadopago_webhook))
}

// Admin routes
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/verifications/pending", get(list_pending_verifications))
        .route(
            "/api/admin/verifications/:user_id/review",
            post(review_verification),
        )
        .route("/api/admin/contestations", get(list_open_contestations))
        .route(
            "/api/admin/contestations/:id/resolve",
            post(resolve_contestation),
        )
        .route("/api/admin/settings", get(get_settings).put(update_setting))
        .route(
            "/api/admin/audit/:entity_type/:entity_id",
            get(audit_for_entity),
        )
}

/// Assemble the full application router.
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .merge(reservation_routes())
        .merge(expedition_routes())
        .merge(guide_routes())
        .merge(webhook_routes())
        .merge(admin_routes())
        .with_state(app_state)
}
