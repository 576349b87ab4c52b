//! API handlers for the reservations backend.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;
use validator::Validate;

use crate::app_state::AppState;
use crate::checkout::{CancelOutcome, CheckoutError, CheckoutOutcome};
use crate::completion::{CompletionError, CompletionOutcome, ContestationVerdict};
use crate::middleware::auth::{AdminUser, AuthenticatedUser, GuideUser};
use crate::models::{
    ApiResponse, AuditEntityType, AuditLogEntry, CancellationPolicy, Contestation,
    ContestationReason, DocumentType, GuideVerification, Payment, Payout, PixKeyType,
    PlatformSetting, Reservation, ReservationStatus, VerificationStatus,
};
use crate::store::{StoreError, SubmitVerification};
use crate::webhook::{WebhookNotification, WebhookOutcome};

type HandlerError<T> = (StatusCode, Json<ApiResponse<T>>);

fn failure<T>(status: StatusCode, message: impl Into<String>) -> HandlerError<T> {
    (status, Json(ApiResponse::err(message)))
}

fn store_error<T>(e: StoreError) -> HandlerError<T> {
    let status = match &e {
        StoreError::ExpeditionNotFound | StoreError::ReservationNotFound => StatusCode::NOT_FOUND,
        StoreError::ExpeditionNotBookable | StoreError::CapacityExceeded { .. } => {
            StatusCode::BAD_REQUEST
        }
        StoreError::StaleTransition { .. } => StatusCode::CONFLICT,
        StoreError::ForbiddenTransition { .. } | StoreError::Database(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, "store error");
        return failure(status, "Erro interno");
    }
    failure(status, e.to_string())
}

fn checkout_error<T>(e: CheckoutError) -> HandlerError<T> {
    match e {
        CheckoutError::Store(inner) => store_error(inner),
        CheckoutError::Processor(inner) => {
            tracing::error!(error = %inner, "payment processor error");
            failure(StatusCode::BAD_GATEWAY, "Falha no processador de pagamento")
        }
        CheckoutError::Forbidden => failure(StatusCode::FORBIDDEN, "Acesso negado"),
        CheckoutError::InvalidState(message) => failure(StatusCode::BAD_REQUEST, message),
    }
}

fn completion_error<T>(e: CompletionError) -> HandlerError<T> {
    match e {
        CompletionError::Store(inner) => store_error(inner),
        CompletionError::Processor(inner) => {
            tracing::error!(error = %inner, "payment processor error");
            failure(StatusCode::BAD_GATEWAY, "Falha no processador de pagamento")
        }
        CompletionError::Forbidden => failure(StatusCode::FORBIDDEN, "Não autorizado"),
        CompletionError::InvalidState(message) => failure(StatusCode::BAD_REQUEST, message),
        CompletionError::WindowExpired => {
            failure(StatusCode::BAD_REQUEST, "Período de contestação expirado")
        }
        CompletionError::ContestationNotFound => {
            failure(StatusCode::NOT_FOUND, "Contestação não encontrada")
        }
    }
}

fn validation_error<T>(e: validator::ValidationErrors) -> HandlerError<T> {
    failure(StatusCode::BAD_REQUEST, format!("Validation error: {e}"))
}

// ===== Checkout & Reservations =====

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCheckoutRequest {
    pub expedition_id: Uuid,
    #[validate(range(min = 1, max = 10))]
    pub quantity: i32,
}

/// Create a reservation and a hosted checkout session for it.
pub async fn create_checkout(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateCheckoutRequest>,
) -> Result<Json<ApiResponse<CheckoutOutcome>>, HandlerError<CheckoutOutcome>> {
    request.validate().map_err(validation_error)?;

    let outcome = app_state
        .checkout
        .create_checkout(&user, request.expedition_id, request.quantity)
        .await
        .map_err(checkout_error)?;

    Ok(Json(ApiResponse::ok(outcome)))
}

pub async fn my_reservations(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<Vec<Reservation>>>, HandlerError<Vec<Reservation>>> {
    let reservations = app_state
        .store
        .list_user_reservations(user.id)
        .await
        .map_err(store_error)?;
    Ok(Json(ApiResponse::ok(reservations)))
}

#[derive(Debug, serde::Serialize)]
pub struct ReservationDetail {
    #[serde(flatten)]
    pub reservation: Reservation,
    pub payments: Vec<Payment>,
    pub payout: Option<Payout>,
    pub contestation: Option<Contestation>,
}

/// Reservation detail, visible to its owner, the expedition's guide, and
/// admins.
pub async fn get_reservation(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ReservationDetail>>, HandlerError<ReservationDetail>> {
    let reservation = app_state
        .store
        .get_reservation(id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "Reserva não encontrada"))?;

    let expedition = app_state
        .store
        .get_expedition(reservation.expedition_id)
        .await
        .map_err(store_error)?;

    let is_owner = reservation.user_id == user.id;
    let is_guide = expedition.as_ref().is_some_and(|e| e.guide_id == user.id);
    if !is_owner && !is_guide && !user.is_admin() {
        return Err(failure(StatusCode::FORBIDDEN, "Acesso negado"));
    }

    let payments = app_state
        .store
        .list_payments_for_reservation(id)
        .await
        .map_err(store_error)?;
    let payout = app_state
        .store
        .get_payout_for_reservation(id)
        .await
        .map_err(store_error)?;
    let contestation = app_state
        .store
        .get_open_contestation_for_reservation(id)
        .await
        .map_err(store_error)?;

    Ok(Json(ApiResponse::ok(ReservationDetail {
        reservation,
        payments,
        payout,
        contestation,
    })))
}

#[derive(Debug, Deserialize, Default)]
pub struct CancelReservationRequest {
    pub reason: Option<String>,
}

/// Cancel a reservation, returning the computed refund and the policy
/// bracket explanation.
pub async fn cancel_reservation(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelReservationRequest>,
) -> Result<Json<ApiResponse<CancelOutcome>>, HandlerError<CancelOutcome>> {
    let outcome = app_state
        .checkout
        .cancel_reservation(&user, id, request.reason)
        .await
        .map_err(checkout_error)?;
    Ok(Json(ApiResponse::ok(outcome)))
}

/// Public payment configuration shown on the booking page.
#[derive(Debug, serde::Serialize)]
pub struct PaymentSettingsResponse {
    pub platform_fee_percent: Decimal,
    pub cancellation_policy: Option<CancellationPolicy>,
}

pub async fn payment_settings(
    State(app_state): State<AppState>,
) -> Result<Json<ApiResponse<PaymentSettingsResponse>>, HandlerError<PaymentSettingsResponse>> {
    let platform_fee_percent = app_state
        .store
        .platform_fee_percent()
        .await
        .map_err(store_error)?;
    let cancellation_policy = app_state
        .store
        .default_cancellation_policy()
        .await
        .map_err(store_error)?;

    Ok(Json(ApiResponse::ok(PaymentSettingsResponse {
        platform_fee_percent,
        cancellation_policy,
    })))
}

pub async fn cancellation_policies(
    State(app_state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<CancellationPolicy>>>, HandlerError<Vec<CancellationPolicy>>> {
    let policies = app_state
        .store
        .list_cancellation_policies()
        .await
        .map_err(store_error)?;
    Ok(Json(ApiResponse::ok(policies)))
}

// ===== Contestations =====

#[derive(Debug, Deserialize, Validate)]
pub struct OpenContestationRequest {
    pub reason: ContestationReason,
    #[validate(length(min = 10, max = 2000))]
    pub description: String,
    #[validate(length(max = 5))]
    #[serde(default)]
    pub evidence_urls: Vec<String>,
}

pub async fn open_contestation(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(reservation_id): Path<Uuid>,
    Json(request): Json<OpenContestationRequest>,
) -> Result<Json<ApiResponse<Contestation>>, HandlerError<Contestation>> {
    request.validate().map_err(validation_error)?;

    let contestation = app_state
        .completion
        .open_contestation(
            &user,
            reservation_id,
            request.reason,
            request.description,
            request.evidence_urls,
        )
        .await
        .map_err(completion_error)?;

    Ok(Json(ApiResponse::ok(contestation)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RespondContestationRequest {
    #[validate(length(min = 10, max = 2000))]
    pub response: String,
}

pub async fn respond_contestation(
    State(app_state): State<AppState>,
    GuideUser(guide): GuideUser,
    Path(id): Path<Uuid>,
    Json(request): Json<RespondContestationRequest>,
) -> Result<Json<ApiResponse<Contestation>>, HandlerError<Contestation>> {
    request.validate().map_err(validation_error)?;

    let contestation = app_state
        .completion
        .respond_contestation(&guide, id, request.response)
        .await
        .map_err(completion_error)?;

    Ok(Json(ApiResponse::ok(contestation)))
}

// ===== Expeditions (guide actions) =====

/// Guide marks an expedition completed; starts the contestation window for
/// all of its active reservations.
pub async fn complete_expedition(
    State(app_state): State<AppState>,
    GuideUser(guide): GuideUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CompletionOutcome>>, HandlerError<CompletionOutcome>> {
    let outcome = app_state
        .completion
        .complete_expedition(&guide, id)
        .await
        .map_err(completion_error)?;
    Ok(Json(ApiResponse::ok(outcome)))
}

pub async fn mark_no_show(
    State(app_state): State<AppState>,
    GuideUser(guide): GuideUser,
    Path((expedition_id, reservation_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<Reservation>>, HandlerError<Reservation>> {
    let reservation = app_state
        .completion
        .mark_no_show(&guide, expedition_id, reservation_id)
        .await
        .map_err(completion_error)?;
    Ok(Json(ApiResponse::ok(reservation)))
}

pub async fn guide_payouts(
    State(app_state): State<AppState>,
    GuideUser(guide): GuideUser,
) -> Result<Json<ApiResponse<Vec<Payout>>>, HandlerError<Vec<Payout>>> {
    let payouts = app_state
        .store
        .list_guide_payouts(guide.id)
        .await
        .map_err(store_error)?;
    Ok(Json(ApiResponse::ok(payouts)))
}

// ===== Guide verification =====

pub async fn get_verification(
    State(app_state): State<AppState>,
    GuideUser(guide): GuideUser,
) -> Result<Json<ApiResponse<Option<GuideVerification>>>, HandlerError<Option<GuideVerification>>> {
    let verification = app_state
        .store
        .get_verification(guide.id)
        .await
        .map_err(store_error)?;
    Ok(Json(ApiResponse::ok(verification)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitVerificationRequest {
    pub document_type: DocumentType,
    #[validate(length(min = 11, max = 14))]
    pub document_number: String,
    pub pix_key_type: PixKeyType,
    #[validate(length(min = 1, max = 256))]
    pub pix_key: String,
    #[validate(length(min = 3, max = 256))]
    pub pix_key_holder_name: String,
    pub accepted_intermediation_terms: bool,
    pub accepted_payout_terms: bool,
    pub accepted_contestation_policy: bool,
}

pub async fn submit_verification(
    State(app_state): State<AppState>,
    GuideUser(guide): GuideUser,
    Json(request): Json<SubmitVerificationRequest>,
) -> Result<Json<ApiResponse<GuideVerification>>, HandlerError<GuideVerification>> {
    request.validate().map_err(validation_error)?;

    if matches!(request.pix_key_type, PixKeyType::Cpf | PixKeyType::Cnpj)
        && request.pix_key != request.document_number
    {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            "A chave PIX deve pertencer ao mesmo CPF/CNPJ cadastrado",
        ));
    }

    if !request.accepted_intermediation_terms
        || !request.accepted_payout_terms
        || !request.accepted_contestation_policy
    {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            "Todos os termos devem ser aceitos",
        ));
    }

    let verification = app_state
        .store
        .upsert_verification(
            guide.id,
            SubmitVerification {
                document_type: request.document_type,
                document_number: request.document_number,
                pix_key_type: request.pix_key_type,
                pix_key: request.pix_key,
                pix_key_holder_name: request.pix_key_holder_name,
                accepted_intermediation_terms: request.accepted_intermediation_terms,
                accepted_payout_terms: request.accepted_payout_terms,
                accepted_contestation_policy: request.accepted_contestation_policy,
            },
            crate::store::AuditContext::guide("verification_submitted", guide.id),
        )
        .await
        .map_err(store_error)?;

    Ok(Json(ApiResponse::ok(verification)))
}

const MAX_DOCUMENT_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, serde::Serialize)]
pub struct DocumentUploadResponse {
    pub url: String,
}

/// Upload a verification document (`document` or `bank-proof`) as a raw
/// body; the stored URL is attached to the guide's verification record.
pub async fn upload_verification_document(
    State(app_state): State<AppState>,
    GuideUser(guide): GuideUser,
    Path(kind): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<DocumentUploadResponse>>, HandlerError<DocumentUploadResponse>> {
    if kind != "document" && kind != "bank-proof" {
        return Err(failure(StatusCode::NOT_FOUND, "Tipo de documento inválido"));
    }

    if body.len() > MAX_DOCUMENT_BYTES {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            "Arquivo deve ter no máximo 5MB",
        ));
    }

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let key = format!("verification/{}/{}-{}", guide.id, kind, Uuid::new_v4());
    let put = app_state
        .storage
        .put(&key, body.to_vec(), &content_type)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "document upload failed");
            failure(StatusCode::BAD_GATEWAY, "Falha ao enviar documento")
        })?;

    let (document_url, bank_proof_url) = if kind == "document" {
        (Some(put.url.as_str()), None)
    } else {
        (None, Some(put.url.as_str()))
    };

    app_state
        .store
        .set_verification_document(guide.id, document_url, bank_proof_url)
        .await
        .map_err(store_error)?
        .ok_or_else(|| {
            failure(
                StatusCode::BAD_REQUEST,
                "Envie os dados de verificação antes do documento",
            )
        })?;

    Ok(Json(ApiResponse::ok(DocumentUploadResponse { url: put.url })))
}

// ===== Webhook =====

fn verify_webhook_signature(
    headers: &HeaderMap,
    secret: &str,
    data_id: &str,
) -> bool {
    let Some(signature) = headers.get("x-signature").and_then(|v| v.to_str().ok()) else {
        return false;
    };

    let mut ts = None;
    let mut v1 = None;
    for part in signature.split(',') {
        match part.trim().split_once('=') {
            Some(("ts", value)) => ts = Some(value.to_string()),
            Some(("v1", value)) => v1 = Some(value.to_string()),
            _ => {}
        }
    }
    let (Some(ts), Some(v1)) = (ts, v1) else {
        return false;
    };

    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let manifest = if request_id.is_empty() {
        format!("id:{data_id};ts:{ts};")
    } else {
        format!("id:{data_id};request-id:{request_id};ts:{ts};")
    };

    let Ok(expected) = hex::decode(v1) else {
        return false;
    };

    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(manifest.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Webhook endpoint for payment notifications from the processor.
///
/// Benign duplicates and lost races return 200 so delivery is not retried
/// forever; genuine internal failures return 5xx so it is.
pub async fn mercadopago_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<ApiResponse<()>>) {
    // Fail-closed: if the secret is not configured, reject all requests.
    let Some(secret) = app_state
        .webhook_secret
        .as_deref()
        .filter(|s| !s.is_empty())
    else {
        tracing::error!("webhook secret not configured - rejecting request");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::err("Webhook endpoint is not configured")),
        );
    };

    let notification: WebhookNotification = match serde_json::from_slice(&body) {
        Ok(notification) => notification,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::err("Invalid webhook payload")),
            )
        }
    };

    if notification.kind.as_deref() != Some("payment") {
        return (StatusCode::OK, Json(ApiResponse::ok(())));
    }

    let Some(payment_id) = notification.data.and_then(|d| d.id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err("Missing payment ID")),
        );
    };

    if !verify_webhook_signature(&headers, secret, &payment_id) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::err("Invalid webhook signature")),
        );
    }

    match app_state.webhook.process_payment_event(&payment_id).await {
        Ok(WebhookOutcome::Processed) => (StatusCode::OK, Json(ApiResponse::ok(()))),
        Ok(WebhookOutcome::Ignored(reason)) => {
            tracing::info!(%payment_id, reason, "webhook ignored");
            (StatusCode::OK, Json(ApiResponse::ok(())))
        }
        Ok(WebhookOutcome::BadRequest(message)) => {
            (StatusCode::BAD_REQUEST, Json(ApiResponse::err(message)))
        }
        Ok(WebhookOutcome::NotFound(message)) => {
            (StatusCode::NOT_FOUND, Json(ApiResponse::err(message)))
        }
        Err(e) => {
            tracing::error!(%payment_id, error = %e, "webhook processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("Webhook handler failed")),
            )
        }
    }
}

// ===== Admin =====

pub async fn list_pending_verifications(
    State(app_state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<ApiResponse<Vec<GuideVerification>>>, HandlerError<Vec<GuideVerification>>> {
    let pending = app_state
        .store
        .list_pending_verifications()
        .await
        .map_err(store_error)?;
    Ok(Json(ApiResponse::ok(pending)))
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Deserialize)]
pub struct ReviewVerificationRequest {
    pub status: ReviewDecision,
    pub rejection_reason: Option<String>,
    pub notes: Option<String>,
}

pub async fn review_verification(
    State(app_state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
    Json(request): Json<ReviewVerificationRequest>,
) -> Result<Json<ApiResponse<GuideVerification>>, HandlerError<GuideVerification>> {
    let status = match request.status {
        ReviewDecision::Approved => VerificationStatus::Approved,
        ReviewDecision::Rejected => VerificationStatus::Rejected,
    };

    let verification = app_state
        .store
        .review_verification(
            user_id,
            status,
            request.rejection_reason.as_deref(),
            request.notes.as_deref(),
            admin.id,
            crate::store::AuditContext::admin("verification_reviewed", admin.id),
        )
        .await
        .map_err(store_error)?
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "Verificação não encontrada"))?;

    Ok(Json(ApiResponse::ok(verification)))
}

pub async fn list_open_contestations(
    State(app_state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<ApiResponse<Vec<Contestation>>>, HandlerError<Vec<Contestation>>> {
    let contestations = app_state
        .store
        .list_open_contestations()
        .await
        .map_err(store_error)?;
    Ok(Json(ApiResponse::ok(contestations)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResolveContestationRequest {
    pub verdict: ContestationVerdict,
    #[validate(length(min = 3, max = 2000))]
    pub resolution: String,
    pub refund_amount: Option<Decimal>,
}

pub async fn resolve_contestation(
    State(app_state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveContestationRequest>,
) -> Result<Json<ApiResponse<Contestation>>, HandlerError<Contestation>> {
    request.validate().map_err(validation_error)?;

    let contestation = app_state
        .completion
        .resolve_contestation(
            &admin,
            id,
            request.verdict,
            request.resolution,
            request.refund_amount,
        )
        .await
        .map_err(completion_error)?;

    Ok(Json(ApiResponse::ok(contestation)))
}

pub async fn get_settings(
    State(app_state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<ApiResponse<Vec<PlatformSetting>>>, HandlerError<Vec<PlatformSetting>>> {
    let settings = app_state.store.list_settings().await.map_err(store_error)?;
    Ok(Json(ApiResponse::ok(settings)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSettingRequest {
    #[validate(length(min = 1, max = 128))]
    pub key: String,
    #[validate(length(min = 1, max = 1024))]
    pub value: String,
}

pub async fn update_setting(
    State(app_state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(request): Json<UpdateSettingRequest>,
) -> Result<Json<ApiResponse<()>>, HandlerError<()>> {
    request.validate().map_err(validation_error)?;

    app_state
        .store
        .set_setting(&request.key, &request.value, Some(admin.id))
        .await
        .map_err(store_error)?;

    Ok(Json(ApiResponse::ok(())))
}

/// Audit history for one entity (`reservation`, `payment`, `payout`,
/// `guide_verification`).
pub async fn audit_for_entity(
    State(app_state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path((entity_type, entity_id)): Path<(String, Uuid)>,
) -> Result<Json<ApiResponse<Vec<AuditLogEntry>>>, HandlerError<Vec<AuditLogEntry>>> {
    let entity_type = match entity_type.as_str() {
        "reservation" => AuditEntityType::Reservation,
        "payment" => AuditEntityType::Payment,
        "payout" => AuditEntityType::Payout,
        "guide_verification" => AuditEntityType::GuideVerification,
        _ => {
            return Err(failure(
                StatusCode::BAD_REQUEST,
                "Tipo de entidade inválido",
            ))
        }
    };

    let entries = app_state
        .store
        .audit_for_entity(entity_type, entity_id)
        .await
        .map_err(store_error)?;

    Ok(Json(ApiResponse::ok(entries)))
}

/// Expedition status snapshot used by the booking page: remaining spots from
/// the authoritative paid-reservation sum.
pub async fn expedition_availability(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AvailabilityResponse>>, HandlerError<AvailabilityResponse>> {
    let expedition = app_state
        .store
        .get_expedition(id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "Expedição não encontrada"))?;

    let paid = app_state
        .store
        .list_expedition_reservations_in(id, &[ReservationStatus::Paid])
        .await
        .map_err(store_error)?;
    let booked: i32 = paid.iter().map(|r| r.quantity).sum();

    Ok(Json(ApiResponse::ok(AvailabilityResponse {
        expedition_id: id,
        capacity: expedition.capacity,
        booked,
        available: (expedition.capacity - booked).max(0),
        bookable: expedition.status.is_bookable(),
    })))
}

#[derive(Debug, serde::Serialize)]
pub struct AvailabilityResponse {
    pub expedition_id: Uuid,
    pub capacity: i32,
    pub booked: i32,
    pub available: i32,
    pub bookable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature_headers(secret: &str, data_id: &str, ts: &str, request_id: Option<&str>) -> HeaderMap {
        let manifest = match request_id {
            Some(rid) => format!("id:{data_id};request-id:{rid};ts:{ts};"),
            None => format!("id:{data_id};ts:{ts};"),
        };
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(manifest.as_bytes());
        let v1 = hex::encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert("x-signature", format!("ts={ts},v1={v1}").parse().unwrap());
        if let Some(rid) = request_id {
            headers.insert("x-request-id", rid.parse().unwrap());
        }
        headers
    }

    #[test]
    fn accepts_valid_signature() {
        let headers = signature_headers("whsec", "12345", "1717171717", None);
        assert!(verify_webhook_signature(&headers, "whsec", "12345"));
    }

    #[test]
    fn accepts_valid_signature_with_request_id() {
        let headers = signature_headers("whsec", "12345", "1717171717", Some("req-1"));
        assert!(verify_webhook_signature(&headers, "whsec", "12345"));
    }

    #[test]
    fn rejects_wrong_secret() {
        let headers = signature_headers("other", "12345", "1717171717", None);
        assert!(!verify_webhook_signature(&headers, "whsec", "12345"));
    }

    #[test]
    fn rejects_tampered_payment_id() {
        let headers = signature_headers("whsec", "12345", "1717171717", None);
        assert!(!verify_webhook_signature(&headers, "whsec", "99999"));
    }

    #[test]
    fn rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(!verify_webhook_signature(&headers, "whsec", "12345"));
    }

    #[test]
    fn rejects_malformed_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-signature", "nonsense".parse().unwrap());
        assert!(!verify_webhook_signature(&headers, "whsec", "12345"));
    }
}
