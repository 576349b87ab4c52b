//! Payment rows. Inserts are idempotent on the processor payment id so a
//! replayed webhook can never create a second row.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{AuditEntityType, Payment, PaymentMethod, PaymentStatus};

use super::audit::insert_audit_tx;
use super::{AuditContext, ReservationStore, StoreError};

/// Fields for a new payment row, already reconciled by the caller.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub reservation_id: Uuid,
    pub mp_payment_id: String,
    pub status: PaymentStatus,
    pub gross_amount: Decimal,
    pub platform_fee: Decimal,
    pub mp_fee: Decimal,
    pub net_amount: Decimal,
    pub payment_method: Option<PaymentMethod>,
    pub payment_type_id: Option<String>,
    pub currency: String,
}

impl ReservationStore {
    /// Insert a payment row unless one already exists for the same external
    /// payment id. Returns `None` on replay — the caller must then skip
    /// payout scheduling and enrollment updates.
    pub async fn insert_payment_idempotent(
        &self,
        payment: NewPayment,
        ctx: AuditContext,
    ) -> Result<Option<Payment>, StoreError> {
        let mut tx = self.pool().begin().await?;

        let inserted = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                reservation_id, mp_payment_id, status, gross_amount,
                platform_fee, mp_fee, net_amount, payment_method,
                payment_type_id, currency
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (mp_payment_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(payment.reservation_id)
        .bind(&payment.mp_payment_id)
        .bind(payment.status)
        .bind(payment.gross_amount)
        .bind(payment.platform_fee)
        .bind(payment.mp_fee)
        .bind(payment.net_amount)
        .bind(payment.payment_method)
        .bind(payment.payment_type_id.as_deref())
        .bind(&payment.currency)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(ref row) = inserted {
            insert_audit_tx(
                &mut tx,
                AuditEntityType::Payment,
                row.id,
                &ctx,
                None,
                Some(row.status.to_snake_case().to_string()),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn get_payment_by_mp_id(
        &self,
        mp_payment_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let payment =
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE mp_payment_id = $1")
                .bind(mp_payment_id)
                .fetch_optional(self.pool())
                .await?;
        Ok(payment)
    }

    pub async fn list_payments_for_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Vec<Payment>, StoreError> {
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE reservation_id = $1 ORDER BY created_at",
        )
        .bind(reservation_id)
        .fetch_all(self.pool())
        .await?;
        Ok(payments)
    }

    /// Flip a payment's status (refund bookkeeping). No-op when the row is
    /// already in the target status or missing.
    pub async fn update_payment_status(
        &self,
        mp_payment_id: &str,
        status: PaymentStatus,
        ctx: AuditContext,
    ) -> Result<Option<Payment>, StoreError> {
        let mut tx = self.pool().begin().await?;

        let updated = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = $2, updated_at = NOW()
            WHERE mp_payment_id = $1 AND status <> $2
            RETURNING *
            "#,
        )
        .bind(mp_payment_id)
        .bind(status)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(ref row) = updated {
            insert_audit_tx(
                &mut tx,
                AuditEntityType::Payment,
                row.id,
                &ctx,
                None,
                Some(status.to_snake_case().to_string()),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(updated)
    }
}

impl PaymentStatus {
    pub(crate) fn to_snake_case(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
            Self::Cancelled => "cancelled",
        }
    }
}
