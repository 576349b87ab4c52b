//! Payout rows. Scheduling is idempotent per reservation; every status
//! change is a conditional update so the dispatch worker, the contestation
//! flow, and admin resolution serialize cleanly.

use rust_decimal::Decimal;
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{AuditEntityType, Payout, PayoutStatus};

use super::audit::insert_audit_tx;
use super::{AuditContext, ReservationStore, StoreError};

/// Fields for a newly scheduled payout.
#[derive(Debug, Clone)]
pub struct NewPayout {
    pub guide_id: Uuid,
    pub reservation_id: Uuid,
    pub gross_amount: Decimal,
    pub platform_fee: Decimal,
    pub gateway_fee: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub scheduled_date: DateTime<Utc>,
}

/// How many times a failed transfer is re-attempted by the dispatch worker.
pub const MAX_PAYOUT_RETRIES: i32 = 3;

impl ReservationStore {
    /// Schedule a payout unless the reservation already has one that is not
    /// `failed`. Returns `None` on the duplicate case (webhook replay or a
    /// blocked payout awaiting resolution).
    pub async fn schedule_payout(
        &self,
        payout: NewPayout,
        ctx: AuditContext,
    ) -> Result<Option<Payout>, StoreError> {
        let mut tx = self.pool().begin().await?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM payouts
            WHERE reservation_id = $1 AND status <> 'failed'
            LIMIT 1
            "#,
        )
        .bind(payout.reservation_id)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, Payout>(
            r#"
            INSERT INTO payouts (
                guide_id, reservation_id, status, gross_amount, platform_fee,
                gateway_fee, net_amount, currency, scheduled_date
            )
            VALUES ($1, $2, 'scheduled', $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(payout.guide_id)
        .bind(payout.reservation_id)
        .bind(payout.gross_amount)
        .bind(payout.platform_fee)
        .bind(payout.gateway_fee)
        .bind(payout.net_amount)
        .bind(&payout.currency)
        .bind(payout.scheduled_date)
        .fetch_one(&mut *tx)
        .await?;

        insert_audit_tx(
            &mut tx,
            AuditEntityType::Payout,
            row.id,
            &ctx,
            None,
            Some("scheduled".to_string()),
        )
        .await?;

        tx.commit().await?;
        Ok(Some(row))
    }

    pub async fn get_payout_for_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<Payout>, StoreError> {
        let payout = sqlx::query_as::<_, Payout>(
            r#"
            SELECT * FROM payouts
            WHERE reservation_id = $1 AND status <> 'failed'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(reservation_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(payout)
    }

    /// Suspend a pending payout because a contestation opened. Payouts that
    /// already reached `processing` or beyond cannot be blocked.
    pub async fn block_payout(
        &self,
        reservation_id: Uuid,
        reason: &str,
        ctx: AuditContext,
    ) -> Result<Option<Payout>, StoreError> {
        let mut tx = self.pool().begin().await?;

        let updated = sqlx::query_as::<_, Payout>(
            r#"
            UPDATE payouts
            SET status = 'blocked', failure_reason = $2, updated_at = NOW()
            WHERE reservation_id = $1 AND status IN ('scheduled', 'failed')
            RETURNING *
            "#,
        )
        .bind(reservation_id)
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(ref row) = updated {
            insert_audit_tx(
                &mut tx,
                AuditEntityType::Payout,
                row.id,
                &ctx,
                Some("scheduled".to_string()),
                Some("blocked".to_string()),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Re-arm a blocked payout after a dispute resolved in the guide's favor.
    pub async fn unblock_payout(
        &self,
        reservation_id: Uuid,
        ctx: AuditContext,
    ) -> Result<Option<Payout>, StoreError> {
        let mut tx = self.pool().begin().await?;

        let updated = sqlx::query_as::<_, Payout>(
            r#"
            UPDATE payouts
            SET status = 'scheduled', failure_reason = NULL, updated_at = NOW()
            WHERE reservation_id = $1 AND status = 'blocked'
            RETURNING *
            "#,
        )
        .bind(reservation_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(ref row) = updated {
            insert_audit_tx(
                &mut tx,
                AuditEntityType::Payout,
                row.id,
                &ctx,
                Some("blocked".to_string()),
                Some("scheduled".to_string()),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Payouts the dispatch worker should pick up: scheduled ones whose date
    /// arrived, plus failed ones still under the retry budget.
    pub async fn find_due_payouts(&self, now: DateTime<Utc>) -> Result<Vec<Payout>, StoreError> {
        let payouts = sqlx::query_as::<_, Payout>(
            r#"
            SELECT * FROM payouts
            WHERE scheduled_date <= $1
              AND (status = 'scheduled' OR (status = 'failed' AND retry_count < $2))
            ORDER BY scheduled_date
            "#,
        )
        .bind(now)
        .bind(MAX_PAYOUT_RETRIES)
        .fetch_all(self.pool())
        .await?;
        Ok(payouts)
    }

    /// Claim a due payout for execution. Returns `None` when another worker
    /// tick (or a block) got there first.
    pub async fn mark_payout_processing(&self, id: Uuid) -> Result<Option<Payout>, StoreError> {
        let updated = sqlx::query_as::<_, Payout>(
            r#"
            UPDATE payouts
            SET status = 'processing', processed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('scheduled', 'failed')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(updated)
    }

    /// Record a successful transfer, snapshotting the PIX destination it
    /// actually went to.
    pub async fn mark_payout_sent(
        &self,
        id: Uuid,
        pix_key: &str,
        pix_key_type: &str,
        pix_transaction_id: &str,
        pix_end_to_end_id: Option<&str>,
        ctx: AuditContext,
    ) -> Result<Option<Payout>, StoreError> {
        let mut tx = self.pool().begin().await?;

        let updated = sqlx::query_as::<_, Payout>(
            r#"
            UPDATE payouts
            SET status = 'sent', pix_key = $2, pix_key_type = $3,
                pix_transaction_id = $4, pix_end_to_end_id = $5,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(pix_key)
        .bind(pix_key_type)
        .bind(pix_transaction_id)
        .bind(pix_end_to_end_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(ref row) = updated {
            insert_audit_tx(
                &mut tx,
                AuditEntityType::Payout,
                row.id,
                &ctx,
                Some("processing".to_string()),
                Some("sent".to_string()),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Finalize a sent payout. The `scheduled_date <= NOW()` guard enforces
    /// that a payout is never completed before its scheduled date.
    pub async fn mark_payout_completed(
        &self,
        id: Uuid,
        ctx: AuditContext,
    ) -> Result<Option<Payout>, StoreError> {
        let mut tx = self.pool().begin().await?;

        let updated = sqlx::query_as::<_, Payout>(
            r#"
            UPDATE payouts
            SET status = 'completed', completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'sent' AND scheduled_date <= NOW()
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(ref row) = updated {
            insert_audit_tx(
                &mut tx,
                AuditEntityType::Payout,
                row.id,
                &ctx,
                Some("sent".to_string()),
                Some("completed".to_string()),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    pub async fn mark_payout_failed(
        &self,
        id: Uuid,
        reason: &str,
        ctx: AuditContext,
    ) -> Result<Option<Payout>, StoreError> {
        let mut tx = self.pool().begin().await?;

        let updated = sqlx::query_as::<_, Payout>(
            r#"
            UPDATE payouts
            SET status = 'failed', failure_reason = $2,
                retry_count = retry_count + 1, updated_at = NOW()
            WHERE id = $1 AND status IN ('processing', 'scheduled')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(ref row) = updated {
            insert_audit_tx(
                &mut tx,
                AuditEntityType::Payout,
                row.id,
                &ctx,
                None,
                Some("failed".to_string()),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    pub async fn list_guide_payouts(&self, guide_id: Uuid) -> Result<Vec<Payout>, StoreError> {
        let payouts = sqlx::query_as::<_, Payout>(
            "SELECT * FROM payouts WHERE guide_id = $1 ORDER BY created_at DESC",
        )
        .bind(guide_id)
        .fetch_all(self.pool())
        .await?;
        Ok(payouts)
    }
}

impl PayoutStatus {
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Failed | Self::Blocked)
    }
}
