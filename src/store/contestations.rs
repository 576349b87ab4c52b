//! Contestation rows. Opened by the reservation owner during the dispute
//! window, resolved by an admin.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Contestation, ContestationReason, ContestationStatus};

use super::{ReservationStore, StoreError};

/// Fields for a newly opened contestation.
#[derive(Debug, Clone)]
pub struct NewContestation {
    pub reservation_id: Uuid,
    pub user_id: Uuid,
    pub guide_id: Uuid,
    pub reason: ContestationReason,
    pub description: String,
    pub evidence_urls: Vec<String>,
}

impl ReservationStore {
    pub async fn insert_contestation(
        &self,
        new: NewContestation,
    ) -> Result<Contestation, StoreError> {
        let contestation = sqlx::query_as::<_, Contestation>(
            r#"
            INSERT INTO contestations (
                reservation_id, user_id, guide_id, status, reason,
                description, evidence_urls
            )
            VALUES ($1, $2, $3, 'open', $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(new.reservation_id)
        .bind(new.user_id)
        .bind(new.guide_id)
        .bind(new.reason)
        .bind(&new.description)
        .bind(sqlx::types::Json(new.evidence_urls))
        .fetch_one(self.pool())
        .await?;
        Ok(contestation)
    }

    pub async fn get_contestation(&self, id: Uuid) -> Result<Option<Contestation>, StoreError> {
        let contestation =
            sqlx::query_as::<_, Contestation>("SELECT * FROM contestations WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(contestation)
    }

    /// The unresolved contestation for a reservation, if any.
    pub async fn get_open_contestation_for_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<Contestation>, StoreError> {
        let contestation = sqlx::query_as::<_, Contestation>(
            r#"
            SELECT * FROM contestations
            WHERE reservation_id = $1 AND status IN ('open', 'under_review')
            LIMIT 1
            "#,
        )
        .bind(reservation_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(contestation)
    }

    /// Close out a contestation with the admin's verdict. Conditional on the
    /// row still being unresolved, so two admins cannot resolve it twice.
    pub async fn resolve_contestation_row(
        &self,
        id: Uuid,
        status: ContestationStatus,
        resolution: &str,
        resolved_by: Uuid,
        refund_amount: Option<Decimal>,
    ) -> Result<Option<Contestation>, StoreError> {
        let updated = sqlx::query_as::<_, Contestation>(
            r#"
            UPDATE contestations
            SET status = $2, resolution = $3, resolved_by = $4, resolved_at = NOW(),
                refund_amount = $5, updated_at = NOW()
            WHERE id = $1 AND status IN ('open', 'under_review')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(resolution)
        .bind(resolved_by)
        .bind(refund_amount)
        .fetch_optional(self.pool())
        .await?;
        Ok(updated)
    }

    pub async fn record_guide_response(
        &self,
        id: Uuid,
        guide_id: Uuid,
        response: &str,
    ) -> Result<Option<Contestation>, StoreError> {
        let updated = sqlx::query_as::<_, Contestation>(
            r#"
            UPDATE contestations
            SET guide_response = $3, guide_response_at = NOW(),
                status = 'under_review', updated_at = NOW()
            WHERE id = $1 AND guide_id = $2 AND status IN ('open', 'under_review')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(guide_id)
        .bind(response)
        .fetch_optional(self.pool())
        .await?;
        Ok(updated)
    }

    pub async fn list_open_contestations(&self) -> Result<Vec<Contestation>, StoreError> {
        let contestations = sqlx::query_as::<_, Contestation>(
            r#"
            SELECT * FROM contestations
            WHERE status IN ('open', 'under_review')
            ORDER BY created_at
            "#,
        )
        .fetch_all(self.pool())
        .await?;
        Ok(contestations)
    }
}
