//! Guide verification (KYC + PIX payout data). Guides must be approved by
//! an admin before the payout worker will transfer anything to them.

use uuid::Uuid;

use crate::models::{
    AuditEntityType, DocumentType, GuideVerification, PixKeyType, VerificationStatus,
};

use super::audit::insert_audit_tx;
use super::{AuditContext, ReservationStore, StoreError};

/// Verification data submitted by the guide.
#[derive(Debug, Clone)]
pub struct SubmitVerification {
    pub document_type: DocumentType,
    pub document_number: String,
    pub pix_key_type: PixKeyType,
    pub pix_key: String,
    pub pix_key_holder_name: String,
    pub accepted_intermediation_terms: bool,
    pub accepted_payout_terms: bool,
    pub accepted_contestation_policy: bool,
}

impl ReservationStore {
    pub async fn get_verification(
        &self,
        user_id: Uuid,
    ) -> Result<Option<GuideVerification>, StoreError> {
        let verification = sqlx::query_as::<_, GuideVerification>(
            "SELECT * FROM guide_verification WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(verification)
    }

    /// Create or replace the guide's verification data. Resubmission resets
    /// the status to `pending` for a fresh admin review.
    pub async fn upsert_verification(
        &self,
        user_id: Uuid,
        data: SubmitVerification,
        ctx: AuditContext,
    ) -> Result<GuideVerification, StoreError> {
        let mut tx = self.pool().begin().await?;

        let verification = sqlx::query_as::<_, GuideVerification>(
            r#"
            INSERT INTO guide_verification (
                user_id, status, document_type, document_number, pix_key_type,
                pix_key, pix_key_holder_name, accepted_intermediation_terms,
                accepted_payout_terms, accepted_contestation_policy,
                terms_accepted_at
            )
            VALUES ($1, 'pending', $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET
                status = 'pending',
                document_type = EXCLUDED.document_type,
                document_number = EXCLUDED.document_number,
                pix_key_type = EXCLUDED.pix_key_type,
                pix_key = EXCLUDED.pix_key,
                pix_key_holder_name = EXCLUDED.pix_key_holder_name,
                accepted_intermediation_terms = EXCLUDED.accepted_intermediation_terms,
                accepted_payout_terms = EXCLUDED.accepted_payout_terms,
                accepted_contestation_policy = EXCLUDED.accepted_contestation_policy,
                terms_accepted_at = NOW(),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(data.document_type)
        .bind(&data.document_number)
        .bind(data.pix_key_type)
        .bind(&data.pix_key)
        .bind(&data.pix_key_holder_name)
        .bind(data.accepted_intermediation_terms)
        .bind(data.accepted_payout_terms)
        .bind(data.accepted_contestation_policy)
        .fetch_one(&mut *tx)
        .await?;

        insert_audit_tx(
            &mut tx,
            AuditEntityType::GuideVerification,
            user_id,
            &ctx,
            None,
            Some("pending".to_string()),
        )
        .await?;

        tx.commit().await?;
        Ok(verification)
    }

    pub async fn set_verification_document(
        &self,
        user_id: Uuid,
        document_url: Option<&str>,
        bank_proof_url: Option<&str>,
    ) -> Result<Option<GuideVerification>, StoreError> {
        let updated = sqlx::query_as::<_, GuideVerification>(
            r#"
            UPDATE guide_verification
            SET document_url = COALESCE($2, document_url),
                bank_proof_url = COALESCE($3, bank_proof_url),
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(document_url)
        .bind(bank_proof_url)
        .fetch_optional(self.pool())
        .await?;
        Ok(updated)
    }

    pub async fn list_pending_verifications(
        &self,
    ) -> Result<Vec<GuideVerification>, StoreError> {
        let pending = sqlx::query_as::<_, GuideVerification>(
            "SELECT * FROM guide_verification WHERE status = 'pending' ORDER BY created_at",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(pending)
    }

    /// Admin review. Approval also marks the PIX key verified.
    pub async fn review_verification(
        &self,
        user_id: Uuid,
        status: VerificationStatus,
        rejection_reason: Option<&str>,
        notes: Option<&str>,
        reviewed_by: Uuid,
        ctx: AuditContext,
    ) -> Result<Option<GuideVerification>, StoreError> {
        let mut tx = self.pool().begin().await?;

        let previous: Option<GuideVerification> = sqlx::query_as::<_, GuideVerification>(
            "SELECT * FROM guide_verification WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(previous) = previous else {
            return Ok(None);
        };

        let updated = sqlx::query_as::<_, GuideVerification>(
            r#"
            UPDATE guide_verification
            SET status = $2, rejection_reason = $3, notes = $4,
                reviewed_by = $5, reviewed_at = NOW(),
                pix_key_verified = ($2 = 'approved'),
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(status)
        .bind(rejection_reason)
        .bind(notes)
        .bind(reviewed_by)
        .fetch_one(&mut *tx)
        .await?;

        insert_audit_tx(
            &mut tx,
            AuditEntityType::GuideVerification,
            user_id,
            &ctx,
            Some(format!("{:?}", previous.status).to_lowercase()),
            Some(format!("{:?}", updated.status).to_lowercase()),
        )
        .await?;

        tx.commit().await?;
        Ok(Some(updated))
    }
}
