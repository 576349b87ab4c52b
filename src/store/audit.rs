//! Append-only audit log. Entries are written inside the same transaction
//! as the mutation they describe; nothing here updates or deletes.

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::models::{AuditEntityType, AuditLogEntry};

use super::{AuditContext, ReservationStore, StoreError};

pub(crate) async fn insert_audit_tx(
    tx: &mut Transaction<'_, Postgres>,
    entity_type: AuditEntityType,
    entity_id: Uuid,
    ctx: &AuditContext,
    previous_value: Option<String>,
    new_value: Option<String>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO payment_audit_log (
            entity_type, entity_id, action, previous_value, new_value,
            actor_id, actor_type, metadata
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entity_type)
    .bind(entity_id)
    .bind(ctx.action)
    .bind(previous_value)
    .bind(new_value)
    .bind(ctx.actor_id)
    .bind(ctx.actor_type)
    .bind(ctx.metadata.as_ref().map(sqlx::types::Json))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

impl ReservationStore {
    /// Full history for one entity, newest first.
    pub async fn audit_for_entity(
        &self,
        entity_type: AuditEntityType,
        entity_id: Uuid,
    ) -> Result<Vec<AuditLogEntry>, StoreError> {
        let entries = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            SELECT * FROM payment_audit_log
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(self.pool())
        .await?;
        Ok(entries)
    }
}
