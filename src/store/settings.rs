//! Platform settings and cancellation policies.
//!
//! Settings are key/value rows with code-side defaults, so a fresh database
//! behaves sensibly before an admin touches anything.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{CancellationPolicy, PlatformSetting};

use super::{ReservationStore, StoreError};

pub const SETTING_PLATFORM_FEE_PERCENT: &str = "platform_fee_percent";
pub const SETTING_PAYOUT_DELAY_DAYS: &str = "payout_delay_days";
pub const SETTING_RESERVATION_EXPIRY_MINUTES: &str = "reservation_expiry_minutes";

const DEFAULT_PLATFORM_FEE_PERCENT: &str = "10";
const DEFAULT_PAYOUT_DELAY_DAYS: i64 = 7;
/// Checkout TTL floor. Shorter configured values are raised to this.
const MIN_RESERVATION_EXPIRY_MINUTES: i64 = 30;

impl ReservationStore {
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM platform_settings WHERE key = $1")
                .bind(key)
                .fetch_optional(self.pool())
                .await?;
        Ok(value)
    }

    pub async fn set_setting(
        &self,
        key: &str,
        value: &str,
        updated_by: Option<Uuid>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO platform_settings (key, value, updated_by)
            VALUES ($1, $2, $3)
            ON CONFLICT (key)
            DO UPDATE SET value = EXCLUDED.value, updated_by = EXCLUDED.updated_by,
                          updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(updated_by)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_settings(&self) -> Result<Vec<PlatformSetting>, StoreError> {
        let settings =
            sqlx::query_as::<_, PlatformSetting>("SELECT * FROM platform_settings ORDER BY key")
                .fetch_all(self.pool())
                .await?;
        Ok(settings)
    }

    /// Platform fee percentage, default 10%. A malformed stored value falls
    /// back to the default and is logged.
    pub async fn platform_fee_percent(&self) -> Result<Decimal, StoreError> {
        let raw = self
            .get_setting(SETTING_PLATFORM_FEE_PERCENT)
            .await?
            .unwrap_or_else(|| DEFAULT_PLATFORM_FEE_PERCENT.to_string());
        match raw.parse::<Decimal>() {
            Ok(value) => Ok(value),
            Err(_) => {
                tracing::warn!(value = %raw, "invalid platform_fee_percent setting, using default");
                Ok(Decimal::from(10))
            }
        }
    }

    /// Days between payment approval and payout execution, default 7.
    pub async fn payout_delay_days(&self) -> Result<i64, StoreError> {
        let raw = self.get_setting(SETTING_PAYOUT_DELAY_DAYS).await?;
        Ok(raw
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_PAYOUT_DELAY_DAYS))
    }

    /// Checkout TTL in minutes, default 30 with an enforced floor of 30.
    pub async fn reservation_expiry_minutes(&self) -> Result<i64, StoreError> {
        let raw = self.get_setting(SETTING_RESERVATION_EXPIRY_MINUTES).await?;
        let configured = raw
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(MIN_RESERVATION_EXPIRY_MINUTES);
        Ok(configured.max(MIN_RESERVATION_EXPIRY_MINUTES))
    }

    pub async fn default_cancellation_policy(
        &self,
    ) -> Result<Option<CancellationPolicy>, StoreError> {
        let policy = sqlx::query_as::<_, CancellationPolicy>(
            "SELECT * FROM cancellation_policies WHERE is_default LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await?;
        Ok(policy)
    }

    pub async fn list_cancellation_policies(
        &self,
    ) -> Result<Vec<CancellationPolicy>, StoreError> {
        let policies = sqlx::query_as::<_, CancellationPolicy>(
            "SELECT * FROM cancellation_policies ORDER BY created_at",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(policies)
    }
}
