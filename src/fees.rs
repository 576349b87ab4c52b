//! Fee and refund computation.
//!
//! Pure functions, no side effects. All amounts are [`Decimal`] rounded
//! half-up to the currency minor unit (two decimal places for BRL).

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::CancellationPolicy;

/// Result of splitting a gross amount into fees and the guide's net.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub platform_fee: Decimal,
    pub net_amount: Decimal,
}

/// Result of applying a cancellation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refund {
    pub amount: Decimal,
    pub percent: i32,
}

fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Split `gross` into the platform fee and the guide's net amount.
///
/// `platform_fee = gross * percent / 100`, rounded half-up to the minor
/// unit. The net amount never goes negative: when the combined fees exceed
/// the gross, the net clamps to zero and the caller is expected to log the
/// discrepancy (it is an accounting anomaly, not a programming error).
pub fn compute_fees(
    gross: Decimal,
    platform_fee_percent: Decimal,
    processor_fee: Decimal,
) -> FeeBreakdown {
    let platform_fee = round_currency(gross * platform_fee_percent / Decimal::from(100));
    let net = gross - platform_fee - processor_fee;
    FeeBreakdown {
        platform_fee,
        net_amount: if net.is_sign_negative() {
            Decimal::ZERO
        } else {
            round_currency(net)
        },
    }
}

/// Whether the fee breakdown still reconciles against the gross amount.
///
/// True when `gross - platform - processor - net == 0`. False only in the
/// clamped case of [`compute_fees`].
pub fn fees_reconcile(
    gross: Decimal,
    platform_fee: Decimal,
    processor_fee: Decimal,
    net: Decimal,
) -> bool {
    gross - platform_fee - processor_fee - net == Decimal::ZERO
}

/// Compute the refund owed for a cancellation `days_until_event` days before
/// the expedition starts.
///
/// Brackets (ties go to the more generous side):
/// - `days >= full_refund_days` -> 100%
/// - `days >= partial_refund_days` -> `partial_refund_percent`
/// - otherwise -> 0%
///
/// No configured policy means a full refund.
pub fn compute_refund(
    total_amount: Decimal,
    days_until_event: i64,
    policy: Option<&CancellationPolicy>,
) -> Refund {
    let Some(policy) = policy else {
        return Refund {
            amount: total_amount,
            percent: 100,
        };
    };

    if days_until_event >= i64::from(policy.full_refund_days) {
        Refund {
            amount: total_amount,
            percent: 100,
        }
    } else if days_until_event >= i64::from(policy.partial_refund_days) {
        let percent = policy.partial_refund_percent;
        let amount = round_currency(total_amount * Decimal::from(percent) / Decimal::from(100));
        Refund { amount, percent }
    } else {
        Refund {
            amount: Decimal::ZERO,
            percent: 0,
        }
    }
}

/// Human-readable explanation of the policy bracket applied to a refund,
/// returned to the user alongside the amount.
pub fn refund_explanation(refund: &Refund) -> String {
    match refund.percent {
        100 => format!(
            "Reserva cancelada. Reembolso integral de R$ {:.2} será processado.",
            refund.amount
        ),
        0 => "Reserva cancelada. Não há reembolso disponível para este período.".to_string(),
        p => format!(
            "Reserva cancelada. Reembolso de R$ {:.2} ({p}%) será processado.",
            refund.amount
        ),
    }
}

/// Whole days between `now` and `event_start`, floored. Negative when the
/// event already started.
pub fn days_until(now: DateTime<Utc>, event_start: DateTime<Utc>) -> i64 {
    (event_start - now).num_days()
}

/// Add `days` business days to `from`, skipping Saturdays and Sundays.
/// No holiday calendar is applied.
pub fn add_business_days(from: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    let mut result = from;
    let mut added = 0;
    while added < days {
        result += Duration::days(1);
        if !matches!(result.weekday(), Weekday::Sat | Weekday::Sun) {
            added += 1;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn policy(full: i32, partial: i32, percent: i32) -> CancellationPolicy {
        CancellationPolicy {
            id: Uuid::new_v4(),
            name: "Política Padrão".to_string(),
            description: None,
            full_refund_days: full,
            partial_refund_days: partial,
            partial_refund_percent: percent,
            no_refund_days: 0,
            is_default: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn ten_percent_fee_on_five_thousand() {
        // R$2500 x 2 spots, 10% platform fee, no processor fee.
        let gross = dec!(2500) * dec!(2);
        assert_eq!(gross, dec!(5000));
        let fees = compute_fees(gross, dec!(10), Decimal::ZERO);
        assert_eq!(fees.platform_fee, dec!(500));
        assert_eq!(fees.net_amount, dec!(4500));
        assert!(fees_reconcile(gross, fees.platform_fee, Decimal::ZERO, fees.net_amount));
    }

    #[test]
    fn processor_fee_reduces_net() {
        let fees = compute_fees(dec!(100), dec!(10), dec!(4.99));
        assert_eq!(fees.platform_fee, dec!(10));
        assert_eq!(fees.net_amount, dec!(85.01));
        assert!(fees_reconcile(dec!(100), dec!(10), dec!(4.99), dec!(85.01)));
    }

    #[test]
    fn fee_rounding_is_half_up() {
        // 10% of 0.05 is 0.005, which rounds up to 0.01.
        let fees = compute_fees(dec!(0.05), dec!(10), Decimal::ZERO);
        assert_eq!(fees.platform_fee, dec!(0.01));
        assert_eq!(fees.net_amount, dec!(0.04));
    }

    #[test]
    fn net_clamps_to_zero_when_fees_exceed_gross() {
        let fees = compute_fees(dec!(1), dec!(10), dec!(5));
        assert_eq!(fees.net_amount, Decimal::ZERO);
        // The clamped case is the one place the identity breaks.
        assert!(!fees_reconcile(dec!(1), fees.platform_fee, dec!(5), fees.net_amount));
    }

    #[test]
    fn refund_brackets_with_default_policy() {
        let p = policy(7, 3, 50);
        // 10 days out: full refund.
        let r = compute_refund(dec!(1000), 10, Some(&p));
        assert_eq!((r.amount, r.percent), (dec!(1000), 100));
        // 5 days out: partial.
        let r = compute_refund(dec!(1000), 5, Some(&p));
        assert_eq!((r.amount, r.percent), (dec!(500), 50));
        // 1 day out: nothing.
        let r = compute_refund(dec!(1000), 1, Some(&p));
        assert_eq!((r.amount, r.percent), (Decimal::ZERO, 0));
    }

    #[test]
    fn refund_bracket_boundaries_tie_generous() {
        let p = policy(7, 3, 50);
        // Exactly full_refund_days -> 100%.
        assert_eq!(compute_refund(dec!(200), 7, Some(&p)).percent, 100);
        // One day inside the partial bracket.
        assert_eq!(compute_refund(dec!(200), 6, Some(&p)).percent, 50);
        // Exactly partial_refund_days -> still partial.
        assert_eq!(compute_refund(dec!(200), 3, Some(&p)).percent, 50);
        // Below it -> zero.
        assert_eq!(compute_refund(dec!(200), 2, Some(&p)).percent, 0);
    }

    #[test]
    fn missing_policy_fails_open_to_full_refund() {
        let r = compute_refund(dec!(750.50), 0, None);
        assert_eq!((r.amount, r.percent), (dec!(750.50), 100));
    }

    #[test]
    fn partial_refund_rounds_to_minor_unit() {
        let p = policy(7, 3, 33);
        let r = compute_refund(dec!(100.01), 5, Some(&p));
        assert_eq!(r.amount, dec!(33.00));
    }

    #[test]
    fn business_days_skip_weekend() {
        // Friday 2025-06-06 + 2 business days = Tuesday 2025-06-10.
        let friday = Utc.with_ymd_and_hms(2025, 6, 6, 15, 0, 0).unwrap();
        let deadline = add_business_days(friday, 2);
        assert_eq!(deadline.weekday(), Weekday::Tue);
        assert_eq!(deadline.day(), 10);
    }

    #[test]
    fn business_days_from_midweek() {
        // Monday + 2 business days = Wednesday.
        let monday = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
        assert_eq!(add_business_days(monday, 2).weekday(), Weekday::Wed);
        // Thursday + 2 business days crosses the weekend to Monday.
        let thursday = Utc.with_ymd_and_hms(2025, 6, 5, 9, 0, 0).unwrap();
        assert_eq!(add_business_days(thursday, 2).weekday(), Weekday::Mon);
    }

    #[test]
    fn days_until_floors_partial_days() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let event = Utc.with_ymd_and_hms(2025, 6, 8, 9, 0, 0).unwrap();
        // 6 days and 21 hours away floors to 6.
        assert_eq!(days_until(now, event), 6);
    }
}
