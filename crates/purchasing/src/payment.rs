//! Purchase order payment reconciliation rules.
//!
//! Payment status is never stored independently of the amounts: it is always
//! `derive_payment_status(total, paid)`, recomputed whenever a payment is
//! recorded or reversed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use branchpos_finance::AccountId;

/// Rounding slack (in base-currency minor units) accepted when comparing the
/// amount paid with the order total.
pub const PAYMENT_ROUNDING_TOLERANCE: i64 = 1;

/// Fixed-point scale of `exchange_rate` (1.0 == 1_000_000).
pub const EXCHANGE_RATE_SCALE: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Partial,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
        }
    }
}

/// Payment status of an order with `total` due and `paid` settled (both in
/// base-currency minor units).
pub fn derive_payment_status(total: i64, paid: i64) -> PaymentStatus {
    if paid <= 0 {
        PaymentStatus::Unpaid
    } else if paid.saturating_add(PAYMENT_ROUNDING_TOLERANCE) >= total {
        PaymentStatus::Paid
    } else {
        PaymentStatus::Partial
    }
}

/// Convert an amount in order currency to base currency.
///
/// Rounds half away from zero. Returns `None` on overflow.
pub fn convert_to_base(amount: i64, exchange_rate: i64) -> Option<i64> {
    let scaled = i128::from(amount) * i128::from(exchange_rate);
    let scale = i128::from(EXCHANGE_RATE_SCALE);
    let half = scale / 2;
    let rounded = if scaled >= 0 {
        (scaled + half) / scale
    } else {
        (scaled - half) / scale
    };
    i64::try_from(rounded).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    MobileMoney,
    Card,
    Cheque,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentRecordStatus {
    Completed,
    Reversed,
}

/// A payment made against a purchase order from a finance account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderPayment {
    pub payment_id: Uuid,
    pub account_id: AccountId,
    /// Base-currency minor units.
    pub amount: i64,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub status: PaymentRecordStatus,
    pub paid_at: DateTime<Utc>,
    pub reversed_at: Option<DateTime<Utc>>,
    pub reversal_reason: Option<String>,
}

impl PurchaseOrderPayment {
    pub fn is_completed(&self) -> bool {
        self.status == PaymentRecordStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn status_boundaries() {
        assert_eq!(derive_payment_status(100_000, 0), PaymentStatus::Unpaid);
        assert_eq!(derive_payment_status(100_000, 40_000), PaymentStatus::Partial);
        assert_eq!(derive_payment_status(100_000, 99_998), PaymentStatus::Partial);
        assert_eq!(derive_payment_status(100_000, 99_999), PaymentStatus::Paid);
        assert_eq!(derive_payment_status(100_000, 100_000), PaymentStatus::Paid);
    }

    #[test]
    fn zero_total_with_nothing_paid_is_unpaid() {
        assert_eq!(derive_payment_status(0, 0), PaymentStatus::Unpaid);
    }

    #[test]
    fn conversion_rounds_half_away_from_zero() {
        // 1 USD = 2_530.5 TZS
        let rate = 2_530_500_000;
        assert_eq!(convert_to_base(100, rate), Some(253_050));
        assert_eq!(convert_to_base(1, 1_500_000), Some(2));
        assert_eq!(convert_to_base(-1, 1_500_000), Some(-2));
        assert_eq!(convert_to_base(7, EXCHANGE_RATE_SCALE), Some(7));
        assert_eq!(convert_to_base(i64::MAX, 2 * EXCHANGE_RATE_SCALE), None);
    }

    proptest! {
        #[test]
        fn status_is_monotonic_in_paid(total in 1i64..10_000_000, a in 0i64..10_000_000, b in 0i64..10_000_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let rank = |s: PaymentStatus| match s {
                PaymentStatus::Unpaid => 0,
                PaymentStatus::Partial => 1,
                PaymentStatus::Paid => 2,
            };
            prop_assert!(rank(derive_payment_status(total, lo)) <= rank(derive_payment_status(total, hi)));
        }

        #[test]
        fn paid_means_within_tolerance(total in 1i64..10_000_000, paid in 1i64..10_000_000) {
            let status = derive_payment_status(total, paid);
            prop_assert_eq!(status == PaymentStatus::Paid, total - paid <= PAYMENT_ROUNDING_TOLERANCE);
        }
    }
}
