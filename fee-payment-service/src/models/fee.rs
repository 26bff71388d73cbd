//! Fee ledger model: one billable obligation for one student in one category.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeStatus {
    Unpaid,
    Paid,
    Overdue,
}

impl FeeStatus {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "UNPAID",
            Self::Paid => "PAID",
            Self::Overdue => "OVERDUE",
        }
    }
}

impl FromStr for FeeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNPAID" => Ok(Self::Unpaid),
            "PAID" => Ok(Self::Paid),
            "OVERDUE" => Ok(Self::Overdue),
            other => Err(format!("unknown fee status '{}'", other)),
        }
    }
}

impl std::fmt::Display for FeeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub fee_id: Uuid,
    pub organization_id: String,
    pub student_id: String,
    pub category_id: String,
    pub total_fee: Decimal,
    pub paid_amount: Decimal,
    pub pending_amount: Decimal,
    pub due_date: NaiveDate,
    pub status: FeeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fee {
    /// A freshly assigned fee with nothing paid.
    pub fn assigned(
        organization_id: impl Into<String>,
        student_id: impl Into<String>,
        category_id: impl Into<String>,
        total_fee: Decimal,
        due_date: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        Self {
            fee_id: Uuid::new_v4(),
            organization_id: organization_id.into(),
            student_id: student_id.into(),
            category_id: category_id.into(),
            total_fee,
            paid_amount: Decimal::ZERO,
            pending_amount: total_fee,
            due_date,
            status: FeeStatus::Unpaid,
            created_at: now,
            updated_at: now,
        }
    }

    /// `total_fee - paid_amount`, never negative.
    pub fn outstanding(&self) -> Decimal {
        (self.total_fee - self.paid_amount).max(Decimal::ZERO)
    }

    pub fn balances(&self) -> FeeBalances {
        FeeBalances {
            paid_amount: self.paid_amount,
            pending_amount: self.pending_amount,
            status: self.status,
        }
    }
}

/// The three ledger fields rewritten on every reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBalances {
    pub paid_amount: Decimal,
    pub pending_amount: Decimal,
    pub status: FeeStatus,
}

impl FeeBalances {
    /// Derive balances from the fixed charge and the sum of completed payments.
    pub fn from_totals(total_fee: Decimal, paid_amount: Decimal) -> Self {
        let pending_amount = (total_fee - paid_amount).max(Decimal::ZERO);
        let status = if pending_amount.is_zero() {
            FeeStatus::Paid
        } else {
            FeeStatus::Unpaid
        };

        Self {
            paid_amount,
            pending_amount,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn due() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, 30).unwrap()
    }

    #[test]
    fn new_fee_owes_everything() {
        let fee = Fee::assigned("org", "stu", "tuition", dec!(1000), due());
        assert_eq!(fee.outstanding(), dec!(1000));
        assert_eq!(fee.pending_amount, dec!(1000));
        assert_eq!(fee.status, FeeStatus::Unpaid);
    }

    #[test]
    fn outstanding_is_clamped_at_zero() {
        let mut fee = Fee::assigned("org", "stu", "tuition", dec!(500), due());
        fee.paid_amount = dec!(650);
        assert_eq!(fee.outstanding(), Decimal::ZERO);
    }

    #[test]
    fn balances_mark_paid_only_when_nothing_is_pending() {
        let partial = FeeBalances::from_totals(dec!(1000), dec!(600));
        assert_eq!(partial.pending_amount, dec!(400));
        assert_eq!(partial.status, FeeStatus::Unpaid);

        let settled = FeeBalances::from_totals(dec!(1000), dec!(1000));
        assert_eq!(settled.pending_amount, Decimal::ZERO);
        assert_eq!(settled.status, FeeStatus::Paid);
    }

    #[test]
    fn overpayment_keeps_paid_amount_and_clamps_pending() {
        let balances = FeeBalances::from_totals(dec!(1000), dec!(1200));
        assert_eq!(balances.paid_amount, dec!(1200));
        assert_eq!(balances.pending_amount, Decimal::ZERO);
        assert_eq!(balances.status, FeeStatus::Paid);
    }

    #[test]
    fn status_round_trips_through_database_text() {
        for status in [FeeStatus::Unpaid, FeeStatus::Paid, FeeStatus::Overdue] {
            assert_eq!(status.as_str().parse::<FeeStatus>().unwrap(), status);
        }
        assert!("SETTLED".parse::<FeeStatus>().is_err());
    }
}
