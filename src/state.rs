use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::interest;
use crate::types::{Address, FeeSnapshot, LoanId, LoanState, LoanTerms};

/// canonical ledger record for one loan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanData {
    pub loan_id: LoanId,
    pub state: LoanState,
    pub terms: LoanTerms,
    pub start_date: DateTime<Utc>,
    /// monotone non-decreasing; interest accrues from here
    pub last_accrual_timestamp: DateTime<Utc>,
    /// outstanding principal; only ever decreases
    pub balance: Money,
    /// cumulative interest collected over the loan's life
    pub interest_amount_paid: Money,
    /// lender-side fee rates frozen at origination
    pub fee_snapshot: FeeSnapshot,
}

impl LoanData {
    pub fn new(
        loan_id: LoanId,
        terms: LoanTerms,
        fee_snapshot: FeeSnapshot,
        now: DateTime<Utc>,
    ) -> Self {
        let balance = terms.principal;
        Self {
            loan_id,
            state: LoanState::Active,
            terms,
            start_date: now,
            last_accrual_timestamp: now,
            balance,
            interest_amount_paid: Money::ZERO,
            fee_snapshot,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == LoanState::Active
    }

    pub fn maturity(&self) -> DateTime<Utc> {
        interest::maturity(self.start_date, self.terms.duration_secs)
    }

    /// first instant at which the lender may claim the collateral
    pub fn claimable_at(&self, grace_period_secs: u64) -> DateTime<Utc> {
        self.maturity() + Duration::seconds(grace_period_secs as i64)
    }

    /// interest owed on the current balance as of `now`
    pub fn interest_due(&self, now: DateTime<Utc>) -> Money {
        interest::prorated_interest_due(
            self.balance,
            self.terms.interest_rate,
            self.terms.duration_secs,
            self.start_date,
            self.last_accrual_timestamp,
            now,
        )
    }

    /// lender proceeds for a given repayment split, net of frozen fees
    pub fn lender_share(&self, interest_portion: Money, principal_portion: Money) -> Money {
        let interest_fee = interest_portion.bps_share(self.fee_snapshot.lender_interest_fee);
        let principal_fee = principal_portion.bps_share(self.fee_snapshot.lender_principal_fee);
        interest_portion + principal_portion - interest_fee - principal_fee
    }

    /// protocol's cut of a given repayment split
    pub fn protocol_share(&self, interest_portion: Money, principal_portion: Money) -> Money {
        interest_portion.bps_share(self.fee_snapshot.lender_interest_fee)
            + principal_portion.bps_share(self.fee_snapshot.lender_principal_fee)
    }
}

/// funds owed to a lender-note holder who has not yet redeemed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteReceipt {
    pub receipt_id: Uuid,
    pub token: Address,
    pub amount: Money,
}

impl NoteReceipt {
    pub fn new(token: Address) -> Self {
        Self {
            receipt_id: Uuid::new_v4(),
            token,
            amount: Money::ZERO,
        }
    }
}
