use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::types::{Address, LoanId};

/// all events emitted by the settlement ledger
///
/// Events exist for off-chain indexing and audit; correctness never depends
/// on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // lifecycle
    LoanStarted {
        loan_id: LoanId,
        borrower: Address,
        lender: Address,
        principal: Money,
        amount_to_borrower: Money,
        timestamp: DateTime<Utc>,
    },
    LoanPayment {
        loan_id: LoanId,
        payer: Address,
        interest_portion: Money,
        principal_portion: Money,
        remaining_balance: Money,
        timestamp: DateTime<Utc>,
    },
    LoanRepaid {
        loan_id: LoanId,
        total_interest_paid: Money,
        timestamp: DateTime<Utc>,
    },
    ForceRepay {
        loan_id: LoanId,
        payer: Address,
        receipt_amount: Money,
        timestamp: DateTime<Utc>,
    },
    LoanRolledOver {
        old_loan_id: LoanId,
        new_loan_id: LoanId,
        timestamp: DateTime<Utc>,
    },
    LoanRefinanced {
        old_loan_id: LoanId,
        new_loan_id: LoanId,
        old_rate: Rate,
        new_rate: Rate,
        timestamp: DateTime<Utc>,
    },
    LoanClaimed {
        loan_id: LoanId,
        claimant: Address,
        timestamp: DateTime<Utc>,
    },
    NoteRedeemed {
        loan_id: LoanId,
        receipt_id: Uuid,
        recipient: Address,
        amount: Money,
        timestamp: DateTime<Utc>,
    },

    // authorization
    NonceUsed {
        user: Address,
        nonce: u64,
        uses_consumed: u32,
        max_uses: u32,
    },

    // fees
    FeesWithdrawn {
        currency: Address,
        recipient: Address,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    AffiliateSet {
        code: String,
        affiliate: Address,
        split: Rate,
    },
}

/// event store collecting events during operations
#[derive(Debug, Clone, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
