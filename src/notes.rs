use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{LendingError, Result};
use crate::types::{Address, LoanId};

/// one side's ownership notes: token id == loan id
///
/// Holding the borrower note is the right to repay and redeem collateral;
/// holding the lender note is the right to claim on default or redeem
/// proceeds. Notes transfer freely, so loan rights are assignable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteRegistry {
    owners: BTreeMap<LoanId, Address>,
}

impl NoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner_of(&self, loan_id: LoanId) -> Option<Address> {
        self.owners.get(&loan_id).copied()
    }

    pub fn mint(&mut self, loan_id: LoanId, owner: Address) -> Result<()> {
        if self.owners.contains_key(&loan_id) {
            return Err(LendingError::NoteAlreadyMinted { loan_id });
        }
        self.owners.insert(loan_id, owner);
        Ok(())
    }

    pub fn burn(&mut self, loan_id: LoanId) {
        self.owners.remove(&loan_id);
    }

    /// transfer a note; the caller must currently hold it
    pub fn transfer(&mut self, loan_id: LoanId, from: Address, to: Address) -> Result<()> {
        match self.owner_of(loan_id) {
            Some(owner) if owner == from => {
                self.owners.insert(loan_id, to);
                Ok(())
            }
            _ => Err(LendingError::CallerNotNoteHolder { loan_id }),
        }
    }
}
