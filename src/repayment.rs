use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LendingError, Result};
use crate::loan_core::LoanCore;
use crate::tokens::{Bank, NftRegistry};
use crate::types::{Address, LoanId};

/// amounts applied by one repayment call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepaymentOutcome {
    pub interest_portion: Money,
    pub principal_portion: Money,
    pub amount_to_lender: Money,
}

/// orchestrates repayment, claim, and redemption flows
///
/// Computes the interest/principal split from the prorated interest due,
/// pulls funds from the payer, and hands the settlement ledger a
/// pre-resolved split.
#[derive(Debug, Default)]
pub struct RepaymentController;

impl RepaymentController {
    pub fn new() -> Self {
        Self
    }

    /// apply `amount` against a loan: interest first, remainder to
    /// principal
    ///
    /// A payment below the outstanding interest is rejected outright —
    /// interest never silently compounds unpaid.
    pub fn repay(
        &self,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        time: &SafeTimeProvider,
        caller: Address,
        loan_id: LoanId,
        amount: Money,
    ) -> Result<RepaymentOutcome> {
        self.repay_inner(core, bank, nfts, time, caller, loan_id, amount, false)
    }

    /// repay the full outstanding balance plus interest due
    pub fn repay_full(
        &self,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        time: &SafeTimeProvider,
        caller: Address,
        loan_id: LoanId,
    ) -> Result<RepaymentOutcome> {
        let amount = self.full_repayment_amount(core, time, loan_id)?;
        self.repay_inner(core, bank, nfts, time, caller, loan_id, amount, false)
    }

    /// repayment that cannot be blocked by the lender side
    pub fn force_repay(
        &self,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        time: &SafeTimeProvider,
        caller: Address,
        loan_id: LoanId,
        amount: Money,
    ) -> Result<RepaymentOutcome> {
        self.repay_inner(core, bank, nfts, time, caller, loan_id, amount, true)
    }

    /// force-repay the full outstanding balance plus interest due
    pub fn force_repay_full(
        &self,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        time: &SafeTimeProvider,
        caller: Address,
        loan_id: LoanId,
    ) -> Result<RepaymentOutcome> {
        let amount = self.full_repayment_amount(core, time, loan_id)?;
        self.repay_inner(core, bank, nfts, time, caller, loan_id, amount, true)
    }

    /// balance plus interest due as of now
    pub fn full_repayment_amount(
        &self,
        core: &LoanCore,
        time: &SafeTimeProvider,
        loan_id: LoanId,
    ) -> Result<Money> {
        let loan = core
            .loan(loan_id)
            .ok_or(LendingError::UnknownLoan { loan_id })?;
        Ok(loan.balance + loan.interest_due(time.now()))
    }

    #[allow(clippy::too_many_arguments)]
    fn repay_inner(
        &self,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        time: &SafeTimeProvider,
        caller: Address,
        loan_id: LoanId,
        amount: Money,
        force: bool,
    ) -> Result<RepaymentOutcome> {
        let now = time.now();
        let loan = core
            .loan(loan_id)
            .ok_or(LendingError::UnknownLoan { loan_id })?;
        if !loan.is_active() {
            return Err(LendingError::LoanNotActive {
                loan_id,
                state: loan.state,
            });
        }

        let interest_due = loan.interest_due(now);
        if amount < interest_due {
            return Err(LendingError::PaymentBelowMinimum {
                minimum: interest_due,
                provided: amount,
            });
        }

        let principal_portion = amount - interest_due;
        if principal_portion > loan.balance {
            return Err(LendingError::OverRepayment {
                balance: loan.balance,
                provided: principal_portion,
            });
        }

        let amount_to_lender = loan.lender_share(interest_due, principal_portion);
        let currency = loan.terms.payable_currency;

        bank.transfer(currency, caller, core.address(), amount)?;

        let outcome = RepaymentOutcome {
            interest_portion: interest_due,
            principal_portion,
            amount_to_lender,
        };
        if force {
            core.force_repay(
                bank,
                nfts,
                now,
                loan_id,
                caller,
                amount_to_lender,
                interest_due,
                principal_portion,
            )?;
        } else {
            core.repay(
                bank,
                nfts,
                now,
                loan_id,
                caller,
                amount_to_lender,
                interest_due,
                principal_portion,
            )?;
        }
        Ok(outcome)
    }

    /// claim defaulted collateral; caller must hold the lender note
    pub fn claim(
        &self,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        time: &SafeTimeProvider,
        caller: Address,
        loan_id: LoanId,
    ) -> Result<()> {
        if core.lender_note.owner_of(loan_id) != Some(caller) {
            return Err(LendingError::CallerNotNoteHolder { loan_id });
        }
        core.claim(bank, nfts, time.now(), loan_id, caller)
    }

    /// redeem an outstanding note receipt to `to`
    pub fn redeem_note(
        &self,
        core: &mut LoanCore,
        bank: &mut Bank,
        time: &SafeTimeProvider,
        caller: Address,
        loan_id: LoanId,
        to: Address,
    ) -> Result<Money> {
        if core.lender_note.owner_of(loan_id) != Some(caller) {
            return Err(LendingError::CallerNotNoteHolder { loan_id });
        }
        core.redeem_note(bank, time.now(), loan_id, to)
    }
}
