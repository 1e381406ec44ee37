use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;

use crate::config::{FeeSchedule, ProtocolConfig};
use crate::decimal::Money;
use crate::errors::{LendingError, Result};
use crate::interest;
use crate::loan_core::LoanCore;
use crate::predicates::VerifierRegistry;
use crate::signature::{
    loan_terms_digest, verify_terms_signature, ApprovalRegistry, TermsSignature,
};
use crate::state::LoanData;
use crate::tokens::{Bank, NftRegistry};
use crate::types::{
    Address, BorrowerData, LoanId, LoanTerms, Predicate, RolloverAmounts, Side, SigProperties,
};
use crate::validation::{run_predicates_check, validate_loan_terms, validate_whitelist};

/// hook handed control after an origination fully settles
///
/// The callback runs with the whole protocol context, so untrusted code
/// can re-enter any public entry point; the nonce counter and the
/// post-callback escrow/predicate checks are what make that safe.
pub trait BorrowerCallback {
    #[allow(clippy::too_many_arguments)]
    fn execute_operation(
        &mut self,
        origination: &mut OriginationController,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        time: &SafeTimeProvider,
        loan_id: LoanId,
        amount: Money,
        data: &[u8],
    ) -> Result<()>;
}

/// orchestrates origination, rollover, and refinance
///
/// Owns the protocol configuration, the delegated-approval registry, and
/// the trusted predicate verifiers. Fund flow is optimistic: everything is
/// pulled and pushed within one call, with the whole operation rolled back
/// on any failure.
#[derive(Debug)]
pub struct OriginationController {
    pub config: ProtocolConfig,
    pub approvals: ApprovalRegistry,
    pub verifiers: VerifierRegistry,
}

impl OriginationController {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            approvals: ApprovalRegistry::new(),
            verifiers: VerifierRegistry::new(),
        }
    }

    /// let `signer` sign terms on the caller's behalf
    pub fn approve(&mut self, caller: Address, signer: Address, approved: bool) {
        self.approvals.approve(caller, signer, approved);
    }

    pub fn is_approved(&self, owner: Address, signer: Address) -> bool {
        self.approvals.is_approved(owner, signer)
    }

    /// originate a loan from signed terms
    ///
    /// Ordering is the reentrancy defense: escrow, ledger update, payout,
    /// optional borrower callback, and only then the predicate check, so a
    /// malicious callback acts on an already-consistent post-trade state.
    #[allow(clippy::too_many_arguments)]
    pub fn initialize_loan(
        &mut self,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        time: &SafeTimeProvider,
        caller: Address,
        terms: LoanTerms,
        borrower_data: BorrowerData,
        borrower: Address,
        lender: Address,
        sig: &TermsSignature,
        sig_props: SigProperties,
        predicates: &[Predicate],
        callback: Option<&mut dyn BorrowerCallback>,
    ) -> Result<LoanId> {
        let snapshot = (core.clone(), bank.clone(), nfts.clone());
        let result = self.initialize_inner(
            core,
            bank,
            nfts,
            time,
            caller,
            terms,
            borrower_data,
            borrower,
            lender,
            sig,
            sig_props,
            predicates,
            callback,
        );
        if result.is_err() {
            *core = snapshot.0;
            *bank = snapshot.1;
            *nfts = snapshot.2;
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn initialize_inner(
        &mut self,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        time: &SafeTimeProvider,
        caller: Address,
        terms: LoanTerms,
        borrower_data: BorrowerData,
        borrower: Address,
        lender: Address,
        sig: &TermsSignature,
        sig_props: SigProperties,
        predicates: &[Predicate],
        callback: Option<&mut dyn BorrowerCallback>,
    ) -> Result<LoanId> {
        let now = time.now();
        validate_loan_terms(&self.config, &terms, now)?;
        validate_whitelist(&self.config, &terms)?;

        // whichever side the caller acts for, the counterparty must have
        // signed these exact terms
        let (signing_side, signing_party, counterparty) =
            if self.approvals.is_self_or_approved(borrower, caller) {
                (Side::Lender, lender, borrower)
            } else if self.approvals.is_self_or_approved(lender, caller) {
                (Side::Borrower, borrower, lender)
            } else {
                return Err(LendingError::UnknownCaller { caller });
            };

        let digest = loan_terms_digest(
            &terms,
            signing_side,
            counterparty,
            sig_props,
            &borrower_data.callback_data,
            predicates,
        );
        verify_terms_signature(sig, &digest)?;
        if !self.approvals.is_self_or_approved(signing_party, sig.signer) {
            return Err(LendingError::UnauthorizedSigner {
                signer: sig.signer,
                expected: signing_party,
            });
        }
        core.consume_nonce(sig.signer, sig_props.nonce, sig_props.max_uses)?;

        // escrow collateral, then move money
        nfts.transfer(
            terms.collateral_address,
            terms.collateral_id,
            borrower,
            core.address(),
        )?;

        let fee_snapshot = self.config.fee_schedule.snapshot();
        let borrower_fee = terms
            .principal
            .bps_share(self.config.fee_schedule.borrower_origination_fee);
        let amount_to_borrower = terms.principal - borrower_fee;
        let currency = terms.payable_currency;
        let affiliate_code = terms.affiliate_code.clone();

        bank.transfer(currency, lender, core.address(), terms.principal)?;

        let loan_id = core.start_loan(
            nfts,
            now,
            lender,
            borrower,
            terms.clone(),
            amount_to_borrower,
            fee_snapshot,
        )?;

        bank.transfer(currency, core.address(), borrower, amount_to_borrower)?;
        core.record_fees(currency, borrower_fee, affiliate_code.as_deref())?;

        // all state is settled; hand control to untrusted code
        if !borrower_data.callback_data.is_empty() {
            if let Some(hook) = callback {
                hook.execute_operation(
                    self,
                    core,
                    bank,
                    nfts,
                    time,
                    loan_id,
                    amount_to_borrower,
                    &borrower_data.callback_data,
                )?;
            }
        }

        // the callback may have tried to move the collateral
        if nfts.owner_of(terms.collateral_address, terms.collateral_id) != Some(core.address()) {
            return Err(LendingError::CollateralNotEscrowed { loan_id });
        }
        run_predicates_check(
            &self.config,
            &self.verifiers,
            nfts,
            borrower,
            lender,
            &terms,
            predicates,
        )?;

        Ok(loan_id)
    }

    /// roll an active loan into new signed terms over the same collateral
    #[allow(clippy::too_many_arguments)]
    pub fn rollover_loan(
        &mut self,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        time: &SafeTimeProvider,
        caller: Address,
        old_loan_id: LoanId,
        terms: LoanTerms,
        lender: Address,
        sig: &TermsSignature,
        sig_props: SigProperties,
        predicates: &[Predicate],
    ) -> Result<LoanId> {
        let snapshot = (core.clone(), bank.clone(), nfts.clone());
        let result = self.rollover_inner(
            core,
            bank,
            nfts,
            time,
            caller,
            old_loan_id,
            terms,
            lender,
            sig,
            sig_props,
            predicates,
        );
        if result.is_err() {
            *core = snapshot.0;
            *bank = snapshot.1;
            *nfts = snapshot.2;
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn rollover_inner(
        &mut self,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        time: &SafeTimeProvider,
        caller: Address,
        old_loan_id: LoanId,
        terms: LoanTerms,
        lender: Address,
        sig: &TermsSignature,
        sig_props: SigProperties,
        predicates: &[Predicate],
    ) -> Result<LoanId> {
        let now = time.now();
        let old_loan = core
            .loan(old_loan_id)
            .ok_or(LendingError::UnknownLoan {
                loan_id: old_loan_id,
            })?
            .clone();
        if !old_loan.is_active() {
            return Err(LendingError::LoanNotActive {
                loan_id: old_loan_id,
                state: old_loan.state,
            });
        }

        let borrower = core
            .borrower_note
            .owner_of(old_loan_id)
            .ok_or(LendingError::CallerNotNoteHolder {
                loan_id: old_loan_id,
            })?;
        if !self.approvals.is_self_or_approved(borrower, caller) {
            return Err(LendingError::CallerNotNoteHolder {
                loan_id: old_loan_id,
            });
        }
        let old_lender =
            core.lender_note
                .owner_of(old_loan_id)
                .ok_or(LendingError::CallerNotNoteHolder {
                    loan_id: old_loan_id,
                })?;

        check_terms_continuity(&old_loan, &terms)?;
        validate_loan_terms(&self.config, &terms, now)?;
        validate_whitelist(&self.config, &terms)?;

        // the borrower rolls over, so the incoming lender must have signed
        let digest = loan_terms_digest(&terms, Side::Lender, borrower, sig_props, &[], predicates);
        verify_terms_signature(sig, &digest)?;
        if !self.approvals.is_self_or_approved(lender, sig.signer) {
            return Err(LendingError::UnauthorizedSigner {
                signer: sig.signer,
                expected: lender,
            });
        }
        core.consume_nonce(sig.signer, sig_props.nonce, sig_props.max_uses)?;

        let amounts = compute_rollover_amounts(
            &old_loan,
            &terms,
            now,
            &self.config.fee_schedule,
            lender == old_lender,
        );
        if !amounts.is_exclusive() {
            return Err(LendingError::FundsConflict {
                need_from_borrower: amounts.need_from_borrower,
                leftover_principal: amounts.leftover_principal,
            });
        }

        let currency = terms.payable_currency;
        let affiliate_code = terms.affiliate_code.clone();
        bank.transfer(currency, lender, core.address(), amounts.amount_from_lender)?;
        bank.transfer(currency, borrower, core.address(), amounts.need_from_borrower)?;

        let fee_snapshot = self.config.fee_schedule.snapshot();
        let new_loan_id = core.rollover(
            nfts,
            now,
            old_loan_id,
            borrower,
            lender,
            terms.clone(),
            &amounts,
            fee_snapshot,
        )?;

        bank.transfer(
            currency,
            core.address(),
            old_lender,
            amounts.amount_to_old_lender,
        )?;
        bank.transfer(currency, core.address(), lender, amounts.amount_to_lender)?;
        bank.transfer(
            currency,
            core.address(),
            borrower,
            amounts.amount_to_borrower,
        )?;

        let residue = amounts.amount_from_lender + amounts.need_from_borrower
            - amounts.amount_to_old_lender
            - amounts.amount_to_lender
            - amounts.amount_to_borrower;
        core.record_fees(currency, residue, affiliate_code.as_deref())?;

        run_predicates_check(
            &self.config,
            &self.verifiers,
            nfts,
            borrower,
            lender,
            &terms,
            predicates,
        )?;

        Ok(new_loan_id)
    }

    /// lender-initiated takeover of an active loan at strictly better terms
    ///
    /// No counterparty signature: the caller is the new lender, and the
    /// rate/duration/principal guards make the takeover unambiguously
    /// favourable to the borrower.
    pub fn refinance_loan(
        &mut self,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        time: &SafeTimeProvider,
        caller: Address,
        old_loan_id: LoanId,
        terms: LoanTerms,
    ) -> Result<LoanId> {
        let snapshot = (core.clone(), bank.clone(), nfts.clone());
        let result = self.refinance_inner(core, bank, nfts, time, caller, old_loan_id, terms);
        if result.is_err() {
            *core = snapshot.0;
            *bank = snapshot.1;
            *nfts = snapshot.2;
        }
        result
    }

    fn refinance_inner(
        &mut self,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        time: &SafeTimeProvider,
        caller: Address,
        old_loan_id: LoanId,
        terms: LoanTerms,
    ) -> Result<LoanId> {
        let now = time.now();
        let old_loan = core
            .loan(old_loan_id)
            .ok_or(LendingError::UnknownLoan {
                loan_id: old_loan_id,
            })?
            .clone();
        if !old_loan.is_active() {
            return Err(LendingError::LoanNotActive {
                loan_id: old_loan_id,
                state: old_loan.state,
            });
        }

        let borrower = core
            .borrower_note
            .owner_of(old_loan_id)
            .ok_or(LendingError::CallerNotNoteHolder {
                loan_id: old_loan_id,
            })?;
        let old_lender =
            core.lender_note
                .owner_of(old_loan_id)
                .ok_or(LendingError::CallerNotNoteHolder {
                    loan_id: old_loan_id,
                })?;

        check_terms_continuity(&old_loan, &terms)?;
        validate_loan_terms(&self.config, &terms, now)?;
        validate_whitelist(&self.config, &terms)?;

        // rate must improve by the configured minimum; churn for fee
        // harvesting is not a refinance
        let improvement = old_loan.terms.interest_rate.as_decimal()
            - terms.interest_rate.as_decimal();
        if improvement < self.config.min_refinance_improvement.as_decimal() {
            return Err(LendingError::InterestChangeTooSmall {
                old_rate: old_loan.terms.interest_rate,
                new_rate: terms.interest_rate,
            });
        }

        let old_maturity = old_loan.maturity();
        let new_maturity = interest::maturity(now, terms.duration_secs);
        if new_maturity < old_maturity {
            return Err(LendingError::DurationShortened {
                old_maturity,
                new_maturity,
            });
        }

        let interest_amount = old_loan.interest_due(now);
        let payoff = old_loan.balance + interest_amount;
        if terms.principal < payoff {
            return Err(LendingError::PrincipalBelowPayoff {
                payoff,
                net_principal: terms.principal,
            });
        }

        let amounts = refinance_amounts(&old_loan, &terms, now, caller == old_lender);

        let currency = terms.payable_currency;
        let affiliate_code = terms.affiliate_code.clone();
        bank.transfer(currency, caller, core.address(), amounts.amount_from_lender)?;

        let fee_snapshot = self.config.fee_schedule.snapshot();
        let new_loan_id = core.refinance(
            nfts,
            now,
            old_loan_id,
            borrower,
            caller,
            terms,
            &amounts,
            fee_snapshot,
        )?;

        bank.transfer(
            currency,
            core.address(),
            old_lender,
            amounts.amount_to_old_lender,
        )?;
        bank.transfer(currency, core.address(), caller, amounts.amount_to_lender)?;
        bank.transfer(
            currency,
            core.address(),
            borrower,
            amounts.amount_to_borrower,
        )?;

        let residue = amounts.amount_from_lender
            - amounts.amount_to_old_lender
            - amounts.amount_to_lender
            - amounts.amount_to_borrower;
        core.record_fees(currency, residue, affiliate_code.as_deref())?;

        Ok(new_loan_id)
    }
}

/// a replacement loan keeps the collateral and settlement currency of the
/// loan it closes
fn check_terms_continuity(old_loan: &LoanData, terms: &LoanTerms) -> Result<()> {
    if terms.payable_currency != old_loan.terms.payable_currency {
        return Err(LendingError::CurrencyMismatch);
    }
    if terms.collateral_address != old_loan.terms.collateral_address {
        return Err(LendingError::CollateralMismatch);
    }
    if terms.collateral_id != old_loan.terms.collateral_id {
        return Err(LendingError::CollateralIdMismatch);
    }
    Ok(())
}

/// resolve who owes whom for a rollover
///
/// The borrower either covers a shortfall or receives leftover principal,
/// never both; when one lender funds both sides only the net difference
/// moves.
pub fn compute_rollover_amounts(
    old_loan: &LoanData,
    new_terms: &LoanTerms,
    now: DateTime<Utc>,
    fee_schedule: &FeeSchedule,
    same_lender: bool,
) -> RolloverAmounts {
    let interest_amount = old_loan.interest_due(now);
    let repay_amount = old_loan.balance + interest_amount;
    let to_old_lender_gross = old_loan.lender_share(interest_amount, old_loan.balance);

    let borrower_fee = new_terms
        .principal
        .bps_share(fee_schedule.borrower_origination_fee);
    let available = new_terms.principal - borrower_fee;

    let (need_from_borrower, leftover_principal) = if available >= repay_amount {
        (Money::ZERO, available - repay_amount)
    } else {
        (repay_amount - available, Money::ZERO)
    };

    let (amount_from_lender, amount_to_old_lender, amount_to_lender) = if same_lender {
        if new_terms.principal >= to_old_lender_gross {
            (
                new_terms.principal - to_old_lender_gross,
                Money::ZERO,
                Money::ZERO,
            )
        } else {
            (
                Money::ZERO,
                Money::ZERO,
                to_old_lender_gross - new_terms.principal,
            )
        }
    } else {
        (new_terms.principal, to_old_lender_gross, Money::ZERO)
    };

    RolloverAmounts {
        need_from_borrower,
        leftover_principal,
        amount_from_lender,
        amount_to_old_lender,
        amount_to_lender,
        amount_to_borrower: leftover_principal,
        interest_amount,
    }
}

/// refinance variant: no borrower-side fee, payoff fully covered by the
/// new principal
fn refinance_amounts(
    old_loan: &LoanData,
    new_terms: &LoanTerms,
    now: DateTime<Utc>,
    same_lender: bool,
) -> RolloverAmounts {
    let interest_amount = old_loan.interest_due(now);
    let repay_amount = old_loan.balance + interest_amount;
    let to_old_lender_gross = old_loan.lender_share(interest_amount, old_loan.balance);
    let leftover_principal = new_terms.principal - repay_amount;

    let (amount_from_lender, amount_to_old_lender, amount_to_lender) = if same_lender {
        (
            new_terms.principal - to_old_lender_gross,
            Money::ZERO,
            Money::ZERO,
        )
    } else {
        (new_terms.principal, to_old_lender_gross, Money::ZERO)
    };

    RolloverAmounts {
        need_from_borrower: Money::ZERO,
        leftover_principal,
        amount_from_lender,
        amount_to_old_lender,
        amount_to_lender,
        amount_to_borrower: leftover_principal,
        interest_amount,
    }
}
