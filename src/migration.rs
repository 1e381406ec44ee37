use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;

use crate::config::ProtocolConfig;
use crate::decimal::{Money, Rate};
use crate::errors::{LendingError, Result};
use crate::loan_core::LoanCore;
use crate::origination::OriginationController;
use crate::signature::{loan_terms_digest, verify_terms_signature, TermsSignature};
use crate::tokens::{Bank, NftRegistry};
use crate::types::{Address, LoanId, LoanTerms, Predicate, Role, Side, SigProperties};
use crate::validation::{run_predicates_check, validate_loan_terms, validate_whitelist};

/// what the adapter needs to know about a loan on a foreign ledger
#[derive(Debug, Clone)]
pub struct SourceLoanView {
    pub active: bool,
    pub payable_currency: Address,
    pub collateral_address: Address,
    pub collateral_id: u128,
    pub borrower_note_owner: Address,
}

/// a foreign lending ledger a borrower is migrating away from
///
/// A prior protocol version or a competitor. The adapter only needs to
/// inspect a loan, price its payoff, and settle it; releasing collateral
/// to the borrower-note holder is part of the source's own repay flow.
pub trait SourceLedger {
    fn loan_view(&self, loan_id: LoanId) -> Option<SourceLoanView>;

    fn payoff_amount(&self, loan_id: LoanId, now: DateTime<Utc>) -> Money;

    /// settle the loan in full from `payer`'s funds and release the
    /// collateral to the borrower-note holder
    fn repay_and_release(
        &mut self,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        now: DateTime<Utc>,
        loan_id: LoanId,
        payer: Address,
    ) -> Result<()>;
}

/// everything a flash-loan callback may touch
pub struct MigrationContext<'a> {
    pub origination: &'a mut OriginationController,
    pub core: &'a mut LoanCore,
    pub bank: &'a mut Bank,
    pub nfts: &'a mut NftRegistry,
    pub time: &'a SafeTimeProvider,
    pub source: &'a mut dyn SourceLedger,
}

/// receiver side of a flash loan
pub trait FlashBorrower {
    fn receive_flash_loan(
        &mut self,
        ctx: &mut MigrationContext<'_>,
        token: Address,
        amount: Money,
        fee: Money,
        params: &[u8],
    ) -> Result<()>;
}

/// minimal flash lender: transfer out, call back, pull back plus fee
///
/// The whole round trip happens inside one `flash_loan` call; a shortfall
/// at the end fails the entire operation.
#[derive(Debug, Clone)]
pub struct FlashLoanPool {
    address: Address,
    fee_rate: Rate,
}

impl FlashLoanPool {
    pub fn new(address: Address, fee_rate: Rate) -> Self {
        Self { address, fee_rate }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn flash_fee(&self, amount: Money) -> Money {
        amount.bps_share(self.fee_rate)
    }

    pub fn flash_loan(
        &self,
        ctx: &mut MigrationContext<'_>,
        receiver: &mut dyn FlashBorrower,
        receiver_address: Address,
        token: Address,
        amount: Money,
        params: &[u8],
    ) -> Result<()> {
        let fee = self.flash_fee(amount);
        ctx.bank
            .transfer(token, self.address, receiver_address, amount)?;

        receiver.receive_flash_loan(ctx, token, amount, fee, params)?;

        let required = amount + fee;
        let available = ctx.bank.balance_of(token, receiver_address);
        if available < required {
            return Err(LendingError::FlashLoanNotRepaid {
                required,
                available,
            });
        }
        ctx.bank
            .transfer(token, receiver_address, self.address, required)
    }
}

/// details of the migration currently in flight
#[derive(Debug, Clone)]
struct PendingMigration {
    old_loan_id: LoanId,
    terms: LoanTerms,
    borrower: Address,
    lender: Address,
    payoff: Money,
    borrower_fee: Money,
    /// new principal net of the origination fee
    available: Money,
    predicates: Vec<Predicate>,
}

/// flash-loan-funded bridge that closes a loan on a foreign ledger and
/// atomically opens an equivalent loan here
///
/// The `current_borrower` slot is the correlation token: it must be empty
/// on entry, is set for the duration of one migration, and is cleared on
/// every exit path. The flash callback refuses to run unless it matches,
/// because the pool — not this adapter — is the direct caller.
#[derive(Debug)]
pub struct MigrationAdapter {
    address: Address,
    paused: bool,
    current_borrower: Option<Address>,
    pending: Option<PendingMigration>,
    completed: Option<LoanId>,
}

impl MigrationAdapter {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            paused: false,
            current_borrower: None,
            pending: None,
            completed: None,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(
        &mut self,
        config: &ProtocolConfig,
        caller: Address,
        paused: bool,
    ) -> Result<()> {
        config.require_role(caller, Role::Owner)?;
        self.paused = paused;
        Ok(())
    }

    /// close `old_loan_id` on `source` and open an equivalent loan here
    ///
    /// Settles directly when the new principal covers the payoff,
    /// otherwise funds the gap with a flash loan and collects any borrower
    /// shortfall before repaying it.
    #[allow(clippy::too_many_arguments)]
    pub fn migrate_loan(
        &mut self,
        origination: &mut OriginationController,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        time: &SafeTimeProvider,
        source: &mut dyn SourceLedger,
        pool: &FlashLoanPool,
        caller: Address,
        old_loan_id: LoanId,
        terms: LoanTerms,
        lender: Address,
        sig: &TermsSignature,
        sig_props: SigProperties,
        predicates: &[Predicate],
    ) -> Result<LoanId> {
        if self.paused {
            return Err(LendingError::AdapterPaused);
        }
        if let Some(borrower) = self.current_borrower {
            return Err(LendingError::BorrowerNotReset { borrower });
        }
        self.current_borrower = Some(caller);

        let snapshot = (core.clone(), bank.clone(), nfts.clone());
        let result = self.migrate_inner(
            origination,
            core,
            bank,
            nfts,
            time,
            source,
            pool,
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

        self.current_borrower = None;
        self.pending = None;
        self.completed = None;
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn migrate_inner(
        &mut self,
        origination: &mut OriginationController,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        time: &SafeTimeProvider,
        source: &mut dyn SourceLedger,
        pool: &FlashLoanPool,
        caller: Address,
        old_loan_id: LoanId,
        terms: LoanTerms,
        lender: Address,
        sig: &TermsSignature,
        sig_props: SigProperties,
        predicates: &[Predicate],
    ) -> Result<LoanId> {
        let now = time.now();
        let view = source
            .loan_view(old_loan_id)
            .ok_or(LendingError::SourceLoanNotActive)?;
        if !view.active {
            return Err(LendingError::SourceLoanNotActive);
        }
        if view.borrower_note_owner != caller {
            return Err(LendingError::CallerNotNoteHolder {
                loan_id: old_loan_id,
            });
        }
        if terms.payable_currency != view.payable_currency {
            return Err(LendingError::CurrencyMismatch);
        }
        if terms.collateral_address != view.collateral_address {
            return Err(LendingError::CollateralMismatch);
        }
        if terms.collateral_id != view.collateral_id {
            return Err(LendingError::CollateralIdMismatch);
        }

        validate_loan_terms(&origination.config, &terms, now)?;
        validate_whitelist(&origination.config, &terms)?;

        // the borrower migrates, so the incoming lender must have signed
        let digest = loan_terms_digest(&terms, Side::Lender, caller, sig_props, &[], predicates);
        verify_terms_signature(sig, &digest)?;
        if !origination.approvals.is_self_or_approved(lender, sig.signer) {
            return Err(LendingError::UnauthorizedSigner {
                signer: sig.signer,
                expected: lender,
            });
        }
        core.consume_nonce(sig.signer, sig_props.nonce, sig_props.max_uses)?;

        let payoff = source.payoff_amount(old_loan_id, now);
        let borrower_fee = terms
            .principal
            .bps_share(origination.config.fee_schedule.borrower_origination_fee);
        let available = terms.principal - borrower_fee;
        let pending = PendingMigration {
            old_loan_id,
            terms: terms.clone(),
            borrower: caller,
            lender,
            payoff,
            borrower_fee,
            available,
            predicates: predicates.to_vec(),
        };

        if available >= payoff {
            // the new lender's principal covers the payoff outright
            let currency = terms.payable_currency;
            bank.transfer(currency, lender, self.address, terms.principal)?;
            source.repay_and_release(bank, nfts, now, old_loan_id, self.address)?;
            self.open_migrated_loan(origination, core, bank, nfts, now, &pending)
        } else {
            self.pending = Some(pending);
            let mut ctx = MigrationContext {
                origination,
                core,
                bank,
                nfts,
                time,
                source,
            };
            let params = caller.as_bytes().to_vec();
            let adapter_address = self.address;
            let currency = terms.payable_currency;
            pool.flash_loan(&mut ctx, self, adapter_address, currency, payoff, &params)?;
            self.completed
                .take()
                .ok_or(LendingError::UnexpectedFlashLoan)
        }
    }

    /// shared tail of both settlement paths: escrow, open, pay out, check
    ///
    /// On entry the adapter holds the new principal minus the source
    /// payoff (plus any borrower shortfall on the flash path) and the
    /// collateral sits with the borrower, just released by the source.
    fn open_migrated_loan(
        &self,
        origination: &mut OriginationController,
        core: &mut LoanCore,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        now: DateTime<Utc>,
        pending: &PendingMigration,
    ) -> Result<LoanId> {
        let terms = &pending.terms;
        let currency = terms.payable_currency;

        nfts.transfer(
            terms.collateral_address,
            terms.collateral_id,
            pending.borrower,
            core.address(),
        )?;

        let leftover = pending.available.saturating_sub(pending.payoff);
        let fee_snapshot = origination.config.fee_schedule.snapshot();
        let loan_id = core.start_loan(
            nfts,
            now,
            pending.lender,
            pending.borrower,
            terms.clone(),
            leftover,
            fee_snapshot,
        )?;

        // fee plus any borrower surplus moves through the ledger account
        bank.transfer(
            currency,
            self.address,
            core.address(),
            pending.borrower_fee + leftover,
        )?;
        bank.transfer(currency, core.address(), pending.borrower, leftover)?;
        core.record_fees(
            currency,
            pending.borrower_fee,
            terms.affiliate_code.as_deref(),
        )?;

        check_predicates_after_escrow(origination, nfts, pending)?;

        Ok(loan_id)
    }
}

fn check_predicates_after_escrow(
    origination: &OriginationController,
    nfts: &NftRegistry,
    pending: &PendingMigration,
) -> Result<()> {
    run_predicates_check(
        &origination.config,
        &origination.verifiers,
        nfts,
        pending.borrower,
        pending.lender,
        &pending.terms,
        &pending.predicates,
    )
}

impl FlashBorrower for MigrationAdapter {
    /// invoked by the pool, not by this adapter, so it independently
    /// verifies it is completing a migration it itself started
    fn receive_flash_loan(
        &mut self,
        ctx: &mut MigrationContext<'_>,
        token: Address,
        _amount: Money,
        fee: Money,
        params: &[u8],
    ) -> Result<()> {
        let correlated = params.len() == 32
            && self
                .current_borrower
                .map(|b| b.as_bytes().as_slice() == params)
                .unwrap_or(false);
        if !correlated {
            return Err(LendingError::UnexpectedFlashLoan);
        }
        let pending = self.pending.take().ok_or(LendingError::UnexpectedFlashLoan)?;
        if token != pending.terms.payable_currency {
            return Err(LendingError::CurrencyMismatch);
        }

        let now = ctx.time.now();

        // principal in, old loan settled with the flash funds
        ctx.bank.transfer(
            token,
            pending.lender,
            self.address,
            pending.terms.principal,
        )?;
        ctx.source
            .repay_and_release(ctx.bank, ctx.nfts, now, pending.old_loan_id, self.address)?;

        // the borrower covers the gap between payoff + fee and their new
        // net principal
        let shortfall = pending.payoff + fee - pending.available;
        ctx.bank
            .transfer(token, pending.borrower, self.address, shortfall)?;

        let loan_id = self.open_migrated_loan(
            ctx.origination,
            ctx.core,
            ctx.bank,
            ctx.nfts,
            now,
            &pending,
        )?;
        self.completed = Some(loan_id);
        Ok(())
    }
}
