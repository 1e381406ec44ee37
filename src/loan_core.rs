use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{ProtocolConfig, MAX_AFFILIATE_SPLIT_BPS};
use crate::decimal::{Money, Rate};
use crate::errors::{LendingError, Result};
use crate::events::{Event, EventStore};
use crate::notes::NoteRegistry;
use crate::signature::NonceRegistry;
use crate::state::{LoanData, NoteReceipt};
use crate::tokens::{Bank, NftRegistry};
use crate::types::{AffiliateSplit, Address, FeeSnapshot, LoanId, LoanState, LoanTerms, RolloverAmounts};

/// the settlement ledger
///
/// Owns the canonical loan map, escrows collateral under its own address,
/// mints and burns the two ownership notes, and performs fee bookkeeping.
/// Fund choreography belongs to the orchestrating controllers; LoanCore
/// moves money only where a transition itself requires it (lender payout on
/// repay, receipt payout on redemption).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanCore {
    address: Address,
    grace_period_secs: u64,
    next_loan_id: LoanId,
    loans: BTreeMap<LoanId, LoanData>,
    pub borrower_note: NoteRegistry,
    pub lender_note: NoteRegistry,
    receipts: BTreeMap<LoanId, NoteReceipt>,
    pub nonces: NonceRegistry,
    /// protocol-claimable fees per currency
    fees: BTreeMap<Address, Money>,
    affiliate_splits: BTreeMap<String, AffiliateSplit>,
    /// affiliate -> currency -> claimable amount
    affiliate_balances: BTreeMap<Address, BTreeMap<Address, Money>>,
    #[serde(skip)]
    locked: bool,
    #[serde(skip)]
    pub events: EventStore,
}

impl LoanCore {
    pub fn new(address: Address, grace_period_secs: u64) -> Self {
        Self {
            address,
            grace_period_secs,
            next_loan_id: 1,
            loans: BTreeMap::new(),
            borrower_note: NoteRegistry::new(),
            lender_note: NoteRegistry::new(),
            receipts: BTreeMap::new(),
            nonces: NonceRegistry::new(),
            fees: BTreeMap::new(),
            affiliate_splits: BTreeMap::new(),
            affiliate_balances: BTreeMap::new(),
            locked: false,
            events: EventStore::new(),
        }
    }

    /// escrow/fee account this ledger controls in the token environment
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn grace_period_secs(&self) -> u64 {
        self.grace_period_secs
    }

    pub fn loan(&self, loan_id: LoanId) -> Option<&LoanData> {
        self.loans.get(&loan_id)
    }

    pub fn receipt(&self, loan_id: LoanId) -> Option<&NoteReceipt> {
        self.receipts.get(&loan_id)
    }

    pub fn protocol_fees(&self, currency: Address) -> Money {
        self.fees.get(&currency).copied().unwrap_or(Money::ZERO)
    }

    pub fn affiliate_balance(&self, affiliate: Address, currency: Address) -> Money {
        self.affiliate_balances
            .get(&affiliate)
            .and_then(|per_currency| per_currency.get(&currency))
            .copied()
            .unwrap_or(Money::ZERO)
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.take_events()
    }

    fn non_reentrant<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.locked {
            return Err(LendingError::Reentrancy);
        }
        self.locked = true;
        let result = f(self);
        self.locked = false;
        result
    }

    fn active_loan_mut(&mut self, loan_id: LoanId) -> Result<&mut LoanData> {
        let loan = self
            .loans
            .get_mut(&loan_id)
            .ok_or(LendingError::UnknownLoan { loan_id })?;
        if loan.state != LoanState::Active {
            return Err(LendingError::LoanNotActive {
                loan_id,
                state: loan.state,
            });
        }
        Ok(loan)
    }

    fn assert_escrowed(&self, nfts: &NftRegistry, terms: &LoanTerms, loan_id: LoanId) -> Result<()> {
        if nfts.owner_of(terms.collateral_address, terms.collateral_id) != Some(self.address) {
            return Err(LendingError::CollateralNotEscrowed { loan_id });
        }
        Ok(())
    }

    /// credit fee revenue, routing any affiliate share
    pub fn record_fees(
        &mut self,
        currency: Address,
        amount: Money,
        affiliate_code: Option<&str>,
    ) -> Result<()> {
        if amount < Money::ZERO {
            return Err(LendingError::SettlementImbalance { delta: amount });
        }
        if amount.is_zero() {
            return Ok(());
        }

        let affiliate_cut = affiliate_code
            .and_then(|code| self.affiliate_splits.get(code))
            .map(|split| (split.affiliate, amount.bps_share(split.split)));

        let mut protocol_amount = amount;
        if let Some((affiliate, cut)) = affiliate_cut {
            protocol_amount -= cut;
            let entry = self
                .affiliate_balances
                .entry(affiliate)
                .or_default()
                .entry(currency)
                .or_insert(Money::ZERO);
            *entry += cut;
        }

        let entry = self.fees.entry(currency).or_insert(Money::ZERO);
        *entry += protocol_amount;
        Ok(())
    }

    /// open a new loan record
    ///
    /// The caller (origination role) must already have escrowed the
    /// collateral under this ledger's address and handled principal
    /// movement; this is asserted, then trusted.
    #[allow(clippy::too_many_arguments)]
    pub fn start_loan(
        &mut self,
        nfts: &NftRegistry,
        now: DateTime<Utc>,
        lender: Address,
        borrower: Address,
        terms: LoanTerms,
        amount_to_borrower: Money,
        fee_snapshot: FeeSnapshot,
    ) -> Result<LoanId> {
        self.non_reentrant(|core| {
            let loan_id = core.next_loan_id;
            core.assert_escrowed(nfts, &terms, loan_id)?;

            let principal = terms.principal;
            core.loans
                .insert(loan_id, LoanData::new(loan_id, terms, fee_snapshot, now));
            core.next_loan_id += 1;

            core.borrower_note.mint(loan_id, borrower)?;
            core.lender_note.mint(loan_id, lender)?;

            core.events.emit(Event::LoanStarted {
                loan_id,
                borrower,
                lender,
                principal,
                amount_to_borrower,
                timestamp: now,
            });

            Ok(loan_id)
        })
    }

    /// apply a repayment split and pay the lender directly
    ///
    /// The controller computes the split and has already pulled
    /// `interest_amount + payment_to_principal` from the payer into this
    /// ledger's account. The split is re-derived from the frozen fee
    /// snapshot and rejected on mismatch.
    #[allow(clippy::too_many_arguments)]
    pub fn repay(
        &mut self,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        now: DateTime<Utc>,
        loan_id: LoanId,
        payer: Address,
        amount_to_lender: Money,
        interest_amount: Money,
        payment_to_principal: Money,
    ) -> Result<()> {
        self.non_reentrant(|core| {
            let settled = core.apply_repayment(
                now,
                loan_id,
                payer,
                amount_to_lender,
                interest_amount,
                payment_to_principal,
            )?;

            let currency = settled.currency;
            let lender = core
                .lender_note
                .owner_of(loan_id)
                .ok_or(LendingError::CallerNotNoteHolder { loan_id })?;
            bank.transfer(currency, core.address, lender, amount_to_lender)?;
            core.record_fees(
                currency,
                settled.fee_amount,
                settled.affiliate_code.as_deref(),
            )?;

            if settled.fully_repaid {
                core.settle_repaid(nfts, now, loan_id, true)?;
            }
            Ok(())
        })
    }

    /// repayment variant that never pushes funds at the lender
    ///
    /// Lender proceeds accumulate in a note receipt so a blocking
    /// recipient cannot stall the borrower's exit; the lender note
    /// survives until redemption.
    #[allow(clippy::too_many_arguments)]
    pub fn force_repay(
        &mut self,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        now: DateTime<Utc>,
        loan_id: LoanId,
        payer: Address,
        amount_to_lender: Money,
        interest_amount: Money,
        payment_to_principal: Money,
    ) -> Result<()> {
        self.non_reentrant(|core| {
            let settled = core.apply_repayment(
                now,
                loan_id,
                payer,
                amount_to_lender,
                interest_amount,
                payment_to_principal,
            )?;

            let currency = settled.currency;
            let receipt = core
                .receipts
                .entry(loan_id)
                .or_insert_with(|| NoteReceipt::new(currency));
            receipt.amount += amount_to_lender;
            let receipt_amount = receipt.amount;

            core.record_fees(
                currency,
                settled.fee_amount,
                settled.affiliate_code.as_deref(),
            )?;

            core.events.emit(Event::ForceRepay {
                loan_id,
                payer,
                receipt_amount,
                timestamp: now,
            });

            if settled.fully_repaid {
                core.settle_repaid(nfts, now, loan_id, false)?;
            }
            Ok(())
        })
    }

    /// shared accounting for both repayment variants
    fn apply_repayment(
        &mut self,
        now: DateTime<Utc>,
        loan_id: LoanId,
        payer: Address,
        amount_to_lender: Money,
        interest_amount: Money,
        payment_to_principal: Money,
    ) -> Result<SettledPayment> {
        let loan = self.active_loan_mut(loan_id)?;

        if payment_to_principal > loan.balance {
            return Err(LendingError::OverRepayment {
                balance: loan.balance,
                provided: payment_to_principal,
            });
        }

        let expected = loan.lender_share(interest_amount, payment_to_principal);
        if expected != amount_to_lender {
            return Err(LendingError::RepaymentMismatch {
                expected,
                provided: amount_to_lender,
            });
        }

        loan.balance -= payment_to_principal;
        loan.interest_amount_paid += interest_amount;
        loan.last_accrual_timestamp = now;

        let settled = SettledPayment {
            currency: loan.terms.payable_currency,
            affiliate_code: loan.terms.affiliate_code.clone(),
            fee_amount: loan.protocol_share(interest_amount, payment_to_principal),
            fully_repaid: loan.balance.is_zero(),
        };
        let remaining_balance = loan.balance;

        self.events.emit(Event::LoanPayment {
            loan_id,
            payer,
            interest_portion: interest_amount,
            principal_portion: payment_to_principal,
            remaining_balance,
            timestamp: now,
        });

        Ok(settled)
    }

    /// terminal bookkeeping once a balance reaches zero
    fn settle_repaid(
        &mut self,
        nfts: &mut NftRegistry,
        now: DateTime<Utc>,
        loan_id: LoanId,
        burn_lender_note: bool,
    ) -> Result<()> {
        let loan = self
            .loans
            .get_mut(&loan_id)
            .ok_or(LendingError::UnknownLoan { loan_id })?;
        loan.state = LoanState::Repaid;
        let collateral = (loan.terms.collateral_address, loan.terms.collateral_id);
        let total_interest_paid = loan.interest_amount_paid;

        let borrower = self
            .borrower_note
            .owner_of(loan_id)
            .ok_or(LendingError::CallerNotNoteHolder { loan_id })?;
        nfts.transfer(collateral.0, collateral.1, self.address, borrower)?;
        self.borrower_note.burn(loan_id);
        if burn_lender_note {
            self.lender_note.burn(loan_id);
        }

        self.events.emit(Event::LoanRepaid {
            loan_id,
            total_interest_paid,
            timestamp: now,
        });
        Ok(())
    }

    /// default the loan and hand collateral to the lender-note holder
    ///
    /// `claimant` has been validated as the lender-note holder by the
    /// caller. Any outstanding receipt pays out alongside the collateral.
    pub fn claim(
        &mut self,
        bank: &mut Bank,
        nfts: &mut NftRegistry,
        now: DateTime<Utc>,
        loan_id: LoanId,
        claimant: Address,
    ) -> Result<()> {
        self.non_reentrant(|core| {
            let grace = core.grace_period_secs;
            let loan = core.active_loan_mut(loan_id)?;
            let claimable_at = loan.claimable_at(grace);
            if now <= claimable_at {
                return Err(LendingError::LoanNotDefaulted {
                    loan_id,
                    claimable_at,
                });
            }

            loan.state = LoanState::Defaulted;
            let collateral = (loan.terms.collateral_address, loan.terms.collateral_id);

            nfts.transfer(collateral.0, collateral.1, core.address, claimant)?;
            core.borrower_note.burn(loan_id);
            core.lender_note.burn(loan_id);

            if let Some(receipt) = core.receipts.remove(&loan_id) {
                bank.transfer(receipt.token, core.address, claimant, receipt.amount)?;
            }

            core.events.emit(Event::LoanClaimed {
                loan_id,
                claimant,
                timestamp: now,
            });
            Ok(())
        })
    }

    /// pay out an outstanding note receipt
    ///
    /// `to` was chosen by the validated lender-note holder. The lender
    /// note burns here once the loan is terminal.
    pub fn redeem_note(
        &mut self,
        bank: &mut Bank,
        now: DateTime<Utc>,
        loan_id: LoanId,
        to: Address,
    ) -> Result<Money> {
        self.non_reentrant(|core| {
            let receipt = core
                .receipts
                .remove(&loan_id)
                .ok_or(LendingError::NoReceiptOutstanding { loan_id })?;

            bank.transfer(receipt.token, core.address, to, receipt.amount)?;

            let terminal = core
                .loans
                .get(&loan_id)
                .map(|loan| loan.state != LoanState::Active)
                .unwrap_or(true);
            if terminal {
                core.lender_note.burn(loan_id);
            }

            core.events.emit(Event::NoteRedeemed {
                loan_id,
                receipt_id: receipt.receipt_id,
                recipient: to,
                amount: receipt.amount,
                timestamp: now,
            });
            Ok(receipt.amount)
        })
    }

    /// atomically close an old loan and open its successor over the same
    /// collateral
    ///
    /// Transfer amounts are pre-resolved by the caller; this is strictly
    /// the state transition, note churn, and event linkage.
    #[allow(clippy::too_many_arguments)]
    pub fn rollover(
        &mut self,
        nfts: &NftRegistry,
        now: DateTime<Utc>,
        old_loan_id: LoanId,
        borrower: Address,
        lender: Address,
        terms: LoanTerms,
        amounts: &RolloverAmounts,
        fee_snapshot: FeeSnapshot,
    ) -> Result<LoanId> {
        let new_loan_id =
            self.replace_loan(nfts, now, old_loan_id, borrower, lender, terms, amounts, fee_snapshot)?;
        self.events.emit(Event::LoanRolledOver {
            old_loan_id,
            new_loan_id,
            timestamp: now,
        });
        Ok(new_loan_id)
    }

    /// rollover variant where a new lender takes over the loan
    #[allow(clippy::too_many_arguments)]
    pub fn refinance(
        &mut self,
        nfts: &NftRegistry,
        now: DateTime<Utc>,
        old_loan_id: LoanId,
        borrower: Address,
        lender: Address,
        terms: LoanTerms,
        amounts: &RolloverAmounts,
        fee_snapshot: FeeSnapshot,
    ) -> Result<LoanId> {
        let old_rate = self
            .loan(old_loan_id)
            .ok_or(LendingError::UnknownLoan { loan_id: old_loan_id })?
            .terms
            .interest_rate;
        let new_rate = terms.interest_rate;
        let new_loan_id =
            self.replace_loan(nfts, now, old_loan_id, borrower, lender, terms, amounts, fee_snapshot)?;
        self.events.emit(Event::LoanRefinanced {
            old_loan_id,
            new_loan_id,
            old_rate,
            new_rate,
            timestamp: now,
        });
        Ok(new_loan_id)
    }

    #[allow(clippy::too_many_arguments)]
    fn replace_loan(
        &mut self,
        nfts: &NftRegistry,
        now: DateTime<Utc>,
        old_loan_id: LoanId,
        borrower: Address,
        lender: Address,
        terms: LoanTerms,
        amounts: &RolloverAmounts,
        fee_snapshot: FeeSnapshot,
    ) -> Result<LoanId> {
        self.non_reentrant(|core| {
            if !amounts.is_exclusive() {
                return Err(LendingError::FundsConflict {
                    need_from_borrower: amounts.need_from_borrower,
                    leftover_principal: amounts.leftover_principal,
                });
            }

            // close the old record as an implicit full repayment
            let interest_amount = amounts.interest_amount;
            let old_loan = core.active_loan_mut(old_loan_id)?;
            old_loan.balance = Money::ZERO;
            old_loan.interest_amount_paid += interest_amount;
            old_loan.last_accrual_timestamp = now;
            old_loan.state = LoanState::Repaid;
            let total_interest_paid = old_loan.interest_amount_paid;

            core.borrower_note.burn(old_loan_id);
            core.lender_note.burn(old_loan_id);
            core.events.emit(Event::LoanRepaid {
                loan_id: old_loan_id,
                total_interest_paid,
                timestamp: now,
            });

            // the collateral never leaves escrow between the two records
            let new_loan_id = core.next_loan_id;
            core.assert_escrowed(nfts, &terms, new_loan_id)?;

            core.loans
                .insert(new_loan_id, LoanData::new(new_loan_id, terms, fee_snapshot, now));
            core.next_loan_id += 1;
            core.borrower_note.mint(new_loan_id, borrower)?;
            core.lender_note.mint(new_loan_id, lender)?;

            Ok(new_loan_id)
        })
    }

    /// consume one use of a signature nonce
    pub fn consume_nonce(&mut self, user: Address, nonce: u64, max_uses: u32) -> Result<()> {
        let (uses_consumed, max_uses) = self.nonces.consume(user, nonce, max_uses)?;
        self.events.emit(Event::NonceUsed {
            user,
            nonce,
            uses_consumed,
            max_uses,
        });
        Ok(())
    }

    /// permanently block one of the caller's nonces
    pub fn cancel_nonce(&mut self, caller: Address, nonce: u64) {
        self.nonces.cancel(caller, nonce);
    }

    /// configure affiliate revenue shares (owner role)
    pub fn set_affiliate_splits(
        &mut self,
        config: &ProtocolConfig,
        caller: Address,
        splits: Vec<(String, AffiliateSplit)>,
    ) -> Result<()> {
        config.require_role(caller, crate::types::Role::Owner)?;
        let maximum = Rate::from_bps(MAX_AFFILIATE_SPLIT_BPS);
        for (code, split) in splits {
            if split.split > maximum {
                return Err(LendingError::SplitTooLarge {
                    split: split.split,
                    maximum,
                });
            }
            self.events.emit(Event::AffiliateSet {
                code: code.clone(),
                affiliate: split.affiliate,
                split: split.split,
            });
            self.affiliate_splits.insert(code, split);
        }
        Ok(())
    }

    /// drain accumulated protocol fees (fee-claimer role)
    pub fn withdraw_protocol_fees(
        &mut self,
        config: &ProtocolConfig,
        bank: &mut Bank,
        now: DateTime<Utc>,
        caller: Address,
        currency: Address,
        to: Address,
    ) -> Result<Money> {
        config.require_role(caller, crate::types::Role::FeeClaimer)?;
        self.non_reentrant(|core| {
            let amount = core.fees.remove(&currency).unwrap_or(Money::ZERO);
            bank.transfer(currency, core.address, to, amount)?;
            core.events.emit(Event::FeesWithdrawn {
                currency,
                recipient: to,
                amount,
                timestamp: now,
            });
            Ok(amount)
        })
    }

    /// drain an affiliate's accumulated revenue share
    pub fn withdraw_affiliate_fees(
        &mut self,
        bank: &mut Bank,
        now: DateTime<Utc>,
        caller: Address,
        currency: Address,
        to: Address,
    ) -> Result<Money> {
        self.non_reentrant(|core| {
            let amount = core
                .affiliate_balances
                .get_mut(&caller)
                .and_then(|per_currency| per_currency.remove(&currency))
                .unwrap_or(Money::ZERO);
            bank.transfer(currency, core.address, to, amount)?;
            core.events.emit(Event::FeesWithdrawn {
                currency,
                recipient: to,
                amount,
                timestamp: now,
            });
            Ok(amount)
        })
    }
}

/// accounting facts produced while applying one repayment
struct SettledPayment {
    currency: Address,
    affiliate_code: Option<String>,
    fee_amount: Money,
    fully_repaid: bool,
}
