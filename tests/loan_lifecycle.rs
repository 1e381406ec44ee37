//! End-to-end loan lifecycle: origination, partial and full repayment,
//! default and claim, force-repay receipts, and note transferability.

mod common;

use nft_lending_rs::{Address, Event, LendingError, LoanState, Money};

use common::{Protocol, APE_ID};

// ============================================================================
// Origination
// ============================================================================

#[test]
fn test_origination_mints_notes_and_moves_funds() {
    let mut p = Protocol::new();
    let loan_id = p.originate_standard();
    assert_eq!(loan_id, 1);

    let loan = p.core.loan(loan_id).unwrap();
    assert_eq!(loan.state, LoanState::Active);
    assert_eq!(loan.balance, Money::from_major(1000));
    assert_eq!(loan.start_date, p.now());
    assert_eq!(loan.last_accrual_timestamp, p.now());

    // 1% origination fee withheld from the borrower's proceeds
    assert_eq!(p.balance(p.borrower), Protocol::money("2990"));
    assert_eq!(p.balance(p.lender), Protocol::money("9000"));
    assert_eq!(p.core.protocol_fees(p.usdc), Money::from_major(10));

    assert_eq!(p.core.borrower_note.owner_of(loan_id), Some(p.borrower));
    assert_eq!(p.core.lender_note.owner_of(loan_id), Some(p.lender));
    assert_eq!(p.nfts.owner_of(p.apes, APE_ID), Some(p.core.address()));
}

#[test]
fn test_origination_emits_start_and_nonce_events() {
    let mut p = Protocol::new();
    let loan_id = p.originate_standard();

    let events = p.core.take_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::LoanStarted { loan_id: id, .. } if *id == loan_id)));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::NonceUsed { nonce: 1, .. })));
}

// ============================================================================
// Repayment
// ============================================================================

#[test]
fn test_interest_only_payment_leaves_balance_untouched() {
    let mut p = Protocol::new();
    let loan_id = p.originate_standard();

    p.advance_days(15);
    let interest = p.interest_due(loan_id);
    assert_eq!(interest, Protocol::money("4.10958904"));

    let outcome = p
        .repayment
        .repay(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            p.borrower,
            loan_id,
            interest,
        )
        .unwrap();
    assert_eq!(outcome.interest_portion, interest);
    assert_eq!(outcome.principal_portion, Money::ZERO);

    let loan = p.core.loan(loan_id).unwrap();
    assert_eq!(loan.state, LoanState::Active);
    assert_eq!(loan.balance, Money::from_major(1000));
    assert_eq!(loan.interest_amount_paid, interest);
    assert_eq!(loan.last_accrual_timestamp, p.now());
}

#[test]
fn test_full_repayment_returns_collateral() {
    let mut p = Protocol::new();
    let loan_id = p.originate_standard();

    p.advance_days(10);
    p.repayment
        .repay_full(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            p.borrower,
            loan_id,
        )
        .unwrap();

    let loan = p.core.loan(loan_id).unwrap();
    assert_eq!(loan.state, LoanState::Repaid);
    assert_eq!(loan.balance, Money::ZERO);

    assert_eq!(p.nfts.owner_of(p.apes, APE_ID), Some(p.borrower));
    assert_eq!(p.core.borrower_note.owner_of(loan_id), None);
    assert_eq!(p.core.lender_note.owner_of(loan_id), None);

    // 2.73972602 interest, lender keeps 90% of it plus the principal
    assert_eq!(p.balance(p.lender), Protocol::money("10002.46575342"));
    assert_eq!(
        p.balance(p.borrower),
        Protocol::money("2990") - Protocol::money("1002.73972602")
    );
}

#[test]
fn test_payment_below_interest_floor_rejected_without_mutation() {
    let mut p = Protocol::new();
    let loan_id = p.originate_standard();
    let borrower_before = p.balance(p.borrower);

    p.advance_days(15);
    let interest = p.interest_due(loan_id);
    let accrual_before = p.core.loan(loan_id).unwrap().last_accrual_timestamp;

    let err = p
        .repayment
        .repay(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            p.borrower,
            loan_id,
            interest - Protocol::money("0.5"),
        )
        .unwrap_err();
    assert!(matches!(err, LendingError::PaymentBelowMinimum { .. }));

    let loan = p.core.loan(loan_id).unwrap();
    assert_eq!(loan.balance, Money::from_major(1000));
    assert_eq!(loan.interest_amount_paid, Money::ZERO);
    assert_eq!(loan.last_accrual_timestamp, accrual_before);
    assert_eq!(p.balance(p.borrower), borrower_before);
}

#[test]
fn test_over_repayment_rejected() {
    let mut p = Protocol::new();
    let loan_id = p.originate_standard();

    p.advance_days(15);
    let interest = p.interest_due(loan_id);
    let err = p
        .repayment
        .repay(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            p.borrower,
            loan_id,
            Money::from_major(1000) + interest + Money::from_major(1),
        )
        .unwrap_err();
    assert!(matches!(err, LendingError::OverRepayment { .. }));
}

#[test]
fn test_balance_conservation_across_partial_repayments() {
    let mut p = Protocol::new();
    let loan_id = p.originate_standard();
    let mut principal_applied = Money::ZERO;

    p.advance_days(10);
    let repay_amount = p.interest_due(loan_id) + Money::from_major(300);
    let outcome = p
        .repayment
        .repay(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            p.borrower,
            loan_id,
            repay_amount,
        )
        .unwrap();
    assert_eq!(outcome.principal_portion, Money::from_major(300));
    principal_applied += outcome.principal_portion;

    p.advance_days(10);
    let repay_amount = p.interest_due(loan_id) + Money::from_major(400);
    let outcome = p
        .repayment
        .repay(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            p.borrower,
            loan_id,
            repay_amount,
        )
        .unwrap();
    principal_applied += outcome.principal_portion;

    p.advance_days(5);
    let outcome = p
        .repayment
        .repay_full(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            p.borrower,
            loan_id,
        )
        .unwrap();
    principal_applied += outcome.principal_portion;

    // principal portions sum to exactly the original principal
    assert_eq!(principal_applied, Money::from_major(1000));
    assert_eq!(p.core.loan(loan_id).unwrap().state, LoanState::Repaid);
}

#[test]
fn test_repaid_loan_rejects_further_payments() {
    let mut p = Protocol::new();
    let loan_id = p.originate_standard();

    p.repayment
        .repay_full(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            p.borrower,
            loan_id,
        )
        .unwrap();

    let err = p
        .repayment
        .repay(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            p.borrower,
            loan_id,
            Money::from_major(1),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        LendingError::LoanNotActive {
            state: LoanState::Repaid,
            ..
        }
    ));
}

#[test]
fn test_repayment_events() {
    let mut p = Protocol::new();
    let loan_id = p.originate_standard();
    p.core.take_events();

    p.advance_days(10);
    p.repayment
        .repay_full(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            p.borrower,
            loan_id,
        )
        .unwrap();

    let events = p.core.take_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::LoanPayment { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::LoanRepaid { loan_id: id, .. } if *id == loan_id)));
}

// ============================================================================
// Default and claim
// ============================================================================

#[test]
fn test_claim_defaulted_loan_after_grace() {
    let mut p = Protocol::new();
    let loan_id = p.originate_standard();

    // at maturity the loan is late but still inside the grace period
    p.advance_days(30);
    let err = p
        .repayment
        .claim(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            p.lender,
            loan_id,
        )
        .unwrap_err();
    assert!(matches!(err, LendingError::LoanNotDefaulted { .. }));

    p.advance_days(1);
    p.repayment
        .claim(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            p.lender,
            loan_id,
        )
        .unwrap();

    assert_eq!(p.core.loan(loan_id).unwrap().state, LoanState::Defaulted);
    assert_eq!(p.nfts.owner_of(p.apes, APE_ID), Some(p.lender));
    assert_eq!(p.core.lender_note.owner_of(loan_id), None);
    assert_eq!(p.core.borrower_note.owner_of(loan_id), None);
}

#[test]
fn test_claim_rights_follow_the_lender_note() {
    let mut p = Protocol::new();
    let loan_id = p.originate_standard();
    let carol = Address::from_label("carol");

    p.core
        .lender_note
        .transfer(loan_id, p.lender, carol)
        .unwrap();

    p.advance_days(31);
    let err = p
        .repayment
        .claim(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            p.lender,
            loan_id,
        )
        .unwrap_err();
    assert!(matches!(err, LendingError::CallerNotNoteHolder { .. }));

    p.repayment
        .claim(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            carol,
            loan_id,
        )
        .unwrap();
    assert_eq!(p.nfts.owner_of(p.apes, APE_ID), Some(carol));
}

// ============================================================================
// Force repay and note receipts
// ============================================================================

#[test]
fn test_force_repay_settles_through_a_receipt() {
    let mut p = Protocol::new();
    let loan_id = p.originate_standard();

    p.advance_days(10);
    p.repayment
        .force_repay_full(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            p.borrower,
            loan_id,
        )
        .unwrap();

    // borrower exits immediately, lender proceeds wait in the receipt
    assert_eq!(p.core.loan(loan_id).unwrap().state, LoanState::Repaid);
    assert_eq!(p.nfts.owner_of(p.apes, APE_ID), Some(p.borrower));
    assert_eq!(p.balance(p.lender), Protocol::money("9000"));
    assert_eq!(p.core.lender_note.owner_of(loan_id), Some(p.lender));
    assert_eq!(
        p.core.receipt(loan_id).unwrap().amount,
        Protocol::money("1002.46575342")
    );

    let treasury = Address::from_label("lender-treasury");
    let paid = p
        .repayment
        .redeem_note(
            &mut p.core,
            &mut p.bank,
            &p.time,
            p.lender,
            loan_id,
            treasury,
        )
        .unwrap();
    assert_eq!(paid, Protocol::money("1002.46575342"));
    assert_eq!(p.bank.balance_of(p.usdc, treasury), paid);
    assert_eq!(p.core.lender_note.owner_of(loan_id), None);
    assert!(p.core.receipt(loan_id).is_none());
}

#[test]
fn test_redeem_requires_the_lender_note() {
    let mut p = Protocol::new();
    let loan_id = p.originate_standard();

    p.repayment
        .force_repay_full(
            &mut p.core,
            &mut p.bank,
            &mut p.nfts,
            &p.time,
            p.borrower,
            loan_id,
        )
        .unwrap();

    let err = p
        .repayment
        .redeem_note(
            &mut p.core,
            &mut p.bank,
            &p.time,
            p.borrower,
            loan_id,
            p.borrower,
        )
        .unwrap_err();
    assert!(matches!(err, LendingError::CallerNotNoteHolder { .. }));
}
