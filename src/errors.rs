use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::decimal::{Money, Rate};
use crate::types::{Address, LoanId, LoanState, Role};

#[derive(Error, Debug)]
pub enum LendingError {
    // terms validation
    #[error("principal too low: minimum {minimum}, provided {provided}")]
    PrincipalTooLow { minimum: Money, provided: Money },

    #[error("duration out of bounds: {provided}s")]
    DurationOutOfBounds { provided: u64 },

    #[error("interest rate out of bounds: {provided}")]
    InterestRateOutOfBounds { provided: Rate },

    #[error("signature expired: deadline {deadline}, current time {now}")]
    SignatureExpired {
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    // whitelisting
    #[error("currency not allowed: {currency}")]
    CurrencyNotAllowed { currency: Address },

    #[error("collateral not allowed: {collateral}")]
    CollateralNotAllowed { collateral: Address },

    #[error("verifier not allowed: {verifier}")]
    VerifierNotAllowed { verifier: Address },

    #[error("predicate {index} failed")]
    PredicateFailed { index: usize },

    // authorization
    #[error("invalid signature from {signer}")]
    InvalidSignature { signer: Address },

    #[error("signer {signer} not authorized for {expected}")]
    UnauthorizedSigner { signer: Address, expected: Address },

    #[error("caller {caller} is party to neither side of the loan")]
    UnknownCaller { caller: Address },

    #[error("nonce {nonce} exhausted for {user}")]
    NonceExhausted { user: Address, nonce: u64 },

    #[error("caller does not hold the note for loan {loan_id}")]
    CallerNotNoteHolder { loan_id: LoanId },

    #[error("missing role {required:?} for {caller}")]
    NotAuthorized { caller: Address, required: Role },

    // state machine
    #[error("loan {loan_id} not active: current state is {state:?}")]
    LoanNotActive { loan_id: LoanId, state: LoanState },

    #[error("loan {loan_id} not yet claimable: claimable at {claimable_at}")]
    LoanNotDefaulted {
        loan_id: LoanId,
        claimable_at: DateTime<Utc>,
    },

    #[error("no receipt outstanding for loan {loan_id}")]
    NoReceiptOutstanding { loan_id: LoanId },

    #[error("unknown loan {loan_id}")]
    UnknownLoan { loan_id: LoanId },

    #[error("reentrant call into the settlement ledger")]
    Reentrancy,

    // accounting invariants
    #[error("payment below minimum: interest due {minimum}, provided {provided}")]
    PaymentBelowMinimum { minimum: Money, provided: Money },

    #[error("over-repayment: balance {balance}, principal portion {provided}")]
    OverRepayment { balance: Money, provided: Money },

    #[error("repayment split mismatch: expected lender share {expected}, provided {provided}")]
    RepaymentMismatch { expected: Money, provided: Money },

    #[error(
        "funds conflict: need_from_borrower {need_from_borrower} and \
         leftover_principal {leftover_principal} both nonzero"
    )]
    FundsConflict {
        need_from_borrower: Money,
        leftover_principal: Money,
    },

    #[error("affiliate split {split} exceeds maximum {maximum}")]
    SplitTooLarge { split: Rate, maximum: Rate },

    #[error("settlement imbalance: residual {delta}")]
    SettlementImbalance { delta: Money },

    // token environment
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Money,
        requested: Money,
    },

    #[error("token {collateral}#{collateral_id} not owned by {claimed}")]
    NotTokenOwner {
        collateral: Address,
        collateral_id: u128,
        claimed: Address,
    },

    #[error("collateral for loan {loan_id} left escrow mid-origination")]
    CollateralNotEscrowed { loan_id: LoanId },

    #[error("note already minted for loan {loan_id}")]
    NoteAlreadyMinted { loan_id: LoanId },

    // refinance guards
    #[error("interest change too small: old {old_rate}, new {new_rate}")]
    InterestChangeTooSmall { old_rate: Rate, new_rate: Rate },

    #[error("refinance shortens maturity: old {old_maturity}, new {new_maturity}")]
    DurationShortened {
        old_maturity: DateTime<Utc>,
        new_maturity: DateTime<Utc>,
    },

    #[error("principal below payoff: payoff {payoff}, net principal {net_principal}")]
    PrincipalBelowPayoff {
        payoff: Money,
        net_principal: Money,
    },

    // migration
    #[error("migration adapter is paused")]
    AdapterPaused,

    #[error("migration already in flight for {borrower}")]
    BorrowerNotReset { borrower: Address },

    #[error("flash loan callback not correlated with a migration in flight")]
    UnexpectedFlashLoan,

    #[error("source loan not active")]
    SourceLoanNotActive,

    #[error("currency mismatch between source loan and new terms")]
    CurrencyMismatch,

    #[error("collateral mismatch between source loan and new terms")]
    CollateralMismatch,

    #[error("collateral id mismatch between source loan and new terms")]
    CollateralIdMismatch,

    #[error("flash loan not repaid: required {required}, available {available}")]
    FlashLoanNotRepaid {
        required: Money,
        available: Money,
    },

    // callbacks
    #[error("borrower callback failed: {message}")]
    CallbackFailed { message: String },
}

pub type Result<T> = std::result::Result<T, LendingError>;
