pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod interest;
pub mod loan_core;
pub mod migration;
pub mod notes;
pub mod origination;
pub mod predicates;
pub mod repayment;
pub mod signature;
pub mod state;
pub mod tokens;
pub mod types;
pub mod validation;

// re-export key types
pub use decimal::{Money, Rate};
pub use errors::{LendingError, Result};
pub use events::{Event, EventStore};
pub use config::{CurrencyConfig, FeeSchedule, ProtocolConfig};
pub use interest::{effective_interest_rate, prorated_interest_due, BASIS_POINTS, SECONDS_PER_YEAR};
pub use loan_core::LoanCore;
pub use migration::{
    FlashBorrower, FlashLoanPool, MigrationAdapter, MigrationContext, SourceLedger,
    SourceLoanView,
};
pub use notes::NoteRegistry;
pub use origination::{compute_rollover_amounts, BorrowerCallback, OriginationController};
pub use predicates::{
    BundleContentsVerifier, CollectionWildcardVerifier, PredicateVerifier, SpecificTokenVerifier,
    VerifierRegistry,
};
pub use repayment::{RepaymentController, RepaymentOutcome};
pub use signature::{
    loan_terms_digest, sign_loan_terms, verify_terms_signature, ApprovalRegistry, NonceRegistry,
    TermsSignature,
};
pub use state::{LoanData, NoteReceipt};
pub use tokens::{vault_address, Bank, NftRegistry};
pub use types::{
    Address, AffiliateSplit, BorrowerData, FeeSnapshot, LoanId, LoanState, LoanTerms, Predicate,
    Role, RolloverAmounts, Side, SigProperties,
};

// re-export external dependencies that users will need
pub use chrono;
pub use ed25519_dalek::SigningKey;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
