use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::decimal::{Money, Rate};

/// unique identifier for a loan, assigned monotonically by the ledger
pub type LoanId = u64;

/// 32-byte account identifier
///
/// For signing parties this is an ed25519 public key; for currencies,
/// collections, and protocol components it is an opaque tag. Serialized as
/// a 0x-prefixed hex string so address-keyed maps stay JSON-friendly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 32]);

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let stripped = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(stripped).map_err(serde::de::Error::custom)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32-byte address"))?;
        Ok(Address(array))
    }
}

impl Address {
    pub const ZERO: Address = Address([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// deterministic address for labelled test/protocol accounts
    pub fn from_label(label: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"address-label:");
        hasher.update(label.as_bytes());
        Address(hasher.finalize().into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0[..8]))
    }
}

/// which side of a loan a signature authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Borrower,
    Lender,
}

/// loan lifecycle state
///
/// `Active` is the only non-terminal state reachable after start; the two
/// terminal states have no path back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanState {
    /// loan open and accruing interest
    Active,
    /// balance reached zero through repayment
    Repaid,
    /// lender claimed collateral after the grace period
    Defaulted,
}

/// immutable economic terms of a loan, fixed once signed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanTerms {
    /// annual interest rate in basis points (1000 == 10% APR)
    pub interest_rate: Rate,
    /// loan duration in seconds
    pub duration_secs: u64,
    /// collection the collateral token belongs to
    pub collateral_address: Address,
    /// token id within the collection
    pub collateral_id: u128,
    /// signature expiry
    pub deadline: chrono::DateTime<chrono::Utc>,
    /// currency the principal and repayments are denominated in
    pub payable_currency: Address,
    /// amount lent
    pub principal: Money,
    /// optional revenue-share code applied to protocol fees
    pub affiliate_code: Option<String>,
}

/// fee rates frozen into a loan at origination
///
/// Later fee-schedule changes never retroactively affect open loans.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct FeeSnapshot {
    /// share of each interest payment withheld from the lender
    pub lender_interest_fee: Rate,
    /// share of each principal repayment withheld from the lender
    pub lender_principal_fee: Rate,
}

/// replay-protection properties attached to a signed terms payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigProperties {
    pub nonce: u64,
    /// how many originations this one signature may fund
    pub max_uses: u32,
}

/// borrower-supplied origination extras
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BorrowerData {
    /// opaque bytes forwarded to the borrower callback after settlement;
    /// empty means no callback is invoked
    pub callback_data: Vec<u8>,
}

/// opaque collateral constraint resolved by a named verifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub data: Vec<u8>,
    pub verifier: Address,
}

/// pre-resolved transfer amounts for a rollover or refinance
///
/// Exactly one of `need_from_borrower` / `leftover_principal` may be
/// nonzero; the settlement layer rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RolloverAmounts {
    /// shortfall the borrower must supply to close the old loan
    pub need_from_borrower: Money,
    /// surplus principal paid out to the borrower
    pub leftover_principal: Money,
    /// pulled from the new lender
    pub amount_from_lender: Money,
    /// paid to the departing lender, net of their frozen fees
    pub amount_to_old_lender: Money,
    /// net refund to the lender when they fund both sides
    pub amount_to_lender: Money,
    /// paid to the borrower
    pub amount_to_borrower: Money,
    /// interest accrued on the old loan at rollover time
    pub interest_amount: Money,
}

impl RolloverAmounts {
    /// true when at most one of the two borrower-facing legs is nonzero
    pub fn is_exclusive(&self) -> bool {
        self.need_from_borrower.is_zero() || self.leftover_principal.is_zero()
    }
}

/// revenue-share configuration for one affiliate code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliateSplit {
    /// account entitled to withdraw the shared portion
    pub affiliate: Address,
    /// share of protocol fees routed to the affiliate
    pub split: Rate,
}

/// administrative roles checked by `ProtocolConfig::require_role`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// protocol owner: affiliate splits, fee schedule, pausing
    Owner,
    /// manages the currency/collateral/verifier allow-sets
    WhitelistManager,
    /// may withdraw accumulated protocol fees
    FeeClaimer,
}
