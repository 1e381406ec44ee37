use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{LendingError, Result};
use crate::types::{Address, LoanTerms, Predicate, Side, SigProperties};

/// domain separator for loan-terms digests
const TERMS_DOMAIN: &[u8] = b"nft-lending/loan-terms/v1";

/// a signed loan-terms payload
///
/// ed25519 has no public-key recovery, so the payload carries the claimed
/// signer; verification checks the signature against that key and the
/// approval registry decides whether the key may sign for the expected
/// counterparty.
#[derive(Debug, Clone)]
pub struct TermsSignature {
    pub signer: Address,
    pub signature: [u8; 64],
}

/// hash of the item predicates bound into an items-variant signature
pub fn predicates_hash(predicates: &[Predicate]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"nft-lending/predicates/v1");
    hasher.update((predicates.len() as u64).to_be_bytes());
    for predicate in predicates {
        hasher.update(predicate.verifier.as_bytes());
        hasher.update((predicate.data.len() as u64).to_be_bytes());
        hasher.update(&predicate.data);
    }
    hasher.finalize().into()
}

/// structured digest binding a signature to the exact economic terms, the
/// signing side, the expected counterparty, replay properties, callback
/// data, and (for item offers) the predicate set
pub fn loan_terms_digest(
    terms: &LoanTerms,
    side: Side,
    signing_counterparty: Address,
    props: SigProperties,
    callback_data: &[u8],
    predicates: &[Predicate],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(TERMS_DOMAIN);
    hasher.update([match side {
        Side::Borrower => 0u8,
        Side::Lender => 1u8,
    }]);
    hasher.update(signing_counterparty.as_bytes());

    let rate = terms.interest_rate.as_bps().to_string();
    hasher.update((rate.len() as u64).to_be_bytes());
    hasher.update(rate.as_bytes());
    hasher.update(terms.duration_secs.to_be_bytes());
    hasher.update(terms.collateral_address.as_bytes());
    hasher.update(terms.collateral_id.to_be_bytes());
    hasher.update(terms.deadline.timestamp().to_be_bytes());
    hasher.update(terms.payable_currency.as_bytes());
    let principal = terms.principal.as_decimal().to_string();
    hasher.update((principal.len() as u64).to_be_bytes());
    hasher.update(principal.as_bytes());
    match &terms.affiliate_code {
        Some(code) => {
            hasher.update([1u8]);
            hasher.update((code.len() as u64).to_be_bytes());
            hasher.update(code.as_bytes());
        }
        None => hasher.update([0u8]),
    }

    hasher.update(props.nonce.to_be_bytes());
    hasher.update(props.max_uses.to_be_bytes());

    let callback_hash: [u8; 32] = Sha256::digest(callback_data).into();
    hasher.update(callback_hash);

    if predicates.is_empty() {
        hasher.update([0u8]);
    } else {
        hasher.update([1u8]);
        hasher.update(predicates_hash(predicates));
    }

    hasher.finalize().into()
}

/// produce a signature over the terms digest (client-side helper)
pub fn sign_loan_terms(
    key: &SigningKey,
    terms: &LoanTerms,
    side: Side,
    signing_counterparty: Address,
    props: SigProperties,
    callback_data: &[u8],
    predicates: &[Predicate],
) -> TermsSignature {
    let digest = loan_terms_digest(
        terms,
        side,
        signing_counterparty,
        props,
        callback_data,
        predicates,
    );
    TermsSignature {
        signer: Address(key.verifying_key().to_bytes()),
        signature: key.sign(&digest).to_bytes(),
    }
}

/// check an ed25519 signature against its claimed signer key
pub fn verify_terms_signature(sig: &TermsSignature, digest: &[u8; 32]) -> Result<()> {
    let key = VerifyingKey::from_bytes(sig.signer.as_bytes())
        .map_err(|_| LendingError::InvalidSignature { signer: sig.signer })?;
    let signature = Signature::from_bytes(&sig.signature);
    key.verify(digest, &signature)
        .map_err(|_| LendingError::InvalidSignature { signer: sig.signer })
}

/// per-(user, nonce) signature-use counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct NonceState {
    max_uses: u32,
    used: u32,
}

/// replay protection supporting one-time and reusable signatures
///
/// The first consumption registers the declared `max_uses`; the digest
/// binds `max_uses` into the signature, so a later mismatching declaration
/// implies a different payload and the registered cap stays authoritative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NonceRegistry {
    states: BTreeMap<Address, BTreeMap<u64, NonceState>>,
}

impl NonceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// consume one use; fails once the counter would exceed the cap
    pub fn consume(&mut self, user: Address, nonce: u64, max_uses: u32) -> Result<(u32, u32)> {
        let state = self
            .states
            .entry(user)
            .or_default()
            .entry(nonce)
            .or_insert(NonceState { max_uses, used: 0 });
        if state.used >= state.max_uses {
            return Err(LendingError::NonceExhausted { user, nonce });
        }
        state.used += 1;
        Ok((state.used, state.max_uses))
    }

    /// permanently block a nonce, used or not
    pub fn cancel(&mut self, user: Address, nonce: u64) {
        self.states
            .entry(user)
            .or_default()
            .entry(nonce)
            .and_modify(|state| state.used = state.max_uses)
            .or_insert(NonceState {
                max_uses: u32::MAX,
                used: u32::MAX,
            });
    }

    pub fn is_exhausted(&self, user: Address, nonce: u64) -> bool {
        self.states
            .get(&user)
            .and_then(|per_user| per_user.get(&nonce))
            .map(|state| state.used >= state.max_uses)
            .unwrap_or(false)
    }
}

/// delegated-approval registry: owner -> accounts allowed to sign for them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalRegistry {
    approvals: BTreeMap<Address, BTreeSet<Address>>,
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approve(&mut self, owner: Address, signer: Address, approved: bool) {
        let entry = self.approvals.entry(owner).or_default();
        if approved {
            entry.insert(signer);
        } else {
            entry.remove(&signer);
        }
    }

    pub fn is_approved(&self, owner: Address, signer: Address) -> bool {
        self.approvals
            .get(&owner)
            .map(|signers| signers.contains(&signer))
            .unwrap_or(false)
    }

    /// the check used everywhere a signer is validated against a party
    pub fn is_self_or_approved(&self, target: Address, signer: Address) -> bool {
        target == signer || self.is_approved(target, signer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::{Money, Rate};
    use chrono::{TimeZone, Utc};
    use rand::rngs::OsRng;

    fn sample_terms() -> LoanTerms {
        LoanTerms {
            interest_rate: Rate::from_bps(1000),
            duration_secs: 30 * 86_400,
            collateral_address: Address::from_label("apes"),
            collateral_id: 7,
            deadline: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            payable_currency: Address::from_label("usdc"),
            principal: Money::from_major(1000),
            affiliate_code: None,
        }
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let key = SigningKey::generate(&mut OsRng);
        let terms = sample_terms();
        let props = SigProperties {
            nonce: 1,
            max_uses: 1,
        };
        let counterparty = Address::from_label("borrower");

        let sig = sign_loan_terms(&key, &terms, Side::Lender, counterparty, props, &[], &[]);
        let digest = loan_terms_digest(&terms, Side::Lender, counterparty, props, &[], &[]);
        verify_terms_signature(&sig, &digest).unwrap();
    }

    #[test]
    fn test_signature_bound_to_terms() {
        let key = SigningKey::generate(&mut OsRng);
        let terms = sample_terms();
        let props = SigProperties {
            nonce: 1,
            max_uses: 1,
        };
        let counterparty = Address::from_label("borrower");

        let sig = sign_loan_terms(&key, &terms, Side::Lender, counterparty, props, &[], &[]);

        let mut altered = terms.clone();
        altered.principal = Money::from_major(2000);
        let digest = loan_terms_digest(&altered, Side::Lender, counterparty, props, &[], &[]);
        assert!(verify_terms_signature(&sig, &digest).is_err());
    }

    #[test]
    fn test_signature_bound_to_counterparty() {
        let key = SigningKey::generate(&mut OsRng);
        let terms = sample_terms();
        let props = SigProperties {
            nonce: 1,
            max_uses: 1,
        };

        let sig = sign_loan_terms(
            &key,
            &terms,
            Side::Lender,
            Address::from_label("borrower"),
            props,
            &[],
            &[],
        );
        let digest = loan_terms_digest(
            &terms,
            Side::Lender,
            Address::from_label("other-borrower"),
            props,
            &[],
            &[],
        );
        assert!(verify_terms_signature(&sig, &digest).is_err());
    }

    #[test]
    fn test_single_use_nonce() {
        let user = Address::from_label("lender");
        let mut nonces = NonceRegistry::new();

        nonces.consume(user, 1, 1).unwrap();
        let err = nonces.consume(user, 1, 1).unwrap_err();
        assert!(matches!(err, LendingError::NonceExhausted { .. }));
    }

    #[test]
    fn test_multi_use_nonce() {
        let user = Address::from_label("lender");
        let mut nonces = NonceRegistry::new();

        for expected in 1..=3 {
            let (used, max) = nonces.consume(user, 9, 3).unwrap();
            assert_eq!((used, max), (expected, 3));
        }
        assert!(nonces.consume(user, 9, 3).is_err());
    }

    #[test]
    fn test_cancel_blocks_unused_nonce() {
        let user = Address::from_label("lender");
        let mut nonces = NonceRegistry::new();

        nonces.cancel(user, 4);
        assert!(nonces.is_exhausted(user, 4));
        assert!(nonces.consume(user, 4, 10).is_err());
    }

    #[test]
    fn test_cancel_blocks_partially_used_nonce() {
        let user = Address::from_label("lender");
        let mut nonces = NonceRegistry::new();

        nonces.consume(user, 5, 10).unwrap();
        nonces.cancel(user, 5);
        assert!(nonces.consume(user, 5, 10).is_err());
    }

    #[test]
    fn test_approval_registry() {
        let owner = Address::from_label("owner");
        let delegate = Address::from_label("delegate");
        let mut approvals = ApprovalRegistry::new();

        assert!(approvals.is_self_or_approved(owner, owner));
        assert!(!approvals.is_self_or_approved(owner, delegate));

        approvals.approve(owner, delegate, true);
        assert!(approvals.is_self_or_approved(owner, delegate));

        approvals.approve(owner, delegate, false);
        assert!(!approvals.is_self_or_approved(owner, delegate));
    }
}
