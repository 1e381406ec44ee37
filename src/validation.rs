use chrono::{DateTime, Utc};

use crate::config::{
    ProtocolConfig, MAX_INTEREST_RATE_BPS, MAX_LOAN_DURATION_SECS, MIN_INTEREST_RATE_BPS,
    MIN_LOAN_DURATION_SECS,
};
use crate::decimal::{Money, Rate};
use crate::errors::{LendingError, Result};
use crate::predicates::VerifierRegistry;
use crate::tokens::NftRegistry;
use crate::types::{Address, LoanTerms, Predicate};

/// check a proposal's economic bounds against protocol-wide limits
pub fn validate_loan_terms(
    config: &ProtocolConfig,
    terms: &LoanTerms,
    now: DateTime<Utc>,
) -> Result<()> {
    let minimum = config
        .currency_config(terms.payable_currency)
        .map(|c| c.min_principal)
        .unwrap_or(Money::ZERO)
        .max(Money::from_minor(1, 8));
    if terms.principal < minimum {
        return Err(LendingError::PrincipalTooLow {
            minimum,
            provided: terms.principal,
        });
    }

    if terms.duration_secs < MIN_LOAN_DURATION_SECS || terms.duration_secs > MAX_LOAN_DURATION_SECS
    {
        return Err(LendingError::DurationOutOfBounds {
            provided: terms.duration_secs,
        });
    }

    if terms.interest_rate < Rate::from_bps(MIN_INTEREST_RATE_BPS)
        || terms.interest_rate > Rate::from_bps(MAX_INTEREST_RATE_BPS)
    {
        return Err(LendingError::InterestRateOutOfBounds {
            provided: terms.interest_rate,
        });
    }

    if terms.deadline < now {
        return Err(LendingError::SignatureExpired {
            deadline: terms.deadline,
            now,
        });
    }

    Ok(())
}

/// check currency and collateral membership in the admin allow-sets
pub fn validate_whitelist(config: &ProtocolConfig, terms: &LoanTerms) -> Result<()> {
    if config.currency_config(terms.payable_currency).is_none() {
        return Err(LendingError::CurrencyNotAllowed {
            currency: terms.payable_currency,
        });
    }
    if !config.is_collateral_allowed(terms.collateral_address) {
        return Err(LendingError::CollateralNotAllowed {
            collateral: terms.collateral_address,
        });
    }
    Ok(())
}

/// run every item predicate against the escrowed collateral
///
/// Sequenced after collateral custody changes so a callback-triggered
/// withdrawal between signing and evaluation cannot slip past.
pub fn run_predicates_check(
    config: &ProtocolConfig,
    verifiers: &VerifierRegistry,
    nfts: &NftRegistry,
    borrower: Address,
    lender: Address,
    terms: &LoanTerms,
    predicates: &[Predicate],
) -> Result<()> {
    for (index, predicate) in predicates.iter().enumerate() {
        if !config.is_verifier_allowed(predicate.verifier) {
            return Err(LendingError::VerifierNotAllowed {
                verifier: predicate.verifier,
            });
        }
        let verifier = verifiers.get(predicate.verifier).ok_or(
            LendingError::VerifierNotAllowed {
                verifier: predicate.verifier,
            },
        )?;
        let satisfied = verifier.verify(
            borrower,
            lender,
            terms.collateral_address,
            terms.collateral_id,
            &predicate.data,
            nfts,
        );
        if !satisfied {
            return Err(LendingError::PredicateFailed { index });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CurrencyConfig;
    use crate::predicates::CollectionWildcardVerifier;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn config() -> ProtocolConfig {
        let owner = Address::from_label("owner");
        let mut config = ProtocolConfig::new(owner);
        config
            .set_allowed_payable_currencies(
                owner,
                vec![(
                    Address::from_label("usdc"),
                    CurrencyConfig {
                        min_principal: Money::from_major(100),
                    },
                )],
            )
            .unwrap();
        config
            .set_allowed_collateral_addresses(owner, vec![Address::from_label("apes")])
            .unwrap();
        config
    }

    fn terms() -> LoanTerms {
        LoanTerms {
            interest_rate: Rate::from_bps(1000),
            duration_secs: 30 * 86_400,
            collateral_address: Address::from_label("apes"),
            collateral_id: 7,
            deadline: now() + Duration::days(1),
            payable_currency: Address::from_label("usdc"),
            principal: Money::from_major(1000),
            affiliate_code: None,
        }
    }

    #[test]
    fn test_valid_terms_pass() {
        validate_loan_terms(&config(), &terms(), now()).unwrap();
        validate_whitelist(&config(), &terms()).unwrap();
    }

    #[test]
    fn test_principal_below_currency_minimum() {
        let mut t = terms();
        t.principal = Money::from_major(50);
        let err = validate_loan_terms(&config(), &t, now()).unwrap_err();
        assert!(matches!(err, LendingError::PrincipalTooLow { .. }));
    }

    #[test]
    fn test_duration_bounds() {
        let mut t = terms();
        t.duration_secs = 1800;
        assert!(matches!(
            validate_loan_terms(&config(), &t, now()),
            Err(LendingError::DurationOutOfBounds { .. })
        ));

        t.duration_secs = MAX_LOAN_DURATION_SECS + 1;
        assert!(matches!(
            validate_loan_terms(&config(), &t, now()),
            Err(LendingError::DurationOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_rate_bounds() {
        let mut t = terms();
        t.interest_rate = Rate::ZERO;
        assert!(matches!(
            validate_loan_terms(&config(), &t, now()),
            Err(LendingError::InterestRateOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_expired_deadline() {
        let mut t = terms();
        t.deadline = now() - Duration::seconds(1);
        assert!(matches!(
            validate_loan_terms(&config(), &t, now()),
            Err(LendingError::SignatureExpired { .. })
        ));
    }

    #[test]
    fn test_whitelist_rejections() {
        let mut t = terms();
        t.payable_currency = Address::from_label("weth");
        assert!(matches!(
            validate_whitelist(&config(), &t),
            Err(LendingError::CurrencyNotAllowed { .. })
        ));

        let mut t = terms();
        t.collateral_address = Address::from_label("cats");
        assert!(matches!(
            validate_whitelist(&config(), &t),
            Err(LendingError::CollateralNotAllowed { .. })
        ));
    }

    #[test]
    fn test_unregistered_verifier_rejected() {
        let owner = Address::from_label("owner");
        let mut config = config();
        let verifier_addr = Address::from_label("wildcard-verifier");
        let registry = VerifierRegistry::new();
        let nfts = NftRegistry::new();

        let predicate = Predicate {
            data: CollectionWildcardVerifier::encode(Address::from_label("apes")),
            verifier: verifier_addr,
        };

        // not whitelisted at all
        let err = run_predicates_check(
            &config,
            &registry,
            &nfts,
            Address::from_label("borrower"),
            Address::from_label("lender"),
            &terms(),
            &[predicate.clone()],
        )
        .unwrap_err();
        assert!(matches!(err, LendingError::VerifierNotAllowed { .. }));

        // whitelisted but no implementation registered
        config
            .set_allowed_verifiers(owner, vec![verifier_addr])
            .unwrap();
        let err = run_predicates_check(
            &config,
            &registry,
            &nfts,
            Address::from_label("borrower"),
            Address::from_label("lender"),
            &terms(),
            &[predicate],
        )
        .unwrap_err();
        assert!(matches!(err, LendingError::VerifierNotAllowed { .. }));
    }

    #[test]
    fn test_failed_predicate_reports_index() {
        let owner = Address::from_label("owner");
        let mut config = config();
        let verifier_addr = Address::from_label("wildcard-verifier");
        config
            .set_allowed_verifiers(owner, vec![verifier_addr])
            .unwrap();

        let mut registry = VerifierRegistry::new();
        registry.register(verifier_addr, Box::new(CollectionWildcardVerifier));
        let nfts = NftRegistry::new();

        let good = Predicate {
            data: CollectionWildcardVerifier::encode(Address::from_label("apes")),
            verifier: verifier_addr,
        };
        let bad = Predicate {
            data: CollectionWildcardVerifier::encode(Address::from_label("cats")),
            verifier: verifier_addr,
        };

        let err = run_predicates_check(
            &config,
            &registry,
            &nfts,
            Address::from_label("borrower"),
            Address::from_label("lender"),
            &terms(),
            &[good, bad],
        )
        .unwrap_err();
        assert!(matches!(err, LendingError::PredicateFailed { index: 1 }));
    }
}
