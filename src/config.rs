use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::decimal::{Money, Rate};
use crate::errors::{LendingError, Result};
use crate::types::{Address, FeeSnapshot, Role};

/// shortest loan the protocol will originate (1 hour)
pub const MIN_LOAN_DURATION_SECS: u64 = 3_600;

/// longest loan the protocol will originate (3 years)
pub const MAX_LOAN_DURATION_SECS: u64 = 94_608_000;

/// lowest accepted APR: 0.01%
pub const MIN_INTEREST_RATE_BPS: u64 = 1;

/// highest accepted APR encoding: 1,000,000%
pub const MAX_INTEREST_RATE_BPS: u64 = 100_000_000;

/// hard cap on any affiliate revenue share
pub const MAX_AFFILIATE_SPLIT_BPS: u64 = 5_000;

/// per-currency whitelist entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyConfig {
    /// smallest principal accepted in this currency
    pub min_principal: Money,
}

/// live fee schedule, sampled into a `FeeSnapshot` at origination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FeeSchedule {
    /// origination fee withheld from the borrower's proceeds
    pub borrower_origination_fee: Rate,
    /// share of interest payments withheld from the lender
    pub lender_interest_fee: Rate,
    /// share of principal repayments withheld from the lender
    pub lender_principal_fee: Rate,
}

impl FeeSchedule {
    /// freeze the lender-side rates for a new loan
    pub fn snapshot(&self) -> FeeSnapshot {
        FeeSnapshot {
            lender_interest_fee: self.lender_interest_fee,
            lender_principal_fee: self.lender_principal_fee,
        }
    }
}

/// protocol-wide configuration: allow-sets, fees, timing, roles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    allowed_currencies: BTreeMap<Address, CurrencyConfig>,
    allowed_collateral: BTreeSet<Address>,
    allowed_verifiers: BTreeSet<Address>,
    pub fee_schedule: FeeSchedule,
    /// delay after maturity before a lender may claim, in seconds
    pub grace_period_secs: u64,
    /// minimum APR improvement a refinancing lender must offer
    pub min_refinance_improvement: Rate,
    roles: BTreeMap<Role, BTreeSet<Address>>,
}

impl ProtocolConfig {
    /// create a configuration with `owner` holding every role
    pub fn new(owner: Address) -> Self {
        let mut roles: BTreeMap<Role, BTreeSet<Address>> = BTreeMap::new();
        for role in [Role::Owner, Role::WhitelistManager, Role::FeeClaimer] {
            roles.entry(role).or_default().insert(owner);
        }

        Self {
            allowed_currencies: BTreeMap::new(),
            allowed_collateral: BTreeSet::new(),
            allowed_verifiers: BTreeSet::new(),
            fee_schedule: FeeSchedule::default(),
            grace_period_secs: 43_200,
            min_refinance_improvement: Rate::from_bps(10),
            roles,
        }
    }

    /// fail unless `caller` holds `required`
    pub fn require_role(&self, caller: Address, required: Role) -> Result<()> {
        let held = self
            .roles
            .get(&required)
            .map(|members| members.contains(&caller))
            .unwrap_or(false);
        if held {
            Ok(())
        } else {
            Err(LendingError::NotAuthorized { caller, required })
        }
    }

    /// grant `role` to `grantee` (owner only)
    pub fn grant_role(&mut self, caller: Address, role: Role, grantee: Address) -> Result<()> {
        self.require_role(caller, Role::Owner)?;
        self.roles.entry(role).or_default().insert(grantee);
        Ok(())
    }

    /// replace the payable-currency allow-set
    pub fn set_allowed_payable_currencies(
        &mut self,
        caller: Address,
        currencies: Vec<(Address, CurrencyConfig)>,
    ) -> Result<()> {
        self.require_role(caller, Role::WhitelistManager)?;
        self.allowed_currencies = currencies.into_iter().collect();
        Ok(())
    }

    /// replace the collateral-collection allow-set
    pub fn set_allowed_collateral_addresses(
        &mut self,
        caller: Address,
        collections: Vec<Address>,
    ) -> Result<()> {
        self.require_role(caller, Role::WhitelistManager)?;
        self.allowed_collateral = collections.into_iter().collect();
        Ok(())
    }

    /// replace the predicate-verifier allow-set
    pub fn set_allowed_verifiers(&mut self, caller: Address, verifiers: Vec<Address>) -> Result<()> {
        self.require_role(caller, Role::WhitelistManager)?;
        self.allowed_verifiers = verifiers.into_iter().collect();
        Ok(())
    }

    pub fn currency_config(&self, currency: Address) -> Option<&CurrencyConfig> {
        self.allowed_currencies.get(&currency)
    }

    pub fn is_collateral_allowed(&self, collection: Address) -> bool {
        self.allowed_collateral.contains(&collection)
    }

    pub fn is_verifier_allowed(&self, verifier: Address) -> bool {
        self.allowed_verifiers.contains(&verifier)
    }
}
