//! Shared fixture wiring the full protocol together: configuration,
//! settlement ledger, token environment, and signing keys for one
//! borrower/lender pair.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::OsRng;

use nft_lending_rs::{
    sign_loan_terms, Address, Bank, BorrowerData, CurrencyConfig, FeeSchedule, LoanCore, LoanId,
    LoanTerms, Money, NftRegistry, OriginationController, Predicate, ProtocolConfig, Rate,
    RepaymentController, Result, SafeTimeProvider, Side, SigProperties, SigningKey,
    TermsSignature, TimeSource,
};

pub const APE_ID: u128 = 7;

pub struct Protocol {
    pub time: SafeTimeProvider,
    pub origination: OriginationController,
    pub repayment: RepaymentController,
    pub core: LoanCore,
    pub bank: Bank,
    pub nfts: NftRegistry,
    pub owner: Address,
    pub borrower_key: SigningKey,
    pub lender_key: SigningKey,
    pub borrower: Address,
    pub lender: Address,
    pub usdc: Address,
    pub apes: Address,
}

impl Protocol {
    /// whitelisted usdc/apes protocol with a 1% origination fee and a 10%
    /// cut of lender interest; borrower holds ape #7, both sides funded
    pub fn new() -> Self {
        let time = SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));

        let owner = Address::from_label("owner");
        let usdc = Address::from_label("usdc");
        let apes = Address::from_label("apes");

        let mut config = ProtocolConfig::new(owner);
        config
            .set_allowed_payable_currencies(
                owner,
                vec![(
                    usdc,
                    CurrencyConfig {
                        min_principal: Money::from_major(100),
                    },
                )],
            )
            .unwrap();
        config
            .set_allowed_collateral_addresses(owner, vec![apes])
            .unwrap();
        config.fee_schedule = FeeSchedule {
            borrower_origination_fee: Rate::from_bps(100),
            lender_interest_fee: Rate::from_bps(1000),
            lender_principal_fee: Rate::ZERO,
        };

        let core = LoanCore::new(Address::from_label("loan-core"), config.grace_period_secs);

        let borrower_key = SigningKey::generate(&mut OsRng);
        let lender_key = SigningKey::generate(&mut OsRng);
        let borrower = Address(borrower_key.verifying_key().to_bytes());
        let lender = Address(lender_key.verifying_key().to_bytes());

        let mut bank = Bank::new();
        bank.mint(usdc, lender, Money::from_major(10_000));
        bank.mint(usdc, borrower, Money::from_major(2_000));

        let mut nfts = NftRegistry::new();
        nfts.mint(apes, APE_ID, borrower);

        Self {
            time,
            origination: OriginationController::new(config),
            repayment: RepaymentController::new(),
            core,
            bank,
            nfts,
            owner,
            borrower_key,
            lender_key,
            borrower,
            lender,
            usdc,
            apes,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    pub fn advance_days(&self, days: i64) {
        self.time
            .test_control()
            .unwrap()
            .advance(Duration::days(days));
    }

    /// 30-day loan over ape #7 at 10% APR in usdc
    pub fn standard_terms(&self, principal: i64) -> LoanTerms {
        LoanTerms {
            interest_rate: Rate::from_bps(1000),
            duration_secs: 30 * 86_400,
            collateral_address: self.apes,
            collateral_id: APE_ID,
            deadline: self.now() + Duration::days(1),
            payable_currency: self.usdc,
            principal: Money::from_major(principal),
            affiliate_code: None,
        }
    }

    /// lender signs an offer addressed at the borrower
    pub fn lender_offer(
        &self,
        terms: &LoanTerms,
        nonce: u64,
        max_uses: u32,
    ) -> (TermsSignature, SigProperties) {
        self.offer_with(&self.lender_key, terms, nonce, max_uses, &[], &[])
    }

    /// offer variant binding callback data and item predicates
    pub fn offer_with(
        &self,
        key: &SigningKey,
        terms: &LoanTerms,
        nonce: u64,
        max_uses: u32,
        callback_data: &[u8],
        predicates: &[Predicate],
    ) -> (TermsSignature, SigProperties) {
        let props = SigProperties { nonce, max_uses };
        let sig = sign_loan_terms(
            key,
            terms,
            Side::Lender,
            self.borrower,
            props,
            callback_data,
            predicates,
        );
        (sig, props)
    }

    /// borrower accepts a signed offer, no callback, no predicates
    pub fn initialize(
        &mut self,
        terms: &LoanTerms,
        sig: &TermsSignature,
        props: SigProperties,
    ) -> Result<LoanId> {
        self.origination.initialize_loan(
            &mut self.core,
            &mut self.bank,
            &mut self.nfts,
            &self.time,
            self.borrower,
            terms.clone(),
            BorrowerData::default(),
            self.borrower,
            self.lender,
            sig,
            props,
            &[],
            None,
        )
    }

    /// originate the standard 1000-usdc loan with a fresh single-use nonce
    pub fn originate_standard(&mut self) -> LoanId {
        let terms = self.standard_terms(1000);
        let (sig, props) = self.lender_offer(&terms, 1, 1);
        self.initialize(&terms, &sig, props).unwrap()
    }

    pub fn balance(&self, holder: Address) -> Money {
        self.bank.balance_of(self.usdc, holder)
    }

    pub fn interest_due(&self, loan_id: LoanId) -> Money {
        self.core.loan(loan_id).unwrap().interest_due(self.now())
    }

    pub fn money(s: &str) -> Money {
        Money::from_str_exact(s).unwrap()
    }
}
