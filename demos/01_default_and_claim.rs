/// default and claim - a loan runs past maturity and the lender claims
use chrono::{Duration, TimeZone, Utc};
use rand::rngs::OsRng;

use nft_lending_rs::{
    sign_loan_terms, Address, Bank, BorrowerData, CurrencyConfig, LoanCore, LoanTerms, Money,
    NftRegistry, OriginationController, ProtocolConfig, Rate, RepaymentController,
    SafeTimeProvider, Side, SigProperties, SigningKey, TimeSource,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== default and claim ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    ));
    let controller = time.test_control().unwrap();

    let owner = Address::from_label("owner");
    let usdc = Address::from_label("usdc");
    let apes = Address::from_label("apes");

    let mut config = ProtocolConfig::new(owner);
    config.set_allowed_payable_currencies(
        owner,
        vec![(
            usdc,
            CurrencyConfig {
                min_principal: Money::from_major(100),
            },
        )],
    )?;
    config.set_allowed_collateral_addresses(owner, vec![apes])?;

    let mut core = LoanCore::new(Address::from_label("loan-core"), config.grace_period_secs);
    let mut origination = OriginationController::new(config);
    let repayment = RepaymentController::new();

    let borrower_key = SigningKey::generate(&mut OsRng);
    let lender_key = SigningKey::generate(&mut OsRng);
    let borrower = Address(borrower_key.verifying_key().to_bytes());
    let lender = Address(lender_key.verifying_key().to_bytes());

    let mut bank = Bank::new();
    bank.mint(usdc, lender, Money::from_major(5_000));

    let mut nfts = NftRegistry::new();
    nfts.mint(apes, 7, borrower);

    let terms = LoanTerms {
        interest_rate: Rate::from_bps(1500),
        duration_secs: 30 * 86_400,
        collateral_address: apes,
        collateral_id: 7,
        deadline: time.now() + Duration::days(1),
        payable_currency: usdc,
        principal: Money::from_major(1000),
        affiliate_code: None,
    };
    let props = SigProperties {
        nonce: 1,
        max_uses: 1,
    };
    let sig = sign_loan_terms(&lender_key, &terms, Side::Lender, borrower, props, &[], &[]);

    let loan_id = origination.initialize_loan(
        &mut core,
        &mut bank,
        &mut nfts,
        &time,
        borrower,
        terms,
        BorrowerData::default(),
        borrower,
        lender,
        &sig,
        props,
        &[],
        None,
    )?;
    println!("loan {} originated, 30-day term", loan_id);

    // maturity passes with nothing repaid
    controller.advance(Duration::days(30));
    println!("at maturity: {}", time.now().format("%Y-%m-%d"));

    // inside the grace period the claim is premature
    let err = repayment
        .claim(&mut core, &mut bank, &mut nfts, &time, lender, loan_id)
        .unwrap_err();
    println!("claim during grace period: {}", err);

    // past the grace period the collateral is the lender's
    controller.advance(Duration::days(1));
    repayment.claim(&mut core, &mut bank, &mut nfts, &time, lender, loan_id)?;

    let loan = core.loan(loan_id).unwrap();
    println!("\nfinal status: {:?}", loan.state);
    println!("ape now with lender: {}", nfts.owner_of(apes, 7) == Some(lender));

    Ok(())
}
