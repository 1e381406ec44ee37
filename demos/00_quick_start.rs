/// quick start - originate an NFT-backed loan, accrue interest, repay
use chrono::{Duration, TimeZone, Utc};
use rand::rngs::OsRng;

use nft_lending_rs::{
    sign_loan_terms, Address, Bank, BorrowerData, CurrencyConfig, FeeSchedule, LoanCore,
    LoanTerms, Money, NftRegistry, OriginationController, ProtocolConfig, Rate,
    RepaymentController, SafeTimeProvider, Side, SigProperties, SigningKey, TimeSource,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== quick start ===\n");

    // controlled time so the walkthrough is deterministic
    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    ));
    let controller = time.test_control().unwrap();

    // protocol configuration: one currency, one collection, modest fees
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
    config.fee_schedule = FeeSchedule {
        borrower_origination_fee: Rate::from_bps(100),
        lender_interest_fee: Rate::from_bps(1000),
        lender_principal_fee: Rate::ZERO,
    };

    let mut core = LoanCore::new(Address::from_label("loan-core"), config.grace_period_secs);
    let mut origination = OriginationController::new(config);
    let repayment = RepaymentController::new();

    // two parties with keys, funds, and an ape
    let borrower_key = SigningKey::generate(&mut OsRng);
    let lender_key = SigningKey::generate(&mut OsRng);
    let borrower = Address(borrower_key.verifying_key().to_bytes());
    let lender = Address(lender_key.verifying_key().to_bytes());

    let mut bank = Bank::new();
    bank.mint(usdc, lender, Money::from_major(10_000));
    bank.mint(usdc, borrower, Money::from_major(500));

    let mut nfts = NftRegistry::new();
    nfts.mint(apes, 7, borrower);

    // the lender signs an off-chain offer addressed at the borrower
    let terms = LoanTerms {
        interest_rate: Rate::from_bps(1000), // 10% APR
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

    // the borrower accepts it
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
    println!("loan {} originated on {}", loan_id, time.now().format("%Y-%m-%d"));
    println!("borrower proceeds: ${}", bank.balance_of(usdc, borrower));

    // half the term passes
    controller.advance(Duration::days(15));
    let due = core.loan(loan_id).unwrap().interest_due(time.now());
    println!("\ninterest due after 15 days: ${}", due);

    // an interest-only payment keeps the balance whole
    repayment.repay(&mut core, &mut bank, &mut nfts, &time, borrower, loan_id, due)?;
    println!(
        "balance after interest-only payment: ${}",
        core.loan(loan_id).unwrap().balance
    );

    // settle in full at maturity
    controller.advance(Duration::days(15));
    let outcome =
        repayment.repay_full(&mut core, &mut bank, &mut nfts, &time, borrower, loan_id)?;
    println!(
        "\nfinal payment: ${} interest + ${} principal",
        outcome.interest_portion, outcome.principal_portion
    );

    let loan = core.loan(loan_id).unwrap();
    println!("final status: {:?}", loan.state);
    println!("ape back with borrower: {}", nfts.owner_of(apes, 7) == Some(borrower));
    println!("lender balance: ${}", bank.balance_of(usdc, lender));

    Ok(())
}
