use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::decimal::{Money, Rate};

/// denominator of the basis-point APR encoding
pub const BASIS_POINTS: u64 = 10_000;

/// 365-day year, in seconds
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

/// maturity timestamp of a loan
pub fn maturity(start: DateTime<Utc>, duration_secs: u64) -> DateTime<Utc> {
    start + Duration::seconds(duration_secs as i64)
}

/// prorated interest owed on `balance` since the last accrual
///
/// The accrual window is `[max(last_accrual, start), min(now, maturity)]`.
/// Interest stops at full-term maturity even if the loan remains unpaid,
/// and a window of zero (or negative) length owes nothing, so a
/// same-instant repayment accrues zero interest. Result truncates toward
/// zero.
pub fn prorated_interest_due(
    balance: Money,
    rate: Rate,
    duration_secs: u64,
    start: DateTime<Utc>,
    last_accrual: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Money {
    let window_end = now.min(maturity(start, duration_secs));
    let window_start = last_accrual.max(start);
    if window_start >= window_end {
        return Money::ZERO;
    }

    let elapsed = (window_end - window_start).num_seconds();
    let interest = balance.as_decimal() * rate.as_decimal() * Decimal::from(elapsed)
        / Decimal::from(SECONDS_PER_YEAR);

    Money::from_decimal_floor(interest)
}

/// annualized rate actually realized over the life of a loan
///
/// Disclosure only; settlement math never consumes this.
pub fn effective_interest_rate(
    total_interest_paid: Money,
    elapsed_secs: u64,
    principal: Money,
) -> Rate {
    if elapsed_secs == 0 || principal.is_zero() {
        return Rate::ZERO;
    }

    let realized = total_interest_paid.as_decimal() / principal.as_decimal()
        * Decimal::from(SECONDS_PER_YEAR)
        / Decimal::from(elapsed_secs);

    Rate::from_decimal(realized)
}
