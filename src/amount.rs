//! Money arithmetic helpers.
//!
//! All stakes and balances are `Decimal`. Rounding to cents is
//! half-away-from-zero, matching how brokerages quote stakes.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Floor of any stake, as a fraction of the base stake.
pub const MIN_STAKE_FRACTION: Decimal = dec!(0.01);

/// Round to two decimal places, half away from zero.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `base^exp` for a non-negative integer exponent. Saturates at
/// `Decimal::MAX` instead of overflowing.
pub fn powu(base: Decimal, exp: u32) -> Decimal {
    let mut acc = Decimal::ONE;
    for _ in 0..exp {
        acc = match acc.checked_mul(base) {
            Some(v) => v,
            None => return Decimal::MAX,
        };
    }
    acc
}

/// `a × b`, saturating at `Decimal::MAX` or `Decimal::MIN` instead of
/// panicking on overflow.
pub fn saturating_mul(a: Decimal, b: Decimal) -> Decimal {
    a.checked_mul(b).unwrap_or_else(|| {
        if a.is_sign_negative() != b.is_sign_negative() {
            Decimal::MIN
        } else {
            Decimal::MAX
        }
    })
}

/// `pct` percent of `value`.
pub fn percent_of(value: Decimal, pct: Decimal) -> Decimal {
    value * pct / dec!(100)
}

/// Lowest stake allowed for a given base stake.
pub fn min_stake(base_stake: Decimal) -> Decimal {
    base_stake * MIN_STAKE_FRACTION
}

/// Clamp a raw stake into the tradable range:
/// `round2(max(0.01 × base, min(stake, max_stake, cap)))`.
pub fn clamp_stake(
    stake: Decimal,
    base_stake: Decimal,
    max_stake: Decimal,
    risk_cap: Option<Decimal>,
) -> Decimal {
    let mut upper = max_stake;
    if let Some(cap) = risk_cap {
        upper = upper.min(cap);
    }
    round2(min_stake(base_stake).max(stake.min(upper)))
}
