//! Exact numeric helpers. No floating point anywhere in the engine.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Price bound in both market precision (`representation`) and asset
/// precision (`original`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedDecimal {
    pub original: Decimal,
    pub representation: Decimal,
}

impl WrappedDecimal {
    pub fn new(original: Decimal, representation: Decimal) -> Self {
        Self { original, representation }
    }
}

/// Saturates at `Decimal::MAX`; a commitment that large is a misconfigured market.
pub fn uint_to_decimal(v: &BigUint) -> Decimal {
    v.to_u128()
        .and_then(|u| i128::try_from(u).ok())
        .and_then(|i| Decimal::try_from_i128_with_scale(i, 0).ok())
        .unwrap_or_else(|| {
            tracing::warn!(value = %v, "integer exceeds decimal range, saturating");
            Decimal::MAX
        })
}

/// `ceil(a / b)`; `b` must be non-zero.
pub fn div_ceil(a: &BigUint, b: &BigUint) -> BigUint {
    if a.is_zero() {
        return BigUint::zero();
    }
    (a + b - 1u32) / b
}

/// Split a non-negative decimal into an exact fraction `mantissa / 10^scale`.
/// Negative values map to zero.
pub fn decimal_fraction(d: Decimal) -> (BigUint, BigUint) {
    if d.is_sign_negative() {
        return (BigUint::zero(), BigUint::from(1u32));
    }
    let mantissa = BigUint::from(d.mantissa().unsigned_abs());
    (mantissa, BigUint::from(10u32).pow(d.scale()))
}

/// `v × factor`, exact, rounded half away from zero.
pub fn mul_decimal_round(v: &BigUint, factor: Decimal) -> BigUint {
    let (num, den) = decimal_fraction(factor);
    let scaled = v * num;
    (scaled * 2u32 + &den) / (den * 2u32)
}

/// `v × factor` as a decimal for reporting; saturates instead of overflowing.
pub fn uint_times_decimal(v: &BigUint, factor: Decimal) -> Decimal {
    uint_to_decimal(v).checked_mul(factor).unwrap_or_else(|| {
        tracing::warn!(value = %v, %factor, "product exceeds decimal range, saturating");
        Decimal::MAX
    })
}

/// Volumes leave the engine as `u64`; anything larger saturates.
pub fn uint_to_u64_saturating(v: &BigUint) -> u64 {
    v.to_u64().unwrap_or(u64::MAX)
}
