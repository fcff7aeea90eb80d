//! Price sanity bounds, decimal normalisation, and the fixed-point encoding
//! used by the oracle contract.
//!
//! Everything here is pure and stateless. Both threshold gates (the
//! distributor and the updater) call [`should_update`], but each keeps its
//! own reference price.

use crate::error::ValidationError;

/// Decimal places kept by [`normalize`] unless configured otherwise.
pub const DEFAULT_PRECISION: u32 = 8;

/// On-chain prices are `price * 10^8` as an unsigned integer.
pub const FIXED_POINT_SCALE: f64 = 100_000_000.0;

pub const MIN_PRICE: f64 = 1.0;
pub const MAX_PRICE: f64 = 1_000_000.0;

/// Rejects prices outside `[MIN_PRICE, MAX_PRICE]`. NaN is treated as non-positive.
pub fn validate(price: f64) -> Result<(), ValidationError> {
    if price.is_nan() || price <= 0.0 {
        return Err(ValidationError::NonPositivePrice(price));
    }
    if price > MAX_PRICE {
        return Err(ValidationError::PriceTooHigh(price));
    }
    if price < MIN_PRICE {
        return Err(ValidationError::PriceTooLow(price));
    }
    Ok(())
}

/// Rounds to `precision` decimal places (half away from zero).
/// Non-positive and NaN input collapses to `0.0`.
pub fn normalize(price: f64, precision: u32) -> f64 {
    if price.is_nan() || price <= 0.0 {
        return 0.0;
    }
    let multiplier = 10f64.powi(precision as i32);
    (price * multiplier).round() / multiplier
}

/// Encodes a price for the contract.
///
/// The price is normalised first; the scaled value is then rounded to the
/// nearest integer so float representation error (`1800.12345678 * 1e8`
/// landing on `...677.99998`) cannot drop the last digit. For any price that
/// already has at most 8 decimals this equals truncation of the exact value.
pub fn to_fixed_point(price: f64) -> u64 {
    let normalized = normalize(price, DEFAULT_PRECISION);
    if normalized <= 0.0 {
        return 0;
    }
    (normalized * FIXED_POINT_SCALE).round() as u64
}

pub fn from_fixed_point(value: u64) -> f64 {
    value as f64 / FIXED_POINT_SCALE
}

/// Relative change `|new - last| / last`. Returns `None` when there is no reference.
pub fn relative_change(new: f64, last: f64) -> Option<f64> {
    if last == 0.0 {
        return None;
    }
    Some(((new - last) / last).abs())
}

/// Threshold gate: true iff there is no reference price yet or the relative
/// move is at least `threshold`.
pub fn should_update(new: f64, last: f64, threshold: f64) -> bool {
    match relative_change(new, last) {
        None => true,
        Some(change) => change >= threshold,
    }
}
