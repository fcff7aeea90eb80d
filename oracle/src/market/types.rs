use std::collections::HashMap;

use crate::market::errors::FetchError;

/// `{ "<asset>": { "<quote>": <float> } }`, e.g. `{"ethereum":{"usd":1850.0}}`.
pub type SimplePriceResponse = HashMap<String, HashMap<String, f64>>;

/// Pulls `asset.quote` out of a decoded body and applies the positivity check.
pub fn extract_price(
    body: &SimplePriceResponse,
    asset: &str,
    quote: &str,
) -> Result<f64, FetchError> {
    let quotes = body
        .get(asset)
        .ok_or_else(|| FetchError::Protocol(format!("asset `{asset}` missing from response")))?;

    let price = *quotes
        .get(quote)
        .ok_or_else(|| FetchError::Protocol(format!("quote `{quote}` missing for `{asset}`")))?;

    if !price.is_finite() || price <= 0.0 {
        return Err(FetchError::InvalidData(price));
    }

    Ok(price)
}
