use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One validated, normalized observation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl PricePoint {
    pub fn new(price: f64, timestamp: DateTime<Utc>, source: impl Into<String>) -> Self {
        Self {
            price,
            timestamp,
            source: source.into(),
        }
    }
}

/// Row of the append-only `price_records` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceRecord {
    pub id: i64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PriceRecord {
    pub fn to_point(&self) -> PricePoint {
        PricePoint::new(self.price, self.timestamp, self.source.clone())
    }
}

impl From<PriceRecord> for PricePoint {
    fn from(r: PriceRecord) -> Self {
        PricePoint {
            price: r.price,
            timestamp: r.timestamp,
            source: r.source,
        }
    }
}
