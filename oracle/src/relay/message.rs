use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::model::PricePoint;
use crate::time::now_nanos;

/// Wire format on the relay: `{price, timestamp, source, id}` as JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub price: f64,
    /// RFC 3339.
    pub timestamp: DateTime<Utc>,
    pub source: String,
    /// Nanosecond clock value at publish time; for tracing only.
    pub id: String,
}

impl RelayMessage {
    pub fn from_point(point: &PricePoint) -> Self {
        Self {
            price: point.price,
            timestamp: point.timestamp,
            source: point.source.clone(),
            id: now_nanos().to_string(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
