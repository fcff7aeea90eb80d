use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::store::model::{PricePoint, PriceRecord};

/// Durable, append-only price history.
#[async_trait]
pub trait PriceRepository: Send + Sync {
    /// Appends a row and returns its id.
    async fn insert(&self, point: &PricePoint) -> Result<i64>;

    /// Most recent row by observation timestamp.
    async fn latest(&self) -> Result<Option<PriceRecord>>;

    /// Up to `limit` rows, newest first.
    async fn history(&self, limit: usize) -> Result<Vec<PriceRecord>>;

    /// Rows with `start <= timestamp <= end`, oldest first.
    async fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<PriceRecord>>;

    async fn count(&self) -> Result<u64>;

    /// Deletes rows observed strictly before `cutoff`; returns rows removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
