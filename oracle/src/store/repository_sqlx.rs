use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{AnyPool, Row};

use crate::store::model::{PricePoint, PriceRecord};
use crate::store::repository::PriceRepository;
use crate::time::{from_millis, now_ms, to_millis};

/// SQLx-backed implementation of PriceRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxPriceRepository {
    pool: AnyPool,
}

impl SqlxPriceRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriceRepository for SqlxPriceRepository {
    async fn insert(&self, point: &PricePoint) -> anyhow::Result<i64> {
        let now = now_ms();

        let row = sqlx::query(
            r#"
INSERT INTO price_records (price, timestamp_ms, source, created_at_ms, updated_at_ms)
VALUES ($1, $2, $3, $4, $5)
RETURNING id;
"#,
        )
        .bind(point.price)
        .bind(to_millis(&point.timestamp))
        .bind(point.source.clone())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("insert price record")?;

        Ok(row.try_get::<i64, _>("id")?)
    }

    async fn latest(&self) -> anyhow::Result<Option<PriceRecord>> {
        let row = sqlx::query(
            r#"
SELECT id, price, timestamp_ms, source, created_at_ms, updated_at_ms
FROM price_records
ORDER BY timestamp_ms DESC, id DESC
LIMIT 1;
"#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn history(&self, limit: usize) -> anyhow::Result<Vec<PriceRecord>> {
        let rows = sqlx::query(
            r#"
SELECT id, price, timestamp_ms, source, created_at_ms, updated_at_ms
FROM price_records
ORDER BY timestamp_ms DESC, id DESC
LIMIT $1;
"#,
        )
        .bind(usize_to_i64(limit)?)
        .fetch_all(&self.pool)
        .await?;

        collect_records(rows)
    }

    async fn range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PriceRecord>> {
        let rows = sqlx::query(
            r#"
SELECT id, price, timestamp_ms, source, created_at_ms, updated_at_ms
FROM price_records
WHERE timestamp_ms >= $1 AND timestamp_ms <= $2
ORDER BY timestamp_ms ASC, id ASC;
"#,
        )
        .bind(to_millis(&start))
        .bind(to_millis(&end))
        .fetch_all(&self.pool)
        .await?;

        collect_records(rows)
    }

    async fn count(&self) -> anyhow::Result<u64> {
        let row = sqlx::query(r#"SELECT COUNT(*) AS n FROM price_records;"#)
            .fetch_one(&self.pool)
            .await?;

        i64_to_u64(row.try_get::<i64, _>("n")?)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let res = sqlx::query(r#"DELETE FROM price_records WHERE timestamp_ms < $1;"#)
            .bind(to_millis(&cutoff))
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected())
    }
}

/* =========================
Row mapping + conversions
========================= */

fn collect_records(rows: Vec<sqlx::any::AnyRow>) -> anyhow::Result<Vec<PriceRecord>> {
    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        match row_to_record(&r) {
            Ok(rec) => out.push(rec),
            Err(e) => {
                // poison-row resilience: skip but don't fail the read
                tracing::warn!(error = %e, "skipping malformed price row");
            }
        }
    }
    Ok(out)
}

fn row_to_record(r: &sqlx::any::AnyRow) -> anyhow::Result<PriceRecord> {
    let price: f64 = r.try_get("price").context("price column")?;
    if !price.is_finite() || price <= 0.0 {
        return Err(anyhow!("non-positive price in durable row: {price}"));
    }

    Ok(PriceRecord {
        id: r.try_get("id")?,
        price,
        timestamp: from_millis(r.try_get("timestamp_ms")?),
        source: r.try_get("source")?,
        created_at: from_millis(r.try_get("created_at_ms")?),
        updated_at: from_millis(r.try_get("updated_at_ms")?),
    })
}

/* =========================
Numeric safety helpers
========================= */

fn i64_to_u64(v: i64) -> anyhow::Result<u64> {
    if v < 0 {
        return Err(anyhow!("negative i64 where u64 expected: {v}"));
    }
    Ok(v as u64)
}

fn usize_to_i64(v: usize) -> anyhow::Result<i64> {
    i64::try_from(v).map_err(|_| anyhow!("usize too large for i64: {v}"))
}
