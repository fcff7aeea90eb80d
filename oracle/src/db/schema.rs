use sqlx::AnyPool;

use super::Backend;

pub async fn migrate(pool: &AnyPool, backend: Backend) -> anyhow::Result<()> {
    let id_column = match backend {
        Backend::Postgres => "id BIGSERIAL PRIMARY KEY",
        Backend::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
    };

    // Price records (append-only)
    sqlx::query(&format!(
        r#"
CREATE TABLE IF NOT EXISTS price_records (
  {id_column},
  price DOUBLE PRECISION NOT NULL,
  timestamp_ms BIGINT NOT NULL,
  source TEXT NOT NULL,
  created_at_ms BIGINT NOT NULL,
  updated_at_ms BIGINT NOT NULL
);
"#
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_price_records_timestamp ON price_records(timestamp_ms);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
