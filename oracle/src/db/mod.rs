pub mod schema;
use std::sync::Arc;

use anyhow::Context;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tracing::info;

use crate::config::redact_credentials;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    pub fn from_url(database_url: &str) -> Self {
        if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
            Backend::Postgres
        } else {
            Backend::Sqlite
        }
    }
}

#[derive(Clone)]
pub struct Db {
    pub pool: Arc<AnyPool>,
    pub backend: Backend,
}

impl Db {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to connect to {}", redact_credentials(database_url)))?;

        let backend = Backend::from_url(database_url);
        info!(?backend, "database connected");

        Ok(Self {
            pool: Arc::new(pool),
            backend,
        })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        schema::migrate(&self.pool, self.backend)
            .await
            .context("schema migration failed")
    }
}
