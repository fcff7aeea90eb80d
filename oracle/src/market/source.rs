use async_trait::async_trait;

use crate::market::client::PriceFetcher;
use crate::market::errors::FetchError;

/// Anything the ingestion loop can pull one price observation from.
#[async_trait]
pub trait PriceSource: Send + Sync + 'static {
    async fn fetch(&self) -> Result<f64, FetchError>;

    /// Recorded as `source` on every stored point and relay message.
    fn name(&self) -> &str;
}

#[derive(Clone, Debug)]
pub enum FetchMode {
    Single,
    /// Mean across all listed endpoints.
    Aggregated(Vec<String>),
}

/// Market-data endpoint(s) behind a [`PriceFetcher`].
pub struct MarketDataSource {
    fetcher: PriceFetcher,
    mode: FetchMode,
    name: String,
}

impl MarketDataSource {
    pub fn new(fetcher: PriceFetcher, mode: FetchMode, name: impl Into<String>) -> Self {
        Self {
            fetcher,
            mode,
            name: name.into(),
        }
    }
}

#[async_trait]
impl PriceSource for MarketDataSource {
    async fn fetch(&self) -> Result<f64, FetchError> {
        match &self.mode {
            FetchMode::Single => self.fetcher.fetch_price().await,
            FetchMode::Aggregated(urls) => self.fetcher.fetch_aggregated(urls).await,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
