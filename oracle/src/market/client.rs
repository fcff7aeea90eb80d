use std::time::Duration;

use futures::future::join_all;
use reqwest::Client;
use reqwest::header::ACCEPT;
use tracing::{debug, instrument, warn};

use crate::market::errors::FetchError;
use crate::market::types::{SimplePriceResponse, extract_price};

pub const USER_AGENT: &str = "PriceOraclePipeline/1.0";

/// HTTP client for a CoinGecko-style "simple price" endpoint.
#[derive(Clone)]
pub struct PriceFetcher {
    http: Client,
    url: String,
    asset: String,
    quote: String,
}

impl PriceFetcher {
    /// `timeout` bounds each request end to end (connect + body).
    pub fn new(
        url: impl Into<String>,
        asset: impl Into<String>,
        quote: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            http,
            url: url.into(),
            asset: asset.into(),
            quote: quote.into(),
        })
    }

    /// One request against the configured endpoint.
    pub async fn fetch_price(&self) -> Result<f64, FetchError> {
        self.fetch_from(&self.url).await
    }

    #[instrument(skip(self), fields(asset = %self.asset), level = "debug")]
    pub async fn fetch_from(&self, url: &str) -> Result<f64, FetchError> {
        let resp = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(FetchError::Network)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = resp.bytes().await.map_err(FetchError::Network)?;
        let body: SimplePriceResponse = serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::Protocol(format!("unparseable body: {e}")))?;

        let price = extract_price(&body, &self.asset, &self.quote)?;
        debug!(price, "market price fetched");

        Ok(price)
    }

    /// Fans out to every url concurrently and averages the successes.
    /// Fails only when every source failed, carrying all the errors.
    #[instrument(skip(self, urls), fields(sources = urls.len()))]
    pub async fn fetch_aggregated(&self, urls: &[String]) -> Result<f64, FetchError> {
        let results = join_all(urls.iter().map(|u| self.fetch_from(u))).await;

        let mut prices = Vec::with_capacity(results.len());
        let mut errors = Vec::new();

        for (url, res) in urls.iter().zip(results) {
            match res {
                Ok(p) => prices.push(p),
                Err(e) => {
                    warn!(%url, error = %e, "price source failed");
                    errors.push(e);
                }
            }
        }

        if prices.is_empty() {
            return Err(FetchError::AllSourcesFailed(errors));
        }

        let mean = prices.iter().sum::<f64>() / prices.len() as f64;
        debug!(
            ok = prices.len(),
            failed = errors.len(),
            mean,
            "aggregated price computed"
        );

        Ok(mean)
    }
}
