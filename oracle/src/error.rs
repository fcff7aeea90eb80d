use thiserror::Error;

pub use crate::market::errors::FetchError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("price must be positive, got {0}")]
    NonPositivePrice(f64),

    #[error("price unreasonably high: {0} > {max}", max = crate::pricing::MAX_PRICE)]
    PriceTooHigh(f64),

    #[error("price unreasonably low: {0} < {min}", min = crate::pricing::MIN_PRICE)]
    PriceTooLow(f64),
}

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Durable errors arrive as `anyhow` chains from the repository and are
    /// flattened here so the enum stays `Send + Sync + 'static` without boxing.
    #[error("durable store error: {0}")]
    Durable(String),

    #[error("no price available in cache or durable store")]
    NoPriceAvailable,
}

impl StoreError {
    pub fn durable(e: anyhow::Error) -> Self {
        Self::Durable(format!("{e:#}"))
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to encode relay message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("relay channel unavailable")]
    Unavailable,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TwapError {
    #[error("no price records in the requested window")]
    NoDataInWindow,

    #[error("invalid time weights (total weight is zero)")]
    InvalidWeights,

    #[error("failed to load records: {0}")]
    Store(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    #[error("chain connection failed: {0}")]
    Connection(String),

    #[error("invalid signer key: {0}")]
    Signer(String),

    #[error("invalid contract address: {0}")]
    InvalidAddress(String),

    #[error("failed to fetch nonce: {0}")]
    Nonce(String),

    #[error("failed to fetch gas price: {0}")]
    GasPrice(String),

    #[error("transaction submission failed: {0}")]
    Submission(String),

    #[error("waiting for receipt failed for {tx_hash}: {reason}")]
    Confirmation { tx_hash: String, reason: String },

    #[error("no receipt for {tx_hash} after {waited_secs}s")]
    ConfirmationTimeout { tx_hash: String, waited_secs: u64 },

    #[error("transaction {tx_hash} dropped from mempool")]
    Dropped { tx_hash: String },

    #[error("transaction {tx_hash} reverted")]
    TransactionFailed { tx_hash: String },

    #[error("contract call failed: {0}")]
    Call(String),

    #[error("contract returned out-of-range value: {0}")]
    Decode(String),

    #[error("submission queue closed")]
    QueueClosed,
}
