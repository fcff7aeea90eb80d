pub mod ethers_client;
pub mod worker;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::SettlementError;

pub use ethers_client::{EthersSettlementClient, EthersSettlementConfig};
pub use worker::{
    SubmissionHandle, SubmissionJob, SubmissionOutcome, SubmissionWorker, WorkerConfig,
    submission_queue,
};

/// Value returned by the contract's `latestPrice()` view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OnChainPrice {
    /// Fixed point, 8 decimals.
    pub price: u64,
    /// Block timestamp (unix seconds) of the last update.
    pub timestamp: u64,
    pub round_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

/// Narrow view of the on-chain oracle contract.
#[async_trait]
pub trait ChainSettlement: Send + Sync + 'static {
    /// Submits `updatePrice(value)` and waits for a successful receipt.
    async fn submit_price(&self, value: u64) -> Result<TxReceipt, SettlementError>;

    async fn latest_price(&self) -> Result<OnChainPrice, SettlementError>;

    async fn is_stale(&self) -> Result<bool, SettlementError>;

    /// Seconds since the last on-chain update.
    async fn price_age(&self) -> Result<u64, SettlementError>;
}
