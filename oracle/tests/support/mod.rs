#![allow(dead_code)]

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::AnyPool;
use uuid::Uuid;

use oracle::db::Db;
use oracle::error::SettlementError;
use oracle::settlement::{ChainSettlement, OnChainPrice, TxReceipt};

/// Isolated shared-cache in-memory SQLite database with the schema applied.
pub async fn setup_db() -> AnyPool {
    let url = format!("sqlite:file:{}?mode=memory&cache=shared", Uuid::new_v4());
    let db = Db::connect(&url).await.unwrap();
    db.migrate().await.unwrap();
    (*db.pool).clone()
}

#[derive(Default)]
struct ContractState {
    price: u64,
    updated_at: u64,
    round_id: u64,
    fail_next: u32,
    submissions: Vec<u64>,
}

/// Behaves like the deployed oracle contract: `updatePrice` stores the value
/// and bumps the round, `latestPrice` reads it back.
#[derive(Clone, Default)]
pub struct InMemoryOracleContract {
    state: Arc<Mutex<ContractState>>,
    stale_after_secs: u64,
}

impl InMemoryOracleContract {
    pub fn new(stale_after_secs: u64) -> Self {
        Self {
            state: Arc::default(),
            stale_after_secs,
        }
    }

    /// The next `n` submissions fail as if the RPC node were unreachable.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    pub fn submissions(&self) -> Vec<u64> {
        self.state.lock().submissions.clone()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[async_trait]
impl ChainSettlement for InMemoryOracleContract {
    async fn submit_price(&self, value: u64) -> Result<TxReceipt, SettlementError> {
        let mut s = self.state.lock();
        s.submissions.push(value);

        if s.fail_next > 0 {
            s.fail_next -= 1;
            return Err(SettlementError::Connection("connection refused".into()));
        }

        s.price = value;
        s.updated_at = unix_now();
        s.round_id += 1;

        Ok(TxReceipt {
            tx_hash: format!("0x{:064x}", s.round_id),
            block_number: Some(s.round_id),
            gas_used: Some(45_000),
        })
    }

    async fn latest_price(&self) -> Result<OnChainPrice, SettlementError> {
        let s = self.state.lock();
        Ok(OnChainPrice {
            price: s.price,
            timestamp: s.updated_at,
            round_id: s.round_id,
        })
    }

    async fn is_stale(&self) -> Result<bool, SettlementError> {
        Ok(self.price_age().await? > self.stale_after_secs)
    }

    async fn price_age(&self) -> Result<u64, SettlementError> {
        let updated_at = self.state.lock().updated_at;
        Ok(unix_now().saturating_sub(updated_at))
    }
}
