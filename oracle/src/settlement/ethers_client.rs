use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::logger::warn_if_slow;
use ethers::prelude::{
    Address, BlockNumber, Http, LocalWallet, Middleware, Provider, Signer, SignerMiddleware, U64,
    U256, abigen,
};
use tracing::{debug, info, instrument, warn};

use crate::config::redact_endpoint;
use crate::error::SettlementError;
use crate::settlement::{ChainSettlement, OnChainPrice, TxReceipt};

abigen!(
    PriceOracleContract,
    r#"[
        function updatePrice(uint256 price) external
        function latestPrice() external view returns (uint256 price, uint256 timestamp, uint256 roundId)
        function isStale() external view returns (bool)
        function getPriceAge() external view returns (uint256)
    ]"#,
);

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

#[derive(Clone)]
pub struct EthersSettlementConfig {
    pub rpc_url: String,
    pub contract_address: String,
    /// Hex, with or without `0x`. Never logged.
    pub private_key: String,
    pub gas_limit: u64,
    pub confirmation_timeout: Duration,
}

impl fmt::Debug for EthersSettlementConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthersSettlementConfig")
            .field("rpc_url", &redact_endpoint(&self.rpc_url))
            .field("contract_address", &self.contract_address)
            .field("private_key", &"<redacted>")
            .field("gas_limit", &self.gas_limit)
            .field("confirmation_timeout", &self.confirmation_timeout)
            .finish()
    }
}

/// Oracle contract client over a JSON-RPC HTTP provider with a local signing key.
pub struct EthersSettlementClient {
    client: Arc<SignerClient>,
    contract: PriceOracleContract<SignerClient>,
    gas_limit: U256,
    confirmation_timeout: Duration,
}

impl EthersSettlementClient {
    /// Parses the key and address, then asks the node for its chain id so
    /// signatures carry the right replay protection.
    #[instrument(skip(cfg), fields(rpc = %redact_endpoint(&cfg.rpc_url), contract = %cfg.contract_address))]
    pub async fn connect(cfg: &EthersSettlementConfig) -> Result<Self, SettlementError> {
        let address = parse_address(&cfg.contract_address)?;
        let wallet = parse_wallet(&cfg.private_key)?;

        let provider = Provider::<Http>::try_from(cfg.rpc_url.as_str())
            .map_err(|e| SettlementError::Connection(e.to_string()))?;

        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| SettlementError::Connection(e.to_string()))?;

        let wallet = wallet.with_chain_id(chain_id.as_u64());
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contract = PriceOracleContract::new(address, client.clone());

        info!(
            chain_id = chain_id.as_u64(),
            signer = %format!("{:#x}", client.address()),
            "chain client connected"
        );

        Ok(Self {
            client,
            contract,
            gas_limit: U256::from(cfg.gas_limit),
            confirmation_timeout: cfg.confirmation_timeout,
        })
    }

    pub fn signer_address(&self) -> String {
        format!("{:#x}", self.client.address())
    }

    /// Signer balance formatted in ether.
    pub async fn account_balance(&self) -> Result<String, SettlementError> {
        let balance = self
            .client
            .get_balance(self.client.address(), None)
            .await
            .map_err(|e| SettlementError::Call(e.to_string()))?;

        Ok(ethers::utils::format_ether(balance))
    }
}

#[async_trait]
impl ChainSettlement for EthersSettlementClient {
    #[instrument(skip(self), target = "settlement")]
    async fn submit_price(&self, value: u64) -> Result<TxReceipt, SettlementError> {
        let from = self.client.address();

        let nonce = self
            .client
            .get_transaction_count(from, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| SettlementError::Nonce(e.to_string()))?;

        let gas_price = self
            .client
            .get_gas_price()
            .await
            .map_err(|e| SettlementError::GasPrice(e.to_string()))?;

        let call = self
            .contract
            .update_price(U256::from(value))
            .legacy()
            .nonce(nonce)
            .gas_price(gas_price)
            .gas(self.gas_limit);

        let pending = call
            .send()
            .await
            .map_err(|e| SettlementError::Submission(e.to_string()))?;

        let tx_hash = format!("{:#x}", pending.tx_hash());
        debug!(%tx_hash, %nonce, %gas_price, "transaction sent; awaiting receipt");

        let waited = warn_if_slow(
            "chain_confirmation",
            self.confirmation_timeout / 2,
            tokio::time::timeout(self.confirmation_timeout, pending),
        )
        .await;

        let receipt = match waited {
            Err(_) => {
                return Err(SettlementError::ConfirmationTimeout {
                    tx_hash,
                    waited_secs: self.confirmation_timeout.as_secs(),
                });
            }
            Ok(Err(e)) => {
                return Err(SettlementError::Confirmation {
                    tx_hash,
                    reason: e.to_string(),
                });
            }
            Ok(Ok(None)) => return Err(SettlementError::Dropped { tx_hash }),
            Ok(Ok(Some(r))) => r,
        };

        if receipt.status != Some(U64::from(1)) {
            warn!(%tx_hash, status = ?receipt.status, "transaction reverted");
            return Err(SettlementError::TransactionFailed { tx_hash });
        }

        Ok(TxReceipt {
            tx_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()),
            gas_used: receipt.gas_used.map(|g| g.low_u64()),
        })
    }

    async fn latest_price(&self) -> Result<OnChainPrice, SettlementError> {
        let (price, timestamp, round_id) = self
            .contract
            .latest_price()
            .call()
            .await
            .map_err(|e| SettlementError::Call(e.to_string()))?;

        Ok(OnChainPrice {
            price: u256_to_u64(price)?,
            timestamp: u256_to_u64(timestamp)?,
            round_id: u256_to_u64(round_id)?,
        })
    }

    async fn is_stale(&self) -> Result<bool, SettlementError> {
        self.contract
            .is_stale()
            .call()
            .await
            .map_err(|e| SettlementError::Call(e.to_string()))
    }

    async fn price_age(&self) -> Result<u64, SettlementError> {
        let age = self
            .contract
            .get_price_age()
            .call()
            .await
            .map_err(|e| SettlementError::Call(e.to_string()))?;

        u256_to_u64(age)
    }
}

fn parse_address(raw: &str) -> Result<Address, SettlementError> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| SettlementError::InvalidAddress(format!("{raw}: {e}")))
}

fn parse_wallet(raw: &str) -> Result<LocalWallet, SettlementError> {
    let key = raw.trim();
    let key = key.strip_prefix("0x").unwrap_or(key);

    // the error text may echo key material
    key.parse::<LocalWallet>()
        .map_err(|_| SettlementError::Signer("private key is not a valid secp256k1 key".into()))
}

fn u256_to_u64(v: U256) -> Result<u64, SettlementError> {
    if v > U256::from(u64::MAX) {
        return Err(SettlementError::Decode(v.to_string()));
    }
    Ok(v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    // well-known throwaway dev key (anvil account 0)
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn cfg() -> EthersSettlementConfig {
        EthersSettlementConfig {
            rpc_url: "http://127.0.0.1:1".into(),
            contract_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".into(),
            private_key: DEV_KEY.into(),
            gas_limit: 100_000,
            confirmation_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn parses_key_with_or_without_prefix() {
        let a = parse_wallet(DEV_KEY).unwrap();
        let b = parse_wallet(DEV_KEY.trim_start_matches("0x")).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(
            format!("{:#x}", a.address()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[tokio::test]
    async fn rejects_bad_key_before_touching_the_network() {
        let mut c = cfg();
        c.private_key = "not-a-key".into();
        assert!(matches!(
            EthersSettlementClient::connect(&c).await,
            Err(SettlementError::Signer(_))
        ));
    }

    #[tokio::test]
    async fn rejects_bad_address() {
        let mut c = cfg();
        c.contract_address = "0x1234".into();
        assert!(matches!(
            EthersSettlementClient::connect(&c).await,
            Err(SettlementError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_node_is_connection_error() {
        assert!(matches!(
            EthersSettlementClient::connect(&cfg()).await,
            Err(SettlementError::Connection(_))
        ));
    }

    #[test]
    fn debug_redacts_key_and_endpoint() {
        let shown = format!(
            "{:?}",
            EthersSettlementConfig {
                rpc_url: "https://eth-mainnet.g.alchemy.com/v2/k3yk3yk3y".into(),
                ..cfg()
            }
        );
        assert!(!shown.contains("ac0974"));
        assert!(!shown.contains("k3yk3yk3y"));
        assert!(shown.contains("<redacted>"));
    }

    #[test]
    fn u256_conversion_is_checked() {
        assert_eq!(u256_to_u64(U256::from(185_000_000_000u64)).unwrap(), 185_000_000_000);
        assert!(u256_to_u64(U256::from(u64::MAX) + 1).is_err());
    }
}
