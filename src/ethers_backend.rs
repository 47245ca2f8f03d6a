//! Live backend: a JSON-RPC provider plus a local key or a Ledger signer.

use crate::config::{chain_supports_eip1559, Config};
use crate::contract;
use crate::ledger;
use crate::types::SessionInfo;
use crate::wallet::{ChainState, ContractCall, Receipt, TransactionSender, WalletError, WalletSession};
use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockNumber, Bytes, Eip1559TransactionRequest, Signature, TransactionReceipt,
    TransactionRequest, TxHash, U256,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// How transactions get signed.
pub enum SignerSource {
    Local(LocalWallet),
    /// Ledger account at this index of the Ledger Live derivation path.
    Ledger { index: u32 },
}

impl SignerSource {
    /// Parse a hex private key, with or without `0x`.
    pub fn from_private_key(key: &str) -> Result<Self> {
        let wallet: LocalWallet = key.trim().parse().context("Invalid private key")?;
        Ok(SignerSource::Local(wallet))
    }
}

pub struct EthersBackend {
    provider: Arc<Provider<Http>>,
    signer: SignerSource,
    account: Address,
    chain_id: u64,
    poll_interval: Duration,
    confirmation_timeout: Option<Duration>,
    gas_buffer_percent: u64,
}

/// Estimated gas plus `percent` headroom.
fn with_buffer(estimate: U256, percent: u64) -> U256 {
    estimate + estimate * U256::from(percent) / U256::from(100u64)
}

fn to_receipt(receipt: &TransactionReceipt) -> Receipt {
    Receipt {
        tx_hash: receipt.transaction_hash,
        block_number: receipt.block_number.map(|n| n.as_u64()),
        gas_used: receipt.gas_used.map(|g| g.as_u64()).unwrap_or(0),
        // pre-Byzantium receipts carry no status
        success: receipt.status.map(|s| s.as_u64() == 1).unwrap_or(true),
    }
}

fn rpc_error<E: std::fmt::Display>(e: E) -> WalletError {
    WalletError::classify(e.to_string())
}

impl EthersBackend {
    /// Connect to the configured RPC and resolve the signing account.
    pub async fn connect(config: &Config, signer: SignerSource) -> Result<Self> {
        let provider = config.get_provider().await?;
        let chain_id = provider
            .get_chainid()
            .await
            .with_context(|| format!("Failed to query chain id from {}", config.rpc_url))?
            .as_u64();

        let (signer, account) = match signer {
            SignerSource::Local(wallet) => {
                let wallet = wallet.with_chain_id(chain_id);
                let account = wallet.address();
                (SignerSource::Local(wallet), account)
            }
            SignerSource::Ledger { index } => {
                let account = ledger::ledger_address(index, chain_id).await?;
                (SignerSource::Ledger { index }, account)
            }
        };

        info!("Connected {:?} on chain {} via {}", account, chain_id, config.rpc_url);

        Ok(Self {
            provider,
            signer,
            account,
            chain_id,
            poll_interval: config.receipt_poll_interval(),
            confirmation_timeout: config.confirmation_timeout(),
            gas_buffer_percent: config.gas_limit_buffer,
        })
    }

    pub fn account(&self) -> Address {
        self.account
    }

    async fn build_transaction(&self, call: &ContractCall) -> Result<TypedTransaction, WalletError> {
        let nonce = self
            .provider
            .get_transaction_count(self.account, Some(BlockNumber::Pending.into()))
            .await
            .map_err(rpc_error)?;
        let value = call.value.unwrap_or_default();

        let mut tx: TypedTransaction = if chain_supports_eip1559(self.chain_id) {
            let (max_fee, priority_fee) = self.provider.estimate_eip1559_fees(None).await.map_err(rpc_error)?;
            Eip1559TransactionRequest::new()
                .from(self.account)
                .to(call.to)
                .value(value)
                .data(call.calldata.clone())
                .max_fee_per_gas(max_fee)
                .max_priority_fee_per_gas(priority_fee)
                .nonce(nonce)
                .chain_id(self.chain_id)
                .into()
        } else {
            let gas_price = self.provider.get_gas_price().await.map_err(rpc_error)?;
            TransactionRequest::new()
                .from(self.account)
                .to(call.to)
                .value(value)
                .data(call.calldata.clone())
                .gas_price(gas_price)
                .nonce(nonce)
                .chain_id(self.chain_id)
                .into()
        };

        // a revert surfaces here, before anything is signed
        let estimate = self.provider.estimate_gas(&tx, None).await.map_err(rpc_error)?;
        let gas_limit = with_buffer(estimate, self.gas_buffer_percent);
        tx.set_gas(gas_limit);

        debug!(
            "{} built: to={:?}, value={}, data_len={}, gas_limit={}, nonce={}",
            call.function,
            call.to,
            value,
            call.calldata.len(),
            gas_limit,
            nonce
        );
        Ok(tx)
    }

    async fn sign(&self, tx: &TypedTransaction) -> Result<Signature, WalletError> {
        match &self.signer {
            SignerSource::Local(wallet) => wallet
                .sign_transaction(tx)
                .await
                .map_err(|e| WalletError::Rejected(e.to_string())),
            SignerSource::Ledger { index } => ledger::sign_transaction(*index, self.chain_id, tx)
                .await
                .map_err(|e| WalletError::classify(e.to_string())),
        }
    }

    async fn read(&self, to: Address, data: Bytes) -> Result<Bytes, WalletError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.provider.call(&tx, None).await.map_err(rpc_error)
    }
}

#[async_trait]
impl WalletSession for EthersBackend {
    async fn session(&self) -> SessionInfo {
        let chain_id = match self.provider.get_chainid().await {
            Ok(id) => id.as_u64(),
            Err(e) => {
                warn!("Chain id lookup failed, using {}: {}", self.chain_id, e);
                self.chain_id
            }
        };
        SessionInfo::connected(self.account, chain_id)
    }
}

#[async_trait]
impl TransactionSender for EthersBackend {
    async fn send(&self, call: &ContractCall) -> Result<TxHash, WalletError> {
        let tx = self.build_transaction(call).await?;
        let signature = self.sign(&tx).await?;

        // Encode and send the signed transaction (NO retry after this point)
        let signed_tx = tx.rlp_signed(&signature);
        let pending_tx = self
            .provider
            .send_raw_transaction(signed_tx)
            .await
            .map_err(rpc_error)?;
        Ok(pending_tx.tx_hash())
    }
}

#[async_trait]
impl ChainState for EthersBackend {
    async fn await_confirmation(&self, hash: TxHash) -> Result<Receipt, WalletError> {
        let started = Instant::now();
        loop {
            match self.provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => return Ok(to_receipt(&receipt)),
                Ok(None) => {}
                Err(e) => debug!("Receipt lookup for {:?} failed: {}", hash, e),
            }

            if let Some(timeout) = self.confirmation_timeout {
                if started.elapsed() >= timeout {
                    return Err(WalletError::Transport(format!(
                        "Confirmation timeout after {} seconds",
                        timeout.as_secs()
                    )));
                }
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn receipt(&self, hash: TxHash) -> Result<Option<Receipt>, WalletError> {
        let receipt = self.provider.get_transaction_receipt(hash).await.map_err(rpc_error)?;
        Ok(receipt.as_ref().map(to_receipt))
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, WalletError> {
        let data = contract::encode_allowance(owner, spender).map_err(|e| WalletError::Transport(e.to_string()))?;
        let output = self.read(token, data).await?;
        contract::decode_allowance(&output)
            .ok_or_else(|| WalletError::Reverted(format!("{:?} returned no allowance", token)))
    }

    async fn decimals(&self, token: Address) -> Result<u8, WalletError> {
        let data = contract::encode_decimals().map_err(|e| WalletError::Transport(e.to_string()))?;
        let output = self.read(token, data).await?;
        contract::decode_decimals(&output)
            .ok_or_else(|| WalletError::Reverted(format!("{:?} returned no decimals", token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U64;

    #[test]
    fn test_gas_buffer() {
        assert_eq!(with_buffer(U256::from(100_000u64), 10), U256::from(110_000u64));
        assert_eq!(with_buffer(U256::from(21_000u64), 0), U256::from(21_000u64));
    }

    #[test]
    fn test_to_receipt_status() {
        let mut raw = TransactionReceipt {
            transaction_hash: TxHash::repeat_byte(1),
            block_number: Some(U64::from(42u64)),
            gas_used: Some(U256::from(50_000u64)),
            status: Some(U64::from(1u64)),
            ..Default::default()
        };
        let receipt = to_receipt(&raw);
        assert!(receipt.success);
        assert_eq!(receipt.block_number, Some(42));
        assert_eq!(receipt.gas_used, 50_000);

        raw.status = Some(U64::zero());
        assert!(!to_receipt(&raw).success);
    }

    #[test]
    fn test_private_key_signer() {
        // well-known development key
        let signer =
            SignerSource::from_private_key("0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80")
                .unwrap();
        match signer {
            SignerSource::Local(wallet) => assert_eq!(
                wallet.address(),
                "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse::<Address>().unwrap()
            ),
            SignerSource::Ledger { .. } => panic!("expected a local signer"),
        }
    }

    #[test]
    fn test_bad_private_key() {
        assert!(SignerSource::from_private_key("0x1234").is_err());
    }
}
