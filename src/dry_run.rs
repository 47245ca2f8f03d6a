//! In-memory backend that records calls instead of broadcasting them.
//!
//! Used by `multisend --dry-run` to preview a batch and by the test suites to
//! script wallet behaviour (rejections, reverts, existing allowances).

use crate::contract;
use crate::types::SessionInfo;
use crate::wallet::{ChainState, ContractCall, Receipt, TransactionSender, WalletError, WalletSession};
use async_trait::async_trait;
use ethers::types::{Address, TxHash, U256};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    session: SessionInfo,
    calls: Vec<ContractCall>,
    sent: HashMap<TxHash, &'static str>,
    receipt_overrides: HashMap<TxHash, Option<bool>>,
    allowance: U256,
    send_failures: HashMap<&'static str, WalletError>,
    confirm_failures: HashMap<&'static str, WalletError>,
    reverting: Vec<&'static str>,
    allowance_reads: usize,
}

pub struct DryRunWallet {
    decimals: Option<u8>,
    inner: Mutex<Inner>,
}

impl DryRunWallet {
    pub fn new(account: Address, chain_id: u64) -> Self {
        Self {
            decimals: Some(18),
            inner: Mutex::new(Inner {
                session: SessionInfo::connected(account, chain_id),
                ..Inner::default()
            }),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            decimals: Some(18),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn with_allowance(self, allowance: U256) -> Self {
        self.lock().allowance = allowance;
        self
    }

    /// `None` makes `decimals()` fail, as for tokens without the optional getter.
    pub fn with_decimals(mut self, decimals: Option<u8>) -> Self {
        self.decimals = decimals;
        self
    }

    /// Make `send` fail for `function`.
    pub fn failing_send(self, function: &'static str, error: WalletError) -> Self {
        self.lock().send_failures.insert(function, error);
        self
    }

    /// Make waiting for `function`'s transaction fail.
    pub fn failing_confirmation(self, function: &'static str, error: WalletError) -> Self {
        self.lock().confirm_failures.insert(function, error);
        self
    }

    /// Mine `function`'s transaction with a failed status.
    pub fn reverting(self, function: &'static str) -> Self {
        self.lock().reverting.push(function);
        self
    }

    /// Move the simulated wallet to another chain, as a user switching networks would.
    pub fn switch_chain(&self, chain_id: u64) {
        self.lock().session.chain_id = Some(chain_id);
    }

    /// Force the receipt status of an already sent transaction (`None` = unmined).
    pub fn set_receipt_status(&self, hash: TxHash, success: Option<bool>) {
        self.lock().receipt_overrides.insert(hash, success);
    }

    /// Every call handed to `send`, including rejected ones, in order.
    pub fn calls(&self) -> Vec<ContractCall> {
        self.lock().calls.clone()
    }

    pub fn function_calls(&self) -> Vec<&'static str> {
        self.lock().calls.iter().map(|c| c.function).collect()
    }

    pub fn allowance_reads(&self) -> usize {
        self.lock().allowance_reads
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn receipt_for(&self, inner: &Inner, hash: TxHash) -> Option<Receipt> {
        let function = inner.sent.get(&hash)?;
        let success = match inner.receipt_overrides.get(&hash) {
            Some(None) => return None,
            Some(Some(status)) => *status,
            None => !inner.reverting.contains(function),
        };
        Some(Receipt {
            tx_hash: hash,
            block_number: Some(inner.sent.len() as u64),
            gas_used: 21_000,
            success,
        })
    }
}

#[async_trait]
impl WalletSession for DryRunWallet {
    async fn session(&self) -> SessionInfo {
        self.lock().session
    }
}

#[async_trait]
impl TransactionSender for DryRunWallet {
    async fn send(&self, call: &ContractCall) -> Result<TxHash, WalletError> {
        let mut inner = self.lock();
        inner.calls.push(call.clone());
        if let Some(err) = inner.send_failures.get(call.function) {
            return Err(err.clone());
        }

        let hash = TxHash::from_low_u64_be(inner.calls.len() as u64);
        inner.sent.insert(hash, call.function);
        tracing::info!(
            "[dry-run] {} -> {:?} value={} calldata={} bytes",
            call.function,
            call.to,
            call.value.unwrap_or_default(),
            call.calldata.len()
        );
        Ok(hash)
    }
}

#[async_trait]
impl ChainState for DryRunWallet {
    async fn await_confirmation(&self, hash: TxHash) -> Result<Receipt, WalletError> {
        let mut inner = self.lock();
        let function = *inner.sent.get(&hash).ok_or(WalletError::Dropped(hash))?;
        if let Some(err) = inner.confirm_failures.get(function) {
            return Err(err.clone());
        }
        let receipt = self.receipt_for(&inner, hash).ok_or(WalletError::Dropped(hash))?;

        if receipt.success && function == contract::APPROVE {
            let approved = inner
                .calls
                .iter()
                .rev()
                .find(|c| c.function == contract::APPROVE)
                .and_then(|c| contract::decode_approve_amount(&c.calldata));
            if let Some(amount) = approved {
                inner.allowance = amount;
            }
        }
        Ok(receipt)
    }

    async fn receipt(&self, hash: TxHash) -> Result<Option<Receipt>, WalletError> {
        let inner = self.lock();
        Ok(self.receipt_for(&inner, hash))
    }

    async fn allowance(&self, _token: Address, _owner: Address, _spender: Address) -> Result<U256, WalletError> {
        let mut inner = self.lock();
        inner.allowance_reads += 1;
        Ok(inner.allowance)
    }

    async fn decimals(&self, token: Address) -> Result<u8, WalletError> {
        self.decimals
            .ok_or_else(|| WalletError::Reverted(format!("{:?} has no decimals()", token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;

    fn call(function: &'static str) -> ContractCall {
        ContractCall {
            to: Address::repeat_byte(1),
            function,
            calldata: Bytes::new(),
            value: None,
        }
    }

    #[tokio::test]
    async fn test_send_records_calls_and_confirms() {
        let wallet = DryRunWallet::new(Address::repeat_byte(7), 8453);
        let hash = wallet.send(&call(contract::MULTISEND_ETH)).await.unwrap();
        let receipt = wallet.await_confirmation(hash).await.unwrap();
        assert!(receipt.success);
        assert_eq!(wallet.function_calls(), vec![contract::MULTISEND_ETH]);
    }

    #[tokio::test]
    async fn test_scripted_send_failure() {
        let wallet = DryRunWallet::new(Address::zero(), 8453)
            .failing_send(contract::APPROVE, WalletError::Rejected("denied".into()));
        let result = wallet.send(&call(contract::APPROVE)).await;
        assert_eq!(result, Err(WalletError::Rejected("denied".into())));
        assert_eq!(wallet.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_reverting_function_mines_with_failure() {
        let wallet = DryRunWallet::new(Address::zero(), 8453).reverting(contract::MULTISEND_TOKEN);
        let hash = wallet.send(&call(contract::MULTISEND_TOKEN)).await.unwrap();
        assert!(!wallet.await_confirmation(hash).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_confirmed_approval_updates_allowance() {
        let wallet = DryRunWallet::new(Address::zero(), 8453);
        let approve = contract::approve_call(Address::repeat_byte(2), Address::repeat_byte(3), U256::from(99u64)).unwrap();
        let hash = wallet.send(&approve).await.unwrap();
        wallet.await_confirmation(hash).await.unwrap();
        let allowance = wallet
            .allowance(Address::repeat_byte(2), Address::zero(), Address::repeat_byte(3))
            .await
            .unwrap();
        assert_eq!(allowance, U256::from(99u64));
    }

    #[tokio::test]
    async fn test_unknown_hash_has_no_receipt() {
        let wallet = DryRunWallet::new(Address::zero(), 8453);
        assert_eq!(wallet.receipt(TxHash::repeat_byte(5)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_decimals_errors() {
        let wallet = DryRunWallet::new(Address::zero(), 8453).with_decimals(None);
        assert!(wallet.decimals(Address::zero()).await.is_err());
    }
}
