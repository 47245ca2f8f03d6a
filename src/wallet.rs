//! Collaborator interfaces the pipeline talks to.
//!
//! The submitter never touches a provider or a signer directly. It sees a
//! wallet session (who is connected, on which chain), a sender that signs and
//! broadcasts contract calls, and a read-only view of chain state.

use crate::types::SessionInfo;
use async_trait::async_trait;
use ethers::types::{Address, Bytes, TxHash, U256};
use thiserror::Error;

/// One outbound contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub to: Address,
    /// Function name, for logs and for backends that care.
    pub function: &'static str,
    pub calldata: Bytes,
    /// Native currency attached to the call.
    pub value: Option<U256>,
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub success: bool,
}

/// Errors reported by the wallet or the node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    /// The user or the signer refused (cancelled prompt, locked device, no funds).
    #[error("{0}")]
    Rejected(String),
    /// Execution reverted, either in simulation or on-chain.
    #[error("{0}")]
    Reverted(String),
    #[error("{0}")]
    Transport(String),
    #[error("transaction {0:?} was dropped")]
    Dropped(TxHash),
}

impl WalletError {
    /// Classify a free-form node/signer error message.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("revert") {
            WalletError::Reverted(message)
        } else if lower.contains("denied")
            || lower.contains("rejected")
            || lower.contains("insufficient funds")
            || lower.contains("locked")
        {
            WalletError::Rejected(message)
        } else {
            WalletError::Transport(message)
        }
    }
}

#[async_trait]
pub trait WalletSession: Send + Sync {
    /// Current connection snapshot. Never fails; an unreachable node reads as
    /// an unknown chain.
    async fn session(&self) -> SessionInfo;
}

#[async_trait]
pub trait TransactionSender: Send + Sync {
    /// Sign and broadcast `call`, returning the transaction hash. May suspend
    /// while the user approves the transaction in an external wallet.
    async fn send(&self, call: &ContractCall) -> Result<TxHash, WalletError>;
}

#[async_trait]
pub trait ChainState: Send + Sync {
    /// Suspend until `hash` is mined (or known to have failed).
    async fn await_confirmation(&self, hash: TxHash) -> Result<Receipt, WalletError>;

    /// Receipt if mined, `None` while pending.
    async fn receipt(&self, hash: TxHash) -> Result<Option<Receipt>, WalletError>;

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, WalletError>;

    async fn decimals(&self, token: Address) -> Result<u8, WalletError>;
}

/// Everything the submitter needs from the outside world.
pub trait Backend: WalletSession + TransactionSender + ChainState {}

impl<T: WalletSession + TransactionSender + ChainState> Backend for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_revert() {
        assert!(matches!(
            WalletError::classify("execution reverted: ERC20: insufficient allowance"),
            WalletError::Reverted(_)
        ));
    }

    #[test]
    fn test_classify_rejection() {
        assert!(matches!(WalletError::classify("User denied transaction signature"), WalletError::Rejected(_)));
        assert!(matches!(
            WalletError::classify("insufficient funds for gas * price + value"),
            WalletError::Rejected(_)
        ));
    }

    #[test]
    fn test_classify_transport() {
        assert!(matches!(WalletError::classify("connection refused"), WalletError::Transport(_)));
    }
}
