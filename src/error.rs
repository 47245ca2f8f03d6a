//! Error taxonomy for the transfer pipeline.
//!
//! Validation errors are raised before anything is sent. Everything else is
//! raised by the submitter after a collaborator rejected, reverted or could not
//! confirm a transaction. Nothing here is retried automatically.

use ethers::types::TxHash;
use thiserror::Error;

/// Reasons a request is refused before any call leaves the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please connect your wallet first")]
    NotConnected,
    #[error("Wrong network: wallet is on chain {actual}, switch to chain {expected}")]
    WrongNetwork { expected: u64, actual: u64 },
    #[error("Please enter recipients and amounts")]
    EmptyInput,
    #[error("Mismatch: you have {0} addresses but {1} amounts")]
    CountMismatch(usize, usize),
    #[error("Please enter a valid token contract address")]
    InvalidTokenAddress,
}

/// Why a decimal string could not be turned into base units.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("unexpected character '{0}'")]
    InvalidCharacter(char),
    #[error("more than one decimal point")]
    MultipleDecimalPoints,
    #[error("no digits")]
    NoDigits,
    #[error("{found} fractional digits but only {decimals} allowed")]
    TooManyDecimals { decimals: u8, found: usize },
    #[error("value does not fit in 256 bits")]
    Overflow,
}

#[derive(Debug, Error)]
pub enum MultisendError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Malformed amount '{value}': {source}")]
    MalformedAmount {
        value: String,
        #[source]
        source: AmountError,
    },

    #[error("Invalid recipient address '{value}' (entry {position})")]
    InvalidRecipient { position: usize, value: String },

    #[error("Failed to encode {function} call: {reason}")]
    Encoding { function: &'static str, reason: String },

    #[error("Transaction rejected: {0}")]
    SigningRejected(String),

    #[error("Contract reverted: {0}")]
    ContractReverted(String),

    #[error("Confirmation failed for {hash:?}: {reason}")]
    ConfirmationFailed { hash: TxHash, reason: String },

    #[error("Chain query failed: {0}")]
    ChainRead(String),

    #[error("A submission is already in progress")]
    Busy,

    #[error("No pending approval to resume")]
    NoPendingWorkflow,
}

impl MultisendError {
    /// True when the error was raised before anything was broadcast.
    pub fn is_pre_submission(&self) -> bool {
        matches!(
            self,
            MultisendError::Validation(_)
                | MultisendError::MalformedAmount { .. }
                | MultisendError::InvalidRecipient { .. }
                | MultisendError::Encoding { .. }
                | MultisendError::Busy
                | MultisendError::NoPendingWorkflow
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_mismatch_message() {
        let err = ValidationError::CountMismatch(3, 2);
        assert_eq!(err.to_string(), "Mismatch: you have 3 addresses but 2 amounts");
    }

    #[test]
    fn test_validation_error_is_transparent() {
        let err: MultisendError = ValidationError::EmptyInput.into();
        assert_eq!(err.to_string(), "Please enter recipients and amounts");
        assert!(err.is_pre_submission());
    }

    #[test]
    fn test_malformed_amount_message_includes_value() {
        let err = MultisendError::MalformedAmount {
            value: "1.2.3".to_string(),
            source: AmountError::MultipleDecimalPoints,
        };
        assert!(err.to_string().contains("1.2.3"));
        assert!(err.to_string().contains("decimal point"));
    }

    #[test]
    fn test_submission_errors_are_not_pre_submission() {
        assert!(!MultisendError::SigningRejected("user denied".into()).is_pre_submission());
        assert!(!MultisendError::ContractReverted("boom".into()).is_pre_submission());
    }
}
