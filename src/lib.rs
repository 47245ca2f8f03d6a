//! Batch ETH and ERC-20 transfers through the multisend contract on Base.
//!
//! Raw recipient and amount lists are normalized, validated against the
//! connected wallet session, converted to base units and submitted as a single
//! `multisendETH` or `multisendToken` call. Token batches are preceded by an
//! `approve` when the current allowance does not cover the total. A short
//! per-account history of submitted batches is kept on disk.

pub mod config;
pub mod contract;
pub mod controller;
pub mod dry_run;
pub mod error;
pub mod ethers_backend;
pub mod history;
pub mod input;
pub mod ledger;
pub mod operation_log;
pub mod submitter;
pub mod types;
pub mod user_settings;
pub mod utils;
pub mod validate;
pub mod wallet;
pub mod workflow;

pub use error::{AmountError, MultisendError, ValidationError};
pub use types::{FormInput, SessionInfo, TransferKind, TransferRequest, ValidRequest};
