//! Common types shared across modules.

use crate::input;
use ethers::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which contract entry point a batch goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Eth,
    Token,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Eth => write!(f, "ETH"),
            TransferKind::Token => write!(f, "Token"),
        }
    }
}

/// Raw form contents as typed or pasted by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormInput {
    pub token_address: String,
    pub recipients: String,
    pub amounts: String,
}

/// A batch request after normalization, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub kind: TransferKind,
    pub token_address: Option<String>,
    pub recipients: Vec<String>,
    pub amounts: Vec<String>,
}

impl TransferRequest {
    /// Build a request from the raw form fields, normalizing both lists.
    pub fn from_form(kind: TransferKind, form: &FormInput) -> Self {
        let (recipients, amounts) = input::normalize(&form.recipients, &form.amounts);
        let token = form.token_address.trim();
        Self {
            kind,
            token_address: (!token.is_empty()).then(|| token.to_string()),
            recipients,
            amounts,
        }
    }

    pub fn eth(recipients: Vec<String>, amounts: Vec<String>) -> Self {
        Self {
            kind: TransferKind::Eth,
            token_address: None,
            recipients,
            amounts,
        }
    }

    pub fn token(token_address: impl Into<String>, recipients: Vec<String>, amounts: Vec<String>) -> Self {
        Self {
            kind: TransferKind::Token,
            token_address: Some(token_address.into()),
            recipients,
            amounts,
        }
    }
}

/// A request that passed every validator check. Only `validate` builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRequest(TransferRequest);

impl ValidRequest {
    pub(crate) fn new(request: TransferRequest) -> Self {
        Self(request)
    }

    pub fn kind(&self) -> TransferKind {
        self.0.kind
    }

    pub fn token_address(&self) -> Option<&str> {
        self.0.token_address.as_deref()
    }

    pub fn recipients(&self) -> &[String] {
        &self.0.recipients
    }

    pub fn amounts(&self) -> &[String] {
        &self.0.amounts
    }

    pub fn len(&self) -> usize {
        self.0.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.recipients.is_empty()
    }
}

/// Snapshot of the wallet connection, read at validation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
}

impl SessionInfo {
    pub fn connected(account: Address, chain_id: u64) -> Self {
        Self {
            account: Some(account),
            chain_id: Some(chain_id),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.account.is_some()
    }
}
