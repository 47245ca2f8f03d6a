//! Persisted state of an approve-then-send token batch.
//!
//! Written before the approval is broadcast and updated once it confirms, so a
//! crash or restart between the two transactions can pick up where it left
//! off. Removed as soon as the transfer itself has been broadcast.

use anyhow::Result;
use chrono::{DateTime, Utc};
use ethers::types::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const WORKFLOW_DIR: &str = "pending_approval";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStep {
    NotApproved,
    Approved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub account: Address,
    pub chain_id: u64,
    pub contract: Address,
    pub token: Address,
    pub decimals: u8,
    pub recipients: Vec<Address>,
    pub amounts: Vec<U256>,
    pub total: U256,
    pub step: ApprovalStep,
    pub approval_hash: Option<TxHash>,
    pub created_at: DateTime<Utc>,
}

/// Where in-progress workflows are kept, one file per account.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    dir: Option<PathBuf>,
}

impl WorkflowStore {
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            dir: Some(data_dir.join(WORKFLOW_DIR)),
        }
    }

    /// A store that never persists anything.
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    fn path_for(&self, account: Address) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(format!("{:#x}.json", account)))
    }

    pub fn load(&self, account: Address) -> Result<Option<ApprovalWorkflow>> {
        match self.path_for(account) {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(&path)?;
                Ok(Some(serde_json::from_str(&content)?))
            }
            _ => Ok(None),
        }
    }

    /// Replaces any earlier workflow of the same account.
    pub fn save(&self, workflow: &ApprovalWorkflow) -> Result<()> {
        if let Some(path) = self.path_for(workflow.account) {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, serde_json::to_string_pretty(workflow)?)?;
        }
        Ok(())
    }

    pub fn clear(&self, account: Address) -> Result<()> {
        if let Some(path) = self.path_for(account) {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}
