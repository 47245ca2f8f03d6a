//! Per-account cache of recent batch transactions.
//!
//! The cache is a hint, not a source of truth: statuses are recorded
//! optimistically by the submitter and can drift from what actually happened
//! on-chain. `reconcile` re-reads receipts and corrects them.

use crate::types::TransferKind;
use crate::wallet::ChainState;
use anyhow::Result;
use chrono::{DateTime, Utc};
use ethers::types::{Address, TxHash};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Number of records kept per account.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

const HISTORY_DIR: &str = "history";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: TxHash,
    pub kind: TransferKind,
    pub recipient_count: usize,
    /// Human-readable total, e.g. `0.3 ETH`.
    pub amount_summary: String,
    pub status: TxStatus,
    pub timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn pending(hash: TxHash, kind: TransferKind, recipient_count: usize, amount_summary: String) -> Self {
        Self {
            hash,
            kind,
            recipient_count,
            amount_summary,
            status: TxStatus::Pending,
            timestamp: Utc::now(),
        }
    }
}

/// Most-recent-first log of transactions for one account.
#[derive(Debug, Clone)]
pub struct HistoryCache {
    account: Address,
    limit: usize,
    records: Vec<TransactionRecord>,
    path: Option<PathBuf>,
}

fn history_file(data_dir: &Path, account: Address) -> PathBuf {
    data_dir.join(HISTORY_DIR).join(format!("{:#x}.json", account))
}

impl HistoryCache {
    /// Cache that lives only in memory.
    pub fn in_memory(account: Address, limit: usize) -> Self {
        Self {
            account,
            limit,
            records: Vec::new(),
            path: None,
        }
    }

    /// Load the cache for `account` from `data_dir`.
    ///
    /// A missing file is an empty history. A corrupt file is logged and
    /// replaced by an empty history on the next save.
    pub fn load(data_dir: &Path, account: Address, limit: usize) -> Self {
        let path = history_file(data_dir, account);
        let mut records: Vec<TransactionRecord> = Vec::new();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(loaded) => records = loaded,
                    Err(e) => warn!("Failed to parse history file {:?}: {}", path, e),
                },
                Err(e) => warn!("Failed to read history file {:?}: {}", path, e),
            }
        }
        records.truncate(limit);
        info!("Loaded {} history entries for {:?}", records.len(), account);
        Self {
            account,
            limit,
            records,
            path: Some(path),
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn records(&self) -> &[TransactionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, hash: TxHash) -> Option<&TransactionRecord> {
        self.records.iter().find(|r| r.hash == hash)
    }

    /// Insert at the front, evicting the oldest entries beyond the limit.
    pub fn push(&mut self, record: TransactionRecord) {
        self.records.insert(0, record);
        self.records.truncate(self.limit);
    }

    /// Returns false if no record has this hash.
    pub fn update_status(&mut self, hash: TxHash, status: TxStatus) -> bool {
        match self.records.iter_mut().find(|r| r.hash == hash) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Rewrite the backing file. No-op for in-memory caches.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&self.records)?)?;
        Ok(())
    }

    /// Re-check every non-failed record against the chain.
    ///
    /// Unmined transactions stay `Pending`; lookups that error leave the record
    /// untouched. Returns the number of records whose status changed.
    pub async fn reconcile<C: ChainState + ?Sized>(&mut self, chain: &C) -> usize {
        let mut changed = 0;
        for record in self.records.iter_mut() {
            if record.status == TxStatus::Failed {
                continue;
            }
            let status = match chain.receipt(record.hash).await {
                Ok(Some(receipt)) if receipt.success => TxStatus::Success,
                Ok(Some(_)) => TxStatus::Failed,
                Ok(None) => TxStatus::Pending,
                Err(e) => {
                    warn!("Could not reconcile {:?}: {}", record.hash, e);
                    continue;
                }
            };
            if status != record.status {
                info!("History {:?}: {:?} -> {:?}", record.hash, record.status, status);
                record.status = status;
                changed += 1;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dry_run::DryRunWallet;
    use crate::wallet::{ContractCall, TransactionSender};
    use ethers::types::Bytes;

    fn record(n: u64) -> TransactionRecord {
        TransactionRecord::pending(TxHash::from_low_u64_be(n), TransferKind::Eth, 2, format!("{} ETH", n))
    }

    // ==================== in-memory behaviour ====================

    #[test]
    fn test_push_is_most_recent_first() {
        let mut cache = HistoryCache::in_memory(Address::zero(), DEFAULT_HISTORY_LIMIT);
        cache.push(record(1));
        cache.push(record(2));
        assert_eq!(cache.records()[0].hash, TxHash::from_low_u64_be(2));
        assert_eq!(cache.records()[1].hash, TxHash::from_low_u64_be(1));
    }

    #[test]
    fn test_push_evicts_oldest_beyond_limit() {
        let mut cache = HistoryCache::in_memory(Address::zero(), DEFAULT_HISTORY_LIMIT);
        for n in 1..=12 {
            cache.push(record(n));
        }
        assert_eq!(cache.len(), 10);
        assert_eq!(cache.records()[0].hash, TxHash::from_low_u64_be(12));
        assert!(cache.get(TxHash::from_low_u64_be(1)).is_none());
        assert!(cache.get(TxHash::from_low_u64_be(2)).is_none());
        assert!(cache.get(TxHash::from_low_u64_be(3)).is_some());
    }

    #[test]
    fn test_update_status() {
        let mut cache = HistoryCache::in_memory(Address::zero(), 5);
        cache.push(record(1));
        assert!(cache.update_status(TxHash::from_low_u64_be(1), TxStatus::Success));
        assert!(!cache.update_status(TxHash::from_low_u64_be(9), TxStatus::Success));
        assert_eq!(cache.records()[0].status, TxStatus::Success);
    }

    // ==================== persistence ====================

    #[test]
    fn test_save_and_load_per_account() {
        let dir = tempfile::tempdir().unwrap();
        let alice = Address::repeat_byte(0xaa);
        let bob = Address::repeat_byte(0xbb);

        let mut cache = HistoryCache::load(dir.path(), alice, DEFAULT_HISTORY_LIMIT);
        cache.push(record(1));
        cache.save().unwrap();

        let reloaded = HistoryCache::load(dir.path(), alice, DEFAULT_HISTORY_LIMIT);
        assert_eq!(reloaded.records(), cache.records());

        let other = HistoryCache::load(dir.path(), bob, DEFAULT_HISTORY_LIMIT);
        assert!(other.is_empty());
    }

    #[test]
    fn test_load_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let account = Address::repeat_byte(1);
        let path = history_file(dir.path(), account);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        let cache = HistoryCache::load(dir.path(), account, DEFAULT_HISTORY_LIMIT);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_then_save_empties_file() {
        let dir = tempfile::tempdir().unwrap();
        let account = Address::repeat_byte(1);
        let mut cache = HistoryCache::load(dir.path(), account, DEFAULT_HISTORY_LIMIT);
        cache.push(record(1));
        cache.save().unwrap();
        cache.clear();
        cache.save().unwrap();
        assert!(HistoryCache::load(dir.path(), account, DEFAULT_HISTORY_LIMIT).is_empty());
    }

    // ==================== reconcile ====================

    #[tokio::test]
    async fn test_reconcile_corrects_statuses() {
        let wallet = DryRunWallet::new(Address::zero(), 8453);
        let call = ContractCall {
            to: Address::zero(),
            function: "multisendETH",
            calldata: Bytes::new(),
            value: None,
        };
        let mined = wallet.send(&call).await.unwrap();
        let reverted = wallet.send(&call).await.unwrap();
        let unmined = wallet.send(&call).await.unwrap();
        wallet.set_receipt_status(reverted, Some(false));
        wallet.set_receipt_status(unmined, None);

        let mut cache = HistoryCache::in_memory(Address::zero(), DEFAULT_HISTORY_LIMIT);
        for hash in [mined, reverted, unmined] {
            let mut r = TransactionRecord::pending(hash, TransferKind::Eth, 1, "1 ETH".into());
            r.status = TxStatus::Success;
            cache.push(r);
        }

        let changed = cache.reconcile(&wallet).await;
        assert_eq!(changed, 2);
        assert_eq!(cache.get(mined).unwrap().status, TxStatus::Success);
        assert_eq!(cache.get(reverted).unwrap().status, TxStatus::Failed);
        assert_eq!(cache.get(unmined).unwrap().status, TxStatus::Pending);
    }
}
