//! Ledger hardware wallet access through ethers' native HID support.
//!
//! All device access goes through one process-wide async mutex. Connection and
//! signing are retried on transient HID errors; broadcasting is never retried.

use crate::config::ledger_derivation_path;
use anyhow::{anyhow, Result};
use ethers::signers::{HDPath, Ledger, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Signature};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Maximum number of retry attempts for transient HID errors
const MAX_RETRY_ATTEMPTS: usize = 5;

/// Base delay between retries in milliseconds (multiplied by attempt number)
const RETRY_BASE_DELAY_MS: u64 = 300;

/// Serializes Ledger/HID access. Concurrent HID calls fail on some platforms
/// with "Overlapped I/O operation is in progress".
static LEDGER_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn ledger_lock() -> &'static Mutex<()> {
    LEDGER_LOCK.get_or_init(|| Mutex::new(()))
}

/// HID timing/busy errors that may resolve on retry
fn is_transient_error(err_str: &str) -> bool {
    let lower = err_str.to_lowercase();

    if lower.contains("overlapped i/o operation") || lower.contains("overlapped io operation") {
        return true;
    }
    if lower.contains("busy") {
        return true;
    }
    if lower.contains("hidapi") && !lower.contains("no device") && !lower.contains("device not found") {
        return true;
    }
    if lower.contains("transport") && lower.contains("error") {
        return true;
    }
    lower.contains("i/o error") || lower.contains("io error")
}

/// Device locked, app closed, or request denied on the device
fn is_locked_error(err_str: &str) -> bool {
    let lower = err_str.to_lowercase();
    lower.contains("locked")
        || lower.contains("6983")
        || lower.contains("6985")
        || lower.contains("denied")
        || lower.contains("not open")
}

/// Map Ledger errors to user-friendly messages
fn map_ledger_error<E: std::fmt::Display>(e: E) -> anyhow::Error {
    let err_str = e.to_string();
    error!("Ledger error: {}", err_str);

    let lower = err_str.to_lowercase();
    if lower.contains("device not found") || lower.contains("no device") || lower.contains("hidapi") {
        anyhow!("Ledger device not found. Please ensure it's connected and unlocked.")
    } else if lower.contains("denied") || lower.contains("rejected") || lower.contains("6985") {
        anyhow!("Transaction was rejected on the Ledger device.")
    } else if is_locked_error(&err_str) {
        anyhow!("Ledger is locked or Ethereum app is not open.")
    } else if lower.contains("timeout") {
        anyhow!("Ledger operation timed out. Please try again.")
    } else if lower.contains("busy") {
        anyhow!("Ledger device is busy. Please wait and try again.")
    } else {
        anyhow!("Ledger error: {}", err_str)
    }
}

async fn backoff(attempt: usize) {
    sleep(Duration::from_millis(RETRY_BASE_DELAY_MS * attempt as u64)).await;
}

/// Address of the Ledger account at `index` (Ledger Live derivation).
pub async fn ledger_address(index: u32, chain_id: u64) -> Result<Address> {
    let hd_path = ledger_derivation_path(index);

    for attempt in 1..=MAX_RETRY_ATTEMPTS {
        let guard = ledger_lock().lock().await;
        match Ledger::new(HDPath::Other(hd_path.clone()), chain_id).await {
            Ok(ledger) => {
                info!("Ledger connected at {} -> {:?}", hd_path, ledger.address());
                return Ok(ledger.address());
            }
            Err(e) => {
                let err_str = e.to_string();
                if is_transient_error(&err_str) && attempt < MAX_RETRY_ATTEMPTS {
                    warn!("Transient Ledger connection error (attempt {}): {}, retrying...", attempt, err_str);
                    drop(guard);
                    backoff(attempt).await;
                    continue;
                }
                return Err(map_ledger_error(e));
            }
        }
    }

    Err(anyhow!("Failed to connect to Ledger after {} attempts", MAX_RETRY_ATTEMPTS))
}

/// Sign `tx` on the device. User rejections and locked devices are not retried.
pub async fn sign_transaction(index: u32, chain_id: u64, tx: &TypedTransaction) -> Result<Signature> {
    let hd_path = ledger_derivation_path(index);

    for attempt in 1..=MAX_RETRY_ATTEMPTS {
        let guard = ledger_lock().lock().await;
        info!(
            "Signing via Ledger (path: {}, chain_id: {}, attempt {}/{})",
            hd_path, chain_id, attempt, MAX_RETRY_ATTEMPTS
        );

        let ledger = match Ledger::new(HDPath::Other(hd_path.clone()), chain_id).await {
            Ok(l) => l,
            Err(e) => {
                let err_str = e.to_string();
                if is_transient_error(&err_str) && attempt < MAX_RETRY_ATTEMPTS {
                    warn!("Transient Ledger connection error (attempt {}): {}, retrying...", attempt, err_str);
                    drop(guard);
                    backoff(attempt).await;
                    continue;
                }
                return Err(map_ledger_error(e));
            }
        };

        match ledger.sign_transaction(tx).await {
            Ok(signature) => return Ok(signature),
            Err(e) => {
                let err_str = e.to_string();
                if is_transient_error(&err_str) && attempt < MAX_RETRY_ATTEMPTS {
                    warn!("Transient signing error (attempt {}): {}, retrying...", attempt, err_str);
                    drop(guard);
                    backoff(attempt).await;
                    continue;
                }
                return Err(map_ledger_error(e));
            }
        }
    }

    Err(anyhow!("Failed to sign transaction after {} attempts", MAX_RETRY_ATTEMPTS))
}
