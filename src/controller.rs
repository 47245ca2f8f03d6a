//! Application state and the entry points the CLI drives.

use crate::error::{MultisendError, ValidationError};
use crate::history::HistoryCache;
use crate::submitter::{SubmissionOutcome, SubmissionState, Submitter};
use crate::types::{FormInput, SessionInfo, TransferKind};
use crate::wallet::Backend;
use ethers::types::Address;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct AppState {
    pub form: FormInput,
    pub session: SessionInfo,
    /// History of the connected account, loaded on connect.
    pub history: Option<HistoryCache>,
    /// Set while a submission runs; submit is refused meanwhile.
    pub in_flight: bool,
    pub last_outcome: Option<SubmissionOutcome>,
    pub last_error: Option<String>,
}

pub struct Controller<B: Backend + ?Sized> {
    submitter: Submitter<B>,
    data_dir: Option<PathBuf>,
    history_limit: usize,
    state: AppState,
}

/// History for `account`, loading it if none is held or another account's is.
fn history_for<'a>(
    slot: &'a mut Option<HistoryCache>,
    data_dir: Option<&PathBuf>,
    limit: usize,
    account: Address,
) -> &'a mut HistoryCache {
    let stale = slot.as_ref().map_or(true, |h| h.account() != account);
    if stale {
        *slot = Some(match data_dir {
            Some(dir) => HistoryCache::load(dir, account, limit),
            None => HistoryCache::in_memory(account, limit),
        });
    }
    slot.get_or_insert_with(|| HistoryCache::in_memory(account, limit))
}

impl<B: Backend + ?Sized> Controller<B> {
    pub fn new(submitter: Submitter<B>, history_limit: usize) -> Self {
        Self {
            submitter,
            data_dir: None,
            history_limit,
            state: AppState::default(),
        }
    }

    /// Persist history under `data_dir` instead of keeping it in memory.
    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = Some(data_dir);
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut AppState {
        &mut self.state
    }

    pub fn submission_state(&self) -> &SubmissionState {
        self.submitter.state()
    }

    pub fn set_form(&mut self, form: FormInput) {
        self.state.form = form;
    }

    /// Re-read the wallet session and load the connected account's history.
    pub async fn connect(&mut self) -> SessionInfo {
        let session = self.submitter.backend().session().await;
        self.state.session = session;
        match session.account {
            Some(account) => {
                history_for(&mut self.state.history, self.data_dir.as_ref(), self.history_limit, account);
                info!("Session: {:?} on chain {:?}", account, session.chain_id);
            }
            None => {
                self.state.history = None;
                warn!("No wallet connected");
            }
        }
        session
    }

    /// Run the whole pipeline on the current form.
    pub async fn submit(&mut self, kind: TransferKind) -> Result<SubmissionOutcome, MultisendError> {
        if self.state.in_flight {
            return Err(MultisendError::Busy);
        }
        self.state.in_flight = true;
        let result = self.run_submission(kind).await;
        self.state.in_flight = false;
        self.record(result)
    }

    async fn run_submission(&mut self, kind: TransferKind) -> Result<SubmissionOutcome, MultisendError> {
        let prepared = self.submitter.prepare(kind, &self.state.form).await;
        self.state.session = self.submitter.last_session();
        let (request, account) = prepared?;
        let history = history_for(&mut self.state.history, self.data_dir.as_ref(), self.history_limit, account);
        self.submitter.execute(&request, account, history).await
    }

    /// Continue a persisted approve-then-send workflow.
    pub async fn resume(&mut self) -> Result<SubmissionOutcome, MultisendError> {
        if self.state.in_flight {
            return Err(MultisendError::Busy);
        }
        let session = self.connect().await;
        let Some(account) = session.account else {
            return self.record(Err(ValidationError::NotConnected.into()));
        };

        self.state.in_flight = true;
        let history = history_for(&mut self.state.history, self.data_dir.as_ref(), self.history_limit, account);
        let result = self.submitter.resume(history).await;
        self.state.in_flight = false;
        self.record(result)
    }

    /// Correct cached statuses against the chain. Returns how many changed.
    pub async fn reconcile_history(&mut self) -> Result<usize, MultisendError> {
        let session = self.connect().await;
        let account = session.account.ok_or(ValidationError::NotConnected)?;
        let history = history_for(&mut self.state.history, self.data_dir.as_ref(), self.history_limit, account);

        let changed = history.reconcile(self.submitter.backend().as_ref()).await;
        if changed > 0 {
            if let Err(e) = history.save() {
                warn!("Failed to persist reconciled history: {}", e);
            }
        }
        Ok(changed)
    }

    /// Drop every cached record of the connected account.
    pub async fn clear_history(&mut self) -> Result<(), MultisendError> {
        let session = self.connect().await;
        let account = session.account.ok_or(ValidationError::NotConnected)?;
        let history = history_for(&mut self.state.history, self.data_dir.as_ref(), self.history_limit, account);
        history.clear();
        if let Err(e) = history.save() {
            warn!("Failed to persist cleared history: {}", e);
        }
        info!("Cleared history for {:?}", account);
        Ok(())
    }

    fn record(
        &mut self,
        result: Result<SubmissionOutcome, MultisendError>,
    ) -> Result<SubmissionOutcome, MultisendError> {
        match &result {
            Ok(outcome) => {
                self.state.last_outcome = Some(outcome.clone());
                self.state.last_error = None;
            }
            Err(e) => self.state.last_error = Some(e.to_string()),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract;
    use crate::dry_run::DryRunWallet;
    use crate::history::TxStatus;
    use crate::submitter::SubmitterSettings;
    use std::sync::Arc;

    const ALICE: &str = "0x1111111111111111111111111111111111111111";

    fn controller(wallet: Arc<DryRunWallet>) -> Controller<DryRunWallet> {
        let settings = SubmitterSettings {
            contract: contract::DEFAULT_MULTISEND_ADDRESS.parse().unwrap(),
            target_chain_id: 8453,
            token_decimals: None,
        };
        Controller::new(Submitter::new(wallet, settings), 10)
    }

    fn eth_form() -> FormInput {
        FormInput {
            token_address: String::new(),
            recipients: ALICE.to_string(),
            amounts: "0.25".to_string(),
        }
    }

    // ==================== connect ====================

    #[tokio::test]
    async fn test_connect_loads_history() {
        let account = Address::repeat_byte(3);
        let mut controller = controller(Arc::new(DryRunWallet::new(account, 8453)));
        let session = controller.connect().await;
        assert!(session.is_connected());
        assert_eq!(controller.state().history.as_ref().unwrap().account(), account);
    }

    #[tokio::test]
    async fn test_connect_without_wallet() {
        let mut controller = controller(Arc::new(DryRunWallet::disconnected()));
        assert!(!controller.connect().await.is_connected());
        assert!(controller.state().history.is_none());
    }

    // ==================== submit ====================

    #[tokio::test]
    async fn test_submit_records_outcome_and_history() {
        let wallet = Arc::new(DryRunWallet::new(Address::repeat_byte(3), 8453));
        let mut controller = controller(wallet.clone());
        controller.set_form(eth_form());

        let outcome = controller.submit(TransferKind::Eth).await.unwrap();
        let state = controller.state();
        assert!(!state.in_flight);
        assert_eq!(state.last_outcome.as_ref().unwrap().tx_hash, outcome.tx_hash);
        let history = state.history.as_ref().unwrap();
        assert_eq!(history.records()[0].hash, outcome.tx_hash);
        assert_eq!(history.records()[0].status, TxStatus::Success);
        assert_eq!(wallet.function_calls(), vec![contract::MULTISEND_ETH]);
    }

    #[tokio::test]
    async fn test_submit_refused_while_in_flight() {
        let wallet = Arc::new(DryRunWallet::new(Address::repeat_byte(3), 8453));
        let mut controller = controller(wallet.clone());
        controller.set_form(eth_form());
        controller.state_mut().in_flight = true;

        let err = controller.submit(TransferKind::Eth).await.unwrap_err();
        assert!(matches!(err, MultisendError::Busy));
        assert!(wallet.calls().is_empty());
    }

    #[tokio::test]
    async fn test_submit_failure_sets_last_error() {
        let wallet = Arc::new(DryRunWallet::disconnected());
        let mut controller = controller(wallet.clone());
        controller.set_form(eth_form());

        let err = controller.submit(TransferKind::Eth).await.unwrap_err();
        assert!(matches!(err, MultisendError::Validation(ValidationError::NotConnected)));
        assert!(controller.state().last_error.is_some());
        assert!(!controller.state().in_flight);
        assert!(wallet.calls().is_empty());
    }

    #[tokio::test]
    async fn test_submit_refreshes_session_after_chain_switch() {
        let account = Address::repeat_byte(3);
        let wallet = Arc::new(DryRunWallet::new(account, 8453));
        let mut controller = controller(wallet.clone());
        controller.connect().await;
        controller.set_form(eth_form());

        wallet.switch_chain(1);
        let err = controller.submit(TransferKind::Eth).await.unwrap_err();
        assert!(matches!(
            err,
            MultisendError::Validation(ValidationError::WrongNetwork { expected: 8453, actual: 1 })
        ));
        assert_eq!(controller.state().session, SessionInfo::connected(account, 1));

        wallet.switch_chain(8453);
        controller.submit(TransferKind::Eth).await.unwrap();
        assert_eq!(controller.state().session.chain_id, Some(8453));
    }

    // ==================== history maintenance ====================

    #[tokio::test]
    async fn test_clear_history_persists() {
        let dir = tempfile::tempdir().unwrap();
        let account = Address::repeat_byte(3);
        let wallet = Arc::new(DryRunWallet::new(account, 8453));
        let mut controller = controller(wallet).with_data_dir(dir.path().to_path_buf());
        controller.set_form(eth_form());
        controller.submit(TransferKind::Eth).await.unwrap();
        assert_eq!(HistoryCache::load(dir.path(), account, 10).len(), 1);

        controller.clear_history().await.unwrap();
        assert!(controller.state().history.as_ref().unwrap().is_empty());
        assert!(HistoryCache::load(dir.path(), account, 10).is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_history_flips_reverted_success() {
        let wallet = Arc::new(DryRunWallet::new(Address::repeat_byte(3), 8453));
        let mut controller = controller(wallet.clone());
        controller.set_form(eth_form());
        let outcome = controller.submit(TransferKind::Eth).await.unwrap();

        wallet.set_receipt_status(outcome.tx_hash, Some(false));
        assert_eq!(controller.reconcile_history().await.unwrap(), 1);
        let history = controller.state().history.as_ref().unwrap();
        assert_eq!(history.get(outcome.tx_hash).unwrap().status, TxStatus::Failed);
    }
}
