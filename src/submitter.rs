//! Transfer submission pipeline.
//!
//! Drives one batch from raw form input to a confirmed multisend transaction:
//! normalize, validate, convert amounts, optionally approve the token spend and
//! wait for it, then call the multisend contract and wait for the result.
//! Every collaborator failure ends the run in `Failed`; nothing is retried.

use crate::contract;
use crate::error::{MultisendError, ValidationError};
use crate::history::{HistoryCache, TransactionRecord, TxStatus};
use crate::operation_log::OperationLog;
use crate::types::{FormInput, SessionInfo, TransferKind, TransferRequest, ValidRequest};
use crate::utils::{self, DEFAULT_TOKEN_DECIMALS, NATIVE_DECIMALS};
use crate::validate;
use crate::wallet::{Backend, ContractCall, Receipt, WalletError};
use crate::workflow::{ApprovalStep, ApprovalWorkflow, WorkflowStore};
use chrono::Utc;
use ethers::types::{Address, TxHash, U256};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the pipeline currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    Normalizing,
    Validating,
    CheckingAllowance,
    Approving,
    AwaitingApprovalConfirmation,
    Submitting,
    AwaitingResult,
    Succeeded(TxHash),
    Failed(String),
}

impl SubmissionState {
    /// True while a run is underway and submit controls must stay disabled.
    pub fn is_in_flight(&self) -> bool {
        !matches!(
            self,
            SubmissionState::Idle | SubmissionState::Succeeded(_) | SubmissionState::Failed(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct SubmitterSettings {
    /// Multisend contract, also the spender for token approvals.
    pub contract: Address,
    pub target_chain_id: u64,
    /// Skip the on-chain `decimals()` lookup and use this value.
    pub token_decimals: Option<u8>,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub kind: TransferKind,
    pub tx_hash: TxHash,
    pub approval_hash: Option<TxHash>,
    pub recipient_count: usize,
    pub total: U256,
    pub decimals: u8,
    pub amount_summary: String,
    pub receipt: Receipt,
}

pub struct Submitter<B: Backend + ?Sized> {
    backend: Arc<B>,
    settings: SubmitterSettings,
    workflows: WorkflowStore,
    log: Option<OperationLog>,
    state: SubmissionState,
    /// Session seen by the most recent validation.
    last_session: SessionInfo,
}

fn send_error(err: WalletError) -> MultisendError {
    match err {
        WalletError::Reverted(msg) => MultisendError::ContractReverted(msg),
        WalletError::Rejected(msg) | WalletError::Transport(msg) => MultisendError::SigningRejected(msg),
        WalletError::Dropped(hash) => MultisendError::SigningRejected(format!("transaction {:?} was dropped", hash)),
    }
}

fn confirm_error(hash: TxHash, err: WalletError) -> MultisendError {
    match err {
        WalletError::Reverted(msg) => MultisendError::ContractReverted(msg),
        other => MultisendError::ConfirmationFailed {
            hash,
            reason: other.to_string(),
        },
    }
}

fn convert_amounts(amounts: &[String], decimals: u8) -> Result<Vec<U256>, MultisendError> {
    amounts
        .iter()
        .map(|raw| {
            utils::to_base_units(raw, decimals).map_err(|source| MultisendError::MalformedAmount {
                value: raw.clone(),
                source,
            })
        })
        .collect()
}

fn total_of(values: &[U256]) -> Result<U256, MultisendError> {
    utils::sum(values).map_err(|source| MultisendError::MalformedAmount {
        value: format!("sum of {} amounts", values.len()),
        source,
    })
}

fn distribution_lines(recipients: &[Address], values: &[U256], decimals: u8) -> String {
    recipients
        .iter()
        .zip(values.iter())
        .enumerate()
        .map(|(i, (address, amount))| {
            format!("{}. {:?} → {}", i + 1, address, utils::format_units(*amount, decimals))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl<B: Backend + ?Sized> Submitter<B> {
    pub fn new(backend: Arc<B>, settings: SubmitterSettings) -> Self {
        Self {
            backend,
            settings,
            workflows: WorkflowStore::disabled(),
            log: None,
            state: SubmissionState::Idle,
            last_session: SessionInfo::default(),
        }
    }

    pub fn with_workflow_store(mut self, workflows: WorkflowStore) -> Self {
        self.workflows = workflows;
        self
    }

    pub fn with_operation_log(mut self, log: OperationLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn state(&self) -> &SubmissionState {
        &self.state
    }

    pub fn last_session(&self) -> SessionInfo {
        self.last_session
    }

    pub fn settings(&self) -> &SubmitterSettings {
        &self.settings
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn transition(&mut self, next: SubmissionState) {
        debug!("Submission state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: MultisendError) -> MultisendError {
        warn!("Submission failed: {}", err);
        self.transition(SubmissionState::Failed(err.to_string()));
        err
    }

    fn log_operation(&self, operation: &str, details: impl AsRef<str>) {
        if let Some(log) = &self.log {
            if let Err(e) = log.append(operation, self.settings.target_chain_id, details) {
                warn!("Failed to write operation log: {}", e);
            }
        }
    }

    fn save_history(history: &HistoryCache) {
        if let Err(e) = history.save() {
            warn!("Failed to persist transaction history: {}", e);
        }
    }

    fn persist_workflow(&self, workflow: &ApprovalWorkflow) {
        if let Err(e) = self.workflows.save(workflow) {
            warn!("Failed to persist approval workflow: {}", e);
        }
    }

    fn discard_workflow(&self, account: Address) {
        if let Err(e) = self.workflows.clear(account) {
            warn!("Failed to remove approval workflow: {}", e);
        }
    }

    fn finish(
        &mut self,
        kind: TransferKind,
        result: Result<SubmissionOutcome, MultisendError>,
    ) -> Result<SubmissionOutcome, MultisendError> {
        match result {
            Ok(outcome) => {
                self.transition(SubmissionState::Succeeded(outcome.tx_hash));
                Ok(outcome)
            }
            Err(err) => {
                if !err.is_pre_submission() {
                    self.log_operation(&format!("Multisend {} failed", kind), err.to_string());
                }
                Err(self.fail(err))
            }
        }
    }

    /// Normalize the form and validate it against the current wallet session.
    ///
    /// Returns the validated request and the connected account.
    pub async fn prepare(
        &mut self,
        kind: TransferKind,
        form: &FormInput,
    ) -> Result<(ValidRequest, Address), MultisendError> {
        self.transition(SubmissionState::Normalizing);
        let request = TransferRequest::from_form(kind, form);

        self.transition(SubmissionState::Validating);
        let session = self.backend.session().await;
        self.last_session = session;
        let checked = validate::validate(&session, self.settings.target_chain_id, request)
            .and_then(|valid| {
                session
                    .account
                    .map(|account| (valid, account))
                    .ok_or(ValidationError::NotConnected)
            });
        checked.map_err(|e| self.fail(e.into()))
    }

    /// Submit a validated request on behalf of `account`.
    pub async fn execute(
        &mut self,
        request: &ValidRequest,
        account: Address,
        history: &mut HistoryCache,
    ) -> Result<SubmissionOutcome, MultisendError> {
        let result = match request.kind() {
            TransferKind::Eth => self.execute_eth(request, history).await,
            TransferKind::Token => self.execute_token(request, account, history).await,
        };
        self.finish(request.kind(), result)
    }

    /// `prepare` followed by `execute`.
    pub async fn run(
        &mut self,
        kind: TransferKind,
        form: &FormInput,
        history: &mut HistoryCache,
    ) -> Result<SubmissionOutcome, MultisendError> {
        let (request, account) = self.prepare(kind, form).await?;
        self.execute(&request, account, history).await
    }

    async fn execute_eth(
        &mut self,
        request: &ValidRequest,
        history: &mut HistoryCache,
    ) -> Result<SubmissionOutcome, MultisendError> {
        let values = convert_amounts(request.amounts(), NATIVE_DECIMALS)?;
        let total = total_of(&values)?;
        let recipients = contract::parse_recipients(request.recipients())?;

        self.transition(SubmissionState::Submitting);
        let call = contract::multisend_eth_call(self.settings.contract, &recipients, &values, total)?;
        let summary = format!("{} ETH", utils::format_ether(total));

        let tx_hash = self
            .send_transfer(&call, TransferKind::Eth, recipients.len(), &summary, history)
            .await?;
        let receipt = self.confirm_transfer(&call, tx_hash, history).await?;

        self.log_operation(
            "Multisend ETH",
            format!(
                "Contract: {:?}\nRecipients: {}\n{}\nTotal: {}\nTx hash: {:?}\nBlock: {:?}\nGas used: {}",
                self.settings.contract,
                recipients.len(),
                distribution_lines(&recipients, &values, NATIVE_DECIMALS),
                summary,
                tx_hash,
                receipt.block_number,
                receipt.gas_used
            ),
        );

        Ok(SubmissionOutcome {
            kind: TransferKind::Eth,
            tx_hash,
            approval_hash: None,
            recipient_count: recipients.len(),
            total,
            decimals: NATIVE_DECIMALS,
            amount_summary: summary,
            receipt,
        })
    }

    async fn execute_token(
        &mut self,
        request: &ValidRequest,
        account: Address,
        history: &mut HistoryCache,
    ) -> Result<SubmissionOutcome, MultisendError> {
        let token: Address = request
            .token_address()
            .and_then(|raw| raw.parse().ok())
            .ok_or(ValidationError::InvalidTokenAddress)?;

        let decimals = self.resolve_decimals(token).await;
        let values = convert_amounts(request.amounts(), decimals)?;
        let total = total_of(&values)?;
        let recipients = contract::parse_recipients(request.recipients())?;

        let workflow = ApprovalWorkflow {
            account,
            chain_id: self.settings.target_chain_id,
            contract: self.settings.contract,
            token,
            decimals,
            recipients,
            amounts: values,
            total,
            step: ApprovalStep::NotApproved,
            approval_hash: None,
            created_at: Utc::now(),
        };
        self.run_token_workflow(workflow, history).await
    }

    /// Continue a token batch whose approval was interrupted.
    ///
    /// An approval that was broadcast but never confirmed is awaited first. If
    /// it still cannot be confirmed the allowance is re-checked, so a landed
    /// approval is not repeated.
    pub async fn resume(&mut self, history: &mut HistoryCache) -> Result<SubmissionOutcome, MultisendError> {
        self.transition(SubmissionState::Validating);
        let session = self.backend.session().await;
        self.last_session = session;
        let Some(account) = session.account else {
            return Err(self.fail(ValidationError::NotConnected.into()));
        };

        let workflow = match self.workflows.load(account) {
            Ok(Some(workflow)) => workflow,
            Ok(None) => return Err(self.fail(MultisendError::NoPendingWorkflow)),
            Err(e) => {
                warn!("Unreadable approval workflow: {}", e);
                return Err(self.fail(MultisendError::NoPendingWorkflow));
            }
        };
        info!(
            "Resuming token batch for {:?}: {} recipients, step {:?}",
            workflow.token,
            workflow.recipients.len(),
            workflow.step
        );

        if session.chain_id != Some(workflow.chain_id) {
            return Err(self.fail(
                ValidationError::WrongNetwork {
                    expected: workflow.chain_id,
                    actual: session.chain_id.unwrap_or_default(),
                }
                .into(),
            ));
        }
        if account != workflow.account {
            warn!(
                "Pending approval belongs to {:?}, connected account is {:?}",
                workflow.account, account
            );
            return Err(self.fail(MultisendError::NoPendingWorkflow));
        }

        let result = self.continue_workflow(workflow, history).await;
        self.finish(TransferKind::Token, result)
    }

    async fn continue_workflow(
        &mut self,
        mut workflow: ApprovalWorkflow,
        history: &mut HistoryCache,
    ) -> Result<SubmissionOutcome, MultisendError> {
        if let (ApprovalStep::NotApproved, Some(hash)) = (workflow.step, workflow.approval_hash) {
            self.transition(SubmissionState::AwaitingApprovalConfirmation);
            match self.confirm_approval(workflow.account, hash).await {
                Ok(()) => {
                    workflow.step = ApprovalStep::Approved;
                    self.persist_workflow(&workflow);
                }
                Err(MultisendError::ConfirmationFailed { reason, .. }) => {
                    warn!("Stored approval {:?} not confirmed ({}); re-checking allowance", hash, reason);
                    workflow.approval_hash = None;
                }
                Err(e) => return Err(e),
            }
        }
        self.run_token_workflow(workflow, history).await
    }

    async fn resolve_decimals(&self, token: Address) -> u8 {
        if let Some(decimals) = self.settings.token_decimals {
            return decimals;
        }
        match self.backend.decimals(token).await {
            Ok(decimals) => {
                debug!("Token {:?} reports {} decimals", token, decimals);
                decimals
            }
            Err(e) => {
                warn!(
                    "Could not read decimals() of {:?} ({}); assuming {}",
                    token, e, DEFAULT_TOKEN_DECIMALS
                );
                DEFAULT_TOKEN_DECIMALS
            }
        }
    }

    async fn run_token_workflow(
        &mut self,
        mut workflow: ApprovalWorkflow,
        history: &mut HistoryCache,
    ) -> Result<SubmissionOutcome, MultisendError> {
        if workflow.step == ApprovalStep::NotApproved {
            self.transition(SubmissionState::CheckingAllowance);
            let allowance = self
                .backend
                .allowance(workflow.token, workflow.account, workflow.contract)
                .await
                .map_err(|e| MultisendError::ChainRead(format!("allowance lookup failed: {}", e)))?;

            if allowance < workflow.total {
                info!(
                    "Allowance {} below batch total {}; approving {:?}",
                    allowance, workflow.total, workflow.contract
                );
                self.persist_workflow(&workflow);

                self.transition(SubmissionState::Approving);
                let call = contract::approve_call(workflow.token, workflow.contract, workflow.total)?;
                let hash = match self.backend.send(&call).await {
                    Ok(hash) => hash,
                    Err(e) => {
                        self.discard_workflow(workflow.account);
                        return Err(send_error(e));
                    }
                };
                workflow.approval_hash = Some(hash);
                self.persist_workflow(&workflow);
                self.log_operation(
                    "Token Approval",
                    format!(
                        "Token: {:?}\nSpender: {:?}\nAmount: {}\nTx hash: {:?}",
                        workflow.token,
                        workflow.contract,
                        utils::format_units(workflow.total, workflow.decimals),
                        hash
                    ),
                );

                self.transition(SubmissionState::AwaitingApprovalConfirmation);
                self.confirm_approval(workflow.account, hash).await?;
            } else {
                info!(
                    "Existing allowance {} covers batch total {}; skipping approval",
                    allowance, workflow.total
                );
            }
            workflow.step = ApprovalStep::Approved;
            self.persist_workflow(&workflow);
        }

        self.transition(SubmissionState::Submitting);
        let call = contract::multisend_token_call(
            workflow.contract,
            workflow.token,
            &workflow.recipients,
            &workflow.amounts,
        )?;
        let summary = format!(
            "{} of token {}",
            utils::format_units(workflow.total, workflow.decimals),
            utils::short_hex(&format!("{:#x}", workflow.token))
        );

        let tx_hash = self
            .send_transfer(&call, TransferKind::Token, workflow.recipients.len(), &summary, history)
            .await?;
        self.discard_workflow(workflow.account);
        let receipt = self.confirm_transfer(&call, tx_hash, history).await?;

        self.log_operation(
            "Multisend Token",
            format!(
                "Contract: {:?}\nToken: {:?} ({} decimals)\nRecipients: {}\n{}\nTotal: {}\nApproval tx: {:?}\nTx hash: {:?}\nBlock: {:?}\nGas used: {}",
                workflow.contract,
                workflow.token,
                workflow.decimals,
                workflow.recipients.len(),
                distribution_lines(&workflow.recipients, &workflow.amounts, workflow.decimals),
                summary,
                workflow.approval_hash,
                tx_hash,
                receipt.block_number,
                receipt.gas_used
            ),
        );

        Ok(SubmissionOutcome {
            kind: TransferKind::Token,
            tx_hash,
            approval_hash: workflow.approval_hash,
            recipient_count: workflow.recipients.len(),
            total: workflow.total,
            decimals: workflow.decimals,
            amount_summary: summary,
            receipt,
        })
    }

    /// Wait for an approval. A reverted approval abandons the workflow; an
    /// unconfirmed one keeps it so `resume` can wait again.
    async fn confirm_approval(&mut self, account: Address, hash: TxHash) -> Result<(), MultisendError> {
        match self.backend.await_confirmation(hash).await {
            Ok(receipt) if receipt.success => {
                info!("Approval {:?} confirmed in block {:?}", hash, receipt.block_number);
                Ok(())
            }
            Ok(_) => {
                self.discard_workflow(account);
                Err(MultisendError::ContractReverted(format!("approval {:?} reverted", hash)))
            }
            Err(WalletError::Reverted(msg)) => {
                self.discard_workflow(account);
                Err(MultisendError::ContractReverted(msg))
            }
            Err(e) => Err(confirm_error(hash, e)),
        }
    }

    /// Broadcast the transfer and record it as pending.
    async fn send_transfer(
        &mut self,
        call: &ContractCall,
        kind: TransferKind,
        recipient_count: usize,
        summary: &str,
        history: &mut HistoryCache,
    ) -> Result<TxHash, MultisendError> {
        info!(
            "Calling {} on {:?}: {} recipients, {}",
            call.function, call.to, recipient_count, summary
        );
        if call.calldata.len() >= 4 {
            debug!("Selector 0x{}, calldata {} bytes", hex::encode(&call.calldata[..4]), call.calldata.len());
        }

        let tx_hash = self.backend.send(call).await.map_err(send_error)?;
        info!("{} broadcast: {:?}", call.function, tx_hash);

        history.push(TransactionRecord::pending(tx_hash, kind, recipient_count, summary.to_string()));
        Self::save_history(history);
        Ok(tx_hash)
    }

    /// Wait for the transfer and settle its history record.
    ///
    /// A receipt with a failed status marks the record failed. When the wait
    /// itself fails the outcome is unknown and the record stays pending.
    async fn confirm_transfer(
        &mut self,
        call: &ContractCall,
        tx_hash: TxHash,
        history: &mut HistoryCache,
    ) -> Result<Receipt, MultisendError> {
        self.transition(SubmissionState::AwaitingResult);
        let outcome = match self.backend.await_confirmation(tx_hash).await {
            Ok(receipt) if receipt.success => Ok(receipt),
            Ok(_) => Err(MultisendError::ContractReverted(format!(
                "{} transaction {:?} reverted",
                call.function, tx_hash
            ))),
            Err(e) => Err(confirm_error(tx_hash, e)),
        };

        let status = match &outcome {
            Ok(_) => Some(TxStatus::Success),
            Err(MultisendError::ContractReverted(_)) => Some(TxStatus::Failed),
            Err(_) => None,
        };
        if let Some(status) = status {
            history.update_status(tx_hash, status);
            Self::save_history(history);
        }

        if let Ok(receipt) = &outcome {
            info!(
                "{} confirmed: {:?} in block {:?}, gas used {}",
                call.function, tx_hash, receipt.block_number, receipt.gas_used
            );
        }
        outcome
    }
}
