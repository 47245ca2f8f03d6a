use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand};
use ethers::types::Address;
use multisend::config::{self, Config};
use multisend::controller::Controller;
use multisend::dry_run::DryRunWallet;
use multisend::ethers_backend::{EthersBackend, SignerSource};
use multisend::history::HistoryCache;
use multisend::input;
use multisend::operation_log::OperationLog;
use multisend::submitter::{SubmissionOutcome, Submitter, SubmitterSettings};
use multisend::types::{FormInput, TransferKind};
use multisend::user_settings::{SignerKind, UserSettings};
use multisend::wallet::Backend;
use multisend::workflow::WorkflowStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Batch ETH and ERC-20 transfers through the Base multisend contract.
#[derive(Parser, Debug)]
#[command(name = "multisend", author, version, about, long_about = None)]
struct Cli {
    /// JSON-RPC endpoint (overrides MULTISEND_RPC_URL and saved settings)
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// Chain the wallet must be on (8453 = Base, 84532 = Base Sepolia)
    #[arg(long, global = true)]
    chain_id: Option<u64>,

    /// Multisend contract address
    #[arg(long, global = true)]
    contract: Option<String>,

    /// Sign with a Ledger device
    #[arg(long, global = true)]
    ledger: bool,

    /// Ledger account index (m/44'/60'/INDEX'/0/0)
    #[arg(long, global = true)]
    ledger_index: Option<u32>,

    /// Hex private key of the sending account
    #[arg(long, env = "MULTISEND_PRIVATE_KEY", hide_env_values = true, global = true)]
    private_key: Option<String>,

    /// Record calls in memory instead of signing and broadcasting them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Account to simulate with --dry-run
    #[arg(long, global = true, requires = "dry_run")]
    from: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Wallet(WalletCommand),
    /// Show or change saved defaults
    Settings(SettingsArgs),
}

#[derive(Subcommand, Debug, Clone)]
enum WalletCommand {
    /// Send ETH to many recipients in one transaction
    Eth(BatchArgs),
    /// Send an ERC-20 token to many recipients, approving the contract first if needed
    Token {
        /// Token contract address
        #[arg(long)]
        token: String,
        /// Token decimals (skips the on-chain lookup)
        #[arg(long)]
        decimals: Option<u8>,
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// Continue a token batch interrupted after its approval
    Resume,
    /// Show recent batches of the connected account
    History {
        /// Re-check statuses against the chain first
        #[arg(long)]
        reconcile: bool,
    },
    /// Forget the connected account's batch history
    ClearHistory,
}

#[derive(Args, Debug, Default)]
struct SettingsArgs {
    /// Signer used when neither --ledger nor a private key is given (local, ledger)
    #[arg(long)]
    signer: Option<SignerKind>,

    /// Ledger account index used by default
    #[arg(long)]
    default_ledger_index: Option<u32>,

    /// Decimals forced for token batches
    #[arg(long, conflicts_with = "clear_decimals")]
    decimals: Option<u8>,

    /// Read token decimals from the token again
    #[arg(long)]
    clear_decimals: bool,

    /// RPC endpoint saved for the selected chain (an empty value removes it)
    #[arg(long)]
    save_rpc: Option<String>,
}

impl SettingsArgs {
    /// Apply the requested changes. Returns whether anything was changed.
    fn apply(&self, settings: &mut UserSettings, chain_id: u64) -> bool {
        let before = settings.clone();
        if let Some(signer) = self.signer {
            settings.default_signer = signer;
        }
        if let Some(index) = self.default_ledger_index {
            settings.ledger_index = index;
        }
        if let Some(decimals) = self.decimals {
            settings.default_token_decimals = Some(decimals);
        }
        if self.clear_decimals {
            settings.default_token_decimals = None;
        }
        if let Some(rpc) = &self.save_rpc {
            settings.set_custom_rpc(chain_id, rpc.clone());
        }
        *settings != before
    }
}

#[derive(Args, Debug, Clone)]
struct BatchArgs {
    /// Comma-separated recipient addresses
    #[arg(long, conflicts_with = "csv", requires = "amounts")]
    recipients: Option<String>,

    /// Comma-separated amounts, in the same order as the recipients
    #[arg(long, conflicts_with = "csv", requires = "recipients")]
    amounts: Option<String>,

    /// CSV file of `address,amount` rows
    #[arg(long)]
    csv: Option<PathBuf>,
}

impl BatchArgs {
    fn form(&self, token_address: &str) -> Result<FormInput> {
        let (recipients, amounts) = match (&self.csv, &self.recipients, &self.amounts) {
            (Some(path), _, _) => {
                let (recipients, amounts) = input::load_csv_file(path)?;
                (recipients.join(","), amounts.join(","))
            }
            (None, Some(recipients), Some(amounts)) => (recipients.clone(), amounts.clone()),
            _ => bail!("Provide --recipients and --amounts, or --csv"),
        };
        Ok(FormInput {
            token_address: token_address.to_string(),
            recipients,
            amounts,
        })
    }
}

fn resolve_config(cli: &Cli, settings: &UserSettings) -> Result<Config> {
    let env_rpc = std::env::var("MULTISEND_RPC_URL")
        .ok()
        .filter(|rpc| !rpc.trim().is_empty());
    apply_overrides(Config::from_env()?, env_rpc.as_deref(), cli, settings)
}

/// RPC precedence: --rpc-url, MULTISEND_RPC_URL, the RPC saved for the chain,
/// then the network default.
fn apply_overrides(mut config: Config, env_rpc: Option<&str>, cli: &Cli, settings: &UserSettings) -> Result<Config> {
    if let Some(chain_id) = cli.chain_id {
        if chain_id != config.chain_id {
            config.chain_id = chain_id;
            config.rpc_url = config::find_network_by_chain_id(chain_id)
                .map(|n| n.default_rpc.to_string())
                .unwrap_or_default();
        }
    }
    let rpc = cli
        .rpc_url
        .as_deref()
        .or(env_rpc)
        .or_else(|| settings.get_custom_rpc(config.chain_id).map(String::as_str));
    if let Some(rpc) = rpc {
        config.rpc_url = rpc.trim().to_string();
    }
    if let Some(contract) = &cli.contract {
        config.set_contract(contract)?;
    }

    if config.rpc_url.is_empty() && !cli.dry_run {
        bail!("No RPC URL known for chain {}; pass --rpc-url", config.chain_id);
    }
    Ok(config)
}

fn print_outcome(outcome: &SubmissionOutcome, chain_id: u64) {
    println!(
        "{} batch to {} recipients confirmed: {}",
        outcome.kind, outcome.recipient_count, outcome.amount_summary
    );
    if let Some(approval) = outcome.approval_hash {
        println!("  approval:    {:?}", approval);
    }
    println!("  transaction: {:?}", outcome.tx_hash);
    println!(
        "  block:       {}",
        outcome.receipt.block_number.map_or("-".to_string(), |b| b.to_string())
    );
    if let Some(url) = config::get_tx_explorer_url(chain_id, &format!("{:?}", outcome.tx_hash)) {
        println!("  explorer:    {}", url);
    }
}

fn print_history(history: Option<&HistoryCache>) {
    let Some(history) = history.filter(|h| !h.is_empty()) else {
        println!("No recent batches");
        return;
    };
    for record in history.records() {
        println!(
            "{}  {:<7}  {:<5}  {:>3} recipients  {:<28}  {:?}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", record.status),
            record.kind,
            record.recipient_count,
            record.amount_summary,
            record.hash
        );
    }
}

fn print_settings(settings: &UserSettings, config: &Config) {
    println!("signer:         {}", settings.default_signer);
    println!("ledger index:   {}", settings.ledger_index);
    println!(
        "token decimals: {}",
        settings
            .default_token_decimals
            .map_or("read from token".to_string(), |d| d.to_string())
    );
    println!(
        "rpc:            {} ({}{})",
        config.rpc_url,
        config.network_label(),
        if config.is_testnet() { ", testnet" } else { "" }
    );
    let contract = format!("{:?}", config.contract_address);
    match config::get_address_explorer_url(config.chain_id, &contract) {
        Some(url) => println!("contract:       {}", url),
        None => println!("contract:       {}", contract),
    }
    println!("operation log:  {}", OperationLog::in_dir(&config.data_dir).path().display());
}

fn update_settings(args: &SettingsArgs, cli: &Cli, data_dir: &Path) -> Result<()> {
    let mut settings = UserSettings::load_from(data_dir);
    let chain_id = match cli.chain_id {
        Some(chain_id) => chain_id,
        None => Config::from_env()?.chain_id,
    };
    if args.apply(&mut settings, chain_id) {
        settings.save_to(data_dir)?;
    }
    // Unknown chains have no default RPC; show the settings anyway.
    let config = match resolve_config(cli, &settings) {
        Ok(config) => config,
        Err(_) => Config {
            chain_id,
            ..Config::from_env()?
        },
    };
    print_settings(&settings, &config);
    Ok(())
}

async fn run<B: Backend + ?Sized>(
    command: WalletCommand,
    backend: Arc<B>,
    config: &Config,
    settings: &UserSettings,
    persist: bool,
) -> Result<()> {
    let token_decimals = match &command {
        WalletCommand::Token { decimals, .. } => decimals.or(settings.default_token_decimals),
        _ => settings.default_token_decimals,
    };

    let mut submitter = Submitter::new(
        backend,
        SubmitterSettings {
            contract: config.contract_address,
            target_chain_id: config.chain_id,
            token_decimals,
        },
    );
    if persist {
        submitter = submitter
            .with_workflow_store(WorkflowStore::in_dir(&config.data_dir))
            .with_operation_log(OperationLog::in_dir(&config.data_dir));
    }

    let mut controller = Controller::new(submitter, config.history_limit);
    if persist {
        controller = controller.with_data_dir(config.data_dir.clone());
    }
    controller.connect().await;

    match command {
        WalletCommand::Eth(batch) => {
            controller.set_form(batch.form("")?);
            let outcome = controller.submit(TransferKind::Eth).await?;
            print_outcome(&outcome, config.chain_id);
        }
        WalletCommand::Token { token, batch, .. } => {
            controller.set_form(batch.form(&token)?);
            let outcome = controller.submit(TransferKind::Token).await?;
            print_outcome(&outcome, config.chain_id);
        }
        WalletCommand::Resume => {
            let outcome = controller.resume().await?;
            print_outcome(&outcome, config.chain_id);
        }
        WalletCommand::History { reconcile } => {
            if reconcile {
                let changed = controller.reconcile_history().await?;
                println!("{} record(s) updated", changed);
            }
            print_history(controller.state().history.as_ref());
        }
        WalletCommand::ClearHistory => {
            controller.clear_history().await?;
            println!("History cleared");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    let data_dir = config::default_data_dir();
    let command = match cli.command {
        Command::Settings(ref args) => return update_settings(args, &cli, &data_dir),
        Command::Wallet(ref command) => command.clone(),
    };

    let settings = UserSettings::load_from(&data_dir);
    let config = resolve_config(&cli, &settings)?;
    info!(
        "Target: {} (chain {}, native {}), contract {:?}",
        config.network_label(),
        config.chain_id,
        config.native_token(),
        config.contract_address
    );
    if config.is_testnet() {
        info!("{} is a testnet", config.network_label());
    }

    if cli.dry_run {
        let account = match cli.from.as_deref() {
            Some(raw) => raw
                .trim()
                .parse::<Address>()
                .map_err(|e| anyhow!("Invalid --from address {}: {}", raw, e))?,
            None => Address::zero(),
        };
        info!("Dry run as {:?}; nothing will be broadcast", account);
        let wallet = Arc::new(DryRunWallet::new(account, config.chain_id));
        return run(command, wallet, &config, &settings, false).await;
    }

    let signer = if cli.ledger || (cli.private_key.is_none() && settings.uses_ledger()) {
        SignerSource::Ledger {
            index: cli.ledger_index.unwrap_or(settings.ledger_index),
        }
    } else {
        let key = cli
            .private_key
            .as_deref()
            .ok_or_else(|| anyhow!("No signer: pass --private-key (or MULTISEND_PRIVATE_KEY) or --ledger"))?;
        SignerSource::from_private_key(key)?
    };

    let backend = Arc::new(EthersBackend::connect(&config, signer).await?);
    run(command, backend, &config, &settings, true).await
}
