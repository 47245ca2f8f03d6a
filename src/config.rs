use crate::contract::DEFAULT_MULTISEND_ADDRESS;
use crate::history::DEFAULT_HISTORY_LIMIT;
use anyhow::{Context, Result};
use ethers::providers::{Http, Provider};
use ethers::types::Address;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Directory name under the platform config dir.
pub const APP_DIR_NAME: &str = "base-multisend";

pub const BASE_CHAIN_ID: u64 = 8453;
pub const BASE_SEPOLIA_CHAIN_ID: u64 = 84532;

/// A network the multisend contract can be used on.
#[derive(Clone, Debug)]
pub struct EvmNetwork {
    pub label: &'static str,
    pub chain_id: u64,
    pub native_token: &'static str,
    pub default_rpc: &'static str,
    pub explorer: &'static str,
    pub testnet: bool,
}

impl EvmNetwork {
    pub const fn new(
        label: &'static str,
        chain_id: u64,
        native_token: &'static str,
        default_rpc: &'static str,
        explorer: &'static str,
        testnet: bool,
    ) -> Self {
        Self {
            label,
            chain_id,
            native_token,
            default_rpc,
            explorer,
            testnet,
        }
    }
}

pub const NETWORKS: &[EvmNetwork] = &[
    EvmNetwork::new("Base", BASE_CHAIN_ID, "ETH", "https://mainnet.base.org", "https://basescan.org", false),
    EvmNetwork::new(
        "Base Sepolia",
        BASE_SEPOLIA_CHAIN_ID,
        "ETH",
        "https://sepolia.base.org",
        "https://sepolia.basescan.org",
        true,
    ),
];

pub fn find_network_by_chain_id(chain_id: u64) -> Option<&'static EvmNetwork> {
    NETWORKS.iter().find(|n| n.chain_id == chain_id)
}

/// Get the block explorer URL for a given chain ID
pub fn get_block_explorer_url(chain_id: u64) -> Option<&'static str> {
    find_network_by_chain_id(chain_id).map(|n| n.explorer)
}

/// Get the full URL to view a transaction on the block explorer
pub fn get_tx_explorer_url(chain_id: u64, tx_hash: &str) -> Option<String> {
    get_block_explorer_url(chain_id).map(|base| format!("{}/tx/{}", base, tx_hash))
}

pub fn get_address_explorer_url(chain_id: u64, address: &str) -> Option<String> {
    get_block_explorer_url(chain_id).map(|base| format!("{}/address/{}", base, address))
}

/// Check if a chain supports EIP-1559 (Type 2 transactions)
pub fn chain_supports_eip1559(chain_id: u64) -> bool {
    match chain_id {
        // OP-stack chains priced with a base fee
        BASE_CHAIN_ID | BASE_SEPOLIA_CHAIN_ID => true,
        // Local dev nodes are configured either way; legacy is always accepted
        31337 | 1337 => false,
        _ => true,
    }
}

/// Ledger Live style path: m/44'/60'/{index}'/0/0
pub fn ledger_derivation_path(index: u32) -> String {
    format!("m/44'/60'/{}'/0/0", index)
}

/// `<config_dir>/base-multisend`, or the working directory when the platform has none.
pub fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Clone, Debug)]
pub struct Config {
    pub rpc_url: String,
    /// Chain the wallet must be on for a submission to proceed.
    pub chain_id: u64,
    pub contract_address: Address,
    pub history_limit: usize,
    pub receipt_poll_interval_ms: u64,
    /// 0 waits for a receipt indefinitely.
    pub confirmation_timeout_secs: u64,
    /// Added on top of the estimated gas limit, in percent.
    pub gas_limit_buffer: u64,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn new(rpc_url: String, chain_id: u64) -> Self {
        Self {
            rpc_url,
            chain_id,
            contract_address: DEFAULT_MULTISEND_ADDRESS
                .parse()
                .unwrap_or_else(|_| Address::zero()),
            history_limit: DEFAULT_HISTORY_LIMIT,
            receipt_poll_interval_ms: 500,
            confirmation_timeout_secs: 0,
            gas_limit_buffer: 10,
            data_dir: default_data_dir(),
        }
    }

    pub fn from_network(network: &EvmNetwork) -> Self {
        Self::new(network.default_rpc.to_string(), network.chain_id)
    }

    /// Base mainnet defaults overridden by `MULTISEND_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = match env::var("MULTISEND_CHAIN_ID") {
            Ok(raw) => {
                let chain_id: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("MULTISEND_CHAIN_ID is not a number: {}", raw))?;
                match find_network_by_chain_id(chain_id) {
                    Some(network) => Self::from_network(network),
                    None => Self::new(String::new(), chain_id),
                }
            }
            Err(_) => Self::default(),
        };

        if let Ok(rpc) = env::var("MULTISEND_RPC_URL") {
            if !rpc.trim().is_empty() {
                config.rpc_url = rpc.trim().to_string();
            }
        }
        if let Ok(contract) = env::var("MULTISEND_CONTRACT") {
            config.set_contract(&contract)?;
        }
        if let Ok(timeout) = env::var("MULTISEND_CONFIRMATION_TIMEOUT") {
            config.confirmation_timeout_secs = timeout
                .trim()
                .parse()
                .with_context(|| format!("MULTISEND_CONFIRMATION_TIMEOUT is not a number: {}", timeout))?;
        }
        Ok(config)
    }

    pub fn set_contract(&mut self, raw: &str) -> Result<()> {
        self.contract_address = raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid multisend contract address: {}", raw))?;
        Ok(())
    }

    pub fn network_label(&self) -> &str {
        find_network_by_chain_id(self.chain_id)
            .map(|n| n.label)
            .unwrap_or("Unknown")
    }

    pub fn is_testnet(&self) -> bool {
        find_network_by_chain_id(self.chain_id).map_or(false, |n| n.testnet)
    }

    pub fn native_token(&self) -> &str {
        find_network_by_chain_id(self.chain_id)
            .map(|n| n.native_token)
            .unwrap_or("ETH")
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Option<Duration> {
        (self.confirmation_timeout_secs > 0).then(|| Duration::from_secs(self.confirmation_timeout_secs))
    }

    pub async fn get_provider(&self) -> Result<Arc<Provider<Http>>> {
        let url = Url::parse(&self.rpc_url).with_context(|| format!("Invalid RPC URL: {:?}", self.rpc_url))?;
        let provider = Provider::<Http>::try_from(url.as_str())?
            .interval(self.receipt_poll_interval());
        Ok(Arc::new(provider))
    }
}

impl Default for Config {
    fn default() -> Self {
        match find_network_by_chain_id(BASE_CHAIN_ID) {
            Some(base) => Self::from_network(base),
            None => Self::new("https://mainnet.base.org".to_string(), BASE_CHAIN_ID),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== network table tests ====================

    #[test]
    fn test_find_network_base() {
        let network = find_network_by_chain_id(8453).unwrap();
        assert_eq!(network.label, "Base");
        assert_eq!(network.native_token, "ETH");
        assert!(!network.testnet);
    }

    #[test]
    fn test_find_network_base_sepolia() {
        assert!(find_network_by_chain_id(84532).unwrap().testnet);
    }

    #[test]
    fn test_find_network_not_found() {
        assert!(find_network_by_chain_id(1).is_none());
    }

    // ==================== explorer tests ====================

    #[test]
    fn test_tx_explorer_url() {
        assert_eq!(
            get_tx_explorer_url(8453, "0xabc"),
            Some("https://basescan.org/tx/0xabc".to_string())
        );
        assert_eq!(get_tx_explorer_url(999, "0xabc"), None);
    }

    #[test]
    fn test_address_explorer_url() {
        assert_eq!(
            get_address_explorer_url(84532, "0xdef"),
            Some("https://sepolia.basescan.org/address/0xdef".to_string())
        );
    }

    // ==================== gas tests ====================

    #[test]
    fn test_chain_supports_eip1559() {
        assert!(chain_supports_eip1559(8453));
        assert!(chain_supports_eip1559(84532));
        assert!(!chain_supports_eip1559(31337));
    }

    #[test]
    fn test_ledger_derivation_path() {
        assert_eq!(ledger_derivation_path(0), "m/44'/60'/0'/0/0");
        assert_eq!(ledger_derivation_path(3), "m/44'/60'/3'/0/0");
    }

    // ==================== Config tests ====================

    #[test]
    fn test_default_config_targets_base() {
        let config = Config::default();
        assert_eq!(config.chain_id, 8453);
        assert_eq!(config.rpc_url, "https://mainnet.base.org");
        assert_eq!(config.contract_address, DEFAULT_MULTISEND_ADDRESS.parse::<Address>().unwrap());
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.receipt_poll_interval(), Duration::from_millis(500));
        assert_eq!(config.gas_limit_buffer, 10);
        assert_eq!(config.network_label(), "Base");
    }

    #[test]
    fn test_confirmation_timeout_zero_waits_forever() {
        let mut config = Config::default();
        assert_eq!(config.confirmation_timeout(), None);
        config.confirmation_timeout_secs = 90;
        assert_eq!(config.confirmation_timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_sepolia_is_testnet() {
        let sepolia = find_network_by_chain_id(BASE_SEPOLIA_CHAIN_ID).unwrap();
        assert!(Config::from_network(sepolia).is_testnet());
        assert!(!Config::default().is_testnet());
    }

    #[test]
    fn test_set_contract_rejects_garbage() {
        let mut config = Config::default();
        assert!(config.set_contract("not-an-address").is_err());
        config.set_contract(" 0x0000000000000000000000000000000000000001 ").unwrap();
        assert_eq!(config.contract_address, Address::from_low_u64_be(1));
    }

    #[test]
    fn test_unknown_chain_label() {
        let config = Config::new("http://localhost:8545".to_string(), 31337);
        assert_eq!(config.network_label(), "Unknown");
        assert_eq!(config.native_token(), "ETH");
        assert!(!config.is_testnet());
    }

    #[test]
    fn test_get_provider_rejects_bad_url() {
        let config = Config::new("not a url".to_string(), 8453);
        assert!(tokio_test::block_on(config.get_provider()).is_err());
    }
}
