use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const SETTINGS_FILE: &str = "settings.json";

/// Which signer the CLI uses when no flag says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerKind {
    Local,
    Ledger,
}

impl Default for SignerKind {
    fn default() -> Self {
        SignerKind::Local
    }
}

impl FromStr for SignerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "key" | "private-key" => Ok(SignerKind::Local),
            "ledger" => Ok(SignerKind::Ledger),
            other => Err(format!("unknown signer {:?} (expected local or ledger)", other)),
        }
    }
}

impl fmt::Display for SignerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignerKind::Local => write!(f, "local"),
            SignerKind::Ledger => write!(f, "ledger"),
        }
    }
}

/// User settings that persist between sessions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSettings {
    /// Custom RPC overrides per chain ID
    #[serde(default)]
    pub custom_rpcs: HashMap<u64, String>,
    #[serde(default)]
    pub default_signer: SignerKind,
    /// Account index used in the Ledger derivation path
    #[serde(default)]
    pub ledger_index: u32,
    /// Decimals forced for token batches (None = read from the token)
    #[serde(default)]
    pub default_token_decimals: Option<u8>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            custom_rpcs: HashMap::new(),
            default_signer: SignerKind::default(),
            ledger_index: 0,
            default_token_decimals: None,
        }
    }
}

impl UserSettings {
    fn settings_path(data_dir: &Path) -> PathBuf {
        data_dir.join(SETTINGS_FILE)
    }

    /// Load settings from `data_dir`, or return defaults if missing or unreadable
    pub fn load_from(data_dir: &Path) -> Self {
        let path = Self::settings_path(data_dir);
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(settings) => {
                        tracing::info!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse settings file: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read settings file: {}", e);
                }
            }
        }
        tracing::debug!("Using default settings");
        Self::default()
    }

    pub fn save_to(&self, data_dir: &Path) -> Result<()> {
        fs::create_dir_all(data_dir)?;
        let path = Self::settings_path(data_dir);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        tracing::info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Get custom RPC for a chain, or None if using default
    pub fn get_custom_rpc(&self, chain_id: u64) -> Option<&String> {
        self.custom_rpcs.get(&chain_id).filter(|s| !s.is_empty())
    }

    /// Set custom RPC for a chain (empty string removes the override)
    pub fn set_custom_rpc(&mut self, chain_id: u64, rpc: String) {
        if rpc.trim().is_empty() {
            self.custom_rpcs.remove(&chain_id);
        } else {
            self.custom_rpcs.insert(chain_id, rpc.trim().to_string());
        }
    }

    pub fn uses_ledger(&self) -> bool {
        self.default_signer == SignerKind::Ledger
    }
}
