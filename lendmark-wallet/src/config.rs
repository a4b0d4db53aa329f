//! Wallet configuration.
//!
//! Loaded from `~/.lendmark-wallet/config.toml` (or `--config`), then
//! overridden by `LENDMARK_*` environment variables.

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{ledger::LedgerConfig, network::Network, record::DEFAULT_CONFLICT_RETRIES};

/// Wallet configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Ledger network to use
    #[serde(default)]
    pub network: Network,

    /// Override the network's default RPC endpoint
    pub rpc_url: Option<String>,

    /// Override the network's default faucet
    pub faucet_url: Option<String>,

    /// Marketplace backend base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Bearer token for the backend
    #[serde(default, skip_serializing)]
    pub api_token: Option<String>,

    /// Origin the wallet is served from; its host is the passkey RP id
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Relying-party display name
    #[serde(default = "default_rp_name")]
    pub rp_name: String,

    /// Directory for seeds, device key and passkeys
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Delete-and-recreate rounds after a record conflict
    #[serde(default = "default_conflict_retries")]
    pub max_conflict_retries: u32,

    /// Per-request ledger timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long to wait for a transaction to validate, in seconds
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,

    /// Passkey ceremony timeout in seconds
    #[serde(default = "default_ceremony_timeout")]
    pub ceremony_timeout_secs: u64,

    /// Seals the remote seed backup when set
    #[serde(default, skip_serializing)]
    pub backup_passphrase: Option<String>,
}

fn default_api_base() -> String {
    "https://api.lendmark.io/v1".to_string()
}

fn default_origin() -> String {
    "https://app.lendmark.io".to_string()
}

fn default_rp_name() -> String {
    "Lendmark".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lendmark-wallet")
}

fn default_conflict_retries() -> u32 {
    DEFAULT_CONFLICT_RETRIES
}

fn default_request_timeout() -> u64 {
    30
}

fn default_submit_timeout() -> u64 {
    90
}

fn default_ceremony_timeout() -> u64 {
    60
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            rpc_url: None,
            faucet_url: None,
            api_base: default_api_base(),
            api_token: None,
            origin: default_origin(),
            rp_name: default_rp_name(),
            data_dir: default_data_dir(),
            max_conflict_retries: default_conflict_retries(),
            request_timeout_secs: default_request_timeout(),
            submit_timeout_secs: default_submit_timeout(),
            ceremony_timeout_secs: default_ceremony_timeout(),
            backup_passphrase: None,
        }
    }
}

impl fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletConfig")
            .field("network", &self.network)
            .field("rpc_url", &self.rpc_url)
            .field("faucet_url", &self.faucet_url)
            .field("api_base", &self.api_base)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("origin", &self.origin)
            .field("data_dir", &self.data_dir)
            .field("max_conflict_retries", &self.max_conflict_retries)
            .field("backup_passphrase", &self.backup_passphrase.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl WalletConfig {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        default_data_dir().join("config.toml")
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: WalletConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` (or the default location if it exists), apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `LENDMARK_*` overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(network) = lookup("LENDMARK_NETWORK") {
            self.network = network.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        }
        if let Some(api_base) = lookup("LENDMARK_API_BASE") {
            self.api_base = api_base;
        }
        if let Some(token) = lookup("LENDMARK_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(origin) = lookup("LENDMARK_ORIGIN") {
            self.origin = origin;
        }
        if let Some(passphrase) = lookup("LENDMARK_BACKUP_PASSPHRASE") {
            self.backup_passphrase = Some(passphrase).filter(|p| !p.is_empty());
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_base.trim().is_empty() {
            anyhow::bail!("api_base must not be empty");
        }
        url::Url::parse(&self.api_base)
            .map_err(|e| anyhow::anyhow!("api_base is not a valid URL: {}", e))?;

        let origin = url::Url::parse(&self.origin)
            .map_err(|e| anyhow::anyhow!("origin is not a valid URL: {}", e))?;
        if origin.host_str().is_none() {
            anyhow::bail!("origin must have a host (it becomes the passkey RP id)");
        }

        for (name, value) in [("rpc_url", &self.rpc_url), ("faucet_url", &self.faucet_url)] {
            if let Some(value) = value {
                if value.trim().is_empty() {
                    anyhow::bail!("{} must not be empty when set", name);
                }
            }
        }

        if self.max_conflict_retries == 0 {
            anyhow::bail!("max_conflict_retries must be at least 1");
        }
        if self.request_timeout_secs == 0 || self.ceremony_timeout_secs == 0 {
            anyhow::bail!("timeouts must be greater than zero");
        }

        if self.network.is_production() && self.faucet_url.is_some() {
            tracing::warn!("faucet_url is ignored on {}", self.network);
        }

        Ok(())
    }

    /// Ledger client settings for the selected network
    pub fn ledger_config(&self) -> LedgerConfig {
        let mut config = LedgerConfig::for_network(self.network);
        if let Some(rpc_url) = &self.rpc_url {
            config.rpc_url = rpc_url.clone();
        }
        if let Some(faucet_url) = &self.faucet_url {
            config.faucet_url = Some(faucet_url.clone());
        }
        config.request_timeout = Duration::from_secs(self.request_timeout_secs);
        config.submit_timeout = Duration::from_secs(self.submit_timeout_secs);
        config
    }

    pub fn ceremony_timeout(&self) -> Duration {
        Duration::from_secs(self.ceremony_timeout_secs)
    }

    /// Directory holding sealed seeds and the device key
    pub fn seed_dir(&self) -> PathBuf {
        self.data_dir.join("seeds")
    }

    /// Local authenticator credential file
    pub fn passkey_path(&self) -> PathBuf {
        self.data_dir.join("passkeys.json")
    }
}
