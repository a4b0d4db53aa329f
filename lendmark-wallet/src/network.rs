//! Ledger network selection

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production ledger
    Mainnet,
    /// Primary test network
    #[default]
    Testnet,
    /// Development network
    Devnet,
}

impl Network {
    pub fn is_production(&self) -> bool {
        matches!(self, Network::Mainnet)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Devnet => "devnet",
        }
    }

    /// Default JSON-RPC endpoint
    pub fn rpc_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://ledger.lendmark.io:51234",
            Network::Testnet => "https://ledger.testnet.lendmark.io:51234",
            Network::Devnet => "https://ledger.devnet.lendmark.io:51234",
        }
    }

    pub fn explorer_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://explorer.lendmark.io",
            Network::Testnet => "https://explorer.testnet.lendmark.io",
            Network::Devnet => "https://explorer.devnet.lendmark.io",
        }
    }

    /// Faucet base URL. Production has none.
    pub fn faucet_url(&self) -> Option<&'static str> {
        match self {
            Network::Mainnet => None,
            Network::Testnet => Some("https://faucet.testnet.lendmark.io"),
            Network::Devnet => Some("https://faucet.devnet.lendmark.io"),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "production" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "devnet" => Ok(Network::Devnet),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("testnet".parse::<Network>().unwrap(), Network::Testnet);
        assert_eq!("Production".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!(" devnet ".parse::<Network>().unwrap(), Network::Devnet);
        assert!("regtest".parse::<Network>().is_err());
    }

    #[test]
    fn test_faucet_only_off_production() {
        assert!(Network::Mainnet.faucet_url().is_none());
        assert!(Network::Testnet.faucet_url().is_some());
        assert!(Network::Devnet.faucet_url().is_some());
        assert!(Network::Mainnet.is_production());
    }

    #[test]
    fn test_endpoints_are_distinct() {
        let all = [Network::Mainnet, Network::Testnet, Network::Devnet];
        for a in all {
            for b in all {
                if a != b {
                    assert_ne!(a.rpc_url(), b.rpc_url());
                    assert_ne!(a.explorer_url(), b.explorer_url());
                }
            }
        }
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Network::Devnet).unwrap(), "\"devnet\"");
    }
}
