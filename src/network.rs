//! Network parameters

use bitcoin::NetworkKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Chipnet,
    Testnet,
    Regtest,
}

impl Network {
    /// CashAddr human-readable prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            Network::Mainnet => "bitcoincash",
            Network::Chipnet | Network::Testnet => "bchtest",
            Network::Regtest => "bchreg",
        }
    }

    /// BIP44 coin type: 145 on mainnet, 1 on every test network
    pub fn coin_type(&self) -> u32 {
        match self {
            Network::Mainnet => 145,
            _ => 1,
        }
    }

    pub fn kind(&self) -> NetworkKind {
        match self {
            Network::Mainnet => NetworkKind::Main,
            _ => NetworkKind::Test,
        }
    }

    /// Derivation path for a key at the given account/change/index
    pub fn derivation_path(&self, account: u32, change: u32, index: u32) -> String {
        format!(
            "m/44'/{}'/{}'/{}/{}",
            self.coin_type(),
            account,
            change,
            index
        )
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Chipnet => "chipnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        f.write_str(name)
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "bitcoincash" => Ok(Network::Mainnet),
            "chipnet" => Ok(Network::Chipnet),
            "testnet" | "testnet4" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}
