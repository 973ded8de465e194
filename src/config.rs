/// Ledger configuration from environment variables
///
/// Controls network, indexer endpoint, snapshot location and the
/// fee/sync knobs. Defaults to Chipnet for development safety.

use crate::contracts::AddressType;
use crate::network::Network;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub network: Network,
    /// Esplora-style indexer base URL
    pub provider_url: String,
    /// Where the store snapshot lives; `None` keeps everything in memory
    pub snapshot_path: Option<PathBuf>,
    pub sync_interval: Duration,
    /// Hard ceiling for any fee the assembler will sign
    pub fee_cap_sats: u64,
    pub fee_rate_sat_per_byte: u64,
    pub contract_address_type: AddressType,
    /// Keys derived ahead of use per batch
    pub key_batch_size: u32,
}

impl LedgerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `LEDGER_NETWORK`: "chipnet" (default), "mainnet", "testnet" or "regtest"
    /// - `PROVIDER_URL`: indexer endpoint (optional, has per-network defaults)
    /// - `LEDGER_SNAPSHOT`: snapshot file path (optional)
    /// - `SYNC_INTERVAL_SECS`, `FEE_CAP_SATS`, `FEE_RATE_SAT_PER_BYTE`,
    ///   `CONTRACT_ADDRESS_TYPE` (p2sh32|p2sh20), `KEY_BATCH_SIZE`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let network = match env::var("LEDGER_NETWORK") {
            Ok(value) => value.parse::<Network>().unwrap_or_else(|e| {
                log::warn!("⚠️  {}, defaulting to {}", e, defaults.network);
                defaults.network
            }),
            Err(_) => defaults.network,
        };
        log::info!("🌐 Using {} network", network);

        let provider_url = env::var("PROVIDER_URL").unwrap_or_else(|_| {
            let url = default_provider_url(network).to_string();
            log::info!("📡 Provider URL: {} ({} default)", url, network);
            url
        });

        let snapshot_path = env::var("LEDGER_SNAPSHOT").ok().map(PathBuf::from);
        if let Some(ref path) = snapshot_path {
            log::info!("💾 Snapshot path: {}", path.display());
        }

        let contract_address_type = match env::var("CONTRACT_ADDRESS_TYPE") {
            Ok(value) => value.parse().unwrap_or_else(|e| {
                log::warn!("⚠️  {}, defaulting to p2sh32", e);
                AddressType::P2sh32
            }),
            Err(_) => defaults.contract_address_type,
        };

        Self {
            network,
            provider_url,
            snapshot_path,
            sync_interval: Duration::from_secs(env_u64(
                "SYNC_INTERVAL_SECS",
                defaults.sync_interval.as_secs(),
            )),
            fee_cap_sats: env_u64("FEE_CAP_SATS", defaults.fee_cap_sats),
            fee_rate_sat_per_byte: env_u64("FEE_RATE_SAT_PER_BYTE", defaults.fee_rate_sat_per_byte),
            contract_address_type,
            key_batch_size: env_u64("KEY_BATCH_SIZE", defaults.key_batch_size as u64) as u32,
        }
    }

    /// In-memory configuration for tests and embedding
    pub fn in_memory(network: Network) -> Self {
        Self {
            network,
            provider_url: default_provider_url(network).to_string(),
            ..Default::default()
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            network: Network::Chipnet,
            provider_url: default_provider_url(Network::Chipnet).to_string(),
            snapshot_path: None,
            sync_interval: Duration::from_secs(30),
            fee_cap_sats: 10_000,
            fee_rate_sat_per_byte: 1,
            contract_address_type: AddressType::P2sh32,
            key_batch_size: 20,
        }
    }
}

fn default_provider_url(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "https://bch.indexer.example/api",
        Network::Chipnet | Network::Testnet => "https://chipnet.indexer.example/api",
        Network::Regtest => "http://localhost:3000",
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            log::warn!("⚠️  Ignoring non-numeric {}={}", key, value);
            default
        }),
        Err(_) => default,
    }
}
