/// Common test utilities for ledger integration tests
///
/// Provides a started ledger over an in-memory chain provider plus a few
/// helpers for seeding remote outputs.
use async_trait::async_trait;
use std::sync::Arc;

use cashledger::keys::cashaddr::{self, AddressKind};
use cashledger::{
    ChainProvider, Ledger, LedgerConfig, LedgerError, MemoryProvider, Network, RemoteUtxo,
};

pub const MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// Single-function contract paying to a public key hash
pub const P2PKH_ARTIFACT: &str = r#"{
    "contractName": "P2PKH",
    "constructorInputs": [{"name": "pkh", "type": "bytes20"}],
    "abi": [
        {"name": "spend", "inputs": [
            {"name": "pk", "type": "pubkey"},
            {"name": "s", "type": "sig"}
        ]}
    ],
    "bytecode": "OP_OVER OP_HASH160 OP_EQUALVERIFY OP_CHECKSIG",
    "source": "contract P2PKH(bytes20 pkh) { function spend(pubkey pk, sig s) { require(hash160(pk) == pkh); require(checkSig(s, pk)); } }",
    "compiler": {"name": "cashc", "version": "0.8.0"},
    "updatedAt": "2023-01-01T00:00:00.000Z"
}"#;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Hands control back to the scheduler before every remote call, so
/// concurrent callers interleave at the fetch
pub struct YieldingProvider {
    inner: Arc<MemoryProvider>,
}

#[async_trait]
impl ChainProvider for YieldingProvider {
    async fn get_utxos(&self, address: &str) -> Result<Vec<RemoteUtxo>, LedgerError> {
        tokio::task::yield_now().await;
        self.inner.get_utxos(address).await
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String, LedgerError> {
        tokio::task::yield_now().await;
        self.inner.broadcast(raw_tx_hex).await
    }
}

/// Test environment with an in-memory chain
pub struct TestEnvironment {
    pub ledger: Ledger,
    pub provider: Arc<MemoryProvider>,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::in_memory(Network::Chipnet))
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        init_logger();
        let provider = Arc::new(MemoryProvider::new());
        let ledger = Ledger::new(config, provider.clone());
        Self { ledger, provider }
    }

    /// Ledger whose provider yields before answering
    pub fn yielding() -> Self {
        init_logger();
        let provider = Arc::new(MemoryProvider::new());
        let ledger = Ledger::new(
            LedgerConfig::in_memory(Network::Chipnet),
            Arc::new(YieldingProvider {
                inner: provider.clone(),
            }),
        );
        Self { ledger, provider }
    }
}

/// Pad a short test id into a parseable 32-byte txid
pub fn txid(short: &str) -> String {
    format!("{:0>64}", short)
}

pub fn remote(short_txid: &str, tx_pos: u32, value: u64) -> RemoteUtxo {
    RemoteUtxo {
        tx_hash: txid(short_txid),
        tx_pos,
        value,
        height: 100,
        token: None,
    }
}

/// A chipnet P2PKH address nobody in the test owns
pub fn foreign_address(fill: u8) -> String {
    cashaddr::encode(Network::Chipnet.prefix(), AddressKind::P2pkh, &[fill; 20]).unwrap()
}
