use async_trait::async_trait;
use bitcoin::consensus::deserialize;
use bitcoin::Transaction;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{ChainProvider, RemoteUtxo};
use crate::error::LedgerError;

#[derive(Default)]
struct State {
    utxos: HashMap<String, Vec<RemoteUtxo>>,
    failing: HashSet<String>,
    broadcasts: Vec<String>,
}

/// In-process chain view for tests and regtest fixtures
#[derive(Default)]
pub struct MemoryProvider {
    state: Mutex<State>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the outputs reported for `address`
    pub fn set_utxos(&self, address: &str, utxos: Vec<RemoteUtxo>) {
        self.lock().utxos.insert(address.to_string(), utxos);
    }

    /// Make every lookup of `address` fail with a network error
    pub fn fail_address(&self, address: &str) {
        self.lock().failing.insert(address.to_string());
    }

    pub fn heal_address(&self, address: &str) {
        self.lock().failing.remove(address);
    }

    /// Raw transactions received through `broadcast`, oldest first
    pub fn broadcasts(&self) -> Vec<String> {
        self.lock().broadcasts.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChainProvider for MemoryProvider {
    async fn get_utxos(&self, address: &str) -> Result<Vec<RemoteUtxo>, LedgerError> {
        let state = self.lock();
        if state.failing.contains(address) {
            return Err(LedgerError::Network(format!("{} unreachable", address)));
        }
        Ok(state.utxos.get(address).cloned().unwrap_or_default())
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String, LedgerError> {
        let bytes = hex::decode(raw_tx_hex)
            .map_err(|e| LedgerError::Network(format!("rejected transaction: {}", e)))?;
        let tx: Transaction = deserialize(&bytes)
            .map_err(|e| LedgerError::Network(format!("rejected transaction: {}", e)))?;
        self.lock().broadcasts.push(raw_tx_hex.to_string());
        Ok(tx.compute_txid().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utxo(tx_hash: &str, value: u64) -> RemoteUtxo {
        RemoteUtxo {
            tx_hash: tx_hash.to_string(),
            tx_pos: 0,
            value,
            height: 100,
            token: None,
        }
    }

    #[tokio::test]
    async fn test_reports_configured_utxos_and_balance() {
        let provider = MemoryProvider::new();
        provider.set_utxos("addr", vec![utxo("aa", 10), utxo("bb", 20)]);

        assert_eq!(provider.get_utxos("addr").await.unwrap().len(), 2);
        assert_eq!(provider.get_balance("addr").await.unwrap(), 30);
        assert!(provider.get_utxos("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let provider = MemoryProvider::new();
        provider.fail_address("addr");
        let err = provider.get_utxos("addr").await.unwrap_err();
        assert!(err.is_retryable());

        provider.heal_address("addr");
        assert!(provider.get_utxos("addr").await.is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_rejects_garbage() {
        let provider = MemoryProvider::new();
        assert!(provider.broadcast("00ff").await.is_err());
        assert!(provider.broadcasts().is_empty());
    }
}
