//! Remote chain view
//!
//! The ledger only needs three things from an indexer: the outputs an
//! address currently holds, its balance, and a way to publish a raw
//! transaction.

mod esplora;
mod memory;

pub use esplora::EsploraProvider;
pub use memory::MemoryProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::utxo::TokenData;

/// An unspent output as reported by the remote source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUtxo {
    pub tx_hash: String,
    pub tx_pos: u32,
    pub value: u64,
    /// 0 while unconfirmed
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenData>,
}

#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn get_utxos(&self, address: &str) -> Result<Vec<RemoteUtxo>, LedgerError>;

    async fn get_balance(&self, address: &str) -> Result<u64, LedgerError> {
        let utxos = self.get_utxos(address).await?;
        Ok(utxos.iter().map(|u| u.value).sum())
    }

    /// Publish a raw transaction, returning its txid
    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String, LedgerError>;
}
