//! Composition root
//!
//! Owns the configuration and the chain provider, and wires every component
//! around one shared store handle the first time `ensure_started` runs.

use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::address_ledger::AddressLedger;
use crate::config::LedgerConfig;
use crate::contracts::ContractStore;
use crate::error::{LedgerError, StorageError};
use crate::keys::KeyVault;
use crate::provider::{ChainProvider, EsploraProvider};
use crate::signing::RequestSigner;
use crate::store::LedgerStore;
use crate::sync::SyncService;
use crate::transaction::TransactionAssembler;
use crate::utxo::{ReconcileReport, UtxoIndex};

/// Started components, all sharing one store
pub struct LedgerHandle {
    pub store: Arc<LedgerStore>,
    pub vault: KeyVault,
    pub addresses: AddressLedger,
    pub utxos: UtxoIndex,
    pub contracts: ContractStore,
    pub assembler: TransactionAssembler,
    pub signer: RequestSigner,
    pub sync: Arc<SyncService>,
}

impl LedgerHandle {
    /// Reconcile every registered address of a wallet
    pub async fn reconcile_wallet(&self, wallet_id: i64) -> Result<ReconcileReport, LedgerError> {
        let addresses: Vec<String> = self
            .addresses
            .list_addresses(wallet_id)?
            .into_iter()
            .map(|a| a.address)
            .collect();
        self.utxos.reconcile(wallet_id, &addresses).await
    }
}

pub struct Ledger {
    config: LedgerConfig,
    provider: Arc<dyn ChainProvider>,
    handle: OnceCell<LedgerHandle>,
}

impl Ledger {
    pub fn new(config: LedgerConfig, provider: Arc<dyn ChainProvider>) -> Self {
        Self {
            config,
            provider,
            handle: OnceCell::new(),
        }
    }

    /// Ledger backed by the configured Esplora-style indexer
    pub fn from_config(config: LedgerConfig) -> Self {
        let provider = Arc::new(EsploraProvider::new(config.provider_url.clone()));
        Self::new(config, provider)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Open the store and wire components on first call; later calls
    /// return the same handle.
    pub async fn ensure_started(&self) -> Result<&LedgerHandle, LedgerError> {
        self.handle.get_or_try_init(|| self.start()).await
    }

    async fn start(&self) -> Result<LedgerHandle, LedgerError> {
        let path = self.config.snapshot_path.clone();
        let store = tokio::task::spawn_blocking(move || LedgerStore::open(path))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        let store = Arc::new(store);

        let network = self.config.network;
        let vault = KeyVault::new(store.clone(), network);
        let addresses = AddressLedger::new(store.clone());
        let utxos = UtxoIndex::new(store.clone(), self.provider.clone(), network);
        let contracts = ContractStore::new(
            store.clone(),
            self.provider.clone(),
            network,
            self.config.contract_address_type,
        );
        let assembler = TransactionAssembler::new(
            store.clone(),
            vault.clone(),
            utxos.clone(),
            contracts.clone(),
            self.provider.clone(),
            network,
            self.config.fee_rate_sat_per_byte,
            self.config.fee_cap_sats,
        );
        let signer = RequestSigner::new(vault.clone(), self.provider.clone(), network);
        let sync = Arc::new(SyncService::new(
            vault.clone(),
            addresses.clone(),
            utxos.clone(),
            contracts.clone(),
        ));

        log::info!(
            "🚀 Ledger started on {} ({})",
            network,
            match store.snapshot_path() {
                Some(path) => path.display().to_string(),
                None => "in-memory".to_string(),
            }
        );

        Ok(LedgerHandle {
            store,
            vault,
            addresses,
            utxos,
            contracts,
            assembler,
            signer,
            sync,
        })
    }
}
