//! Periodic reconciliation
//!
//! Re-runs full reconciliation on a fixed interval: every wallet's
//! addresses first, then every known contract instance. Runs may overlap
//! with caller-initiated reconciliation; both are idempotent.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::address_ledger::AddressLedger;
use crate::contracts::ContractStore;
use crate::error::LedgerError;
use crate::keys::KeyVault;
use crate::utxo::{ReconcileReport, UtxoIndex};

#[derive(Debug, Default)]
pub struct SyncSummary {
    pub wallets: Vec<(i64, ReconcileReport)>,
    pub contracts_refreshed: usize,
    pub contract_failures: Vec<(String, LedgerError)>,
}

pub struct SyncService {
    vault: KeyVault,
    addresses: AddressLedger,
    utxos: UtxoIndex,
    contracts: ContractStore,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SyncService {
    pub fn new(
        vault: KeyVault,
        addresses: AddressLedger,
        utxos: UtxoIndex,
        contracts: ContractStore,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            vault,
            addresses,
            utxos,
            contracts,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// One full pass. Wallet store failures abort the pass; a contract that
    /// fails to refresh is recorded in the summary and the rest still run.
    pub async fn run_once(&self) -> Result<SyncSummary, LedgerError> {
        let mut summary = SyncSummary::default();

        for wallet in self.vault.list_wallets()? {
            let addresses: Vec<String> = self
                .addresses
                .list_addresses(wallet.id)?
                .into_iter()
                .map(|a| a.address)
                .collect();
            if addresses.is_empty() {
                continue;
            }
            let report = self.utxos.reconcile(wallet.id, &addresses).await?;
            summary.wallets.push((wallet.id, report));
        }

        for instance in self.contracts.list_instances()? {
            match self.contracts.update_contract_utxos(&instance.address).await {
                Ok(_) => summary.contracts_refreshed += 1,
                Err(e) => {
                    log::warn!("⚠️  Contract {} refresh failed: {}", instance.address, e);
                    summary.contract_failures.push((instance.address, e));
                }
            }
        }

        Ok(summary)
    }

    /// Run `run_once` every `interval` until `shutdown` is called
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        log::info!("🔄 Starting background sync every {}s", interval.as_secs());

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut shutdown_rx = self.shutdown_rx.clone();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.run_once().await {
                            Ok(summary) => log::debug!(
                                "Sync pass done: {} wallets, {} contracts",
                                summary.wallets.len(),
                                summary.contracts_refreshed
                            ),
                            Err(e) => log::error!("Sync pass failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        log::info!("Background sync shutting down");
                        break;
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::AddressType;
    use crate::network::Network;
    use crate::provider::{MemoryProvider, RemoteUtxo};
    use crate::store::LedgerStore;

    const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn service() -> (Arc<SyncService>, KeyVault, Arc<MemoryProvider>) {
        let store = Arc::new(LedgerStore::in_memory().unwrap());
        let provider = Arc::new(MemoryProvider::new());
        let vault = KeyVault::new(store.clone(), Network::Chipnet);
        let service = SyncService::new(
            vault.clone(),
            AddressLedger::new(store.clone()),
            UtxoIndex::new(store.clone(), provider.clone(), Network::Chipnet),
            ContractStore::new(store, provider.clone(), Network::Chipnet, AddressType::P2sh32),
        );
        (Arc::new(service), vault, provider)
    }

    #[tokio::test]
    async fn test_run_once_reconciles_every_wallet() {
        let (service, vault, provider) = service();
        let wallet = vault.import_wallet("main", MNEMONIC, "").unwrap();
        let key = vault.generate_batch(wallet.id, 1).unwrap().remove(0);
        provider.set_utxos(
            &key.address,
            vec![RemoteUtxo {
                tx_hash: "aa".into(),
                tx_pos: 0,
                value: 1234,
                height: 1,
                token: None,
            }],
        );

        let summary = service.run_once().await.unwrap();
        assert_eq!(summary.wallets.len(), 1);
        assert_eq!(summary.wallets[0].1.balance, 1234);
        assert_eq!(vault.get_wallet(wallet.id).unwrap().balance, 1234);
    }

    #[tokio::test]
    async fn test_spawned_task_stops_on_shutdown() {
        let (service, _, _) = service();
        let handle = service.clone().spawn(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        service.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sync task did not stop")
            .unwrap();
    }
}
