use futures::future::join_all;
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::sync::Arc;

use super::{Utxo, UtxoKey, UtxoOwner};
use crate::address_ledger::set_balance_in;
use crate::error::LedgerError;
use crate::network::Network;
use crate::provider::{ChainProvider, RemoteUtxo};
use crate::store::LedgerStore;

pub(crate) const UTXO_COLUMNS: &str = "wallet_id, contract_address, address, height, tx_hash, \
     tx_pos, amount, token_data, prefix, contractFunction, contractFunctionInputs";

/// A per-address fetch that failed during reconciliation
#[derive(Debug)]
pub struct FetchFailure {
    pub address: String,
    pub error: LedgerError,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub added: usize,
    pub removed: usize,
    /// Wallet (or contract) balance after the pass
    pub balance: u64,
    pub failures: Vec<FetchFailure>,
}

impl ReconcileReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of diffing one address
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct AddressDiff {
    pub added: usize,
    pub removed: usize,
    pub balance: u64,
}

/// Local mirror of spendable outputs
#[derive(Clone)]
pub struct UtxoIndex {
    store: Arc<LedgerStore>,
    provider: Arc<dyn ChainProvider>,
    network: Network,
}

impl UtxoIndex {
    pub fn new(store: Arc<LedgerStore>, provider: Arc<dyn ChainProvider>, network: Network) -> Self {
        Self {
            store,
            provider,
            network,
        }
    }

    /// Bring the stored outputs of `addresses` in line with the remote view.
    ///
    /// Addresses whose fetch fails keep their local state and are listed in
    /// the report. Everything fetched is applied in one store transaction.
    pub async fn reconcile(
        &self,
        wallet_id: i64,
        addresses: &[String],
    ) -> Result<ReconcileReport, LedgerError> {
        let fetched = fetch_all(self.provider.as_ref(), addresses).await;

        let mut report = ReconcileReport::default();
        let mut succeeded = Vec::with_capacity(fetched.len());
        for (address, result) in fetched {
            match result {
                Ok(remote) => succeeded.push((address, remote)),
                Err(error) => {
                    log::warn!("⚠️  UTXO fetch failed for {}: {}", address, error);
                    report.failures.push(FetchFailure { address, error });
                }
            }
        }

        let owner = UtxoOwner::Wallet(wallet_id);
        let prefix = self.network.prefix();
        let (added, removed, balance) = self.store.with_transaction_async(|tx| {
            let mut added = 0;
            let mut removed = 0;
            for (address, remote) in &succeeded {
                let diff = reconcile_address(tx, &owner, address, prefix, remote)?;
                set_balance_in(tx, wallet_id, address, diff.balance)?;
                added += diff.added;
                removed += diff.removed;
            }
            let balance = wallet_balance(tx, wallet_id)?;
            tx.execute(
                "UPDATE wallets SET balance = ?1 WHERE id = ?2",
                params![balance as i64, wallet_id],
            )?;
            Ok((added, removed, balance))
        })
        .await?;

        report.added = added;
        report.removed = removed;
        report.balance = balance;

        log::info!(
            "🔄 Reconciled wallet {}: +{} -{} UTXOs, balance {} sats ({} failures)",
            wallet_id,
            report.added,
            report.removed,
            report.balance,
            report.failures.len()
        );
        Ok(report)
    }

    /// All outputs owned by a wallet, oldest first
    pub fn list(&self, wallet_id: i64) -> Result<Vec<Utxo>, LedgerError> {
        self.query(
            &format!(
                "SELECT {} FROM UTXOs WHERE wallet_id = ?1 AND contract_address IS NULL ORDER BY id",
                UTXO_COLUMNS
            ),
            params![wallet_id],
        )
    }

    pub fn list_for_address(&self, address: &str) -> Result<Vec<Utxo>, LedgerError> {
        self.query(
            &format!("SELECT {} FROM UTXOs WHERE address = ?1 ORDER BY id", UTXO_COLUMNS),
            params![address],
        )
    }

    pub fn balance(&self, wallet_id: i64) -> Result<u64, LedgerError> {
        self.store.read(|conn| wallet_balance(conn, wallet_id))
    }

    fn query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Utxo>, LedgerError> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query(params)?;
            let mut utxos = Vec::new();
            while let Some(row) = rows.next()? {
                utxos.push(Utxo::from_row(row)?);
            }
            Ok(utxos)
        })
    }
}

/// Fetch every address concurrently, keeping results in input order
pub(crate) async fn fetch_all(
    provider: &dyn ChainProvider,
    addresses: &[String],
) -> Vec<(String, Result<Vec<RemoteUtxo>, LedgerError>)> {
    let requests = addresses.iter().map(|address| async move {
        (address.clone(), provider.get_utxos(address).await)
    });
    join_all(requests).await
}

/// Diff one address against the remote list by (tx_hash, tx_pos) and apply
/// the inserts and deletes. The caller owns the transaction.
pub(crate) fn reconcile_address(
    conn: &Connection,
    owner: &UtxoOwner,
    address: &str,
    prefix: &str,
    remote: &[RemoteUtxo],
) -> Result<AddressDiff, LedgerError> {
    let local: HashSet<UtxoKey> = {
        let mut stmt = conn.prepare("SELECT tx_hash, tx_pos FROM UTXOs WHERE address = ?1")?;
        let keys = stmt
            .query_map([address], |row| {
                Ok(UtxoKey {
                    tx_hash: row.get(0)?,
                    tx_pos: row.get(1)?,
                })
            })?
            .collect::<Result<HashSet<_>, _>>()?;
        keys
    };

    let remote_keys: HashSet<UtxoKey> = remote
        .iter()
        .map(|u| UtxoKey {
            tx_hash: u.tx_hash.clone(),
            tx_pos: u.tx_pos,
        })
        .collect();

    let (wallet_id, contract_address) = match owner {
        UtxoOwner::Wallet(id) => (Some(*id), None),
        UtxoOwner::Contract(address) => (None, Some(address.as_str())),
    };

    let mut diff = AddressDiff::default();
    let mut seen = HashSet::with_capacity(remote.len());

    for utxo in remote {
        let key = UtxoKey {
            tx_hash: utxo.tx_hash.clone(),
            tx_pos: utxo.tx_pos,
        };
        // an indexer may repeat an entry; count it once
        if !seen.insert(key.clone()) {
            continue;
        }
        diff.balance += utxo.value;
        if local.contains(&key) {
            continue;
        }

        let token = utxo.token.as_ref().map(serde_json::to_string).transpose()?;
        conn.execute(
            "INSERT INTO UTXOs (wallet_id, contract_address, address, height, tx_hash, tx_pos,
                                amount, token_data, prefix)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                wallet_id,
                contract_address,
                address,
                utxo.height,
                utxo.tx_hash,
                utxo.tx_pos,
                utxo.value as i64,
                token,
                prefix,
            ],
        )?;
        diff.added += 1;
    }

    for stale in local.difference(&remote_keys) {
        conn.execute(
            "DELETE FROM UTXOs WHERE address = ?1 AND tx_hash = ?2 AND tx_pos = ?3",
            params![address, stale.tx_hash, stale.tx_pos],
        )?;
        diff.removed += 1;
    }

    if diff.added > 0 || diff.removed > 0 {
        log::debug!(
            "{}: +{} -{} UTXOs, {} sats",
            address,
            diff.added,
            diff.removed,
            diff.balance
        );
    }
    Ok(diff)
}

fn wallet_balance(conn: &Connection, wallet_id: i64) -> Result<u64, LedgerError> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM UTXOs WHERE wallet_id = ?1 AND contract_address IS NULL",
        [wallet_id],
        |row| row.get(0),
    )?;
    Ok(total as u64)
}
