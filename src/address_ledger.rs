//! Address bookkeeping for derived keys

use rusqlite::{params, Connection, Row};
use std::sync::Arc;

use crate::error::LedgerError;
use crate::keys::{KeyRecord, KEY_COLUMNS};
use crate::store::LedgerStore;

/// Address entry to register for a freshly derived key
#[derive(Debug, Clone)]
pub struct NewAddress {
    pub wallet_id: i64,
    pub address: String,
    pub hd_index: u32,
    pub change_index: u32,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    pub wallet_id: i64,
    pub address: String,
    pub balance: u64,
    pub hd_index: u32,
    pub change_index: u32,
    pub prefix: String,
}

impl AddressRecord {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            wallet_id: row.get("wallet_id")?,
            address: row.get("address")?,
            balance: row.get::<_, i64>("balance")? as u64,
            hd_index: row.get("hd_index")?,
            change_index: row.get("change_index")?,
            prefix: row.get("prefix")?,
        })
    }
}

#[derive(Clone)]
pub struct AddressLedger {
    store: Arc<LedgerStore>,
}

impl AddressLedger {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    /// Register an address with zero balance
    pub fn register_address(&self, record: &NewAddress) -> Result<(), LedgerError> {
        self.store
            .with_transaction(|tx| Self::register_address_in(tx, record))
    }

    /// Register inside a caller-owned transaction
    pub(crate) fn register_address_in(
        conn: &Connection,
        record: &NewAddress,
    ) -> Result<(), LedgerError> {
        conn.execute(
            "INSERT INTO addresses (wallet_id, address, balance, hd_index, change_index, prefix)
             VALUES (?1, ?2, 0, ?3, ?4, ?5)
             ON CONFLICT (wallet_id, address) DO NOTHING",
            params![
                record.wallet_id,
                record.address,
                record.hd_index,
                record.change_index,
                record.prefix,
            ],
        )?;
        log::debug!("Registered address {}", record.address);
        Ok(())
    }

    /// All keys of a wallet in insertion order, binary columns decoded
    pub fn retrieve_keys(&self, wallet_id: i64) -> Result<Vec<KeyRecord>, LedgerError> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM keys WHERE wallet_id = ?1 ORDER BY id",
                KEY_COLUMNS
            ))?;
            let mut rows = stmt.query([wallet_id])?;
            let mut keys = Vec::new();
            while let Some(row) = rows.next()? {
                keys.push(KeyRecord::from_row(row)?);
            }
            Ok(keys)
        })
    }

    pub fn list_addresses(&self, wallet_id: i64) -> Result<Vec<AddressRecord>, LedgerError> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT wallet_id, address, balance, hd_index, change_index, prefix
                 FROM addresses WHERE wallet_id = ?1 ORDER BY change_index, hd_index",
            )?;
            let addresses = stmt
                .query_map([wallet_id], AddressRecord::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(addresses)
        })
    }

    pub fn set_balance(&self, wallet_id: i64, address: &str, balance: u64) -> Result<(), LedgerError> {
        self.store
            .with_transaction(|tx| set_balance_in(tx, wallet_id, address, balance))
    }
}

pub(crate) fn set_balance_in(
    conn: &Connection,
    wallet_id: i64,
    address: &str,
    balance: u64,
) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE addresses SET balance = ?1 WHERE wallet_id = ?2 AND address = ?3",
        params![balance as i64, wallet_id, address],
    )?;
    Ok(())
}
