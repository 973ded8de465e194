use bip39::Mnemonic;
use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::hashes::{hash160, Hash};
use bitcoin::key::rand;
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use super::cashaddr::{self, AddressKind};
use super::{KeyRecord, KEY_COLUMNS};
use crate::address_ledger::{AddressLedger, NewAddress};
use crate::error::{LedgerError, StorageError};
use crate::network::Network;
use crate::store::{LedgerStore, PRIVATE_KEY, PUBKEY_HASH, PUBLIC_KEY};

/// Everything derived from one seed + passphrase + path
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub private_key: [u8; 32],
    pub public_key: Vec<u8>,
    pub pubkey_hash: Vec<u8>,
    pub address: String,
    pub token_address: String,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public_key", &hex::encode(&self.public_key))
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Derive key material for `path` from a BIP39 mnemonic and passphrase.
///
/// Pure: the same inputs always produce the same keys and addresses.
pub fn derive_keys(
    mnemonic: &str,
    passphrase: &str,
    path: &str,
    network: Network,
) -> Result<KeyMaterial, LedgerError> {
    let mnemonic =
        Mnemonic::parse(mnemonic).map_err(|e| LedgerError::InvalidMnemonic(e.to_string()))?;
    let seed = mnemonic.to_seed(passphrase);
    let secp = Secp256k1::new();

    let master = Xpriv::new_master(network.kind(), &seed)
        .map_err(|e| LedgerError::Derivation(e.to_string()))?;
    let derivation_path = DerivationPath::from_str(path)
        .map_err(|e| LedgerError::Derivation(format!("{}: {}", path, e)))?;
    let child = master
        .derive_priv(&secp, &derivation_path)
        .map_err(|e| LedgerError::Derivation(format!("{}: {}", path, e)))?;

    let public_key = PublicKey::from_secret_key(&secp, &child.private_key)
        .serialize()
        .to_vec();
    let pubkey_hash = hash160::Hash::hash(&public_key).to_byte_array().to_vec();

    let address = cashaddr::encode(network.prefix(), AddressKind::P2pkh, &pubkey_hash)?;
    let token_address =
        cashaddr::encode(network.prefix(), AddressKind::P2pkhWithTokens, &pubkey_hash)?;

    Ok(KeyMaterial {
        private_key: child.private_key.secret_bytes(),
        public_key,
        pubkey_hash,
        address,
        token_address,
    })
}

#[derive(Debug, Clone)]
pub struct WalletRecord {
    pub id: i64,
    pub name: String,
    pub mnemonic: String,
    pub passphrase: String,
    pub balance: u64,
    pub is_active: bool,
    pub created_at: String,
}

impl WalletRecord {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("wallet_name")?,
            mnemonic: row.get("mnemonic")?,
            passphrase: row.get("passphrase")?,
            balance: row.get::<_, i64>("balance")? as u64,
            is_active: row.get::<_, i64>("is_active")? != 0,
            created_at: row.get("created_at")?,
        })
    }
}

const WALLET_COLUMNS: &str = "id, wallet_name, mnemonic, passphrase, balance, is_active, created_at";

/// HD key vault: wallet seeds and the keys derived from them
#[derive(Clone)]
pub struct KeyVault {
    store: Arc<LedgerStore>,
    network: Network,
}

impl KeyVault {
    pub fn new(store: Arc<LedgerStore>, network: Network) -> Self {
        Self { store, network }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Derive keys with this vault's network
    pub fn derive_keys(
        &self,
        mnemonic: &str,
        passphrase: &str,
        path: &str,
    ) -> Result<KeyMaterial, LedgerError> {
        derive_keys(mnemonic, passphrase, path, self.network)
    }

    /// Create a wallet with a fresh 12-word mnemonic and make it active
    pub fn create_wallet(&self, name: &str) -> Result<WalletRecord, LedgerError> {
        let entropy = rand::random::<[u8; 16]>();
        let mnemonic = Mnemonic::from_entropy(&entropy)
            .map_err(|e| LedgerError::InvalidMnemonic(e.to_string()))?;
        self.import_wallet(name, &mnemonic.to_string(), "")
    }

    /// Import a wallet from an existing mnemonic and make it active
    pub fn import_wallet(
        &self,
        name: &str,
        mnemonic: &str,
        passphrase: &str,
    ) -> Result<WalletRecord, LedgerError> {
        let parsed =
            Mnemonic::parse(mnemonic).map_err(|e| LedgerError::InvalidMnemonic(e.to_string()))?;
        let words = parsed.to_string();

        let id = self.store.with_transaction(|tx| {
            tx.execute("UPDATE wallets SET is_active = 0", [])?;
            let inserted = tx.execute(
                "INSERT INTO wallets (wallet_name, mnemonic, passphrase, balance, is_active, created_at)
                 VALUES (?1, ?2, ?3, 0, 1, ?4)",
                params![name, words, passphrase, Utc::now().to_rfc3339()],
            );
            match inserted {
                Ok(_) => Ok(tx.last_insert_rowid()),
                Err(e) if is_constraint_violation(&e) => {
                    Err(LedgerError::WalletExists(name.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })?;

        log::info!("Wallet '{}' imported with id {}", name, id);
        self.get_wallet(id)
    }

    pub fn get_wallet(&self, wallet_id: i64) -> Result<WalletRecord, LedgerError> {
        self.store.read(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM wallets WHERE id = ?1", WALLET_COLUMNS),
                [wallet_id],
                WalletRecord::from_row,
            )
            .optional()?
            .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.to_string()))
        })
    }

    pub fn list_wallets(&self) -> Result<Vec<WalletRecord>, LedgerError> {
        self.store.read(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM wallets ORDER BY id", WALLET_COLUMNS))?;
            let wallets = stmt
                .query_map([], WalletRecord::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(wallets)
        })
    }

    pub fn active_wallet(&self) -> Result<WalletRecord, LedgerError> {
        self.store.read(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM wallets WHERE is_active = 1", WALLET_COLUMNS),
                [],
                WalletRecord::from_row,
            )
            .optional()?
            .ok_or_else(|| LedgerError::WalletNotFound("no active wallet".to_string()))
        })
    }

    pub fn set_active(&self, wallet_id: i64) -> Result<(), LedgerError> {
        self.store.with_transaction(|tx| {
            tx.execute("UPDATE wallets SET is_active = 0", [])?;
            let updated = tx.execute("UPDATE wallets SET is_active = 1 WHERE id = ?1", [wallet_id])?;
            if updated == 0 {
                return Err(LedgerError::WalletNotFound(wallet_id.to_string()));
            }
            Ok(())
        })
    }

    /// Delete a wallet together with its keys, addresses and UTXOs
    pub fn remove_wallet(&self, wallet_id: i64) -> Result<(), LedgerError> {
        self.store.with_transaction(|tx| {
            let deleted = tx.execute("DELETE FROM wallets WHERE id = ?1", [wallet_id])?;
            if deleted == 0 {
                return Err(LedgerError::WalletNotFound(wallet_id.to_string()));
            }
            Ok(())
        })?;
        log::warn!("Wallet {} removed with all owned records", wallet_id);
        Ok(())
    }

    /// Derive and persist `count` new receiving keys for (account 0, change 0).
    ///
    /// Starts after the highest stored index; addresses already present are
    /// skipped. Each key is inserted together with its address-ledger entry
    /// in a single store transaction.
    pub fn generate_batch(&self, wallet_id: i64, count: u32) -> Result<Vec<KeyRecord>, LedgerError> {
        const ACCOUNT: u32 = 0;
        const CHANGE: u32 = 0;

        let wallet = self.get_wallet(wallet_id)?;

        let (next_index, known): (u32, HashSet<String>) = self.store.read(|conn| {
            let max: Option<u32> = conn.query_row(
                "SELECT MAX(address_index) FROM keys
                 WHERE wallet_id = ?1 AND account_index = ?2 AND change_index = ?3",
                params![wallet_id, ACCOUNT, CHANGE],
                |row| row.get(0),
            )?;
            let mut stmt = conn.prepare("SELECT address FROM keys WHERE wallet_id = ?1")?;
            let known = stmt
                .query_map([wallet_id], |row| row.get::<_, String>(0))?
                .collect::<Result<HashSet<_>, _>>()?;
            Ok((max.map(|m| m + 1).unwrap_or(0), known))
        })?;

        let mut pending = Vec::with_capacity(count as usize);
        let mut index = next_index;
        while pending.len() < count as usize {
            let path = self.network.derivation_path(ACCOUNT, CHANGE, index);
            let material = self.derive_keys(&wallet.mnemonic, &wallet.passphrase, &path)?;
            if known.contains(&material.address) {
                log::debug!("Skipping already known address {}", material.address);
            } else {
                pending.push((index, material));
            }
            index = index
                .checked_add(1)
                .ok_or_else(|| LedgerError::Derivation("address index overflow".into()))?;
        }

        let prefix = self.network.prefix().to_string();
        let records = self.store.with_transaction(|tx| {
            let mut records = Vec::with_capacity(pending.len());
            for (index, material) in &pending {
                let record = insert_key(tx, wallet_id, material, ACCOUNT, CHANGE, *index)?;
                AddressLedger::register_address_in(
                    tx,
                    &NewAddress {
                        wallet_id,
                        address: record.address.clone(),
                        hd_index: *index,
                        change_index: CHANGE,
                        prefix: prefix.clone(),
                    },
                )?;
                records.push(record);
            }
            Ok(records)
        })?;

        log::info!(
            "Generated {} keys for wallet {} starting at index {}",
            records.len(),
            wallet_id,
            next_index
        );
        Ok(records)
    }

    /// Find the wallet key controlling `address` (plain or token-aware form)
    pub fn key_for_address(&self, address: &str) -> Result<Option<KeyRecord>, LedgerError> {
        self.store.read(|conn| key_for_address(conn, address))
    }

    /// Like [`key_for_address`](Self::key_for_address), restricted to one wallet
    pub fn wallet_key_for_address(
        &self,
        wallet_id: i64,
        address: &str,
    ) -> Result<Option<KeyRecord>, LedgerError> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM keys WHERE wallet_id = ?1 AND (address = ?2 OR token_address = ?2)",
                KEY_COLUMNS
            ))?;
            let mut rows = stmt.query(params![wallet_id, address])?;
            match rows.next()? {
                Some(row) => Ok(Some(KeyRecord::from_row(row)?)),
                None => Ok(None),
            }
        })
    }

    /// First receiving key of a wallet, used for change
    pub fn primary_key(&self, wallet_id: i64) -> Result<KeyRecord, LedgerError> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM keys WHERE wallet_id = ?1 ORDER BY account_index, change_index, address_index LIMIT 1",
                KEY_COLUMNS
            ))?;
            let mut rows = stmt.query([wallet_id])?;
            match rows.next()? {
                Some(row) => Ok(KeyRecord::from_row(row)?),
                None => Err(LedgerError::WalletNotFound(format!(
                    "wallet {} has no derived keys",
                    wallet_id
                ))),
            }
        })
    }
}

pub(crate) fn key_for_address(
    conn: &Connection,
    address: &str,
) -> Result<Option<KeyRecord>, LedgerError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM keys WHERE address = ?1 OR token_address = ?1 LIMIT 1",
        KEY_COLUMNS
    ))?;
    let mut rows = stmt.query([address])?;
    match rows.next()? {
        Some(row) => Ok(Some(KeyRecord::from_row(row)?)),
        None => Ok(None),
    }
}

fn insert_key(
    conn: &Connection,
    wallet_id: i64,
    material: &KeyMaterial,
    account: u32,
    change: u32,
    index: u32,
) -> Result<KeyRecord, LedgerError> {
    let inserted = conn.execute(
        "INSERT INTO keys (wallet_id, public_key, private_key, address, token_address,
                           pubkey_hash, account_index, change_index, address_index)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            wallet_id,
            PUBLIC_KEY.encode(&material.public_key),
            PRIVATE_KEY.encode(&material.private_key),
            material.address,
            material.token_address,
            PUBKEY_HASH.encode(&material.pubkey_hash),
            account,
            change,
            index,
        ],
    );

    match inserted {
        Ok(_) => Ok(KeyRecord {
            id: conn.last_insert_rowid(),
            wallet_id,
            public_key: material.public_key.clone(),
            private_key: material.private_key.to_vec(),
            address: material.address.clone(),
            token_address: material.token_address.clone(),
            pubkey_hash: material.pubkey_hash.clone(),
            account_index: account,
            change_index: change,
            address_index: index,
        }),
        Err(e) if is_constraint_violation(&e) => Err(LedgerError::DuplicateKey {
            wallet_id,
            address: material.address.clone(),
        }),
        Err(e) => Err(LedgerError::Persistence(StorageError::Sqlite(e))),
    }
}

pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
