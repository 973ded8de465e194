//! Key management
//!
//! - CashAddr codec
//! - HD derivation and wallet records (KeyVault)

pub mod cashaddr;
pub mod vault;

pub use cashaddr::{AddressKind, DecodedAddress};
pub use vault::{derive_keys, KeyMaterial, KeyVault, WalletRecord};

use bitcoin::secp256k1::SecretKey;
use rusqlite::Row;

use crate::error::{LedgerError, StorageError};
use crate::store::{PRIVATE_KEY, PUBKEY_HASH, PUBLIC_KEY};

/// Persisted derived key
#[derive(Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub id: i64,
    pub wallet_id: i64,
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
    pub address: String,
    pub token_address: String,
    pub pubkey_hash: Vec<u8>,
    pub account_index: u32,
    pub change_index: u32,
    pub address_index: u32,
}

pub(crate) const KEY_COLUMNS: &str = "id, wallet_id, public_key, private_key, address, \
     token_address, pubkey_hash, account_index, change_index, address_index";

impl KeyRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, StorageError> {
        Ok(Self {
            id: row.get("id")?,
            wallet_id: row.get("wallet_id")?,
            public_key: PUBLIC_KEY.decode(row)?,
            private_key: PRIVATE_KEY.decode(row)?,
            address: row.get("address")?,
            token_address: row.get("token_address")?,
            pubkey_hash: PUBKEY_HASH.decode(row)?,
            account_index: row.get("account_index")?,
            change_index: row.get("change_index")?,
            address_index: row.get("address_index")?,
        })
    }

    pub fn secret_key(&self) -> Result<SecretKey, LedgerError> {
        SecretKey::from_slice(&self.private_key)
            .map_err(|e| LedgerError::Derivation(format!("stored key for {}: {}", self.address, e)))
    }

    /// Whether this key controls `address` in either encoding
    pub fn owns(&self, address: &str) -> bool {
        self.address == address || self.token_address == address
    }
}

impl std::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRecord")
            .field("id", &self.id)
            .field("wallet_id", &self.wallet_id)
            .field("address", &self.address)
            .field("public_key", &hex::encode(&self.public_key))
            .field("account_index", &self.account_index)
            .field("change_index", &self.change_index)
            .field("address_index", &self.address_index)
            .finish_non_exhaustive()
    }
}
