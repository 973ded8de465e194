//! Column codecs for binary key material
//!
//! Every binary column declares how it is written. Reads accept both raw
//! BLOBs and hex TEXT (older snapshots stored hex) and always produce plain
//! bytes.

use rusqlite::types::{Value, ValueRef};
use rusqlite::Row;

use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Blob,
    Hex,
}

#[derive(Debug, Clone, Copy)]
pub struct BinaryColumn {
    pub name: &'static str,
    pub encoding: Encoding,
}

pub const PUBLIC_KEY: BinaryColumn = BinaryColumn {
    name: "public_key",
    encoding: Encoding::Blob,
};

pub const PRIVATE_KEY: BinaryColumn = BinaryColumn {
    name: "private_key",
    encoding: Encoding::Blob,
};

pub const PUBKEY_HASH: BinaryColumn = BinaryColumn {
    name: "pubkey_hash",
    encoding: Encoding::Blob,
};

pub const REDEEM_SCRIPT: BinaryColumn = BinaryColumn {
    name: "redeemScript",
    encoding: Encoding::Hex,
};

impl BinaryColumn {
    /// Encode bytes for writing into this column
    pub fn encode(&self, bytes: &[u8]) -> Value {
        match self.encoding {
            Encoding::Blob => Value::Blob(bytes.to_vec()),
            Encoding::Hex => Value::Text(hex::encode(bytes)),
        }
    }

    /// Decode this column from a row, whatever storage class it came back in
    pub fn decode(&self, row: &Row<'_>) -> Result<Vec<u8>, StorageError> {
        let value = row.get_ref(self.name)?;
        self.decode_value(value)
    }

    fn decode_value(&self, value: ValueRef<'_>) -> Result<Vec<u8>, StorageError> {
        match value {
            ValueRef::Blob(bytes) => Ok(bytes.to_vec()),
            ValueRef::Text(text) => {
                let text = std::str::from_utf8(text).map_err(|e| self.invalid(e.to_string()))?;
                let text = text.trim();
                let text = text.strip_prefix("0x").unwrap_or(text);
                hex::decode(text).map_err(|e| self.invalid(e.to_string()))
            }
            ValueRef::Null => Err(self.invalid("unexpected NULL".to_string())),
            other => Err(self.invalid(format!("unexpected type {:?}", other.data_type()))),
        }
    }

    fn invalid(&self, reason: String) -> StorageError {
        StorageError::InvalidColumn {
            column: self.name.to_string(),
            reason,
        }
    }
}
