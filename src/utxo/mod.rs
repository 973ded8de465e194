//! UTXO model and local index

mod index;

pub use index::{FetchFailure, ReconcileReport, UtxoIndex};
pub(crate) use index::{reconcile_address, UTXO_COLUMNS};

use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::contracts::FunctionInputs;
use crate::error::{LedgerError, StorageError};

/// NFT capability of a CashToken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    None,
    Mutable,
    Minting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nft {
    pub capability: Capability,
    /// Hex-encoded commitment, empty for none
    #[serde(default)]
    pub commitment: String,
}

/// CashToken payload attached to an output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    /// Token category id (hex, display byte order)
    pub category: String,
    #[serde(default, with = "amount_string")]
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nft: Option<Nft>,
}

/// Fungible amounts travel as decimal strings in indexer JSON; numbers are accepted too
mod amount_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&amount.to_string())
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(t) => t.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Natural key of an output
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UtxoKey {
    pub tx_hash: String,
    pub tx_pos: u32,
}

/// Who can spend an output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtxoOwner {
    Wallet(i64),
    Contract(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub wallet_id: Option<i64>,
    pub contract_address: Option<String>,
    pub address: String,
    pub height: u32,
    pub tx_hash: String,
    pub tx_pos: u32,
    pub amount: u64,
    pub token: Option<TokenData>,
    pub prefix: String,
    /// Spending descriptor for contract outputs
    pub contract_function: Option<String>,
    pub contract_function_inputs: Option<FunctionInputs>,
}

impl Utxo {
    pub fn key(&self) -> UtxoKey {
        UtxoKey {
            tx_hash: self.tx_hash.clone(),
            tx_pos: self.tx_pos,
        }
    }

    pub fn owner(&self) -> Result<UtxoOwner, LedgerError> {
        match (self.wallet_id, &self.contract_address) {
            (_, Some(contract)) => Ok(UtxoOwner::Contract(contract.clone())),
            (Some(wallet_id), None) => Ok(UtxoOwner::Wallet(wallet_id)),
            (None, None) => Err(LedgerError::UnknownOwner(self.address.clone())),
        }
    }

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, StorageError> {
        let token: Option<String> = row.get("token_data")?;
        let inputs: Option<String> = row.get("contractFunctionInputs")?;

        Ok(Self {
            wallet_id: row.get("wallet_id")?,
            contract_address: row.get("contract_address")?,
            address: row.get("address")?,
            height: row.get("height")?,
            tx_hash: row.get("tx_hash")?,
            tx_pos: row.get("tx_pos")?,
            amount: row.get::<_, i64>("amount")? as u64,
            token: token.map(|t| serde_json::from_str(&t)).transpose()?,
            prefix: row.get("prefix")?,
            contract_function: row.get("contractFunction")?,
            contract_function_inputs: inputs.map(|i| serde_json::from_str(&i)).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_data_accepts_string_and_number_amounts() {
        let as_string: TokenData =
            serde_json::from_str(r#"{"category": "aa", "amount": "1000"}"#).unwrap();
        let as_number: TokenData =
            serde_json::from_str(r#"{"category": "aa", "amount": 1000}"#).unwrap();
        assert_eq!(as_string, as_number);
        assert_eq!(
            serde_json::to_value(&as_string).unwrap()["amount"],
            serde_json::json!("1000")
        );
    }

    #[test]
    fn test_nft_only_token() {
        let token: TokenData = serde_json::from_str(
            r#"{"category": "bb", "nft": {"capability": "minting", "commitment": "01"}}"#,
        )
        .unwrap();
        assert_eq!(token.amount, 0);
        assert_eq!(token.nft.unwrap().capability, Capability::Minting);
    }

    #[test]
    fn test_owner_prefers_contract() {
        let utxo = Utxo {
            wallet_id: None,
            contract_address: Some("bchtest:p...".into()),
            address: "bchtest:p...".into(),
            height: 0,
            tx_hash: "aa".into(),
            tx_pos: 0,
            amount: 1,
            token: None,
            prefix: "bchtest".into(),
            contract_function: None,
            contract_function_inputs: None,
        };
        assert_eq!(
            utxo.owner().unwrap(),
            UtxoOwner::Contract("bchtest:p...".into())
        );
    }
}
