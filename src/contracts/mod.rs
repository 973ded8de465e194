//! CashScript contracts
//!
//! - Artifact model (`artifact`)
//! - Script assembly and pushes (`script`)
//! - Typed constructor and function arguments (`args`)
//! - Spending predicates and resolved unlockers (`unlock`)
//! - Persistence of artifacts and instances (`store`)

pub mod args;
pub mod artifact;
pub mod script;
pub mod store;
pub mod unlock;

pub use args::ContractArg;
pub use artifact::{AbiFunction, AbiInput, Artifact, CompilerInfo};
pub use store::{ContractInstance, ContractStore};
pub use unlock::{
    ContractUnlocker, FunctionInputs, SignatureTemplate, UnlockArg, UnlockPredicate,
};

use bitcoin::hashes::{hash160, sha256d, Hash};
use std::fmt;
use std::str::FromStr;

use crate::keys::cashaddr::{self, AddressKind};
use crate::error::LedgerError;

/// Script-hash flavour used for contract addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressType {
    /// OP_HASH256 over the redeem script
    #[default]
    P2sh32,
    /// OP_HASH160 over the redeem script
    P2sh20,
}

impl AddressType {
    pub fn script_hash(&self, redeem_script: &[u8]) -> Vec<u8> {
        match self {
            AddressType::P2sh32 => sha256d::Hash::hash(redeem_script).to_byte_array().to_vec(),
            AddressType::P2sh20 => hash160::Hash::hash(redeem_script).to_byte_array().to_vec(),
        }
    }

    /// Infer the flavour from a decoded script hash length
    pub fn from_hash_len(len: usize) -> Option<Self> {
        match len {
            32 => Some(AddressType::P2sh32),
            20 => Some(AddressType::P2sh20),
            _ => None,
        }
    }
}

impl FromStr for AddressType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "p2sh32" => Ok(AddressType::P2sh32),
            "p2sh20" | "p2sh" => Ok(AddressType::P2sh20),
            other => Err(format!("Unknown contract address type '{}'", other)),
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressType::P2sh32 => write!(f, "p2sh32"),
            AddressType::P2sh20 => write!(f, "p2sh20"),
        }
    }
}

/// Plain and token-aware addresses of a redeem script
pub fn contract_addresses(
    prefix: &str,
    address_type: AddressType,
    redeem_script: &[u8],
) -> Result<(String, String), LedgerError> {
    let hash = address_type.script_hash(redeem_script);
    let address = cashaddr::encode(prefix, AddressKind::P2sh, &hash)?;
    let token_address = cashaddr::encode(prefix, AddressKind::P2shWithTokens, &hash)?;
    Ok((address, token_address))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_type_parsing() {
        assert_eq!("P2SH32".parse::<AddressType>().unwrap(), AddressType::P2sh32);
        assert_eq!("p2sh20".parse::<AddressType>().unwrap(), AddressType::P2sh20);
        assert!("p2wsh".parse::<AddressType>().is_err());
    }

    #[test]
    fn test_contract_address_lengths() {
        let script = [0x51u8, 0x87];
        let (p2sh32, token32) = contract_addresses("bchtest", AddressType::P2sh32, &script).unwrap();
        let (p2sh20, _) = contract_addresses("bchtest", AddressType::P2sh20, &script).unwrap();

        assert!(p2sh32.starts_with("bchtest:p"));
        assert!(token32.starts_with("bchtest:r"));
        assert!(p2sh32.len() > p2sh20.len());

        let decoded = cashaddr::decode(&p2sh32, "bchtest").unwrap();
        assert_eq!(AddressType::from_hash_len(decoded.hash.len()), Some(AddressType::P2sh32));
    }
}
