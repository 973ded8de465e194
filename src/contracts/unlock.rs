//! Spending predicates
//!
//! What is persisted is symbolic: which function, which ABI inputs and which
//! caller inputs. Keys and encodings are only resolved when spending.

use bitcoin::secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::artifact::AbiInput;
use super::script;
use crate::error::LedgerError;

/// Caller-supplied function inputs by ABI name, in their textual form.
/// A `sig` input names the wallet address whose key signs.
pub type FunctionInputs = BTreeMap<String, String>;

/// How an output can be unlocked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnlockPredicate {
    /// P2PKH spend by a wallet key
    Signature { address: String },
    /// Call of a contract function
    Function {
        name: String,
        inputs: Vec<AbiInput>,
        #[serde(default)]
        covenant: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<usize>,
    },
}

impl UnlockPredicate {
    pub fn function_name(&self) -> Option<&str> {
        match self {
            UnlockPredicate::Function { name, .. } => Some(name),
            UnlockPredicate::Signature { .. } => None,
        }
    }
}

/// SIGHASH_ALL | SIGHASH_FORKID
pub const SIGHASH_ALL_FORKID: u8 = 0x41;

/// A signature to be produced at signing time by a wallet key
#[derive(Clone)]
pub struct SignatureTemplate {
    pub address: String,
    pub secret_key: SecretKey,
    pub hashtype: u8,
}

impl SignatureTemplate {
    pub fn new(address: String, secret_key: SecretKey) -> Self {
        Self {
            address,
            secret_key,
            hashtype: SIGHASH_ALL_FORKID,
        }
    }
}

impl std::fmt::Debug for SignatureTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureTemplate")
            .field("address", &self.address)
            .field("hashtype", &self.hashtype)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum UnlockArg {
    /// Already-encoded stack item
    Value(Vec<u8>),
    Signature(SignatureTemplate),
}

/// A fully resolved contract function call for one input
#[derive(Debug, Clone)]
pub struct ContractUnlocker {
    pub contract: String,
    pub function: String,
    /// In ABI order
    pub args: Vec<UnlockArg>,
    pub selector: Option<usize>,
    pub covenant: bool,
    pub redeem_script: Vec<u8>,
}

impl ContractUnlocker {
    /// Unlocking bytecode: args in reverse order, the selector when the
    /// contract has several functions, then the redeem script.
    ///
    /// `sign` produces the signature bytes for each signature argument.
    pub fn unlocking_bytecode<F>(&self, mut sign: F) -> Result<Vec<u8>, LedgerError>
    where
        F: FnMut(&SignatureTemplate) -> Result<Vec<u8>, LedgerError>,
    {
        let mut bytecode = Vec::new();
        for arg in self.args.iter().rev() {
            match arg {
                UnlockArg::Value(item) => script::push_data(&mut bytecode, item),
                UnlockArg::Signature(template) => {
                    let signature = sign(template)?;
                    script::push_data(&mut bytecode, &signature);
                }
            }
        }
        if let Some(selector) = self.selector {
            script::push_int(&mut bytecode, selector as i128);
        }
        script::push_data(&mut bytecode, &self.redeem_script);
        Ok(bytecode)
    }

    /// Upper bound of the unlocking bytecode size, for fee estimation
    pub fn estimated_size(&self) -> usize {
        let args: usize = self
            .args
            .iter()
            .map(|arg| match arg {
                UnlockArg::Value(item) => item.len() + 3,
                UnlockArg::Signature(_) => 73,
            })
            .sum();
        args + 2 + self.redeem_script.len() + 3
    }
}
