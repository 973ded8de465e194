//! Handling of external signing requests
//!
//! A relayed request either asks for a message signature by one of the
//! wallet's addresses or for a partially built transaction to be signed.

use bitcoin::consensus::{deserialize, serialize};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sign_message::{signed_msg_hash, MessageSignature};
use bitcoin::{ScriptBuf, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::contracts::script::push_data;
use crate::contracts::unlock::SIGHASH_ALL_FORKID;
use crate::error::LedgerError;
use crate::keys::cashaddr::{self, AddressKind};
use crate::keys::KeyVault;
use crate::network::Network;
use crate::provider::ChainProvider;
use crate::transaction::token::split_prefix;
use crate::transaction::{sign_input, SpentOutput};

/// The output an input of the request spends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceOutput {
    pub value: u64,
    /// Hex locking bytecode, including any token prefix
    pub locking_bytecode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionRequest {
    /// Hex serialized unsigned (or partially signed) transaction
    pub transaction: String,
    pub source_outputs: Vec<SourceOutput>,
    #[serde(default)]
    pub broadcast: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub signed_transaction: String,
    pub signed_transaction_hash: String,
}

pub struct RequestSigner {
    vault: KeyVault,
    provider: Arc<dyn ChainProvider>,
    network: Network,
}

impl RequestSigner {
    pub fn new(vault: KeyVault, provider: Arc<dyn ChainProvider>, network: Network) -> Self {
        Self {
            vault,
            provider,
            network,
        }
    }

    /// Bitcoin Signed Message signature, base64 compact recoverable
    pub fn sign_message(&self, address: &str, message: &str) -> Result<String, LedgerError> {
        let key = self
            .vault
            .key_for_address(address)?
            .ok_or_else(|| LedgerError::UnknownOwner(address.to_string()))?;

        let secp = Secp256k1::new();
        let digest = signed_msg_hash(message);
        let msg = Message::from_digest(digest.to_byte_array());
        let signature = secp.sign_ecdsa_recoverable(&msg, &key.secret_key()?);

        log::info!("✍️  Signed message with {}", key.address);
        Ok(MessageSignature::new(signature, true).to_base64())
    }

    /// Sign every input spending a P2PKH output of a wallet key.
    ///
    /// Other inputs keep whatever unlocking bytecode they arrived with.
    pub async fn sign_transaction(
        &self,
        request: &SignTransactionRequest,
    ) -> Result<SignedTransaction, LedgerError> {
        let bytes = hex::decode(request.transaction.trim())
            .map_err(|e| LedgerError::Transaction(format!("transaction hex: {}", e)))?;
        let mut tx: Transaction = deserialize(&bytes)
            .map_err(|e| LedgerError::Transaction(format!("transaction decode: {}", e)))?;

        if request.source_outputs.len() != tx.input.len() {
            return Err(LedgerError::ArgumentCount {
                contract: "source outputs".into(),
                expected: tx.input.len(),
                got: request.source_outputs.len(),
            });
        }

        let secp = Secp256k1::new();
        let mut script_sigs = Vec::with_capacity(tx.input.len());
        for (index, source) in request.source_outputs.iter().enumerate() {
            let script = hex::decode(&source.locking_bytecode)
                .map_err(|e| LedgerError::Transaction(format!("locking bytecode: {}", e)))?;
            let (_, locking) = split_prefix(&script)?;

            let Some(pubkey_hash) = p2pkh_hash(locking) else {
                script_sigs.push(None);
                continue;
            };
            let address = cashaddr::encode(self.network.prefix(), AddressKind::P2pkh, pubkey_hash)?;
            let Some(key) = self.vault.key_for_address(&address)? else {
                log::debug!("Input {} spends {} which is not ours", index, address);
                script_sigs.push(None);
                continue;
            };

            let spent = SpentOutput {
                value: source.value,
                token_prefix: script[..script.len() - locking.len()].to_vec(),
            };
            let signature = sign_input(
                &secp,
                &tx,
                index,
                locking,
                &spent,
                &key.secret_key()?,
                SIGHASH_ALL_FORKID,
            )?;
            let mut script_sig = Vec::with_capacity(107);
            push_data(&mut script_sig, &signature);
            push_data(&mut script_sig, &key.public_key);
            script_sigs.push(Some(script_sig));
        }

        let signed = script_sigs.iter().filter(|s| s.is_some()).count();
        for (input, script_sig) in tx.input.iter_mut().zip(script_sigs) {
            if let Some(script_sig) = script_sig {
                input.script_sig = ScriptBuf::from_bytes(script_sig);
            }
        }

        let signed_transaction = hex::encode(serialize(&tx));
        let signed_transaction_hash = tx.compute_txid().to_string();
        log::info!(
            "✍️  Signed {} of {} inputs of {}",
            signed,
            tx.input.len(),
            signed_transaction_hash
        );

        if request.broadcast {
            self.provider.broadcast(&signed_transaction).await?;
        }

        Ok(SignedTransaction {
            signed_transaction,
            signed_transaction_hash,
        })
    }
}

fn p2pkh_hash(locking: &[u8]) -> Option<&[u8]> {
    match locking {
        [0x76, 0xa9, 0x14, hash @ .., 0x88, 0xac] if hash.len() == 20 => Some(hash),
        _ => None,
    }
}
