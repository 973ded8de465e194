//! BCH signature hashing (SIGHASH_FORKID, BIP143 layout)

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::Transaction;

use super::token::write_compact_size;
use crate::error::LedgerError;

/// The output being spent by an input
#[derive(Debug, Clone)]
pub struct SpentOutput {
    pub value: u64,
    /// Token prefix of the spent output, empty when it carries no token
    pub token_prefix: Vec<u8>,
}

/// Digest signed for `input_index` under SIGHASH_ALL-style `hashtype`
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    spent: &SpentOutput,
    hashtype: u8,
) -> Result<[u8; 32], LedgerError> {
    let input = tx.input.get(input_index).ok_or_else(|| {
        LedgerError::Transaction(format!("input {} out of range", input_index))
    })?;

    let mut prevouts = Vec::with_capacity(tx.input.len() * 36);
    let mut sequences = Vec::with_capacity(tx.input.len() * 4);
    for txin in &tx.input {
        prevouts.extend_from_slice(&serialize(&txin.previous_output));
        sequences.extend_from_slice(&txin.sequence.0.to_le_bytes());
    }
    let mut outputs = Vec::new();
    for txout in &tx.output {
        outputs.extend_from_slice(&serialize(txout));
    }

    let mut preimage = Vec::with_capacity(160 + script_code.len() + spent.token_prefix.len());
    preimage.extend_from_slice(&tx.version.0.to_le_bytes());
    preimage.extend_from_slice(&sha256d::Hash::hash(&prevouts).to_byte_array());
    preimage.extend_from_slice(&sha256d::Hash::hash(&sequences).to_byte_array());
    preimage.extend_from_slice(&serialize(&input.previous_output));
    preimage.extend_from_slice(&spent.token_prefix);
    write_compact_size(&mut preimage, script_code.len() as u64);
    preimage.extend_from_slice(script_code);
    preimage.extend_from_slice(&spent.value.to_le_bytes());
    preimage.extend_from_slice(&input.sequence.0.to_le_bytes());
    preimage.extend_from_slice(&sha256d::Hash::hash(&outputs).to_byte_array());
    preimage.extend_from_slice(&tx.lock_time.to_consensus_u32().to_le_bytes());
    preimage.extend_from_slice(&(hashtype as u32).to_le_bytes());

    Ok(sha256d::Hash::hash(&preimage).to_byte_array())
}

/// DER signature with the hashtype byte appended
pub fn sign_input(
    secp: &Secp256k1<All>,
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    spent: &SpentOutput,
    secret_key: &SecretKey,
    hashtype: u8,
) -> Result<Vec<u8>, LedgerError> {
    let digest = signature_hash(tx, input_index, script_code, spent, hashtype)?;
    let signature = secp.sign_ecdsa(&Message::from_digest(digest), secret_key);

    let mut bytes = signature.serialize_der().to_vec();
    bytes.push(hashtype);
    Ok(bytes)
}
