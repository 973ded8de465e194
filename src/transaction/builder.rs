use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::sighash::{sign_input, SpentOutput};
use super::token::encode_prefix;
use super::{estimate_tx_size, P2PKH_INPUT_SIZE, P2PKH_OUTPUT_SIZE};
use crate::address_ledger::set_balance_in;
use crate::coin_select;
use crate::contracts::script::push_data;
use crate::contracts::store::release_spent_in;
use crate::contracts::unlock::SIGHASH_ALL_FORKID;
use crate::contracts::{ContractStore, ContractUnlocker, FunctionInputs};
use crate::error::LedgerError;
use crate::keys::cashaddr::{self, p2pkh_locking_bytecode};
use crate::keys::{KeyRecord, KeyVault};
use crate::network::Network;
use crate::provider::ChainProvider;
use crate::store::LedgerStore;
use crate::utxo::{TokenData, Utxo, UtxoIndex, UtxoKey, UtxoOwner};

/// Smallest non-token output the network relays
pub const DUST_LIMIT: u64 = 546;

#[derive(Debug, Clone)]
pub struct InputSpec {
    pub utxo: Utxo,
    /// Contract function to call; falls back to the descriptor stored on the UTXO
    pub function: Option<String>,
    pub inputs: Option<FunctionInputs>,
}

impl InputSpec {
    pub fn new(utxo: Utxo) -> Self {
        Self {
            utxo,
            function: None,
            inputs: None,
        }
    }

    pub fn with_function(utxo: Utxo, function: &str, inputs: FunctionInputs) -> Self {
        Self {
            utxo,
            function: Some(function.to_string()),
            inputs: Some(inputs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub to: String,
    pub amount: u64,
    pub token: Option<TokenData>,
}

impl OutputSpec {
    pub fn new(to: impl Into<String>, amount: u64) -> Self {
        Self {
            to: to.into(),
            amount,
            token: None,
        }
    }

    pub fn with_token(to: impl Into<String>, amount: u64, token: TokenData) -> Self {
        Self {
            to: to.into(),
            amount,
            token: Some(token),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
    /// Explicit fee; estimated from size and the configured rate when absent
    pub fee: Option<u64>,
    pub fee_cap: u64,
    pub change_address: Option<String>,
    pub locktime: u32,
    pub broadcast: bool,
}

#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub raw: Vec<u8>,
    pub hex: String,
    pub txid: String,
    pub fee: u64,
    pub size: usize,
    pub change: Option<u64>,
    /// Txid returned by the provider when broadcast was requested
    pub broadcast_txid: Option<String>,
}

enum Unlock {
    P2pkh(KeyRecord),
    Contract(ContractUnlocker),
}

struct ResolvedInput {
    utxo: Utxo,
    outpoint: OutPoint,
    spent: SpentOutput,
    unlock: Unlock,
}

impl ResolvedInput {
    fn estimated_size(&self) -> usize {
        match &self.unlock {
            Unlock::P2pkh(_) => P2PKH_INPUT_SIZE,
            Unlock::Contract(unlocker) => {
                let script = unlocker.estimated_size();
                // outpoint + script length + script + sequence
                36 + compact_size_len(script) + script + 4
            }
        }
    }
}

/// Builds, signs and optionally broadcasts transactions
#[derive(Clone)]
pub struct TransactionAssembler {
    store: Arc<LedgerStore>,
    vault: KeyVault,
    utxos: UtxoIndex,
    contracts: ContractStore,
    provider: Arc<dyn ChainProvider>,
    network: Network,
    fee_rate: u64,
    fee_cap: u64,
}

impl TransactionAssembler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<LedgerStore>,
        vault: KeyVault,
        utxos: UtxoIndex,
        contracts: ContractStore,
        provider: Arc<dyn ChainProvider>,
        network: Network,
        fee_rate: u64,
        fee_cap: u64,
    ) -> Self {
        Self {
            store,
            vault,
            utxos,
            contracts,
            provider,
            network,
            fee_rate,
            fee_cap,
        }
    }

    pub fn default_fee_cap(&self) -> u64 {
        self.fee_cap
    }

    /// Assemble and sign a transaction.
    ///
    /// Every check (ownership, token balance, funds, fee cap) happens before
    /// anything is signed; on error no signed bytes exist.
    pub async fn build_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<BuiltTransaction, LedgerError> {
        if request.inputs.is_empty() {
            return Err(LedgerError::InvalidArgument("transaction has no inputs".into()));
        }
        if request.outputs.is_empty() && request.change_address.is_none() {
            return Err(LedgerError::InvalidArgument("transaction has no outputs".into()));
        }

        let mut seen = HashSet::new();
        for spec in &request.inputs {
            if !seen.insert(spec.utxo.key()) {
                return Err(LedgerError::InvalidArgument(format!(
                    "input {}:{} spent twice",
                    spec.utxo.tx_hash, spec.utxo.tx_pos
                )));
            }
        }

        let resolved = request
            .inputs
            .iter()
            .map(|spec| self.resolve_input(spec))
            .collect::<Result<Vec<_>, _>>()?;

        check_token_balance(&request.inputs, &request.outputs)?;

        let mut outputs = request
            .outputs
            .iter()
            .map(|spec| self.encode_output(spec))
            .collect::<Result<Vec<_>, _>>()?;

        let total_in: u64 = resolved.iter().map(|r| r.utxo.amount).sum();
        let total_out: u64 = request.outputs.iter().map(|o| o.amount).sum();
        if total_out > total_in {
            return Err(LedgerError::InsufficientFunds {
                needed: total_out,
                available: total_in,
            });
        }

        let fee = match request.fee {
            Some(fee) => fee,
            None => {
                let input_sizes: Vec<usize> = resolved.iter().map(|r| r.estimated_size()).collect();
                let mut output_sizes: Vec<usize> =
                    outputs.iter().map(|o| serialize(o).len()).collect();
                if request.change_address.is_some() {
                    output_sizes.push(P2PKH_OUTPUT_SIZE);
                }
                estimate_tx_size(&input_sizes, &output_sizes) as u64 * self.fee_rate
            }
        };

        let remainder = total_in - total_out;
        if remainder < fee {
            return Err(LedgerError::InsufficientFunds {
                needed: total_out + fee,
                available: total_in,
            });
        }

        let mut change = None;
        if let Some(change_address) = &request.change_address {
            let amount = remainder - fee;
            if amount >= DUST_LIMIT {
                outputs.push(self.encode_output(&OutputSpec::new(change_address.clone(), amount))?);
                change = Some(amount);
            } else if amount > 0 {
                log::debug!("Change of {} sats is dust, adding it to the fee", amount);
            }
        }

        let effective_fee = total_in - total_out - change.unwrap_or(0);
        if effective_fee > request.fee_cap {
            log::warn!(
                "⚠️  Refusing to sign: fee {} exceeds cap {}",
                effective_fee,
                request.fee_cap
            );
            return Err(LedgerError::FeeExceeded {
                fee: effective_fee,
                cap: request.fee_cap,
            });
        }

        let sequence = if request.locktime > 0 {
            Sequence::ENABLE_LOCKTIME_NO_RBF
        } else {
            Sequence::MAX
        };
        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::from_consensus(request.locktime),
            input: resolved
                .iter()
                .map(|r| TxIn {
                    previous_output: r.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence,
                    witness: Witness::new(),
                })
                .collect(),
            output: outputs,
        };

        let script_sigs = self.sign_inputs(&tx, &resolved)?;
        for (input, script_sig) in tx.input.iter_mut().zip(script_sigs) {
            input.script_sig = ScriptBuf::from_bytes(script_sig);
        }

        let raw = serialize(&tx);
        let hex = hex::encode(&raw);
        let txid = tx.compute_txid().to_string();

        log::info!(
            "✍️  Signed transaction {} ({} inputs, {} outputs, {} bytes, fee {} sats)",
            txid,
            tx.input.len(),
            tx.output.len(),
            raw.len(),
            effective_fee
        );

        let broadcast_txid = if request.broadcast {
            let accepted = self.provider.broadcast(&hex).await?;
            self.mark_spent(&resolved).await?;
            Some(accepted)
        } else {
            None
        };

        Ok(BuiltTransaction {
            size: raw.len(),
            raw,
            hex,
            txid,
            fee: effective_fee,
            change,
            broadcast_txid,
        })
    }

    /// Pay `recipients` from a wallet's plain outputs, with change to its first address
    pub async fn send_from_wallet(
        &self,
        wallet_id: i64,
        recipients: Vec<OutputSpec>,
        fee: Option<u64>,
        fee_cap: Option<u64>,
        broadcast: bool,
    ) -> Result<BuiltTransaction, LedgerError> {
        if recipients.iter().any(|r| r.token.is_some()) {
            return Err(LedgerError::InvalidArgument(
                "token transfers need explicit inputs".into(),
            ));
        }

        let spendable: Vec<Utxo> = self
            .utxos
            .list(wallet_id)?
            .into_iter()
            .filter(|u| u.token.is_none())
            .collect();
        let target: u64 = recipients.iter().map(|r| r.amount).sum();

        let output_sizes: Vec<usize> = recipients
            .iter()
            .map(|_| P2PKH_OUTPUT_SIZE)
            .chain(std::iter::once(P2PKH_OUTPUT_SIZE))
            .collect();
        let estimate = |inputs: usize| {
            estimate_tx_size(&vec![P2PKH_INPUT_SIZE; inputs], &output_sizes) as u64 * self.fee_rate
        };

        let mut chosen_fee = fee.unwrap_or_else(|| estimate(1));
        let selection = loop {
            let selection = coin_select::select(&spendable, target, chosen_fee)?;
            if fee.is_some() {
                break selection;
            }
            let needed = estimate(selection.chosen.len());
            if needed <= chosen_fee {
                break selection;
            }
            chosen_fee = needed;
        };

        let change_address = self.vault.primary_key(wallet_id)?.address;

        self.build_transaction(TransactionRequest {
            inputs: selection.chosen.into_iter().map(InputSpec::new).collect(),
            outputs: recipients,
            fee: Some(chosen_fee),
            fee_cap: fee_cap.unwrap_or(self.fee_cap),
            change_address: Some(change_address),
            locktime: 0,
            broadcast,
        })
        .await
    }

    fn resolve_input(&self, spec: &InputSpec) -> Result<ResolvedInput, LedgerError> {
        let utxo = &spec.utxo;
        let txid: Txid = utxo
            .tx_hash
            .parse()
            .map_err(|e| LedgerError::Transaction(format!("invalid txid {}: {}", utxo.tx_hash, e)))?;
        let token_prefix = match &utxo.token {
            Some(token) => encode_prefix(token)?,
            None => Vec::new(),
        };

        let unlock = match utxo.owner()? {
            UtxoOwner::Wallet(wallet_id) => {
                // only the wallet owning the output may sign for it
                let key = self
                    .vault
                    .wallet_key_for_address(wallet_id, &utxo.address)?
                    .ok_or_else(|| LedgerError::UnknownOwner(utxo.address.clone()))?;
                Unlock::P2pkh(key)
            }
            UtxoOwner::Contract(_) => {
                let function = spec
                    .function
                    .as_deref()
                    .or(utxo.contract_function.as_deref())
                    .ok_or_else(|| {
                        LedgerError::InvalidArgument(format!(
                            "no spending function for contract output {}:{}",
                            utxo.tx_hash, utxo.tx_pos
                        ))
                    })?;
                let empty = FunctionInputs::new();
                let inputs = spec
                    .inputs
                    .as_ref()
                    .or(utxo.contract_function_inputs.as_ref())
                    .unwrap_or(&empty);
                Unlock::Contract(self.contracts.get_contract_unlock_function(utxo, function, inputs)?)
            }
        };

        Ok(ResolvedInput {
            utxo: utxo.clone(),
            outpoint: OutPoint {
                txid,
                vout: utxo.tx_pos,
            },
            spent: SpentOutput {
                value: utxo.amount,
                token_prefix,
            },
            unlock,
        })
    }

    fn encode_output(&self, spec: &OutputSpec) -> Result<TxOut, LedgerError> {
        let decoded = cashaddr::decode(&spec.to, self.network.prefix())?;
        if decoded.prefix != self.network.prefix() {
            return Err(LedgerError::InvalidAddress(format!(
                "{} is not a {} address",
                spec.to, self.network
            )));
        }
        if spec.amount < DUST_LIMIT {
            return Err(LedgerError::InvalidArgument(format!(
                "output of {} sats to {} is below dust",
                spec.amount, spec.to
            )));
        }

        let mut script = Vec::new();
        if let Some(token) = &spec.token {
            if !decoded.kind.is_token_aware() {
                return Err(LedgerError::InvalidAddress(format!(
                    "{} cannot receive tokens",
                    spec.to
                )));
            }
            script.extend(encode_prefix(token)?);
        }
        script.extend(decoded.locking_bytecode());

        Ok(TxOut {
            value: Amount::from_sat(spec.amount),
            script_pubkey: ScriptBuf::from_bytes(script),
        })
    }

    fn sign_inputs(
        &self,
        tx: &Transaction,
        resolved: &[ResolvedInput],
    ) -> Result<Vec<Vec<u8>>, LedgerError> {
        let secp = Secp256k1::new();
        let mut script_sigs = Vec::with_capacity(resolved.len());

        for (index, input) in resolved.iter().enumerate() {
            let script_sig = match &input.unlock {
                Unlock::P2pkh(key) => {
                    let script_code = p2pkh_locking_bytecode(&key.pubkey_hash);
                    let signature = sign_input(
                        &secp,
                        tx,
                        index,
                        &script_code,
                        &input.spent,
                        &key.secret_key()?,
                        SIGHASH_ALL_FORKID,
                    )?;
                    let mut script_sig = Vec::with_capacity(107);
                    push_data(&mut script_sig, &signature);
                    push_data(&mut script_sig, &key.public_key);
                    script_sig
                }
                Unlock::Contract(unlocker) => unlocker.unlocking_bytecode(|template| {
                    sign_input(
                        &secp,
                        tx,
                        index,
                        &unlocker.redeem_script,
                        &input.spent,
                        &template.secret_key,
                        template.hashtype,
                    )
                })?,
            };
            script_sigs.push(script_sig);
        }
        Ok(script_sigs)
    }

    /// Remove spent inputs locally and refresh every balance that counted them
    async fn mark_spent(&self, resolved: &[ResolvedInput]) -> Result<(), LedgerError> {
        let mut by_contract: BTreeMap<&str, Vec<UtxoKey>> = BTreeMap::new();
        let mut wallet_addresses: BTreeMap<&str, i64> = BTreeMap::new();
        for input in resolved {
            match input.utxo.owner()? {
                UtxoOwner::Contract(_) => {
                    if let Some(contract) = input.utxo.contract_address.as_deref() {
                        by_contract.entry(contract).or_default().push(input.utxo.key());
                    }
                }
                UtxoOwner::Wallet(wallet_id) => {
                    wallet_addresses.insert(input.utxo.address.as_str(), wallet_id);
                }
            }
        }
        let now = Utc::now().to_rfc3339();

        self.store
            .with_transaction_async(|tx| {
                for input in resolved {
                    tx.execute(
                        "DELETE FROM UTXOs WHERE address = ?1 AND tx_hash = ?2 AND tx_pos = ?3",
                        rusqlite::params![input.utxo.address, input.utxo.tx_hash, input.utxo.tx_pos],
                    )?;
                }
                for (address, wallet_id) in &wallet_addresses {
                    let balance: i64 = tx.query_row(
                        "SELECT COALESCE(SUM(amount), 0) FROM UTXOs
                         WHERE address = ?1 AND wallet_id = ?2 AND contract_address IS NULL",
                        rusqlite::params![address, wallet_id],
                        |row| row.get(0),
                    )?;
                    set_balance_in(tx, *wallet_id, address, balance as u64)?;
                }
                for (contract, spent) in &by_contract {
                    release_spent_in(tx, contract, spent, &now)?;
                }
                tx.execute(
                    "UPDATE wallets SET balance = (
                        SELECT COALESCE(SUM(amount), 0) FROM UTXOs
                        WHERE UTXOs.wallet_id = wallets.id AND UTXOs.contract_address IS NULL
                     )",
                    [],
                )?;
                Ok(())
            })
            .await
    }
}

/// Fungible amounts per category may not shrink, nor grow outside a genesis
fn check_token_balance(inputs: &[InputSpec], outputs: &[OutputSpec]) -> Result<(), LedgerError> {
    let mut held: BTreeMap<&str, u64> = BTreeMap::new();
    for spec in inputs {
        if let Some(token) = &spec.utxo.token {
            *held.entry(token.category.as_str()).or_default() += token.amount;
        }
    }
    // spending output 0 of a transaction allows minting that txid as a category
    let genesis: HashSet<&str> = inputs
        .iter()
        .filter(|spec| spec.utxo.tx_pos == 0)
        .map(|spec| spec.utxo.tx_hash.as_str())
        .collect();

    let mut sent: BTreeMap<&str, u64> = BTreeMap::new();
    for spec in outputs {
        if let Some(token) = &spec.token {
            *sent.entry(token.category.as_str()).or_default() += token.amount;
        }
    }

    for (category, amount) in &held {
        let out = sent.get(category).copied().unwrap_or(0);
        if out < *amount {
            return Err(LedgerError::InvalidArgument(format!(
                "transaction would burn {} tokens of category {}",
                amount - out,
                category
            )));
        }
    }
    for (category, amount) in &sent {
        if genesis.contains(category) {
            continue;
        }
        let available = held.get(category).copied();
        match available {
            None => {
                return Err(LedgerError::InvalidArgument(format!(
                    "no input carries token category {}",
                    category
                )))
            }
            Some(available) if *amount > available => {
                return Err(LedgerError::InvalidArgument(format!(
                    "sends {} tokens of category {} but inputs hold {}",
                    amount, category, available
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn compact_size_len(n: usize) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        _ => 5,
    }
}
