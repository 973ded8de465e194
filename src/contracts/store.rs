//! Persistence of contract artifacts and instances

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;

use super::args::{redeem_script, ContractArg};
use super::artifact::{AbiFunction, Artifact};
use super::unlock::{ContractUnlocker, FunctionInputs, SignatureTemplate, UnlockArg, UnlockPredicate};
use super::{contract_addresses, script, AddressType};
use crate::error::{LedgerError, StorageError};
use crate::keys::cashaddr;
use crate::keys::vault::key_for_address;
use crate::network::Network;
use crate::provider::{ChainProvider, RemoteUtxo};
use crate::store::{LedgerStore, REDEEM_SCRIPT};
use crate::utxo::{reconcile_address, Utxo, UtxoKey, UtxoOwner};

/// A deployed contract: artifact + constructor args at a fixed address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractInstance {
    pub contract_name: String,
    pub address: String,
    pub token_address: String,
    pub opcount: usize,
    pub bytesize: usize,
    pub bytecode: String,
    pub balance: u64,
    pub utxos: Vec<RemoteUtxo>,
    pub artifact: Artifact,
    pub abi: Vec<AbiFunction>,
    pub redeem_script: Vec<u8>,
    pub unlock: Vec<UnlockPredicate>,
    pub created_at: String,
    pub updated_at: String,
}

const INSTANCE_COLUMNS: &str = "contract_name, address, token_address, opcount, bytesize, bytecode, \
     balance, utxos, created_at, updated_at, artifact, abi, redeemScript, unlock";

impl ContractInstance {
    fn from_row(row: &Row<'_>) -> Result<Self, StorageError> {
        let utxos: String = row.get("utxos")?;
        let artifact: String = row.get("artifact")?;
        let abi: String = row.get("abi")?;
        let unlock: String = row.get("unlock")?;

        Ok(Self {
            contract_name: row.get("contract_name")?,
            address: row.get("address")?,
            token_address: row.get("token_address")?,
            opcount: row.get::<_, i64>("opcount")? as usize,
            bytesize: row.get::<_, i64>("bytesize")? as usize,
            bytecode: row.get("bytecode")?,
            balance: row.get::<_, i64>("balance")? as u64,
            utxos: serde_json::from_str(&utxos)?,
            artifact: serde_json::from_str(&artifact)?,
            abi: serde_json::from_str(&abi)?,
            redeem_script: REDEEM_SCRIPT.decode(row)?,
            unlock: serde_json::from_str(&unlock)?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Everything derivable from an artifact and its constructor args
struct Derived {
    args: Vec<ContractArg>,
    redeem_script: Vec<u8>,
    address: String,
    token_address: String,
    opcount: usize,
}

fn derive(
    artifact: &Artifact,
    raw_args: &[String],
    prefix: &str,
    address_type: AddressType,
) -> Result<Derived, LedgerError> {
    if raw_args.len() != artifact.constructor_inputs.len() {
        return Err(LedgerError::ArgumentCount {
            contract: artifact.contract_name.clone(),
            expected: artifact.constructor_inputs.len(),
            got: raw_args.len(),
        });
    }

    let args = artifact
        .constructor_inputs
        .iter()
        .zip(raw_args)
        .map(|(input, value)| ContractArg::parse(&input.kind, value))
        .collect::<Result<Vec<_>, _>>()?;

    let body = script::assemble(&artifact.bytecode)?;
    let redeem_script = redeem_script(&body, &args);
    let (address, token_address) = contract_addresses(prefix, address_type, &redeem_script)?;
    let opcount = script::count_opcodes(&redeem_script)?;

    Ok(Derived {
        args,
        redeem_script,
        address,
        token_address,
        opcount,
    })
}

fn predicates(artifact: &Artifact) -> Vec<UnlockPredicate> {
    artifact
        .abi
        .iter()
        .enumerate()
        .map(|(index, function)| UnlockPredicate::Function {
            name: function.name.clone(),
            inputs: function.inputs.clone(),
            covenant: function.covenant,
            selector: artifact.selector(index),
        })
        .collect()
}

#[derive(Clone)]
pub struct ContractStore {
    store: Arc<LedgerStore>,
    provider: Arc<dyn ChainProvider>,
    network: Network,
    address_type: AddressType,
}

impl ContractStore {
    pub fn new(
        store: Arc<LedgerStore>,
        provider: Arc<dyn ChainProvider>,
        network: Network,
        address_type: AddressType,
    ) -> Self {
        Self {
            store,
            provider,
            network,
            address_type,
        }
    }

    /// Insert or replace an artifact by contract name
    pub fn save_artifact(&self, artifact: &Artifact) -> Result<(), LedgerError> {
        self.store
            .with_transaction(|tx| save_artifact_in(tx, artifact))?;
        log::info!("📄 Saved artifact {}", artifact.contract_name);
        Ok(())
    }

    pub fn get_artifact(&self, contract_name: &str) -> Result<Artifact, LedgerError> {
        self.store.read(|conn| load_artifact(conn, contract_name))
    }

    /// Instantiate `artifact_name` with textual constructor args.
    ///
    /// The address is a pure function of artifact and args; an existing
    /// instance at that address is returned untouched.
    pub async fn create_contract<S: AsRef<str>>(
        &self,
        artifact_name: &str,
        args: &[S],
    ) -> Result<ContractInstance, LedgerError> {
        let artifact = self.get_artifact(artifact_name)?;
        let raw_args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        let derived = derive(&artifact, &raw_args, self.network.prefix(), self.address_type)?;

        if let Some(existing) = self.find_instance(&derived.address)? {
            log::debug!("Contract {} already instantiated", existing.address);
            return Ok(existing);
        }

        let remote = self.provider.get_utxos(&derived.address).await?;
        let stored_args: Vec<String> = derived.args.iter().map(ContractArg::to_stored).collect();
        let now = Utc::now().to_rfc3339();
        let prefix = self.network.prefix();

        // a concurrent create for the same address may have committed while
        // the fetch was pending; the first row wins
        let created = self
            .store
            .with_transaction_async(|tx| {
                let inserted = tx.execute(
                    &format!(
                        "INSERT INTO instantiated_contracts ({}) VALUES \
                         (?1, ?2, ?3, ?4, ?5, ?6, 0, '[]', ?7, ?7, ?8, ?9, ?10, ?11) \
                         ON CONFLICT (address) DO NOTHING",
                        INSTANCE_COLUMNS
                    ),
                    params![
                        artifact.contract_name,
                        derived.address,
                        derived.token_address,
                        derived.opcount as i64,
                        derived.redeem_script.len() as i64,
                        artifact.bytecode,
                        now,
                        serde_json::to_string(&artifact)?,
                        serde_json::to_string(&artifact.abi)?,
                        REDEEM_SCRIPT.encode(&derived.redeem_script),
                        serde_json::to_string(&predicates(&artifact))?,
                    ],
                )?;
                if inserted == 0 {
                    return Ok(false);
                }
                tx.execute(
                    "INSERT INTO cashscript_addresses (address, constructor_args, balance)
                     VALUES (?1, ?2, 0)
                     ON CONFLICT (address) DO NOTHING",
                    params![derived.address, serde_json::to_string(&stored_args)?],
                )?;
                apply_remote(tx, &derived.address, prefix, &remote, &now)?;
                Ok(true)
            })
            .await?;

        if created {
            log::info!(
                "✅ Instantiated {} at {} ({} opcodes, {} bytes)",
                artifact.contract_name,
                derived.address,
                derived.opcount,
                derived.redeem_script.len()
            );
        } else {
            log::debug!("Contract {} instantiated concurrently", derived.address);
        }
        self.get_instance(&derived.address)
    }

    /// Refresh balance and outputs of an instance from the remote source
    pub async fn update_contract_utxos(&self, address: &str) -> Result<ContractInstance, LedgerError> {
        let instance = self.get_instance(address)?;
        let raw_args = self.constructor_args(&instance.address)?;
        // rebuilt from the instance's own artifact copy; a re-saved artifact
        // of the same name only affects new instances
        let artifact = &instance.artifact;

        let decoded = cashaddr::decode(&instance.address, self.network.prefix())?;
        let address_type = AddressType::from_hash_len(decoded.hash.len())
            .ok_or_else(|| LedgerError::InvalidAddress(instance.address.clone()))?;
        let derived = derive(artifact, &raw_args, &decoded.prefix, address_type)?;
        if derived.address != instance.address {
            return Err(LedgerError::InvalidArgument(format!(
                "stored arguments of {} derive {}",
                instance.address, derived.address
            )));
        }

        let remote = self.provider.get_utxos(&instance.address).await?;
        let now = Utc::now().to_rfc3339();
        let prefix = decoded.prefix.clone();
        self.store
            .with_transaction_async(|tx| apply_remote(tx, &instance.address, &prefix, &remote, &now))
            .await?;

        self.get_instance(&instance.address)
    }

    /// Resolve a contract function call for spending `utxo`
    pub fn get_contract_unlock_function(
        &self,
        utxo: &Utxo,
        function_name: &str,
        inputs: &FunctionInputs,
    ) -> Result<ContractUnlocker, LedgerError> {
        let contract_address = utxo
            .contract_address
            .as_deref()
            .ok_or_else(|| LedgerError::UnknownOwner(utxo.address.clone()))?;
        let instance = self.get_instance(contract_address)?;

        let (index, function) = instance.artifact.function(function_name).ok_or_else(|| {
            LedgerError::FunctionNotFound {
                contract: instance.contract_name.clone(),
                function: function_name.to_string(),
            }
        })?;

        if inputs.len() != function.inputs.len() {
            return Err(LedgerError::ArgumentCount {
                contract: format!("{}.{}", instance.contract_name, function.name),
                expected: function.inputs.len(),
                got: inputs.len(),
            });
        }

        let args = self.store.read(|conn| {
            function
                .inputs
                .iter()
                .map(|input| {
                    let value = inputs.get(&input.name).ok_or_else(|| {
                        LedgerError::InvalidArgument(format!(
                            "missing input '{}' for {}",
                            input.name, function.name
                        ))
                    })?;
                    resolve_input(conn, &input.kind, value)
                })
                .collect::<Result<Vec<_>, _>>()
        })?;

        Ok(ContractUnlocker {
            contract: instance.contract_name.clone(),
            function: function.name.clone(),
            args,
            selector: instance.artifact.selector(index),
            covenant: function.covenant,
            redeem_script: instance.redeem_script.clone(),
        })
    }

    /// Attach a spending descriptor to a stored contract output
    pub fn assign_unlock(
        &self,
        utxo: &Utxo,
        function_name: &str,
        inputs: &FunctionInputs,
    ) -> Result<(), LedgerError> {
        let contract_address = utxo
            .contract_address
            .as_deref()
            .ok_or_else(|| LedgerError::UnknownOwner(utxo.address.clone()))?;
        let instance = self.get_instance(contract_address)?;
        let (_, function) = instance.artifact.function(function_name).ok_or_else(|| {
            LedgerError::FunctionNotFound {
                contract: instance.contract_name.clone(),
                function: function_name.to_string(),
            }
        })?;
        if let Some(missing) = function.inputs.iter().find(|i| !inputs.contains_key(&i.name)) {
            return Err(LedgerError::InvalidArgument(format!(
                "missing input '{}' for {}",
                missing.name, function.name
            )));
        }

        let key = utxo.key();
        let inputs_json = serde_json::to_string(inputs)?;
        self.store.with_transaction(|tx| {
            let updated = tx.execute(
                "UPDATE UTXOs SET contractFunction = ?1, contractFunctionInputs = ?2
                 WHERE address = ?3 AND tx_hash = ?4 AND tx_pos = ?5 AND contract_address IS NOT NULL",
                params![function_name, inputs_json, utxo.address, key.tx_hash, key.tx_pos],
            )?;
            if updated == 0 {
                return Err(LedgerError::InvalidArgument(format!(
                    "no stored contract output {}:{}",
                    key.tx_hash, key.tx_pos
                )));
            }
            Ok(())
        })
    }

    /// Look up an instance by plain or token-aware address
    pub fn get_instance(&self, address: &str) -> Result<ContractInstance, LedgerError> {
        self.find_instance(address)?
            .ok_or_else(|| LedgerError::ContractNotFound(address.to_string()))
    }

    pub fn list_instances(&self) -> Result<Vec<ContractInstance>, LedgerError> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM instantiated_contracts ORDER BY id",
                INSTANCE_COLUMNS
            ))?;
            let mut rows = stmt.query([])?;
            let mut instances = Vec::new();
            while let Some(row) = rows.next()? {
                instances.push(ContractInstance::from_row(row)?);
            }
            Ok(instances)
        })
    }

    /// Constructor args of an instance in their stored textual form
    pub fn constructor_args(&self, address: &str) -> Result<Vec<String>, LedgerError> {
        self.store.read(|conn| {
            let json: String = conn
                .query_row(
                    "SELECT constructor_args FROM cashscript_addresses WHERE address = ?1",
                    [address],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| LedgerError::ContractNotFound(address.to_string()))?;
            Ok(serde_json::from_str(&json)?)
        })
    }

    /// Stored contract outputs of an instance
    pub fn utxos(&self, address: &str) -> Result<Vec<Utxo>, LedgerError> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM UTXOs WHERE contract_address = ?1 ORDER BY id",
                crate::utxo::UTXO_COLUMNS
            ))?;
            let mut rows = stmt.query([address])?;
            let mut utxos = Vec::new();
            while let Some(row) = rows.next()? {
                utxos.push(Utxo::from_row(row)?);
            }
            Ok(utxos)
        })
    }

    fn find_instance(&self, address: &str) -> Result<Option<ContractInstance>, LedgerError> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM instantiated_contracts WHERE address = ?1 OR token_address = ?1",
                INSTANCE_COLUMNS
            ))?;
            let mut rows = stmt.query([address])?;
            match rows.next()? {
                Some(row) => Ok(Some(ContractInstance::from_row(row)?)),
                None => Ok(None),
            }
        })
    }
}

fn save_artifact_in(conn: &Connection, artifact: &Artifact) -> Result<(), LedgerError> {
    let updated_at = if artifact.updated_at.is_empty() {
        Utc::now().to_rfc3339()
    } else {
        artifact.updated_at.clone()
    };
    conn.execute(
        "INSERT INTO cashscript_artifacts
            (contract_name, constructor_inputs, abi, bytecode, source, compiler_name, compiler_version, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (contract_name) DO UPDATE SET
            constructor_inputs = excluded.constructor_inputs,
            abi = excluded.abi,
            bytecode = excluded.bytecode,
            source = excluded.source,
            compiler_name = excluded.compiler_name,
            compiler_version = excluded.compiler_version,
            updated_at = excluded.updated_at",
        params![
            artifact.contract_name,
            serde_json::to_string(&artifact.constructor_inputs)?,
            serde_json::to_string(&artifact.abi)?,
            artifact.bytecode,
            artifact.source,
            artifact.compiler.name,
            artifact.compiler.version,
            updated_at,
        ],
    )?;
    Ok(())
}

fn load_artifact(conn: &Connection, contract_name: &str) -> Result<Artifact, LedgerError> {
    let row = conn
        .query_row(
            "SELECT contract_name, constructor_inputs, abi, bytecode, source,
                    compiler_name, compiler_version, updated_at
             FROM cashscript_artifacts WHERE contract_name = ?1",
            [contract_name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| LedgerError::ArtifactNotFound(contract_name.to_string()))?;

    let (name, inputs, abi, bytecode, source, compiler_name, compiler_version, updated_at) = row;
    Ok(Artifact {
        contract_name: name,
        constructor_inputs: serde_json::from_str(&inputs)?,
        abi: serde_json::from_str(&abi)?,
        bytecode,
        source,
        compiler: super::CompilerInfo {
            name: compiler_name,
            version: compiler_version,
        },
        updated_at,
    })
}

/// Reconcile the stored outputs of a contract and refresh its cached view
fn apply_remote(
    conn: &Connection,
    address: &str,
    prefix: &str,
    remote: &[RemoteUtxo],
    now: &str,
) -> Result<(), LedgerError> {
    let owner = UtxoOwner::Contract(address.to_string());
    let diff = reconcile_address(conn, &owner, address, prefix, remote)?;

    let mut seen = std::collections::HashSet::new();
    let current: Vec<&RemoteUtxo> = remote
        .iter()
        .filter(|u| {
            seen.insert(UtxoKey {
                tx_hash: u.tx_hash.clone(),
                tx_pos: u.tx_pos,
            })
        })
        .collect();

    conn.execute(
        "UPDATE instantiated_contracts SET balance = ?1, utxos = ?2, updated_at = ?3 WHERE address = ?4",
        params![diff.balance as i64, serde_json::to_string(&current)?, now, address],
    )?;
    conn.execute(
        "UPDATE cashscript_addresses SET balance = ?1 WHERE address = ?2",
        params![diff.balance as i64, address],
    )?;

    log::debug!(
        "Contract {}: +{} -{} UTXOs, balance {}",
        address,
        diff.added,
        diff.removed,
        diff.balance
    );
    Ok(())
}

/// Drop locally spent outpoints from a contract's cached view.
///
/// The spent rows must already be gone from `UTXOs`; the balance is
/// recomputed from what remains there.
pub(crate) fn release_spent_in(
    conn: &Connection,
    address: &str,
    spent: &[UtxoKey],
    now: &str,
) -> Result<(), LedgerError> {
    let json: String = conn
        .query_row(
            "SELECT utxos FROM instantiated_contracts WHERE address = ?1",
            [address],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| LedgerError::ContractNotFound(address.to_string()))?;
    let mut current: Vec<RemoteUtxo> = serde_json::from_str(&json)?;
    current.retain(|u| {
        !spent
            .iter()
            .any(|key| key.tx_hash == u.tx_hash && key.tx_pos == u.tx_pos)
    });

    let balance: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM UTXOs WHERE contract_address = ?1",
        [address],
        |row| row.get(0),
    )?;
    conn.execute(
        "UPDATE instantiated_contracts SET balance = ?1, utxos = ?2, updated_at = ?3 WHERE address = ?4",
        params![balance, serde_json::to_string(&current)?, now, address],
    )?;
    conn.execute(
        "UPDATE cashscript_addresses SET balance = ?1 WHERE address = ?2",
        params![balance, address],
    )?;
    Ok(())
}

fn resolve_input(conn: &Connection, kind: &str, value: &str) -> Result<UnlockArg, LedgerError> {
    if kind == "sig" {
        let key =
            key_for_address(conn, value)?.ok_or_else(|| LedgerError::UnknownOwner(value.to_string()))?;
        return Ok(UnlockArg::Signature(SignatureTemplate::new(
            key.address.clone(),
            key.secret_key()?,
        )));
    }
    Ok(UnlockArg::Value(ContractArg::parse(kind, value)?.encode()))
}
