//! CashLedger: a self-custodial UTXO ledger for Bitcoin Cash
//!
//! Keeps HD keys, addresses, unspent outputs (including CashTokens) and
//! CashScript contract instances in an embedded store, reconciles them
//! against a remote indexer, and assembles signed transactions.
//!
//! # Architecture
//!
//! - **Key vault**: BIP39/BIP32 derivation and per-wallet key records
//! - **UTXO index**: set-difference reconciliation against a [`ChainProvider`]
//! - **Contract store**: CashScript artifacts, instances and unlockers
//! - **Transaction assembler**: coin selection, fee cap, BCH sighash signing
//!
//! # Example
//!
//! ```ignore
//! use cashledger::{Ledger, LedgerConfig};
//!
//! let ledger = Ledger::from_config(LedgerConfig::from_env());
//! let handle = ledger.ensure_started().await?;
//!
//! let wallet = handle.vault.import_wallet("main", mnemonic, "")?;
//! handle.vault.generate_batch(wallet.id, 20)?;
//! let report = handle.reconcile_wallet(wallet.id).await?;
//! println!("balance: {} sats", report.balance);
//! ```

pub mod address_ledger;
pub mod coin_select;
pub mod config;
pub mod contracts;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod network;
pub mod provider;
pub mod signing;
pub mod store;
pub mod sync;
pub mod transaction;
pub mod utxo;

// Re-exports for convenience
pub use address_ledger::{AddressLedger, AddressRecord, NewAddress};
pub use config::LedgerConfig;
pub use contracts::{AddressType, Artifact, ContractInstance, ContractStore, ContractUnlocker};
pub use error::{LedgerError, StorageError};
pub use keys::{KeyRecord, KeyVault, WalletRecord};
pub use ledger::{Ledger, LedgerHandle};
pub use network::Network;
pub use provider::{ChainProvider, EsploraProvider, MemoryProvider, RemoteUtxo};
pub use signing::{RequestSigner, SignTransactionRequest, SignedTransaction, SourceOutput};
pub use store::LedgerStore;
pub use sync::{SyncService, SyncSummary};
pub use transaction::{
    BuiltTransaction, InputSpec, OutputSpec, TransactionAssembler, TransactionRequest, DUST_LIMIT,
};
pub use utxo::{Capability, Nft, ReconcileReport, TokenData, Utxo, UtxoIndex, UtxoOwner};
