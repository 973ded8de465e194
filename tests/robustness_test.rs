mod common;

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, ScriptBuf, Transaction, TxIn, TxOut};
use cashledger::{
    Artifact, InputSpec, LedgerError, OutputSpec, SignTransactionRequest, SourceOutput,
    TransactionRequest,
};
use common::{foreign_address, remote, TestEnvironment, MNEMONIC, P2PKH_ARTIFACT};

#[tokio::test]
async fn test_overlapping_create_contract_yields_one_instance() {
    let env = TestEnvironment::yielding();
    let handle = env.ledger.ensure_started().await.unwrap();
    handle
        .contracts
        .save_artifact(&Artifact::from_json(P2PKH_ARTIFACT).unwrap())
        .unwrap();

    let pkh = hex::encode([9u8; 20]);
    let args = [&pkh];
    let (first, second) = tokio::join!(
        handle.contracts.create_contract("P2PKH", &args),
        handle.contracts.create_contract("P2PKH", &args),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.address, second.address);
    assert_eq!(first.created_at, second.created_at);
    assert_eq!(handle.contracts.list_instances().unwrap().len(), 1);
}

#[tokio::test]
async fn test_overlapping_reconcile_adds_once() {
    let env = TestEnvironment::yielding();
    let handle = env.ledger.ensure_started().await.unwrap();

    let wallet = handle.vault.import_wallet("main", MNEMONIC, "").unwrap();
    let a0 = handle.vault.generate_batch(wallet.id, 1).unwrap().remove(0);
    env.provider.set_utxos(&a0.address, vec![remote("abc", 0, 25_000)]);

    let (left, right) = tokio::join!(
        handle.reconcile_wallet(wallet.id),
        handle.reconcile_wallet(wallet.id),
    );
    let (left, right) = (left.unwrap(), right.unwrap());

    assert_eq!(left.added + right.added, 1);
    assert_eq!(left.removed + right.removed, 0);
    assert_eq!(handle.utxos.list(wallet.id).unwrap().len(), 1);
    assert_eq!(handle.vault.get_wallet(wallet.id).unwrap().balance, 25_000);
}

#[tokio::test]
async fn test_malformed_token_prefix_is_rejected_by_signer() {
    let env = TestEnvironment::new();
    let handle = env.ledger.ensure_started().await.unwrap();
    handle.vault.import_wallet("main", MNEMONIC, "").unwrap();

    let tx = Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn::default()],
        output: vec![TxOut {
            value: Amount::from_sat(1_000),
            script_pubkey: ScriptBuf::new(),
        }],
    };

    // NFT with commitment whose length claims u64::MAX bytes
    let locking = format!("ef{}60ff{}", "00".repeat(32), "ff".repeat(8));
    let request = SignTransactionRequest {
        transaction: bitcoin::consensus::encode::serialize_hex(&tx),
        source_outputs: vec![SourceOutput {
            value: 2_000,
            locking_bytecode: locking,
        }],
        broadcast: false,
    };

    assert!(matches!(
        handle.signer.sign_transaction(&request).await,
        Err(LedgerError::InvalidArgument(_))
    ));
    assert!(env.provider.broadcasts().is_empty());
}

#[tokio::test]
async fn test_spend_updates_address_balance() {
    let env = TestEnvironment::new();
    let handle = env.ledger.ensure_started().await.unwrap();

    let wallet = handle.vault.import_wallet("main", MNEMONIC, "").unwrap();
    let a0 = handle.vault.generate_batch(wallet.id, 1).unwrap().remove(0);
    env.provider.set_utxos(
        &a0.address,
        vec![remote("abc", 0, 10_000), remote("abc", 1, 6_000)],
    );
    handle.reconcile_wallet(wallet.id).await.unwrap();

    let record = |handle: &cashledger::LedgerHandle| {
        handle
            .addresses
            .list_addresses(wallet.id)
            .unwrap()
            .into_iter()
            .find(|a| a.address == a0.address)
            .unwrap()
    };
    assert_eq!(record(handle).balance, 16_000);

    let spent = handle
        .utxos
        .list(wallet.id)
        .unwrap()
        .into_iter()
        .find(|u| u.tx_pos == 0)
        .unwrap();
    handle
        .assembler
        .build_transaction(TransactionRequest {
            inputs: vec![InputSpec::new(spent)],
            outputs: vec![OutputSpec::new(foreign_address(4), 9_700)],
            fee: Some(300),
            fee_cap: 1000,
            change_address: None,
            locktime: 0,
            broadcast: true,
        })
        .await
        .unwrap();

    assert_eq!(record(handle).balance, 6_000);
    assert_eq!(handle.vault.get_wallet(wallet.id).unwrap().balance, 6_000);
}
