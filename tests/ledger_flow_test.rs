mod common;

use cashledger::coin_select;
use cashledger::{InputSpec, LedgerError, OutputSpec, TransactionRequest};
use common::{foreign_address, remote, TestEnvironment, MNEMONIC};

#[tokio::test]
async fn test_receive_select_and_spend() {
    let env = TestEnvironment::new();
    let handle = env.ledger.ensure_started().await.unwrap();

    let wallet = handle.vault.import_wallet("main", MNEMONIC, "").unwrap();
    let a0 = handle.vault.generate_batch(wallet.id, 1).unwrap().remove(0);
    assert_eq!(a0.address_index, 0);

    env.provider.set_utxos(&a0.address, vec![remote("abc", 0, 100_000)]);
    let report = handle.reconcile_wallet(wallet.id).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.added, 1);
    assert_eq!(report.balance, 100_000);
    assert_eq!(handle.vault.get_wallet(wallet.id).unwrap().balance, 100_000);

    let utxos = handle.utxos.list(wallet.id).unwrap();
    let selection = coin_select::select(&utxos, 50_000, 300).unwrap();
    assert_eq!(selection.chosen.len(), 1);
    assert_eq!(selection.total, 100_000);

    let b = foreign_address(7);
    let built = handle
        .assembler
        .build_transaction(TransactionRequest {
            inputs: selection.chosen.into_iter().map(InputSpec::new).collect(),
            outputs: vec![OutputSpec::new(b, 49_700)],
            fee: Some(300),
            fee_cap: 1000,
            change_address: Some(a0.address.clone()),
            locktime: 0,
            broadcast: true,
        })
        .await
        .unwrap();

    assert_eq!(built.fee, 300);
    assert_eq!(built.change, Some(50_000));
    assert_eq!(built.broadcast_txid.as_deref(), Some(built.txid.as_str()));
    assert_eq!(env.provider.broadcasts(), vec![built.hex.clone()]);

    // Spent input is gone locally until the next reconcile reports change
    assert!(handle.utxos.list(wallet.id).unwrap().is_empty());
    assert_eq!(handle.vault.get_wallet(wallet.id).unwrap().balance, 0);
}

#[tokio::test]
async fn test_fee_cap_blocks_signing() {
    let env = TestEnvironment::new();
    let handle = env.ledger.ensure_started().await.unwrap();

    let wallet = handle.vault.import_wallet("main", MNEMONIC, "").unwrap();
    let a0 = handle.vault.generate_batch(wallet.id, 1).unwrap().remove(0);
    env.provider.set_utxos(&a0.address, vec![remote("abc", 0, 100_000)]);
    handle.reconcile_wallet(wallet.id).await.unwrap();

    let utxos = handle.utxos.list(wallet.id).unwrap();
    let result = handle
        .assembler
        .build_transaction(TransactionRequest {
            inputs: utxos.into_iter().map(InputSpec::new).collect(),
            outputs: vec![OutputSpec::new(foreign_address(7), 49_700)],
            fee: Some(2000),
            fee_cap: 1000,
            change_address: Some(a0.address.clone()),
            locktime: 0,
            broadcast: true,
        })
        .await;

    assert!(matches!(
        result,
        Err(LedgerError::FeeExceeded { fee: 2000, cap: 1000 })
    ));
    assert!(env.provider.broadcasts().is_empty());
    assert_eq!(handle.utxos.list(wallet.id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_send_from_wallet_picks_inputs_and_change() {
    let env = TestEnvironment::new();
    let handle = env.ledger.ensure_started().await.unwrap();

    let wallet = handle.vault.import_wallet("main", MNEMONIC, "").unwrap();
    let keys = handle.vault.generate_batch(wallet.id, 2).unwrap();
    env.provider.set_utxos(&keys[0].address, vec![remote("a1", 0, 20_000)]);
    env.provider.set_utxos(&keys[1].address, vec![remote("a2", 1, 30_000)]);
    handle.reconcile_wallet(wallet.id).await.unwrap();

    let built = handle
        .assembler
        .send_from_wallet(
            wallet.id,
            vec![OutputSpec::new(foreign_address(9), 25_000)],
            None,
            None,
            false,
        )
        .await
        .unwrap();

    // Largest output alone covers the payment
    assert_eq!(built.fee, 30_000 - 25_000 - built.change.unwrap());
    assert!(built.fee <= handle.assembler.default_fee_cap());
    assert!(built.broadcast_txid.is_none());
    assert_eq!(handle.utxos.list(wallet.id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_insufficient_funds() {
    let env = TestEnvironment::new();
    let handle = env.ledger.ensure_started().await.unwrap();

    let wallet = handle.vault.import_wallet("main", MNEMONIC, "").unwrap();
    let a0 = handle.vault.generate_batch(wallet.id, 1).unwrap().remove(0);
    env.provider.set_utxos(&a0.address, vec![remote("abc", 0, 1_000)]);
    handle.reconcile_wallet(wallet.id).await.unwrap();

    let result = handle
        .assembler
        .send_from_wallet(
            wallet.id,
            vec![OutputSpec::new(foreign_address(9), 5_000)],
            Some(300),
            None,
            false,
        )
        .await;
    assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
}

#[tokio::test]
async fn test_output_of_another_wallet_cannot_be_signed() {
    let env = TestEnvironment::new();
    let handle = env.ledger.ensure_started().await.unwrap();

    let owner = handle.vault.import_wallet("main", MNEMONIC, "").unwrap();
    let other = handle.vault.create_wallet("other").unwrap();
    let a0 = handle.vault.generate_batch(owner.id, 1).unwrap().remove(0);
    handle.vault.generate_batch(other.id, 1).unwrap();
    env.provider.set_utxos(&a0.address, vec![remote("abc", 0, 10_000)]);
    handle.reconcile_wallet(owner.id).await.unwrap();

    // Same output, attributed to the wrong wallet
    let mut utxo = handle.utxos.list(owner.id).unwrap().remove(0);
    utxo.wallet_id = Some(other.id);

    let result = handle
        .assembler
        .build_transaction(TransactionRequest {
            inputs: vec![InputSpec::new(utxo)],
            outputs: vec![OutputSpec::new(foreign_address(7), 9_700)],
            fee: Some(300),
            fee_cap: 1000,
            change_address: None,
            locktime: 0,
            broadcast: true,
        })
        .await;

    assert!(matches!(result, Err(LedgerError::UnknownOwner(_))));
    assert!(env.provider.broadcasts().is_empty());
    assert_eq!(handle.utxos.list(owner.id).unwrap().len(), 1);
}
