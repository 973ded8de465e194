mod common;

use cashledger::{LedgerConfig, Network};
use common::{remote, TestEnvironment, MNEMONIC};
use tempfile::TempDir;

fn config_at(dir: &TempDir) -> LedgerConfig {
    let mut config = LedgerConfig::in_memory(Network::Chipnet);
    config.snapshot_path = Some(dir.path().join("ledger.db"));
    config
}

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let dir = TempDir::new().unwrap();
    log::info!("📁 Test directory: {:?}", dir.path());

    let (wallet_id, address) = {
        let env = TestEnvironment::with_config(config_at(&dir));
        let handle = env.ledger.ensure_started().await.unwrap();
        let wallet = handle.vault.import_wallet("main", MNEMONIC, "").unwrap();
        let key = handle.vault.generate_batch(wallet.id, 3).unwrap().remove(0);
        env.provider
            .set_utxos(&key.address, vec![remote("abc", 0, 100_000), remote("def", 1, 5_000)]);
        handle.reconcile_wallet(wallet.id).await.unwrap();
        (wallet.id, key.address)
    };
    assert!(dir.path().join("ledger.db").exists());

    let env = TestEnvironment::with_config(config_at(&dir));
    let handle = env.ledger.ensure_started().await.unwrap();

    let wallet = handle.vault.get_wallet(wallet_id).unwrap();
    assert_eq!(wallet.balance, 105_000);
    assert_eq!(handle.addresses.list_addresses(wallet_id).unwrap().len(), 3);
    assert_eq!(handle.utxos.list_for_address(&address).unwrap().len(), 2);

    // Next batch continues after the restored keys
    let next = handle.vault.generate_batch(wallet_id, 1).unwrap();
    assert_eq!(next[0].address_index, 3);
}

#[tokio::test]
async fn test_partial_failure_keeps_other_addresses() {
    let env = TestEnvironment::new();
    let handle = env.ledger.ensure_started().await.unwrap();

    let wallet = handle.vault.import_wallet("main", MNEMONIC, "").unwrap();
    let keys = handle.vault.generate_batch(wallet.id, 2).unwrap();
    env.provider.set_utxos(&keys[0].address, vec![remote("abc", 0, 1_000)]);
    env.provider.set_utxos(&keys[1].address, vec![remote("def", 0, 2_000)]);
    handle.reconcile_wallet(wallet.id).await.unwrap();

    env.provider.fail_address(&keys[1].address);
    env.provider.set_utxos(&keys[0].address, vec![]);
    let report = handle.reconcile_wallet(wallet.id).await.unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].address, keys[1].address);
    assert_eq!(report.removed, 1);
    // The unreachable address keeps its last known outputs
    assert_eq!(report.balance, 2_000);
}
