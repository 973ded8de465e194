use cashledger::{Ledger, LedgerConfig};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize logger (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = LedgerConfig::from_env();
    let sync_interval = config.sync_interval;
    let batch_size = config.key_batch_size;

    let ledger = Ledger::from_config(config);
    let handle = ledger.ensure_started().await?;

    if handle.vault.list_wallets()?.is_empty() {
        match env::var("LEDGER_MNEMONIC") {
            Ok(mnemonic) => {
                let passphrase = env::var("LEDGER_PASSPHRASE").unwrap_or_default();
                let wallet = handle.vault.import_wallet("default", mnemonic.trim(), &passphrase)?;
                let keys = handle.vault.generate_batch(wallet.id, batch_size)?;
                log::info!("🔑 Imported wallet {} with {} addresses", wallet.id, keys.len());
            }
            Err(_) => log::warn!("⚠️  No wallet in ledger and LEDGER_MNEMONIC not set"),
        }
    }

    let sync = handle.sync.clone();
    let task = sync.clone().spawn(sync_interval);

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");
    sync.shutdown();
    task.await?;
    Ok(())
}
