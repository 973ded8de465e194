/// Ledger schema, applied on a fresh store
pub const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS wallets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    wallet_name TEXT UNIQUE NOT NULL,
    mnemonic TEXT NOT NULL,
    passphrase TEXT NOT NULL DEFAULT '',
    balance INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    wallet_id INTEGER NOT NULL,
    public_key BLOB NOT NULL,
    private_key BLOB NOT NULL,
    address TEXT NOT NULL,
    token_address TEXT NOT NULL,
    pubkey_hash BLOB NOT NULL,
    account_index INTEGER NOT NULL,
    change_index INTEGER NOT NULL,
    address_index INTEGER NOT NULL,
    UNIQUE (wallet_id, address),
    UNIQUE (wallet_id, account_index, change_index, address_index),
    FOREIGN KEY (wallet_id) REFERENCES wallets (id)
        ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS addresses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    wallet_id INTEGER NOT NULL,
    address TEXT NOT NULL,
    balance INTEGER NOT NULL DEFAULT 0,
    hd_index INTEGER NOT NULL,
    change_index INTEGER NOT NULL,
    prefix TEXT NOT NULL,
    UNIQUE (wallet_id, address),
    FOREIGN KEY (wallet_id) REFERENCES wallets (id)
        ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS UTXOs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    wallet_id INTEGER,
    contract_address TEXT,
    address TEXT NOT NULL,
    height INTEGER NOT NULL,
    tx_hash TEXT NOT NULL,
    tx_pos INTEGER NOT NULL,
    amount INTEGER NOT NULL,
    token_data TEXT,
    prefix TEXT NOT NULL,
    contractFunction TEXT,
    contractFunctionInputs TEXT,
    UNIQUE (address, tx_hash, tx_pos),
    FOREIGN KEY (wallet_id) REFERENCES wallets (id)
        ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS cashscript_artifacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contract_name TEXT UNIQUE NOT NULL,
    constructor_inputs TEXT NOT NULL,
    abi TEXT NOT NULL,
    bytecode TEXT NOT NULL,
    source TEXT NOT NULL,
    compiler_name TEXT NOT NULL,
    compiler_version TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cashscript_addresses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT UNIQUE NOT NULL,
    constructor_args TEXT NOT NULL,
    balance INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS instantiated_contracts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contract_name TEXT NOT NULL,
    address TEXT UNIQUE NOT NULL,
    token_address TEXT NOT NULL,
    opcount INTEGER NOT NULL,
    bytesize INTEGER NOT NULL,
    bytecode TEXT NOT NULL,
    balance INTEGER NOT NULL DEFAULT 0,
    utxos TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    artifact TEXT NOT NULL,
    abi TEXT NOT NULL,
    redeemScript TEXT NOT NULL,
    unlock TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS keys_wallet ON keys (wallet_id);
CREATE INDEX IF NOT EXISTS utxos_wallet ON UTXOs (wallet_id);
CREATE INDEX IF NOT EXISTS utxos_contract ON UTXOs (contract_address);
";

/// Tables a valid snapshot must contain
pub const REQUIRED_TABLES: &[&str] = &[
    "wallets",
    "keys",
    "addresses",
    "UTXOs",
    "cashscript_artifacts",
    "cashscript_addresses",
    "instantiated_contracts",
];
