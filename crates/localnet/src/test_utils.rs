//! Fixtures shared by the unit and integration tests.

use crate::{
    chain::{Account, InMemoryBackend, LocalChain},
    config::HarnessConfig,
    engine::{WASM_FILE, WITNESS_CALCULATOR_FILE, Wallet, ZKEY_FILE},
    ledger::ChainSlot,
};
use std::path::Path;

pub fn write_artifacts(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(WASM_FILE), b"\0asm").unwrap();
    std::fs::write(dir.join(WITNESS_CALCULATOR_FILE), b"module.exports = {}").unwrap();
    std::fs::write(dir.join(ZKEY_FILE), b"zkey").unwrap();
}

/// Default configuration with artifacts written under `dir`.
pub fn test_config(dir: &Path) -> HarnessConfig {
    let artifacts = dir.join("fixtures");
    write_artifacts(&artifacts);
    HarnessConfig {
        artifacts_dir: artifacts,
        ..HarnessConfig::default_local()
    }
}

/// Starts both chains of `config` and returns a relayer wallet on each.
pub async fn start_wallets(backend: &InMemoryBackend, config: &HarnessConfig) -> [Wallet; 2] {
    let balance = config.initial_balance().unwrap();
    let accounts: Vec<_> = config
        .funded_signers()
        .unwrap()
        .into_iter()
        .map(|signer| Account::new(signer, balance))
        .collect();

    let relayer = config.relayer_signer().unwrap();
    let mut wallets = Vec::new();
    for slot in ChainSlot::ALL {
        let chain_config = config.chain(slot);
        let chain = LocalChain::create(
            backend,
            chain_config.name.clone(),
            chain_config.network_id,
            chain_config.port,
            accounts.clone(),
            config.block_time(),
        )
        .await
        .unwrap();
        wallets.push(Wallet::new(relayer.clone(), chain));
    }
    wallets.try_into().unwrap()
}
