//! Ledgers backed by `anvil` child processes.

use super::{Ledger, LedgerBackend, LedgerError, LedgerSpec, StartupError};
use crate::retry::{RetryPolicy, with_retry};
use alloy::{
    network::{EthereumWallet, TransactionBuilder},
    node_bindings::{Anvil, AnvilInstance},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
    transports::{RpcError, TransportErrorKind},
};
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{net::TcpListener, path::PathBuf, time::Duration};
use tracing::{debug, info};

/// Spawns one `anvil` process per ledger.
#[derive(Debug, Clone)]
pub struct AnvilBackend {
    binary: Option<PathBuf>,
    spawn_timeout: Duration,
    readiness: RetryPolicy,
}

impl Default for AnvilBackend {
    fn default() -> Self {
        Self {
            binary: None,
            spawn_timeout: Duration::from_secs(10),
            readiness: RetryPolicy::readiness(),
        }
    }
}

impl AnvilBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this `anvil` binary instead of the one on `PATH`.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }
}

fn rpc_error(err: impl std::fmt::Display) -> LedgerError {
    LedgerError::Rpc(err.to_string())
}

#[async_trait]
impl LedgerBackend for AnvilBackend {
    async fn start(&self, spec: LedgerSpec) -> Result<Box<dyn Ledger>, StartupError> {
        // anvil would only notice a taken port after it started logging
        if let Err(source) = TcpListener::bind(("127.0.0.1", spec.port)) {
            return Err(StartupError::PortInUse {
                name: spec.name,
                port: spec.port,
                source,
            });
        }

        let mut anvil = Anvil::new()
            .port(spec.port)
            .chain_id(u64::from(spec.network_id))
            .block_time(spec.block_interval.as_secs().max(1))
            .timeout(self.spawn_timeout.as_millis() as u64);
        if let Some(binary) = &self.binary {
            anvil = anvil.path(binary.clone());
        }

        let name = spec.name.clone();
        let instance = tokio::task::spawn_blocking(move || anvil.try_spawn())
            .await
            .map_err(|e| StartupError::Spawn {
                name: name.clone(),
                reason: format!("spawn task: {e}"),
            })?
            .map_err(|e| StartupError::Spawn {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        let endpoint = instance.endpoint();
        let url = endpoint.parse().map_err(|e| StartupError::Spawn {
            name: name.clone(),
            reason: format!("invalid endpoint {endpoint}: {e}"),
        })?;
        let provider = ProviderBuilder::new().connect_http(url).erased();

        // only transport failures mean anvil is not listening yet
        let probe = &provider;
        let not_listening =
            |err: &RpcError<TransportErrorKind>| matches!(err, RpcError::Transport(_));
        let block = with_retry("anvil readiness", &self.readiness, not_listening, || async move {
            probe.get_block_number().await
        })
        .await
        .map_err(|e| StartupError::NotReady {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        info!(chain = %name, port = spec.port, block, "anvil ready");

        for account in &spec.accounts {
            provider
                .raw_request::<_, ()>(
                    "anvil_setBalance".into(),
                    (account.address(), account.balance),
                )
                .await
                .map_err(|e| StartupError::Seed {
                    name: name.clone(),
                    source: rpc_error(e),
                })?;
            debug!(
                chain = %name,
                account = %account.address(),
                balance = %account.balance,
                "seeded account"
            );
        }

        Ok(Box::new(AnvilLedger {
            name,
            endpoint,
            provider,
            instance: Mutex::new(Some(instance)),
        }))
    }
}

struct AnvilLedger {
    name: String,
    endpoint: String,
    provider: DynProvider,
    instance: Mutex<Option<AnvilInstance>>,
}

#[async_trait]
impl Ledger for AnvilLedger {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.provider.get_block_number().await.map_err(rpc_error)
    }

    async fn balance(&self, account: Address) -> Result<U256, LedgerError> {
        self.provider.get_balance(account).await.map_err(rpc_error)
    }

    async fn transfer(
        &self,
        from: &PrivateKeySigner,
        to: Address,
        value: U256,
    ) -> Result<B256, LedgerError> {
        let url = self.endpoint.parse().map_err(rpc_error)?;
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(from.clone()))
            .connect_http(url);

        let tx = TransactionRequest::default().with_to(to).with_value(value);
        let receipt = provider
            .send_transaction(tx)
            .await
            .map_err(rpc_error)?
            .get_receipt()
            .await
            .map_err(rpc_error)?;

        Ok(receipt.transaction_hash)
    }

    async fn shutdown(&self) -> Result<(), LedgerError> {
        // dropping the instance kills the child process
        match self.instance.lock().take() {
            Some(instance) => {
                drop(instance);
                debug!(chain = %self.name, "anvil process killed");
            }
            None => debug!(chain = %self.name, "anvil process already gone"),
        }
        Ok(())
    }
}
