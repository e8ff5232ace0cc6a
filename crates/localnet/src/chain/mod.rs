//! Chain lifecycle: typed chain ids, backend ledgers and the [`LocalChain`]
//! handle that owns one running ledger.

use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tracing::{debug, info};

mod anvil;
mod memory;

pub use anvil::AnvilBackend;
pub use memory::InMemoryBackend;

/// Chain type prefix for EVM chains.
const EVM_CHAIN_TYPE: u64 = 0x0100;

/// A chain id tagged with its chain type, as used by the bridge contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypedChainId(u64);

impl TypedChainId {
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for TypedChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#014x}", self.0)
    }
}

/// Derives the typed chain id of an EVM network: the two byte chain type
/// followed by the four byte network id.
pub const fn chain_id_type(network_id: u32) -> TypedChainId {
    TypedChainId((EVM_CHAIN_TYPE << 32) | network_id as u64)
}

/// An account seeded into a ledger when it starts.
#[derive(Debug, Clone)]
pub struct Account {
    pub signer: PrivateKeySigner,
    pub balance: U256,
}

impl Account {
    pub fn new(signer: PrivateKeySigner, balance: U256) -> Self {
        Self { signer, balance }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

/// Everything a backend needs to start one ledger.
#[derive(Debug, Clone)]
pub struct LedgerSpec {
    pub name: String,
    pub port: u16,
    pub network_id: u32,
    pub accounts: Vec<Account>,
    pub block_interval: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("port {port} for chain {name} is already in use")]
    PortInUse {
        name: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("network id {network_id} is already running on this backend")]
    NetworkIdInUse { network_id: u32 },
    #[error("failed to spawn ledger for chain {name}: {reason}")]
    Spawn { name: String, reason: String },
    #[error("ledger for chain {name} never became ready: {reason}")]
    NotReady { name: String, reason: String },
    #[error("failed to seed accounts on chain {name}")]
    Seed {
        name: String,
        #[source]
        source: LedgerError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("rpc call failed: {0}")]
    Rpc(String),
    #[error("ledger {0} is stopped")]
    Stopped(String),
    #[error("account {account} cannot pay {value} (balance {balance})")]
    InsufficientFunds {
        account: Address,
        value: U256,
        balance: U256,
    },
}

/// Starts ledgers. One backend may run many ledgers side by side.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Starts a ledger and returns once it accepts requests.
    async fn start(&self, spec: LedgerSpec) -> Result<Box<dyn Ledger>, StartupError>;
}

/// A running ledger producing blocks on its own schedule.
#[async_trait]
pub trait Ledger: Send + Sync {
    fn endpoint(&self) -> String;

    async fn block_number(&self) -> Result<u64, LedgerError>;

    async fn balance(&self, account: Address) -> Result<U256, LedgerError>;

    /// Sends `value` from `from` to `to` and waits for inclusion.
    async fn transfer(
        &self,
        from: &PrivateKeySigner,
        to: Address,
        value: U256,
    ) -> Result<B256, LedgerError>;

    async fn shutdown(&self) -> Result<(), LedgerError>;
}

/// One running local network.
pub struct LocalChain {
    name: String,
    network_id: u32,
    endpoint: String,
    ledger: Box<dyn Ledger>,
    stopped: AtomicBool,
}

impl fmt::Debug for LocalChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalChain")
            .field("name", &self.name)
            .field("network_id", &self.network_id)
            .field("endpoint", &self.endpoint)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl LocalChain {
    /// Starts a ledger for `name` seeded with `accounts`.
    ///
    /// The port defaults to the network id. Returns only after the backend
    /// passed its readiness probe.
    pub async fn create(
        backend: &dyn LedgerBackend,
        name: impl Into<String>,
        network_id: u32,
        port: Option<u16>,
        accounts: Vec<Account>,
        block_interval: Duration,
    ) -> Result<Arc<Self>, StartupError> {
        let name = name.into();
        let port = match port {
            Some(port) => port,
            None => u16::try_from(network_id).map_err(|_| StartupError::Spawn {
                name: name.clone(),
                reason: format!("network id {network_id} does not fit a port, set one explicitly"),
            })?,
        };

        let ledger = backend
            .start(LedgerSpec {
                name: name.clone(),
                port,
                network_id,
                accounts,
                block_interval,
            })
            .await?;
        let endpoint = ledger.endpoint();
        info!(%name, network_id, chain_id = %chain_id_type(network_id), %endpoint, "chain started");

        Ok(Arc::new(Self {
            name,
            network_id,
            endpoint,
            ledger,
            stopped: AtomicBool::new(false),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn network_id(&self) -> u32 {
        self.network_id
    }

    /// Typed chain id, always derived from the network id.
    pub const fn chain_id(&self) -> TypedChainId {
        chain_id_type(self.network_id)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    pub async fn block_number(&self) -> Result<u64, LedgerError> {
        self.ensure_running()?;
        self.ledger.block_number().await
    }

    pub async fn balance(&self, account: Address) -> Result<U256, LedgerError> {
        self.ensure_running()?;
        self.ledger.balance(account).await
    }

    pub async fn transfer(
        &self,
        from: &PrivateKeySigner,
        to: Address,
        value: U256,
    ) -> Result<B256, LedgerError> {
        self.ensure_running()?;
        let hash = self.ledger.transfer(from, to, value).await?;
        debug!(
            chain = %self.name,
            from = %from.address(),
            %to,
            %value,
            tx = %hash,
            "transfer included"
        );
        Ok(hash)
    }

    /// Shuts the backend down. Calls after the first one do nothing.
    pub async fn stop(&self) -> Result<(), LedgerError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            debug!(chain = %self.name, "chain already stopped");
            return Ok(());
        }
        self.ledger.shutdown().await?;
        info!(chain = %self.name, "chain stopped");
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), LedgerError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(LedgerError::Stopped(self.name.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::utils::parse_ether;

    fn funded(key: &str) -> Account {
        Account::new(key.parse().unwrap(), parse_ether("1000").unwrap())
    }

    #[test]
    fn chain_id_type_is_pure() {
        assert_eq!(chain_id_type(5001), chain_id_type(5001));
        assert_eq!(chain_id_type(5001).to_string(), "0x010000001389");
    }

    #[test]
    fn chain_id_type_is_injective() {
        let ids: std::collections::HashSet<_> = (0..1000u32)
            .chain([u32::MAX, 5001, 5002])
            .map(chain_id_type)
            .collect();
        assert_eq!(ids.len(), 1002);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let backend = InMemoryBackend::new();
        let chain = LocalChain::create(
            &backend,
            "Hermes",
            5001,
            None,
            vec![funded(
                "0x0000000000000000000000000000000000000000000000000000000000000001",
            )],
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        assert!(chain.is_running());
        chain.stop().await.unwrap();
        chain.stop().await.unwrap();
        assert!(!chain.is_running());
        assert_eq!(backend.shutdowns(5001), 1);
        assert!(matches!(
            chain.block_number().await,
            Err(LedgerError::Stopped(_))
        ));
    }

    #[tokio::test]
    async fn port_collision_fails_fast() {
        let backend = InMemoryBackend::new();
        let block = Duration::from_secs(1);
        let _first = LocalChain::create(&backend, "Hermes", 5001, Some(7001), vec![], block)
            .await
            .unwrap();
        let err = LocalChain::create(&backend, "Athena", 5002, Some(7001), vec![], block)
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::PortInUse { port: 7001, .. }));
    }

    #[tokio::test]
    async fn oversized_network_id_needs_explicit_port() {
        let backend = InMemoryBackend::new();
        let err = LocalChain::create(&backend, "Big", 70_000, None, vec![], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::Spawn { .. }));
    }
}
