//! In-process ledger emulator.

use super::{Ledger, LedgerBackend, LedgerError, LedgerSpec, StartupError};
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, B256, U256, keccak256};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Registry {
    ports: HashSet<u16>,
    network_ids: HashSet<u32>,
    shutdowns: HashMap<u32, usize>,
}

/// Backend that runs ledgers inside the current tokio runtime.
///
/// Ports are only reserved, nothing listens on them. Each ledger advances
/// its block number from a background task on the configured interval.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    registry: Arc<Mutex<Registry>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the ledger with `network_id` was shut down.
    pub fn shutdowns(&self, network_id: u32) -> usize {
        self.registry
            .lock()
            .shutdowns
            .get(&network_id)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl LedgerBackend for InMemoryBackend {
    async fn start(&self, spec: LedgerSpec) -> Result<Box<dyn Ledger>, StartupError> {
        {
            let mut registry = self.registry.lock();
            if registry.ports.contains(&spec.port) {
                return Err(StartupError::PortInUse {
                    name: spec.name,
                    port: spec.port,
                    source: io::Error::new(
                        io::ErrorKind::AddrInUse,
                        "port reserved by another ledger",
                    ),
                });
            }
            if registry.network_ids.contains(&spec.network_id) {
                return Err(StartupError::NetworkIdInUse {
                    network_id: spec.network_id,
                });
            }
            registry.ports.insert(spec.port);
            registry.network_ids.insert(spec.network_id);
        }

        let balances = spec
            .accounts
            .iter()
            .map(|account| (account.address(), account.balance))
            .collect();

        let block = Arc::new(AtomicU64::new(0));
        let producer = {
            let block = block.clone();
            let name = spec.name.clone();
            let mut interval = tokio::time::interval(spec.block_interval);
            tokio::spawn(async move {
                // first tick completes immediately
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let number = block.fetch_add(1, Ordering::AcqRel) + 1;
                    trace!(chain = %name, number, "produced block");
                }
            })
        };

        debug!(
            chain = %spec.name,
            port = spec.port,
            accounts = spec.accounts.len(),
            "in-memory ledger started"
        );

        Ok(Box::new(InMemoryLedger {
            name: spec.name,
            port: spec.port,
            network_id: spec.network_id,
            block,
            state: Mutex::new(State {
                balances,
                nonces: HashMap::new(),
            }),
            producer: Mutex::new(Some(producer)),
            registry: self.registry.clone(),
        }))
    }
}

#[derive(Debug)]
struct State {
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
}

struct InMemoryLedger {
    name: String,
    port: u16,
    network_id: u32,
    block: Arc<AtomicU64>,
    state: Mutex<State>,
    producer: Mutex<Option<JoinHandle<()>>>,
    registry: Arc<Mutex<Registry>>,
}

#[async_trait]
impl Ledger for InMemoryLedger {
    fn endpoint(&self) -> String {
        format!("memory://127.0.0.1:{}", self.port)
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        Ok(self.block.load(Ordering::Acquire))
    }

    async fn balance(&self, account: Address) -> Result<U256, LedgerError> {
        Ok(self
            .state
            .lock()
            .balances
            .get(&account)
            .copied()
            .unwrap_or_default())
    }

    async fn transfer(
        &self,
        from: &PrivateKeySigner,
        to: Address,
        value: U256,
    ) -> Result<B256, LedgerError> {
        let sender = from.address();
        let mut state = self.state.lock();

        let balance = state.balances.get(&sender).copied().unwrap_or_default();
        if balance < value {
            return Err(LedgerError::InsufficientFunds {
                account: sender,
                value,
                balance,
            });
        }
        state.balances.insert(sender, balance - value);
        *state.balances.entry(to).or_default() += value;

        let nonce = state.nonces.entry(sender).or_default();
        let mut preimage = Vec::with_capacity(4 + 20 + 8);
        preimage.extend_from_slice(&self.network_id.to_be_bytes());
        preimage.extend_from_slice(sender.as_slice());
        preimage.extend_from_slice(&nonce.to_be_bytes());
        *nonce += 1;

        Ok(keccak256(preimage))
    }

    async fn shutdown(&self) -> Result<(), LedgerError> {
        if let Some(producer) = self.producer.lock().take() {
            producer.abort();
        }
        let mut registry = self.registry.lock();
        registry.ports.remove(&self.port);
        registry.network_ids.remove(&self.network_id);
        *registry.shutdowns.entry(self.network_id).or_default() += 1;
        debug!(chain = %self.name, "in-memory ledger shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Account;
    use std::time::Duration;

    fn spec(port: u16, network_id: u32, accounts: Vec<Account>) -> LedgerSpec {
        LedgerSpec {
            name: format!("chain-{network_id}"),
            port,
            network_id,
            accounts,
            block_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn produces_blocks_without_requests() {
        let backend = InMemoryBackend::new();
        let ledger = backend.start(spec(5001, 5001, vec![])).await.unwrap();
        assert_eq!(ledger.block_number().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(55)).await;
        assert!(ledger.block_number().await.unwrap() >= 4);
    }

    #[tokio::test]
    async fn transfer_moves_balance() {
        let signer: PrivateKeySigner =
            "0x0000000000000000000000000000000000000000000000000000000000000002"
                .parse()
                .unwrap();
        let account = Account::new(signer.clone(), U256::from(100));
        let backend = InMemoryBackend::new();
        let ledger = backend.start(spec(5001, 5001, vec![account])).await.unwrap();

        let first = ledger.transfer(&signer, Address::ZERO, U256::from(40)).await.unwrap();
        let second = ledger.transfer(&signer, Address::ZERO, U256::from(40)).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(ledger.balance(signer.address()).await.unwrap(), U256::from(20));
        assert_eq!(ledger.balance(Address::ZERO).await.unwrap(), U256::from(80));

        let err = ledger.transfer(&signer, Address::ZERO, U256::from(40)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn shutdown_releases_port() {
        let backend = InMemoryBackend::new();
        let ledger = backend.start(spec(5001, 5001, vec![])).await.unwrap();
        assert!(matches!(
            backend.start(spec(5001, 5003, vec![])).await,
            Err(StartupError::PortInUse { .. })
        ));
        assert!(matches!(
            backend.start(spec(6001, 5001, vec![])).await,
            Err(StartupError::NetworkIdInUse { network_id: 5001 })
        ));

        ledger.shutdown().await.unwrap();
        assert!(backend.start(spec(5001, 5001, vec![])).await.is_ok());
        assert_eq!(backend.shutdowns(5001), 1);
    }
}
