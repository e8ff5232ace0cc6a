//! Startup sequencing and coordinated teardown.

use crate::{
    chain::{Account, LedgerBackend, LedgerError, LocalChain, StartupError},
    config::{ConfigError, HarnessConfig},
    deploy::{ChainDeployment, Deployment, DeploymentError, deploy},
    engine::{BridgeEngine, Wallet},
    ledger::ChainSlot,
};
use alloy_primitives::Address;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("priming transfer on chain {chain} failed")]
    Priming {
        chain: String,
        #[source]
        source: LedgerError,
    },
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
}

/// Stops both chains once, however many times and from wherever it is
/// triggered.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug)]
struct ShutdownInner {
    chains: [Arc<LocalChain>; 2],
    done: OnceCell<()>,
}

impl ShutdownCoordinator {
    pub fn new(chains: [Arc<LocalChain>; 2]) -> Self {
        Self {
            inner: Arc::new(ShutdownInner {
                chains,
                done: OnceCell::new(),
            }),
        }
    }

    /// Stops both chains concurrently. Later and concurrent calls wait for
    /// the first teardown and do nothing else.
    pub async fn shutdown(&self) {
        self.inner
            .done
            .get_or_init(|| async {
                let chains = &self.inner.chains;
                let results = join_all(chains.iter().map(|chain| chain.stop())).await;
                for (chain, res) in chains.iter().zip(results) {
                    if let Err(err) = res {
                        warn!(chain = %chain.name(), %err, "failed to stop chain");
                    }
                }
                info!("localnet stopped");
            })
            .await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.done.initialized()
    }
}

/// Running chains, their wallets and the deployed bridge.
pub struct Session {
    config: HarnessConfig,
    chains: [Arc<LocalChain>; 2],
    deployment: Deployment,
    shutdown: ShutdownCoordinator,
}

async fn start_chain(
    backend: &dyn LedgerBackend,
    config: &HarnessConfig,
    slot: ChainSlot,
    accounts: Vec<Account>,
) -> Result<Arc<LocalChain>, StartupError> {
    let chain = config.chain(slot);
    LocalChain::create(
        backend,
        chain.name.clone(),
        chain.network_id,
        chain.port,
        accounts,
        config.block_time(),
    )
    .await
}

impl Session {
    /// Starts both chains, primes chain A and deploys the bridge.
    ///
    /// Chains that were started are stopped again before an error is
    /// returned.
    pub async fn start(
        config: HarnessConfig,
        backend: &dyn LedgerBackend,
        engine: &dyn BridgeEngine,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let balance = config.initial_balance()?;
        let accounts: Vec<_> = config
            .funded_signers()?
            .into_iter()
            .map(|signer| Account::new(signer, balance))
            .collect();

        let (a, b) = tokio::join!(
            start_chain(backend, &config, ChainSlot::A, accounts.clone()),
            start_chain(backend, &config, ChainSlot::B, accounts),
        );
        let chains = match (a, b) {
            (Ok(a), Ok(b)) => [a, b],
            (Ok(started), Err(err)) | (Err(err), Ok(started)) => {
                stop_quietly(&started).await;
                return Err(err.into());
            }
            (Err(err), Err(_)) => return Err(err.into()),
        };
        let shutdown = ShutdownCoordinator::new(chains.clone());

        match Self::prepare(&config, &chains, engine).await {
            Ok(deployment) => Ok(Self {
                config,
                chains,
                deployment,
                shutdown,
            }),
            Err(err) => {
                shutdown.shutdown().await;
                Err(err)
            }
        }
    }

    async fn prepare(
        config: &HarnessConfig,
        chains: &[Arc<LocalChain>; 2],
        engine: &dyn BridgeEngine,
    ) -> Result<Deployment, SessionError> {
        let relayer = config.relayer_signer()?;
        let wallets = chains
            .clone()
            .map(|chain| Wallet::new(relayer.clone(), chain));

        // Moves the relayer nonce on chain A so contract addresses differ
        // between the chains.
        let [chain_a, _] = chains;
        let priming_value = config.priming_value()?;
        let tx = chain_a
            .transfer(&relayer, Address::ZERO, priming_value)
            .await
            .map_err(|source| SessionError::Priming {
                chain: chain_a.name().to_string(),
                source,
            })?;
        info!(chain = %chain_a.name(), %tx, value = %priming_value, "priming transfer included");

        Ok(deploy(engine, config, &wallets).await?)
    }

    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn chain(&self, slot: ChainSlot) -> &Arc<LocalChain> {
        &self.chains[slot.index()]
    }

    pub fn side(&self, slot: ChainSlot) -> &ChainDeployment {
        self.deployment.side(slot)
    }

    pub fn wallet(&self, slot: ChainSlot) -> &Wallet {
        &self.side(slot).wallet
    }

    pub const fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// Handle for the signal path; shares its state with [`Self::shutdown`].
    pub fn shutdown_handle(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    pub async fn shutdown(&self) {
        self.shutdown.shutdown().await;
    }
}

async fn stop_quietly(chain: &LocalChain) {
    if let Err(err) = chain.stop().await {
        warn!(chain = %chain.name(), %err, "failed to stop chain after startup failure");
    }
}
