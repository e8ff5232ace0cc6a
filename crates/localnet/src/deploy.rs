//! Token and bridge deployment across both chains.

use crate::{
    chain::TypedChainId,
    config::{ChainConfig, ConfigError, HarnessConfig},
    engine::{
        Anchor, ArtifactError, BridgeDeployment, BridgeEngine, BridgeInput, BridgeSide,
        CircuitArtifacts, EngineError, SignerConfig, TokenContract, Wallet,
    },
    ledger::ChainSlot,
};
use alloy_primitives::{Address, U256};
use std::{collections::BTreeMap, fmt, sync::Arc};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to deploy token {symbol} on chain {chain}")]
    Token {
        chain: String,
        symbol: String,
        #[source]
        source: EngineError,
    },
    #[error(transparent)]
    Artifacts(#[from] ArtifactError),
    #[error("failed to deploy the bridge")]
    Bridge(#[source] EngineError),
    #[error("deployed bridge has no {what} on chain {chain}")]
    Missing {
        what: &'static str,
        chain: TypedChainId,
    },
    #[error("failed to set up the bridge on chain {chain}")]
    Setup {
        chain: String,
        #[source]
        source: EngineError,
    },
}

/// Everything deployed on one chain.
pub struct ChainDeployment {
    pub name: String,
    pub wallet: Wallet,
    pub asset_token: Arc<dyn TokenContract>,
    pub bridge_side: BridgeSide,
    pub anchor: Arc<dyn Anchor>,
    pub wrapped_token: Arc<dyn TokenContract>,
    pub handler: Address,
}

/// The bridge plus its per-chain parts, indexed by [`ChainSlot`].
pub struct Deployment {
    pub bridge: Arc<dyn BridgeDeployment>,
    pub denomination: U256,
    sides: [ChainDeployment; 2],
}

impl Deployment {
    pub fn side(&self, slot: ChainSlot) -> &ChainDeployment {
        &self.sides[slot.index()]
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, slot) in ChainSlot::ALL.into_iter().enumerate() {
            if i > 0 {
                writeln!(f, " --- --- --- --- --- --- --- --- --- --- --- --- ---")?;
            }
            let side = self.side(slot);
            let name = &side.name;
            writeln!(f, "Chain {slot} bridge ({name}): {}", side.bridge_side.address)?;
            writeln!(f, "Chain {slot} anchor ({name}): {}", side.anchor.address())?;
            writeln!(f, "Chain {slot} handler ({name}): {}", side.handler)?;
            writeln!(f, "Chain {slot} token ({name}): {}", side.asset_token.address())?;
            writeln!(f, "Chain {slot} wrapped token ({name}): {}", side.wrapped_token.address())?;
        }
        Ok(())
    }
}

async fn deploy_asset(
    engine: &dyn BridgeEngine,
    chain: &ChainConfig,
    wallet: &Wallet,
) -> Result<Arc<dyn TokenContract>, DeploymentError> {
    let token = engine
        .deploy_token(&chain.token_name, &chain.token_symbol, wallet)
        .await
        .map_err(|source| DeploymentError::Token {
            chain: chain.name.clone(),
            symbol: chain.token_symbol.clone(),
            source,
        })?;
    info!(
        chain = %chain.name,
        symbol = %chain.token_symbol,
        address = %token.address(),
        "asset token deployed"
    );
    Ok(token)
}

/// Binds the anchor signer and funds the relayer and the extra holders.
async fn set_up_side(
    engine: &dyn BridgeEngine,
    bridge: &dyn BridgeDeployment,
    chain: &ChainConfig,
    wallet: Wallet,
    asset_token: Arc<dyn TokenContract>,
    denomination: U256,
    mint_amount: U256,
) -> Result<ChainDeployment, DeploymentError> {
    let chain_id = wallet.chain_id();
    let missing = |what| DeploymentError::Missing { what, chain: chain_id };
    let setup = |source: EngineError| DeploymentError::Setup {
        chain: chain.name.clone(),
        source,
    };

    let bridge_side = bridge.bridge_side(chain_id).ok_or_else(|| missing("bridge side"))?;
    let anchor = bridge
        .anchor(chain_id, denomination)
        .ok_or_else(|| missing("anchor"))?;
    anchor.set_signer(&wallet).await.map_err(setup)?;
    let handler = anchor.handler().await.map_err(setup)?;
    info!(chain = %chain.name, %handler, "anchor handler");

    let wrapped_address = bridge
        .webb_token_address(chain_id)
        .ok_or_else(|| missing("wrapped token"))?;
    let wrapped_token = engine
        .token_from_address(wrapped_address, &wallet)
        .await
        .map_err(setup)?;
    wrapped_token
        .approve_spending(anchor.address())
        .await
        .map_err(setup)?;
    let extra = chain.extra_token_holders.iter().copied();
    let holders = std::iter::once(wallet.address()).chain(extra);
    for holder in holders {
        wrapped_token
            .mint_tokens(holder, mint_amount)
            .await
            .map_err(setup)?;
    }

    Ok(ChainDeployment {
        name: chain.name.clone(),
        wallet,
        asset_token,
        bridge_side,
        anchor,
        wrapped_token,
        handler,
    })
}

/// Deploys asset tokens on both chains, then a fixed deposit bridge between
/// them, and prepares each side for deposits.
///
/// Always deploys from scratch.
pub async fn deploy(
    engine: &dyn BridgeEngine,
    config: &HarnessConfig,
    wallets: &[Wallet; 2],
) -> Result<Deployment, DeploymentError> {
    let denomination = config.denomination()?;
    let mint_amount = config.mint_amount()?;
    let [wallet_a, wallet_b] = wallets;

    let asset_a = deploy_asset(engine, &config.chain_a, wallet_a).await?;
    let asset_b = deploy_asset(engine, &config.chain_b, wallet_b).await?;

    let artifacts = CircuitArtifacts::load(&config.artifacts_dir)?;
    let input = BridgeInput {
        asset: BTreeMap::from([
            (wallet_a.chain_id(), vec![asset_a.address()]),
            (wallet_b.chain_id(), vec![asset_b.address()]),
        ]),
        anchor_sizes: vec![denomination],
        chain_ids: vec![wallet_a.chain_id(), wallet_b.chain_id()],
    };
    let signers: SignerConfig = wallets
        .iter()
        .map(|wallet| (wallet.chain_id(), wallet.clone()))
        .collect();
    let bridge = engine
        .deploy_bridge(input, signers.clone(), signers, &artifacts)
        .await
        .map_err(DeploymentError::Bridge)?;

    let side_a = set_up_side(
        engine,
        bridge.as_ref(),
        &config.chain_a,
        wallet_a.clone(),
        asset_a,
        denomination,
        mint_amount,
    )
    .await?;
    let side_b = set_up_side(
        engine,
        bridge.as_ref(),
        &config.chain_b,
        wallet_b.clone(),
        asset_b,
        denomination,
        mint_amount,
    )
    .await?;

    let deployment = Deployment {
        bridge,
        denomination,
        sides: [side_a, side_b],
    };
    for slot in ChainSlot::ALL {
        let side = deployment.side(slot);
        info!(
            chain = %side.name,
            bridge = %side.bridge_side.address,
            anchor = %side.anchor.address(),
            token = %side.asset_token.address(),
            wrapped = %side.wrapped_token.address(),
            "chain ready"
        );
    }
    Ok(deployment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::InMemoryBackend,
        engine::SimulatedEngine,
        test_utils::{start_wallets, test_config},
    };

    #[tokio::test]
    async fn deploys_and_funds_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let backend = InMemoryBackend::new();
        let wallets = start_wallets(&backend, &config).await;
        let engine = SimulatedEngine::new();

        let deployment = deploy(&engine, &config, &wallets).await.unwrap();
        let mint = config.mint_amount().unwrap();

        for slot in ChainSlot::ALL {
            let side = deployment.side(slot);
            assert_eq!(side.anchor.chain_id(), wallets[slot.index()].chain_id());
            assert_eq!(side.wrapped_token.balance_of(side.wallet.address()).await.unwrap(), mint);
            for holder in &config.chain(slot).extra_token_holders {
                assert_eq!(side.wrapped_token.balance_of(*holder).await.unwrap(), mint);
            }
        }
        assert_ne!(
            deployment.side(ChainSlot::A).anchor.address(),
            deployment.side(ChainSlot::B).anchor.address()
        );

        let receipt = deployment
            .side(ChainSlot::A)
            .anchor
            .deposit(wallets[1].chain_id())
            .await
            .unwrap();
        assert_eq!(receipt.origin_chain_id, wallets[0].chain_id());

        let listing = deployment.to_string();
        assert!(listing.contains("Chain a anchor (Hermes): "));
        assert!(listing.contains("Chain b wrapped token (Athena): "));
    }

    #[tokio::test]
    async fn missing_artifacts_abort_deployment() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.artifacts_dir = dir.path().join("missing");
        let backend = InMemoryBackend::new();
        let wallets = start_wallets(&backend, &config).await;

        let err = deploy(&SimulatedEngine::new(), &config, &wallets)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DeploymentError::Artifacts(_)));
    }

    #[tokio::test]
    async fn redeploying_creates_a_fresh_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let backend = InMemoryBackend::new();
        let wallets = start_wallets(&backend, &config).await;
        let engine = SimulatedEngine::new();

        let first = deploy(&engine, &config, &wallets).await.unwrap();
        let second = deploy(&engine, &config, &wallets).await.unwrap();
        assert_ne!(
            first.side(ChainSlot::A).anchor.address(),
            second.side(ChainSlot::A).anchor.address()
        );
    }
}
