//! In-process bridge engine.
//!
//! Contracts are plain state machines: mintable tokens, one bridge side per
//! chain and fixed-denomination anchors backed by [`MerkleTree`]s. Proofs are
//! checked by membership against the neighbor roots an anchor has been told
//! about, which is what a relay updates.

use super::{
    Anchor, BridgeDeployment, BridgeEngine, BridgeInput, BridgeSide, CircuitArtifacts,
    DepositReceipt, EngineError, MerkleTree, ROOT_HISTORY_SIZE, SignerConfig, TokenContract,
    Wallet,
};
use crate::chain::TypedChainId;
use alloy_primitives::{Address, B256, U256, keccak256};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
};
use tracing::{debug, info};

const WRAPPED_TOKEN_NAME: &str = "Webb Wrapped Token";
const WRAPPED_TOKEN_SYMBOL: &str = "webbWRAP";

fn random_b256() -> B256 {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes[..]);
    B256::from(bytes)
}

fn commitment(destination: TypedChainId, nullifier: B256, secret: B256) -> B256 {
    let mut buf = Vec::with_capacity(8 + 32 + 32);
    buf.extend_from_slice(&destination.to_be_bytes());
    buf.extend_from_slice(nullifier.as_slice());
    buf.extend_from_slice(secret.as_slice());
    keccak256(buf)
}

#[derive(Debug, Default)]
struct TokenState {
    name: String,
    symbol: String,
    minters: HashSet<Address>,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
}

impl TokenState {
    fn balance(&self, owner: Address) -> U256 {
        self.balances.get(&owner).copied().unwrap_or_default()
    }

    fn transfer_from(
        &mut self,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), EngineError> {
        let allowance = self.allowances.get(&(owner, spender)).copied().unwrap_or_default();
        if allowance < amount {
            return Err(EngineError::InsufficientAllowance {
                owner,
                spender,
                required: amount,
            });
        }
        let balance = self.balance(owner);
        if balance < amount {
            return Err(EngineError::InsufficientBalance {
                owner,
                balance,
                required: amount,
            });
        }

        if allowance != U256::MAX {
            self.allowances.insert((owner, spender), allowance - amount);
        }
        self.balances.insert(owner, balance - amount);
        *self.balances.entry(spender).or_default() += amount;
        Ok(())
    }
}

/// Tokens and deployer nonces shared by every deployment of one engine.
#[derive(Debug, Default)]
struct Registry {
    tokens: HashMap<(TypedChainId, Address), TokenState>,
    nonces: HashMap<(TypedChainId, Address), u64>,
}

impl Registry {
    /// Next contract address for `deployer` on `chain`.
    fn next_address(&mut self, chain: TypedChainId, deployer: Address) -> Address {
        let nonce = self.nonces.entry((chain, deployer)).or_default();
        let mut buf = Vec::with_capacity(8 + 20 + 8);
        buf.extend_from_slice(&chain.to_be_bytes());
        buf.extend_from_slice(deployer.as_slice());
        buf.extend_from_slice(&nonce.to_be_bytes());
        *nonce += 1;
        Address::from_word(keccak256(buf))
    }

    fn token_mut(
        &mut self,
        chain: TypedChainId,
        address: Address,
    ) -> Result<&mut TokenState, EngineError> {
        self.tokens
            .get_mut(&(chain, address))
            .ok_or(EngineError::UnknownToken(address, chain))
    }
}

/// In-process implementation of [`BridgeEngine`].
#[derive(Debug, Clone, Default)]
pub struct SimulatedEngine {
    registry: Arc<Mutex<Registry>>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BridgeEngine for SimulatedEngine {
    async fn deploy_token(
        &self,
        name: &str,
        symbol: &str,
        deployer: &Wallet,
    ) -> Result<Arc<dyn TokenContract>, EngineError> {
        deployer.chain.block_number().await?;

        let chain = deployer.chain_id();
        let address = {
            let mut registry = self.registry.lock();
            let address = registry.next_address(chain, deployer.address());
            registry.tokens.insert(
                (chain, address),
                TokenState {
                    name: name.to_string(),
                    symbol: symbol.to_string(),
                    minters: HashSet::from([deployer.address()]),
                    ..Default::default()
                },
            );
            address
        };
        info!(%chain, %address, name, symbol, "token deployed");

        Ok(Arc::new(SimToken {
            chain,
            address,
            wallet: deployer.clone(),
            registry: self.registry.clone(),
        }))
    }

    async fn token_from_address(
        &self,
        address: Address,
        wallet: &Wallet,
    ) -> Result<Arc<dyn TokenContract>, EngineError> {
        let chain = wallet.chain_id();
        if !self.registry.lock().tokens.contains_key(&(chain, address)) {
            return Err(EngineError::UnknownToken(address, chain));
        }
        Ok(Arc::new(SimToken {
            chain,
            address,
            wallet: wallet.clone(),
            registry: self.registry.clone(),
        }))
    }

    async fn deploy_bridge(
        &self,
        input: BridgeInput,
        deployers: SignerConfig,
        governors: SignerConfig,
        artifacts: &CircuitArtifacts,
    ) -> Result<Arc<dyn BridgeDeployment>, EngineError> {
        if input.chain_ids.len() < 2 || input.anchor_sizes.is_empty() {
            return Err(EngineError::EmptyBridge);
        }
        if artifacts.is_empty() {
            return Err(EngineError::EmptyArtifacts);
        }

        for chain in &input.chain_ids {
            let chain = *chain;
            let deployer = deployers
                .get(&chain)
                .ok_or(EngineError::MissingInput { what: "deployer", chain })?;
            if deployer.chain_id() != chain {
                return Err(EngineError::WrongChain {
                    wallet: deployer.chain_id(),
                    target: chain,
                });
            }
            if !governors.contains_key(&chain) {
                return Err(EngineError::MissingInput { what: "governor", chain });
            }
            if input.asset.get(&chain).is_none_or(|assets| assets.is_empty()) {
                return Err(EngineError::MissingInput { what: "asset", chain });
            }
            deployer.chain.block_number().await?;
        }

        let mut bridge = BridgeState::default();
        {
            let mut registry = self.registry.lock();
            for asset in input.chain_ids.iter().flat_map(|chain| {
                input.asset[chain].iter().map(move |asset| (*chain, *asset))
            }) {
                registry.token_mut(asset.0, asset.1)?;
            }

            for &chain in &input.chain_ids {
                let deployer = deployers[&chain].address();
                let governor = governors[&chain].address();

                let side = BridgeSide {
                    address: registry.next_address(chain, deployer),
                    handler: registry.next_address(chain, deployer),
                    governor,
                };
                let wrapped = registry.next_address(chain, deployer);
                let mut minters = HashSet::from([deployer]);

                for &denomination in &input.anchor_sizes {
                    let address = registry.next_address(chain, deployer);
                    minters.insert(address);
                    bridge.anchors.insert(
                        (chain, denomination),
                        AnchorState {
                            address,
                            token: wrapped,
                            handler: side.handler,
                            signer: None,
                            tree: MerkleTree::default(),
                            synced_leaves: 0,
                            latest_synced_block: 0,
                            linked: input
                                .chain_ids
                                .iter()
                                .copied()
                                .filter(|c| *c != chain)
                                .collect(),
                            edges: BTreeMap::new(),
                            nullifiers: HashSet::new(),
                        },
                    );
                }

                registry.tokens.insert(
                    (chain, wrapped),
                    TokenState {
                        name: WRAPPED_TOKEN_NAME.to_string(),
                        symbol: WRAPPED_TOKEN_SYMBOL.to_string(),
                        minters,
                        ..Default::default()
                    },
                );
                bridge.sides.insert(chain, side);
                bridge.wrapped_tokens.insert(chain, wrapped);
                info!(
                    %chain,
                    bridge = %side.address,
                    handler = %side.handler,
                    %wrapped,
                    "bridge side deployed"
                );
            }
        }
        info!(
            chains = input.chain_ids.len(),
            anchors = bridge.anchors.len(),
            artifacts = %artifacts.digest(),
            "fixed deposit bridge deployed"
        );

        Ok(Arc::new(SimDeployment {
            registry: self.registry.clone(),
            bridge: Arc::new(Mutex::new(bridge)),
        }))
    }
}

struct SimToken {
    chain: TypedChainId,
    address: Address,
    wallet: Wallet,
    registry: Arc<Mutex<Registry>>,
}

#[async_trait]
impl TokenContract for SimToken {
    fn address(&self) -> Address {
        self.address
    }

    async fn approve_spending(&self, spender: Address) -> Result<(), EngineError> {
        let mut registry = self.registry.lock();
        let token = registry.token_mut(self.chain, self.address)?;
        token
            .allowances
            .insert((self.wallet.address(), spender), U256::MAX);
        debug!(
            token = %token.symbol,
            owner = %self.wallet.address(),
            %spender,
            "approved spending"
        );
        Ok(())
    }

    async fn mint_tokens(&self, to: Address, amount: U256) -> Result<(), EngineError> {
        let minter = self.wallet.address();
        let mut registry = self.registry.lock();
        let token = registry.token_mut(self.chain, self.address)?;
        if !token.minters.contains(&minter) {
            return Err(EngineError::NotMinter(minter));
        }
        *token.balances.entry(to).or_default() += amount;
        debug!(token = %token.symbol, name = %token.name, %to, %amount, "minted");
        Ok(())
    }

    async fn balance_of(&self, owner: Address) -> Result<U256, EngineError> {
        let mut registry = self.registry.lock();
        Ok(registry.token_mut(self.chain, self.address)?.balance(owner))
    }
}

/// A root of another chain's anchor, as last relayed.
#[derive(Debug, Clone, Copy)]
struct Edge {
    root: B256,
    leaf_count: usize,
    block: u64,
}

#[derive(Debug)]
struct AnchorState {
    address: Address,
    token: Address,
    handler: Address,
    signer: Option<Wallet>,
    tree: MerkleTree,
    synced_leaves: usize,
    latest_synced_block: u64,
    linked: Vec<TypedChainId>,
    edges: BTreeMap<TypedChainId, VecDeque<Edge>>,
    nullifiers: HashSet<B256>,
}

impl AnchorState {
    fn bound_signer(&self, chain: TypedChainId) -> Result<&Wallet, EngineError> {
        self.signer.as_ref().ok_or(EngineError::SignerNotBound(chain))
    }
}

#[derive(Debug, Default)]
struct BridgeState {
    sides: BTreeMap<TypedChainId, BridgeSide>,
    wrapped_tokens: BTreeMap<TypedChainId, Address>,
    anchors: BTreeMap<(TypedChainId, U256), AnchorState>,
}

impl BridgeState {
    fn anchor(&self, key: (TypedChainId, U256)) -> Result<&AnchorState, EngineError> {
        self.anchors.get(&key).ok_or(EngineError::UnknownChain(key.0))
    }

    fn anchor_mut(&mut self, key: (TypedChainId, U256)) -> Result<&mut AnchorState, EngineError> {
        self.anchors.get_mut(&key).ok_or(EngineError::UnknownChain(key.0))
    }
}

struct SimDeployment {
    registry: Arc<Mutex<Registry>>,
    bridge: Arc<Mutex<BridgeState>>,
}

impl SimDeployment {
    fn relay(&self, key: (TypedChainId, U256)) -> Result<(), EngineError> {
        let mut bridge = self.bridge.lock();
        let source = bridge.anchor(key)?;
        source.bound_signer(key.0)?;

        let edge = Edge {
            root: source.tree.root(),
            leaf_count: source.tree.len(),
            block: source.latest_synced_block,
        };
        for linked in source.linked.clone() {
            let target = bridge.anchor_mut((linked, key.1))?;
            let history = target.edges.entry(key.0).or_default();
            if history.len() == ROOT_HISTORY_SIZE {
                history.pop_front();
            }
            history.push_back(edge);
            debug!(
                from = %key.0,
                to = %linked,
                root = %edge.root,
                leaves = edge.leaf_count,
                block = edge.block,
                "neighbor root updated"
            );
        }
        Ok(())
    }

    fn release(
        &self,
        receipt: &DepositReceipt,
        amount: U256,
        recipient: Address,
        signer: &Wallet,
    ) -> Result<(), EngineError> {
        let chain = signer.chain_id();
        let key = (chain, amount);
        let mut bridge = self.bridge.lock();

        if !bridge.anchors.contains_key(&key) {
            let denomination = bridge
                .anchors
                .keys()
                .find(|(c, _)| *c == chain)
                .map(|(_, d)| *d)
                .ok_or(EngineError::UnknownChain(chain))?;
            return Err(EngineError::InvalidAmount { amount, denomination });
        }

        let anchor = bridge.anchor(key)?;
        anchor.bound_signer(chain)?;
        if receipt.destination_chain_id != chain {
            return Err(EngineError::WrongDestination {
                expected: receipt.destination_chain_id,
                actual: chain,
            });
        }
        if anchor.nullifiers.contains(&receipt.nullifier) {
            return Err(EngineError::NullifierSpent(receipt.nullifier));
        }

        let origin = receipt.origin_chain_id;
        let index = receipt.leaf_index;
        if origin == chain {
            if anchor.tree.leaf(index) != Some(receipt.commitment) {
                return Err(EngineError::InvalidProof(receipt.commitment));
            }
        } else {
            let source = bridge.anchor((origin, amount))?;
            if source.tree.leaf(index) != Some(receipt.commitment) {
                return Err(EngineError::InvalidProof(receipt.commitment));
            }
            let covered = anchor.edges.get(&origin).is_some_and(|history| {
                history.iter().any(|edge| {
                    edge.leaf_count > index as usize
                        && source.tree.contains_under_root(index, receipt.commitment, edge.root)
                })
            });
            if !covered {
                return Err(EngineError::UnknownRoot {
                    chain,
                    origin,
                    leaf_index: index,
                });
            }
        }

        let anchor = bridge.anchor_mut(key)?;
        anchor.nullifiers.insert(receipt.nullifier);
        let token = anchor.token;

        let mut registry = self.registry.lock();
        *registry.token_mut(chain, token)?.balances.entry(recipient).or_default() += amount;
        Ok(())
    }
}

#[async_trait]
impl BridgeDeployment for SimDeployment {
    fn bridge_side(&self, chain_id: TypedChainId) -> Option<BridgeSide> {
        self.bridge.lock().sides.get(&chain_id).copied()
    }

    fn anchor(&self, chain_id: TypedChainId, denomination: U256) -> Option<Arc<dyn Anchor>> {
        let bridge = self.bridge.lock();
        let state = bridge.anchors.get(&(chain_id, denomination))?;
        Some(Arc::new(SimAnchor {
            chain: chain_id,
            denomination,
            address: state.address,
            registry: self.registry.clone(),
            bridge: self.bridge.clone(),
        }))
    }

    fn webb_token_address(&self, chain_id: TypedChainId) -> Option<Address> {
        self.bridge.lock().wrapped_tokens.get(&chain_id).copied()
    }

    async fn update_linked_anchors(&self, anchor: &dyn Anchor) -> Result<(), EngineError> {
        self.relay((anchor.chain_id(), anchor.denomination()))
    }

    async fn withdraw(
        &self,
        receipt: &DepositReceipt,
        amount: U256,
        recipient: Address,
        relayer: Address,
        signer: &Wallet,
    ) -> Result<bool, EngineError> {
        let block = signer.chain.block_number().await?;
        self.release(receipt, amount, recipient, signer)?;
        info!(
            chain = %signer.chain_id(),
            origin = %receipt.origin_chain_id,
            %recipient,
            %relayer,
            %amount,
            block,
            "withdrawal released"
        );
        Ok(true)
    }
}

struct SimAnchor {
    chain: TypedChainId,
    denomination: U256,
    address: Address,
    registry: Arc<Mutex<Registry>>,
    bridge: Arc<Mutex<BridgeState>>,
}

impl SimAnchor {
    fn key(&self) -> (TypedChainId, U256) {
        (self.chain, self.denomination)
    }

    fn signer(&self) -> Result<Wallet, EngineError> {
        self.bridge.lock().anchor(self.key())?.bound_signer(self.chain).cloned()
    }

    fn insert_deposit(
        &self,
        depositor: Address,
        destination: TypedChainId,
        block_number: u64,
    ) -> Result<DepositReceipt, EngineError> {
        let mut bridge = self.bridge.lock();
        let anchor = bridge.anchor_mut(self.key())?;
        if destination != self.chain && !anchor.linked.contains(&destination) {
            return Err(EngineError::UnknownChain(destination));
        }

        {
            let mut registry = self.registry.lock();
            registry
                .token_mut(self.chain, anchor.token)?
                .transfer_from(depositor, anchor.address, self.denomination)?;
        }

        let nullifier = random_b256();
        let secret = random_b256();
        let commitment = commitment(destination, nullifier, secret);
        let leaf_index = anchor.tree.insert(commitment).ok_or(EngineError::TreeFull)?;
        anchor.synced_leaves = anchor.tree.len();
        anchor.latest_synced_block = anchor.latest_synced_block.max(block_number);

        Ok(DepositReceipt {
            origin_chain_id: self.chain,
            destination_chain_id: destination,
            commitment,
            nullifier,
            secret,
            leaf_index,
            block_number,
        })
    }
}

#[async_trait]
impl Anchor for SimAnchor {
    fn address(&self) -> Address {
        self.address
    }

    fn chain_id(&self) -> TypedChainId {
        self.chain
    }

    fn denomination(&self) -> U256 {
        self.denomination
    }

    fn latest_synced_block(&self) -> u64 {
        self.bridge
            .lock()
            .anchors
            .get(&self.key())
            .map(|anchor| anchor.latest_synced_block)
            .unwrap_or_default()
    }

    async fn set_signer(&self, wallet: &Wallet) -> Result<(), EngineError> {
        if wallet.chain_id() != self.chain {
            return Err(EngineError::WrongChain {
                wallet: wallet.chain_id(),
                target: self.chain,
            });
        }
        self.bridge.lock().anchor_mut(self.key())?.signer = Some(wallet.clone());
        debug!(
            chain = %self.chain,
            anchor = %self.address,
            signer = %wallet.address(),
            "anchor signer bound"
        );
        Ok(())
    }

    async fn handler(&self) -> Result<Address, EngineError> {
        Ok(self.bridge.lock().anchor(self.key())?.handler)
    }

    async fn deposit(&self, destination: TypedChainId) -> Result<DepositReceipt, EngineError> {
        let wallet = self.signer()?;
        let block_number = wallet.chain.block_number().await?;
        let receipt = self.insert_deposit(wallet.address(), destination, block_number)?;
        debug!(
            chain = %self.chain,
            %destination,
            commitment = %receipt.commitment,
            leaf = receipt.leaf_index,
            "deposit committed"
        );
        Ok(receipt)
    }

    async fn update(&self, block_number: u64) -> Result<(), EngineError> {
        let mut bridge = self.bridge.lock();
        let anchor = bridge.anchor_mut(self.key())?;
        let fetched = anchor.tree.len() - anchor.synced_leaves;
        anchor.synced_leaves = anchor.tree.len();
        anchor.latest_synced_block = anchor.latest_synced_block.max(block_number);
        debug!(chain = %self.chain, from_block = block_number, fetched, "anchor resynced");
        Ok(())
    }

    async fn last_root(&self) -> Result<B256, EngineError> {
        Ok(self.bridge.lock().anchor(self.key())?.tree.root())
    }

    async fn latest_neighbor_roots(&self) -> Result<Vec<B256>, EngineError> {
        let bridge = self.bridge.lock();
        let anchor = bridge.anchor(self.key())?;
        Ok(anchor
            .linked
            .iter()
            .map(|chain| {
                anchor
                    .edges
                    .get(chain)
                    .and_then(|history| history.back())
                    .map(|edge| edge.root)
                    .unwrap_or_default()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Account, InMemoryBackend, LocalChain, chain_id_type};
    use alloy_primitives::utils::parse_ether;
    use std::time::Duration;

    const KEY: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";

    fn artifacts() -> CircuitArtifacts {
        CircuitArtifacts {
            wasm: b"wasm".to_vec(),
            witness_calculator: b"js".to_vec(),
            zkey: b"zkey".to_vec(),
        }
    }

    async fn wallets(backend: &InMemoryBackend) -> (Wallet, Wallet) {
        let signer: alloy::signers::local::PrivateKeySigner = KEY.parse().unwrap();
        let account = Account::new(signer.clone(), parse_ether("1000").unwrap());
        let block = Duration::from_secs(1);
        let a = LocalChain::create(backend, "Hermes", 5001, None, vec![account.clone()], block)
            .await
            .unwrap();
        let b = LocalChain::create(backend, "Athena", 5002, None, vec![account], block)
            .await
            .unwrap();
        (Wallet::new(signer.clone(), a), Wallet::new(signer, b))
    }

    struct Fixture {
        engine: SimulatedEngine,
        a: Wallet,
        b: Wallet,
        deployment: Arc<dyn BridgeDeployment>,
        anchor_a: Arc<dyn Anchor>,
        anchor_b: Arc<dyn Anchor>,
    }

    async fn fixture(bind_signers: bool) -> Fixture {
        let backend = InMemoryBackend::new();
        let engine = SimulatedEngine::new();
        let (a, b) = wallets(&backend).await;
        let one = parse_ether("1").unwrap();

        let token_a = engine.deploy_token("ChainA", "webbA", &a).await.unwrap();
        let token_b = engine.deploy_token("ChainB", "webbB", &b).await.unwrap();
        let input = BridgeInput {
            asset: BTreeMap::from([
                (a.chain_id(), vec![token_a.address()]),
                (b.chain_id(), vec![token_b.address()]),
            ]),
            anchor_sizes: vec![one],
            chain_ids: vec![a.chain_id(), b.chain_id()],
        };
        let signers = SignerConfig::from([(a.chain_id(), a.clone()), (b.chain_id(), b.clone())]);
        let deployment = engine
            .deploy_bridge(input, signers.clone(), signers, &artifacts())
            .await
            .unwrap();

        let anchor_a = deployment.anchor(a.chain_id(), one).unwrap();
        let anchor_b = deployment.anchor(b.chain_id(), one).unwrap();
        for (wallet, anchor) in [(&a, &anchor_a), (&b, &anchor_b)] {
            let wrapped = deployment.webb_token_address(wallet.chain_id()).unwrap();
            let token = engine.token_from_address(wrapped, wallet).await.unwrap();
            token.approve_spending(anchor.address()).await.unwrap();
            token.mint_tokens(wallet.address(), parse_ether("10").unwrap()).await.unwrap();
            if bind_signers {
                anchor.set_signer(wallet).await.unwrap();
            }
        }

        Fixture {
            engine,
            a,
            b,
            deployment,
            anchor_a,
            anchor_b,
        }
    }

    #[tokio::test]
    async fn unbound_anchor_rejects_privileged_calls() {
        let f = fixture(false).await;
        assert!(matches!(
            f.anchor_a.deposit(f.b.chain_id()).await,
            Err(EngineError::SignerNotBound(_))
        ));
        assert!(matches!(
            f.deployment.update_linked_anchors(f.anchor_a.as_ref()).await,
            Err(EngineError::SignerNotBound(_))
        ));
    }

    #[tokio::test]
    async fn anchors_on_distinct_chains_get_distinct_addresses() {
        let f = fixture(true).await;
        assert_ne!(f.anchor_a.address(), f.anchor_b.address());
        assert_eq!(f.anchor_a.chain_id(), chain_id_type(5001));
        assert_ne!(
            f.deployment.bridge_side(f.a.chain_id()).unwrap().address,
            f.deployment.bridge_side(f.b.chain_id()).unwrap().address
        );
    }

    #[tokio::test]
    async fn deposit_changes_root_and_pulls_denomination() {
        let f = fixture(true).await;
        let before = f.anchor_a.last_root().await.unwrap();

        let receipt = f.anchor_a.deposit(f.b.chain_id()).await.unwrap();
        assert_eq!(receipt.origin_chain_id, f.a.chain_id());
        assert_eq!(receipt.destination_chain_id, f.b.chain_id());
        assert_eq!(receipt.leaf_index, 0);
        assert_ne!(before, f.anchor_a.last_root().await.unwrap());
    }

    #[tokio::test]
    async fn withdraw_requires_relayed_root() {
        let f = fixture(true).await;
        let one = parse_ether("1").unwrap();
        let receipt = f.anchor_a.deposit(f.b.chain_id()).await.unwrap();

        let err = f
            .deployment
            .withdraw(&receipt, one, Address::repeat_byte(0xd6), f.b.address(), &f.b)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownRoot { .. }));

        f.anchor_a.update(f.anchor_a.latest_synced_block()).await.unwrap();
        f.deployment.update_linked_anchors(f.anchor_a.as_ref()).await.unwrap();
        assert_eq!(
            f.anchor_b.latest_neighbor_roots().await.unwrap(),
            vec![f.anchor_a.last_root().await.unwrap()]
        );

        let recipient = Address::repeat_byte(0xd6);
        assert!(
            f.deployment
                .withdraw(&receipt, one, recipient, f.b.address(), &f.b)
                .await
                .unwrap()
        );

        let wrapped = f.deployment.webb_token_address(f.b.chain_id()).unwrap();
        let token = f.engine.token_from_address(wrapped, &f.b).await.unwrap();
        assert_eq!(token.balance_of(recipient).await.unwrap(), one);
    }

    #[tokio::test]
    async fn nullifier_cannot_be_spent_twice() {
        let f = fixture(true).await;
        let one = parse_ether("1").unwrap();
        let receipt = f.anchor_a.deposit(f.b.chain_id()).await.unwrap();
        f.deployment.update_linked_anchors(f.anchor_a.as_ref()).await.unwrap();

        let recipient = Address::repeat_byte(0xd6);
        let withdrawn = f.deployment.withdraw(&receipt, one, recipient, f.b.address(), &f.b).await;
        assert!(withdrawn.unwrap());
        assert!(matches!(
            f.deployment.withdraw(&receipt, one, recipient, f.b.address(), &f.b).await,
            Err(EngineError::NullifierSpent(_))
        ));
    }

    #[tokio::test]
    async fn withdraw_on_the_origin_chain_is_rejected() {
        let f = fixture(true).await;
        let one = parse_ether("1").unwrap();
        let receipt = f.anchor_a.deposit(f.b.chain_id()).await.unwrap();
        f.deployment.update_linked_anchors(f.anchor_a.as_ref()).await.unwrap();

        assert!(matches!(
            f.deployment.withdraw(&receipt, one, Address::ZERO, f.a.address(), &f.a).await,
            Err(EngineError::WrongDestination { .. })
        ));
        assert!(matches!(
            f.deployment
                .withdraw(&receipt, parse_ether("2").unwrap(), Address::ZERO, f.b.address(), &f.b)
                .await,
            Err(EngineError::InvalidAmount { .. })
        ));
    }

    #[tokio::test]
    async fn deposit_needs_allowance() {
        let backend = InMemoryBackend::new();
        let engine = SimulatedEngine::new();
        let (a, b) = wallets(&backend).await;
        let token_a = engine.deploy_token("ChainA", "webbA", &a).await.unwrap();
        let token_b = engine.deploy_token("ChainB", "webbB", &b).await.unwrap();
        let one = parse_ether("1").unwrap();
        let signers = SignerConfig::from([(a.chain_id(), a.clone()), (b.chain_id(), b.clone())]);
        let deployment = engine
            .deploy_bridge(
                BridgeInput {
                    asset: BTreeMap::from([
                        (a.chain_id(), vec![token_a.address()]),
                        (b.chain_id(), vec![token_b.address()]),
                    ]),
                    anchor_sizes: vec![one],
                    chain_ids: vec![a.chain_id(), b.chain_id()],
                },
                signers.clone(),
                signers,
                &artifacts(),
            )
            .await
            .unwrap();

        let anchor = deployment.anchor(a.chain_id(), one).unwrap();
        anchor.set_signer(&a).await.unwrap();
        assert!(matches!(
            anchor.deposit(b.chain_id()).await,
            Err(EngineError::InsufficientAllowance { .. })
        ));
    }

    #[tokio::test]
    async fn deploy_bridge_validates_input() {
        let backend = InMemoryBackend::new();
        let engine = SimulatedEngine::new();
        let (a, b) = wallets(&backend).await;
        let token_a = engine.deploy_token("ChainA", "webbA", &a).await.unwrap();
        let one = parse_ether("1").unwrap();
        let signers = SignerConfig::from([(a.chain_id(), a.clone()), (b.chain_id(), b.clone())]);
        let input = BridgeInput {
            asset: BTreeMap::from([(a.chain_id(), vec![token_a.address()])]),
            anchor_sizes: vec![one],
            chain_ids: vec![a.chain_id(), b.chain_id()],
        };

        let missing_asset = engine
            .deploy_bridge(input.clone(), signers.clone(), signers.clone(), &artifacts())
            .await
            .err()
            .unwrap();
        assert!(matches!(missing_asset, EngineError::MissingInput { what: "asset", .. }));

        let empty = CircuitArtifacts {
            wasm: vec![],
            witness_calculator: vec![],
            zkey: vec![],
        };
        let no_artifacts = engine
            .deploy_bridge(input, signers.clone(), signers, &empty)
            .await
            .err()
            .unwrap();
        assert!(matches!(no_artifacts, EngineError::EmptyArtifacts));
    }

    #[tokio::test]
    async fn only_minters_can_mint() {
        let backend = InMemoryBackend::new();
        let engine = SimulatedEngine::new();
        let (a, _) = wallets(&backend).await;
        let token = engine.deploy_token("ChainA", "webbA", &a).await.unwrap();

        let other: alloy::signers::local::PrivateKeySigner =
            "0x0000000000000000000000000000000000000000000000000000000000000002"
                .parse()
                .unwrap();
        let stranger = engine
            .token_from_address(token.address(), &Wallet::new(other, a.chain.clone()))
            .await
            .unwrap();
        assert!(matches!(
            stranger.mint_tokens(Address::ZERO, U256::from(1)).await,
            Err(EngineError::NotMinter(_))
        ));

        token.mint_tokens(Address::ZERO, U256::from(5)).await.unwrap();
        assert_eq!(token.balance_of(Address::ZERO).await.unwrap(), U256::from(5));
    }
}
