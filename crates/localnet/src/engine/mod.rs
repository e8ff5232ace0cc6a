//! Bridge engine seam.
//!
//! The harness only sequences calls into the bridge; tokens, anchors, root
//! relays and proof checks live behind these traits. [`SimulatedEngine`]
//! is the in-process implementation shipped with the harness.

use crate::chain::{LedgerError, LocalChain, TypedChainId};
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::{collections::BTreeMap, fmt, sync::Arc};

mod artifacts;
mod merkle;
mod sim;

pub use artifacts::{ArtifactError, CircuitArtifacts, WASM_FILE, WITNESS_CALCULATOR_FILE, ZKEY_FILE};
pub use merkle::{MerkleTree, ROOT_HISTORY_SIZE, TREE_DEPTH};
pub use sim::SimulatedEngine;

/// A signer connected to the chain it submits to.
#[derive(Debug, Clone)]
pub struct Wallet {
    pub signer: PrivateKeySigner,
    pub chain: Arc<LocalChain>,
}

impl Wallet {
    pub fn new(signer: PrivateKeySigner, chain: Arc<LocalChain>) -> Self {
        Self { signer, chain }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn chain_id(&self) -> TypedChainId {
        self.chain.chain_id()
    }
}

/// Client-side record of a committed deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositReceipt {
    pub origin_chain_id: TypedChainId,
    pub destination_chain_id: TypedChainId,
    pub commitment: B256,
    pub nullifier: B256,
    pub secret: B256,
    pub leaf_index: u32,
    pub block_number: u64,
}

impl fmt::Display for DepositReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ origin: {}, destination: {}, commitment: {}, leaf: {}, block: {} }}",
            self.origin_chain_id,
            self.destination_chain_id,
            self.commitment,
            self.leaf_index,
            self.block_number
        )
    }
}

/// Bridge contract pair living on one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSide {
    pub address: Address,
    pub handler: Address,
    pub governor: Address,
}

/// Input of a fixed deposit bridge deployment.
#[derive(Debug, Clone, Default)]
pub struct BridgeInput {
    /// Wrappable asset tokens per chain.
    pub asset: BTreeMap<TypedChainId, Vec<Address>>,
    /// One anchor per chain is created for each size.
    pub anchor_sizes: Vec<U256>,
    pub chain_ids: Vec<TypedChainId>,
}

/// Signers keyed by the chain they act on.
pub type SignerConfig = BTreeMap<TypedChainId, Wallet>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no signer bound to the anchor on chain {0}")]
    SignerNotBound(TypedChainId),
    #[error("wallet for chain {wallet} cannot act on chain {target}")]
    WrongChain {
        wallet: TypedChainId,
        target: TypedChainId,
    },
    #[error("chain {0} is not part of the bridge")]
    UnknownChain(TypedChainId),
    #[error("token {0} does not exist on chain {1}")]
    UnknownToken(Address, TypedChainId),
    #[error("{0} is not allowed to mint")]
    NotMinter(Address),
    #[error("{owner} holds {balance}, {required} required")]
    InsufficientBalance {
        owner: Address,
        balance: U256,
        required: U256,
    },
    #[error("allowance of {owner} for {spender} is below {required}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        required: U256,
    },
    #[error("missing {what} for chain {chain}")]
    MissingInput {
        what: &'static str,
        chain: TypedChainId,
    },
    #[error("bridge needs at least two chains and one anchor size")]
    EmptyBridge,
    #[error("circuit artifacts are empty")]
    EmptyArtifacts,
    #[error("amount {amount} does not match the anchor denomination {denomination}")]
    InvalidAmount { amount: U256, denomination: U256 },
    #[error("deposit targets chain {expected}, withdrawal runs on chain {actual}")]
    WrongDestination {
        expected: TypedChainId,
        actual: TypedChainId,
    },
    #[error("anchor on chain {chain} knows no root from chain {origin} covering leaf {leaf_index}")]
    UnknownRoot {
        chain: TypedChainId,
        origin: TypedChainId,
        leaf_index: u32,
    },
    #[error("commitment {0} is not part of the origin tree")]
    InvalidProof(B256),
    #[error("nullifier {0} already spent")]
    NullifierSpent(B256),
    #[error("merkle tree is full")]
    TreeFull,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Deploys tokens and bridges.
#[async_trait]
pub trait BridgeEngine: Send + Sync {
    /// Deploys a mintable token with `deployer` as minter.
    async fn deploy_token(
        &self,
        name: &str,
        symbol: &str,
        deployer: &Wallet,
    ) -> Result<Arc<dyn TokenContract>, EngineError>;

    /// Opens an existing token on the wallet's chain, acting as `wallet`.
    async fn token_from_address(
        &self,
        address: Address,
        wallet: &Wallet,
    ) -> Result<Arc<dyn TokenContract>, EngineError>;

    async fn deploy_bridge(
        &self,
        input: BridgeInput,
        deployers: SignerConfig,
        governors: SignerConfig,
        artifacts: &CircuitArtifacts,
    ) -> Result<Arc<dyn BridgeDeployment>, EngineError>;
}

#[async_trait]
pub trait TokenContract: Send + Sync {
    fn address(&self) -> Address;

    /// Grants the spender an unlimited allowance from the bound wallet.
    async fn approve_spending(&self, spender: Address) -> Result<(), EngineError>;

    async fn mint_tokens(&self, to: Address, amount: U256) -> Result<(), EngineError>;

    async fn balance_of(&self, owner: Address) -> Result<U256, EngineError>;
}

/// A deployed bridge spanning several chains.
#[async_trait]
pub trait BridgeDeployment: Send + Sync {
    fn bridge_side(&self, chain_id: TypedChainId) -> Option<BridgeSide>;

    fn anchor(&self, chain_id: TypedChainId, denomination: U256) -> Option<Arc<dyn Anchor>>;

    fn webb_token_address(&self, chain_id: TypedChainId) -> Option<Address>;

    /// Propagates the anchor's latest root to every anchor linked to it.
    async fn update_linked_anchors(&self, anchor: &dyn Anchor) -> Result<(), EngineError>;

    /// Withdraws a deposit on the signer's chain.
    async fn withdraw(
        &self,
        receipt: &DepositReceipt,
        amount: U256,
        recipient: Address,
        relayer: Address,
        signer: &Wallet,
    ) -> Result<bool, EngineError>;
}

/// Shielded commitment pool on one chain.
#[async_trait]
pub trait Anchor: Send + Sync {
    fn address(&self) -> Address;

    fn chain_id(&self) -> TypedChainId;

    fn denomination(&self) -> U256;

    /// Last block the client-side tree was synced at.
    fn latest_synced_block(&self) -> u64;

    /// Binds the wallet used for privileged calls on this anchor.
    async fn set_signer(&self, wallet: &Wallet) -> Result<(), EngineError>;

    async fn handler(&self) -> Result<Address, EngineError>;

    async fn deposit(&self, destination: TypedChainId) -> Result<DepositReceipt, EngineError>;

    /// Resyncs the client-side tree from `block_number` onwards.
    async fn update(&self, block_number: u64) -> Result<(), EngineError>;

    async fn last_root(&self) -> Result<B256, EngineError>;

    async fn latest_neighbor_roots(&self) -> Result<Vec<B256>, EngineError>;
}
