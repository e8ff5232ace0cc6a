//! Two-chain local testnet harness for the shielded anchor bridge.
//!
//! The harness boots two ephemeral ledgers, deploys a token and a fixed
//! deposit bridge spanning both of them, and then drives deposits, root
//! relays and cross-chain withdrawals from a line-oriented command loop.

pub mod chain;
pub mod command;
pub mod config;
pub mod deploy;
pub mod engine;
pub mod interpreter;
pub mod ledger;
pub mod retry;
pub mod session;

pub use chain::{LocalChain, TypedChainId, chain_id_type};
pub use config::HarnessConfig;
pub use interpreter::Interpreter;
pub use session::{Session, ShutdownCoordinator};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
