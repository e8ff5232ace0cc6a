//! Per-chain queues of deposits awaiting a withdrawal on the other chain.

use crate::engine::DepositReceipt;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, fmt};

/// One of the two chains of the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainSlot {
    A,
    B,
}

impl ChainSlot {
    pub const ALL: [Self; 2] = [Self::A, Self::B];

    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    pub const fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    /// Lowercase letter used on the command line.
    pub const fn label(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }
}

impl fmt::Display for ChainSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which pending deposit a withdrawal consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawOrder {
    /// Most recent deposit first.
    #[default]
    Lifo,
    /// Oldest deposit first.
    Fifo,
}

impl std::str::FromStr for WithdrawOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lifo" => Ok(Self::Lifo),
            "fifo" => Ok(Self::Fifo),
            other => Err(format!("unknown withdraw order `{other}`, expected lifo or fifo")),
        }
    }
}

impl fmt::Display for WithdrawOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lifo => f.write_str("lifo"),
            Self::Fifo => f.write_str("fifo"),
        }
    }
}

/// Receipts keyed by their origin chain.
#[derive(Debug, Default)]
pub struct DepositLedger {
    queues: [VecDeque<DepositReceipt>; 2],
    order: WithdrawOrder,
}

impl DepositLedger {
    pub fn new(order: WithdrawOrder) -> Self {
        Self {
            queues: Default::default(),
            order,
        }
    }

    /// Queues a receipt under the chain it was deposited on.
    pub fn push(&mut self, origin: ChainSlot, receipt: DepositReceipt) {
        self.queues[origin.index()].push_back(receipt);
    }

    /// Takes the next receipt deposited on `origin`.
    pub fn pop(&mut self, origin: ChainSlot) -> Option<DepositReceipt> {
        let queue = &mut self.queues[origin.index()];
        match self.order {
            WithdrawOrder::Lifo => queue.pop_back(),
            WithdrawOrder::Fifo => queue.pop_front(),
        }
    }

    /// Puts a popped receipt back where [`Self::pop`] took it from.
    pub fn requeue(&mut self, origin: ChainSlot, receipt: DepositReceipt) {
        let queue = &mut self.queues[origin.index()];
        match self.order {
            WithdrawOrder::Lifo => queue.push_back(receipt),
            WithdrawOrder::Fifo => queue.push_front(receipt),
        }
    }

    pub fn len(&self, origin: ChainSlot) -> usize {
        self.queues[origin.index()].len()
    }

    pub fn is_empty(&self, origin: ChainSlot) -> bool {
        self.queues[origin.index()].is_empty()
    }
}
