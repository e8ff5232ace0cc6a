//! Line-oriented command grammar.

use crate::ledger::ChainSlot;
use std::fmt;

/// A parsed interpreter command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Deposit on the slot's anchor, destined for the other chain.
    Deposit(ChainSlot),
    /// Push the source anchor's root to its linked anchor.
    Relay { from: ChainSlot },
    /// Withdraw on the slot, consuming a deposit made on the other chain.
    Withdraw(ChainSlot),
    Root(ChainSlot),
    /// `n` deposits in a row.
    Spam(ChainSlot, u32),
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown command `{0}`")]
    Unrecognized(String),
    #[error("`{0}` is not a valid deposit count")]
    InvalidCount(String),
}

/// Command verbs, in menu order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Deposit,
    Relay,
    Withdraw,
    Root,
    Spam,
    Exit,
}

impl Verb {
    pub const ALL: [Self; 6] = [
        Self::Deposit,
        Self::Relay,
        Self::Withdraw,
        Self::Root,
        Self::Spam,
        Self::Exit,
    ];

    /// Every accepted spelling of the verb.
    pub fn usages(self) -> Vec<String> {
        let per_slot = |f: fn(ChainSlot) -> String| -> Vec<String> {
            ChainSlot::ALL.into_iter().map(f).collect()
        };
        match self {
            Self::Deposit => per_slot(|slot| format!("deposit on chain {slot}")),
            Self::Relay => per_slot(|slot| format!("relay from {slot} to {}", slot.other())),
            Self::Withdraw => per_slot(|slot| format!("withdraw on chain {slot}")),
            Self::Root => per_slot(|slot| format!("root on chain {slot}")),
            Self::Spam => per_slot(|slot| format!("spam chain {slot} <txs>")),
            Self::Exit => vec!["exit".to_string()],
        }
    }
}

/// The list of available commands.
pub struct Menu;

impl fmt::Display for Menu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Available commands:")?;
        for usage in Verb::ALL.into_iter().flat_map(Verb::usages) {
            writeln!(f, "  {usage}")?;
        }
        Ok(())
    }
}

fn slot_from(label: &str) -> Option<ChainSlot> {
    ChainSlot::ALL.into_iter().find(|slot| slot.label() == label)
}

impl Command {
    /// Parses one input line.
    ///
    /// Leading and trailing whitespace is ignored; verbs are matched as
    /// case-sensitive prefixes, `spam` must match exactly.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        if line == "exit" {
            return Ok(Self::Exit);
        }

        for slot in ChainSlot::ALL {
            if line.starts_with(&format!("deposit on chain {slot}")) {
                return Ok(Self::Deposit(slot));
            }
            if line.starts_with(&format!("relay from {slot} to {}", slot.other())) {
                return Ok(Self::Relay { from: slot });
            }
            if line.starts_with(&format!("withdraw on chain {slot}")) {
                return Ok(Self::Withdraw(slot));
            }
            if line.starts_with(&format!("root on chain {slot}")) {
                return Ok(Self::Root(slot));
            }
        }

        if let Some(rest) = line.strip_prefix("spam chain ") {
            let mut parts = rest.splitn(2, ' ');
            if let Some(slot) = parts.next().and_then(slot_from) {
                let count = parts.next().unwrap_or_default();
                return count
                    .parse()
                    .map(|n| Self::Spam(slot, n))
                    .map_err(|_| ParseError::InvalidCount(count.to_string()));
            }
        }

        Err(ParseError::Unrecognized(line.to_string()))
    }
}
