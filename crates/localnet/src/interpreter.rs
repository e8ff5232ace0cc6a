//! The interactive command loop.
//!
//! One command runs at a time: a line is parsed, its handler runs to
//! completion and its [`Report`] or error is printed before the next line is
//! read. Both chains keep producing blocks in the meantime.

use crate::{
    command::{Command, Menu, ParseError},
    engine::{DepositReceipt, EngineError},
    ledger::{ChainSlot, DepositLedger},
    session::Session,
};
use alloy_primitives::B256;
use futures::{Stream, StreamExt, stream::BoxStream};
use std::{
    error::Error as _,
    fmt,
    io::{self, BufRead, Write},
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Whether a command is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Executing,
}

/// What the loop does after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("no pending deposits from chain {0}")]
    NoPendingDeposits(ChainSlot),
    #[error("deposit on chain {slot} failed")]
    Deposit {
        slot: ChainSlot,
        #[source]
        source: EngineError,
    },
    #[error("spam on chain {slot} stopped after {completed} of {requested} deposits")]
    Spam {
        slot: ChainSlot,
        completed: u32,
        requested: u32,
        #[source]
        source: EngineError,
    },
    #[error("relay from chain {from} failed to resync the anchor")]
    RelayResync {
        from: ChainSlot,
        #[source]
        source: EngineError,
    },
    /// The anchor was resynced but its root did not reach the linked anchor.
    #[error("relay from chain {from} resynced the anchor but did not propagate its root")]
    RelayPartial {
        from: ChainSlot,
        #[source]
        source: EngineError,
    },
    #[error("relay from chain {from} propagated but its root could not be read back")]
    RelayRoot {
        from: ChainSlot,
        #[source]
        source: EngineError,
    },
    #[error("reading roots on chain {slot} failed")]
    Root {
        slot: ChainSlot,
        #[source]
        source: EngineError,
    },
    #[error("failed to write command output")]
    Output(#[from] io::Error),
}

/// Outcome of a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Deposit {
        slot: ChainSlot,
        receipt: DepositReceipt,
    },
    /// Receipts were printed as they were made.
    Spam {
        slot: ChainSlot,
        completed: u32,
    },
    Relay {
        from: ChainSlot,
        root: B256,
    },
    Withdrawal {
        slot: ChainSlot,
        success: bool,
        reason: Option<String>,
    },
    Root {
        slot: ChainSlot,
        root: B256,
        neighbor_roots: Vec<B256>,
    },
    Exit,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit { slot, receipt } => writeln!(f, "Deposit on chain {slot}: {receipt}"),
            Self::Spam { slot, completed } => {
                writeln!(f, "Spammed chain {slot} with {completed} deposits")
            }
            Self::Relay { from, root } => {
                writeln!(f, "Relayed root {root} from chain {from} to chain {}", from.other())
            }
            Self::Withdrawal { success, reason, .. } => {
                if let Some(reason) = reason {
                    writeln!(f, "ERROR: {reason}")?;
                }
                writeln!(f, "{}", if *success { "withdraw success" } else { "withdraw failure" })
            }
            Self::Root {
                slot,
                root,
                neighbor_roots,
            } => {
                writeln!(f, "Root on chain {slot}: {root}")?;
                let neighbors: Vec<_> = neighbor_roots.iter().map(B256::to_string).collect();
                writeln!(f, "Latest neighbor roots on chain {slot}: [{}]", neighbors.join(", "))
            }
            Self::Exit => writeln!(f, "Chains stopped"),
        }
    }
}

/// Renders an error with its chain of causes.
fn error_chain(err: &CommandError) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Reads `reader` line by line on its own thread.
///
/// Dropping the stream never waits for a read in progress.
pub fn spawn_line_reader<R>(reader: R) -> io::Result<BoxStream<'static, io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("localnet-input".to_string())
        .spawn(move || {
            for line in reader.lines() {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })?;

    Ok(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|line| (line, rx))
    })
    .boxed())
}

/// Drives a [`Session`] from line-oriented input, writing to `out`.
pub struct Interpreter<W> {
    session: Session,
    ledger: DepositLedger,
    out: W,
    state: State,
}

impl<W: Write> Interpreter<W> {
    pub fn new(session: Session, out: W) -> Self {
        let ledger = DepositLedger::new(session.config().withdraw_order);
        Self {
            session,
            ledger,
            out,
            state: State::Idle,
        }
    }

    pub const fn state(&self) -> State {
        self.state
    }

    pub const fn ledger(&self) -> &DepositLedger {
        &self.ledger
    }

    pub const fn session(&self) -> &Session {
        &self.session
    }

    pub fn print_menu(&mut self) -> io::Result<()> {
        write!(self.out, "{Menu}")
    }

    /// Reads lines until `exit` or the end of input, which is handled the
    /// same way.
    pub async fn run<S>(&mut self, mut lines: S) -> io::Result<()>
    where
        S: Stream<Item = io::Result<String>> + Unpin,
    {
        self.print_menu()?;
        while let Some(line) = lines.next().await {
            if self.handle_line(&line?).await? == Flow::Exit {
                return Ok(());
            }
        }
        debug!("input closed");
        self.session.shutdown().await;
        Ok(())
    }

    /// Parses and executes one line.
    pub async fn handle_line(&mut self, line: &str) -> io::Result<Flow> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(ParseError::Unrecognized(cmd)) => {
                warn!(%cmd, "unknown command");
                writeln!(self.out, "Unknown command: {cmd}")?;
                self.print_menu()?;
                return Ok(Flow::Continue);
            }
            Err(err) => {
                writeln!(self.out, "ERROR: {}", error_chain(&err.into()))?;
                return Ok(Flow::Continue);
            }
        };

        self.announce(command)?;
        self.state = State::Executing;
        let result = self.execute(command).await;
        self.state = State::Idle;

        match result {
            Ok(report) => write!(self.out, "{report}")?,
            Err(err) => {
                warn!(err = %error_chain(&err), "command failed");
                writeln!(self.out, "ERROR: {}", error_chain(&err))?;
                if matches!(command, Command::Withdraw(_)) {
                    writeln!(self.out, "withdraw failure")?;
                }
            }
        }
        self.out.flush()?;

        Ok(if command == Command::Exit {
            Flow::Exit
        } else {
            Flow::Continue
        })
    }

    fn announce(&mut self, command: Command) -> io::Result<()> {
        match command {
            Command::Deposit(slot) => writeln!(self.out, "Depositing chain {slot}, please wait..."),
            Command::Spam(slot, n) => {
                writeln!(self.out, "Spamming chain {slot} with {n} deposits, please wait...")
            }
            Command::Root(slot) => writeln!(self.out, "Root on chain {slot}, please wait..."),
            _ => Ok(()),
        }
    }

    /// Runs one command against the session and the deposit ledger.
    pub async fn execute(&mut self, command: Command) -> Result<Report, CommandError> {
        match command {
            Command::Deposit(slot) => {
                let receipt = self
                    .deposit(slot)
                    .await
                    .map_err(|source| CommandError::Deposit { slot, source })?;
                Ok(Report::Deposit { slot, receipt })
            }
            Command::Spam(slot, requested) => self.spam(slot, requested).await,
            Command::Relay { from } => self.relay(from).await,
            Command::Withdraw(slot) => self.withdraw(slot).await,
            Command::Root(slot) => {
                let anchor = &self.session.side(slot).anchor;
                let root_err = |source| CommandError::Root { slot, source };
                let root = anchor.last_root().await.map_err(root_err)?;
                let neighbor_roots = anchor.latest_neighbor_roots().await.map_err(root_err)?;
                Ok(Report::Root {
                    slot,
                    root,
                    neighbor_roots,
                })
            }
            Command::Exit => {
                self.session.shutdown().await;
                Ok(Report::Exit)
            }
        }
    }

    /// Deposits on `slot` towards the other chain and queues the receipt.
    async fn deposit(&mut self, slot: ChainSlot) -> Result<DepositReceipt, EngineError> {
        let destination = self.session.chain(slot.other()).chain_id();
        let receipt = self.session.side(slot).anchor.deposit(destination).await?;
        self.ledger.push(slot, receipt.clone());
        debug!(chain = %slot, pending = self.ledger.len(slot), "deposit queued");
        Ok(receipt)
    }

    /// Deposits `requested` times on `slot`, printing each receipt once it is
    /// queued.
    async fn spam(&mut self, slot: ChainSlot, requested: u32) -> Result<Report, CommandError> {
        for completed in 0..requested {
            let receipt = self.deposit(slot).await.map_err(|source| CommandError::Spam {
                slot,
                completed,
                requested,
                source,
            })?;
            writeln!(self.out, "Deposit on chain {slot}: {receipt}")?;
        }
        Ok(Report::Spam {
            slot,
            completed: requested,
        })
    }

    async fn relay(&mut self, from: ChainSlot) -> Result<Report, CommandError> {
        let anchor = &self.session.side(from).anchor;
        anchor
            .update(anchor.latest_synced_block())
            .await
            .map_err(|source| CommandError::RelayResync { from, source })?;
        self.session
            .deployment()
            .bridge
            .update_linked_anchors(anchor.as_ref())
            .await
            .map_err(|source| CommandError::RelayPartial { from, source })?;

        let root = anchor
            .last_root()
            .await
            .map_err(|source| CommandError::RelayRoot { from, source })?;
        Ok(Report::Relay { from, root })
    }

    /// Withdraws on `slot` the next deposit made on the other chain.
    ///
    /// A rejected withdrawal is reported, not returned as an error, and the
    /// receipt goes back in its queue unless its nullifier is already spent.
    async fn withdraw(&mut self, slot: ChainSlot) -> Result<Report, CommandError> {
        let origin = slot.other();
        let receipt = self
            .ledger
            .pop(origin)
            .ok_or(CommandError::NoPendingDeposits(origin))?;

        let wallet = self.session.wallet(slot);
        let deployment = self.session.deployment();
        let outcome = deployment
            .bridge
            .withdraw(
                &receipt,
                deployment.denomination,
                self.session.config().recipient,
                wallet.address(),
                wallet,
            )
            .await;

        let (success, reason) = match outcome {
            Ok(true) => (true, None),
            Ok(false) => (false, None),
            Err(err) => (false, Some(err)),
        };
        if !success {
            warn!(
                chain = %slot,
                commitment = %receipt.commitment,
                reason = ?reason,
                "withdrawal rejected"
            );
            if !matches!(reason, Some(EngineError::NullifierSpent(_))) {
                self.ledger.requeue(origin, receipt);
            }
        }
        Ok(Report::Withdrawal {
            slot,
            success,
            reason: reason.map(|err| err.to_string()),
        })
    }
}
