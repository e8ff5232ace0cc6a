use bridge_localnet::{
    HarnessConfig, Interpreter, Session,
    chain::{AnvilBackend, InMemoryBackend},
    engine::SimulatedEngine,
    interpreter::spawn_line_reader,
    ledger::WithdrawOrder,
};
use clap::{Parser, ValueEnum};
use eyre::{Result, WrapErr};
use std::{io, path::PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// One `anvil` process per chain
    Anvil,
    /// In-process ledgers, nothing listens on the ports
    Memory,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ledger backend
    #[arg(long, value_enum, default_value_t = Backend::Anvil)]
    backend: Backend,

    /// Directory holding the anchor circuit artifacts (overrides config)
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,

    /// anvil binary to spawn (overrides config)
    #[arg(long)]
    anvil_path: Option<PathBuf>,

    /// Order in which withdrawals consume pending deposits (lifo, fifo)
    #[arg(long)]
    withdraw_order: Option<WithdrawOrder>,

    /// Private key deploying and signing on both chains (overrides config)
    #[arg(long, env = "LOCALNET_RELAYER_KEY", hide_env_values = true)]
    relayer_key: Option<String>,
}

impl RunArgs {
    fn config(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path)?,
            None => HarnessConfig::default_local(),
        };
        config.apply_env()?;

        if let Some(dir) = &self.artifacts_dir {
            config.artifacts_dir = dir.clone();
        }
        if let Some(path) = &self.anvil_path {
            config.anvil_path = Some(path.clone());
        }
        if let Some(order) = self.withdraw_order {
            config.withdraw_order = order;
        }
        if let Some(key) = &self.relayer_key {
            config.relayer_key = key.clone();
        }
        Ok(config)
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config()?;
        let engine = SimulatedEngine::new();

        let session = match self.backend {
            Backend::Anvil => {
                let mut backend = AnvilBackend::new();
                if let Some(path) = &config.anvil_path {
                    backend = backend.with_binary(path);
                }
                Session::start(config, &backend, &engine).await
            }
            Backend::Memory => Session::start(config, &InMemoryBackend::new(), &engine).await,
        }
        .wrap_err("failed to start localnet")?;

        println!("{}", session.deployment());
        let shutdown = session.shutdown_handle();
        let mut interpreter = Interpreter::new(session, io::stdout());
        let input = spawn_line_reader(io::BufReader::new(io::stdin()))
            .wrap_err("failed to start the input reader")?;

        tokio::select! {
            res = interpreter.run(input) => res?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping chains");
                shutdown.shutdown().await;
            }
        }
        Ok(())
    }
}
