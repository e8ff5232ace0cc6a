use crate::cmd::{config::ConfigArgs, run::RunArgs};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "localnet")]
#[command(
    version,
    about = "Two local chains with a fixed deposit anchor bridge between them",
    long_about = None
)]
pub struct LocalnetCli {
    #[command(subcommand)]
    pub cmd: LocalnetSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum LocalnetSubcommand {
    /// Start both chains, deploy the bridge and read commands from stdin
    Run(RunArgs),

    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}
