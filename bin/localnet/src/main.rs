use clap::Parser;
use opts::{LocalnetCli, LocalnetSubcommand};

mod cmd;
mod opts;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // stdout belongs to the command loop
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = LocalnetCli::parse();

    match args.cmd {
        LocalnetSubcommand::Run(cmd) => cmd.run().await,
        LocalnetSubcommand::Config(cmd) => cmd.run(),
    }
}
