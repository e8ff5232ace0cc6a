use bridge_localnet::HarnessConfig;
use clap::Parser;
use eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Start from this config file instead of the built-in defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ignore LOCALNET_* environment overrides
    #[arg(long)]
    no_env: bool,
}

impl ConfigArgs {
    pub fn run(self) -> Result<()> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path)?,
            None => HarnessConfig::default_local(),
        };
        if !self.no_env {
            config.apply_env()?;
        }
        config.validate()?;

        print!("{}", config.to_toml()?);
        Ok(())
    }
}
