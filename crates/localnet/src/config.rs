//! Harness configuration.
//!
//! Loaded from TOML, then overridden from `LOCALNET_*` environment variables.
//! The defaults are fixed, publicly known test keys.

use crate::ledger::{ChainSlot, WithdrawOrder};
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, U256, address, utils::parse_ether};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

pub const ENV_RELAYER_KEY: &str = "LOCALNET_RELAYER_KEY";
pub const ENV_SENDER_KEY: &str = "LOCALNET_SENDER_KEY";
pub const ENV_RECIPIENT: &str = "LOCALNET_RECIPIENT";
pub const ENV_CHAIN_A_PORT: &str = "LOCALNET_CHAIN_A_PORT";
pub const ENV_CHAIN_B_PORT: &str = "LOCALNET_CHAIN_B_PORT";
pub const ENV_ARTIFACTS_DIR: &str = "LOCALNET_ARTIFACTS_DIR";

const RELAYER_KEY: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";
const SENDER_KEY: &str = "0x0000000000000000000000000000000000000000000000000000000000000002";
const FUNDED_KEY: &str = "0xc0d375903fd6f6ad3edafc2c5428900c0757ce1da10e5dd864fe387b32b91d7e";
const RECIPIENT: Address = address!("0xd644f5331a6F26A7943CEEbB772e505cDDd21700");

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to render config")]
    Render(#[from] toml::ser::Error),
    #[error("{field} is not a valid private key")]
    InvalidKey { field: &'static str },
    #[error("{field} = `{value}` is not a valid ether amount")]
    InvalidAmount { field: &'static str, value: String },
    #[error("{var} = `{value}` is not valid")]
    InvalidEnv { var: &'static str, value: String },
    #[error("denomination must be positive")]
    ZeroDenomination,
    #[error("block time must be at least one second")]
    ZeroBlockTime,
    #[error("both chains use network id {0}")]
    DuplicateNetworkId(u32),
    #[error("both chains use port {0}")]
    DuplicatePort(u16),
    #[error("network id {network_id} of chain {chain} does not fit a port, set `port` explicitly")]
    PortRequired { chain: String, network_id: u32 },
}

/// One of the two chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    pub name: String,
    pub network_id: u32,
    /// Defaults to the network id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub token_name: String,
    pub token_symbol: String,
    /// Receive the mint amount of wrapped tokens after deployment.
    #[serde(default)]
    pub extra_token_holders: Vec<Address>,
}

impl ChainConfig {
    /// Port the ledger listens on.
    pub fn effective_port(&self) -> Result<u16, ConfigError> {
        match self.port {
            Some(port) => Ok(port),
            None => u16::try_from(self.network_id).map_err(|_| ConfigError::PortRequired {
                chain: self.name.clone(),
                network_id: self.network_id,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Deploys, governs and signs on both chains.
    pub relayer_key: String,
    pub sender_key: String,
    /// Further keys funded on both chains.
    pub funded_keys: Vec<String>,
    /// Ether balance of every funded account.
    pub initial_balance: String,
    /// Receives every withdrawal.
    pub recipient: Address,
    /// Anchor size in ether.
    pub denomination: String,
    /// Sent from the relayer to the zero address on chain A before deployment.
    pub priming_value: String,
    /// Wrapped tokens minted per holder.
    pub mint_amount: String,
    pub block_time_secs: u64,
    pub artifacts_dir: PathBuf,
    pub withdraw_order: WithdrawOrder,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anvil_path: Option<PathBuf>,
    pub chain_a: ChainConfig,
    pub chain_b: ChainConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_local()
    }
}

impl HarnessConfig {
    /// The two-chain Hermes/Athena setup.
    pub fn default_local() -> Self {
        Self {
            chain_a: ChainConfig {
                name: "Hermes".to_string(),
                network_id: 5001,
                port: None,
                token_name: "ChainA".to_string(),
                token_symbol: "webbA".to_string(),
                extra_token_holders: vec![address!("0x510C6297cC30A058F41eb4AF1BFC9953EaD8b577")],
            },
            chain_b: ChainConfig {
                name: "Athena".to_string(),
                network_id: 5002,
                port: None,
                token_name: "ChainB".to_string(),
                token_symbol: "webbB".to_string(),
                extra_token_holders: vec![address!("0x7758F98C1c487E5653795470eEab6C4698bE541b")],
            },
            relayer_key: RELAYER_KEY.to_string(),
            sender_key: SENDER_KEY.to_string(),
            funded_keys: vec![FUNDED_KEY.to_string()],
            initial_balance: "1000".to_string(),
            recipient: RECIPIENT,
            denomination: "1".to_string(),
            priming_value: "0.001".to_string(),
            mint_amount: "1000".to_string(),
            block_time_secs: 1,
            artifacts_dir: PathBuf::from("protocol-solidity-fixtures/fixtures/anchor/2"),
            withdraw_order: WithdrawOrder::Lifo,
            anvil_path: None,
        }
    }

    /// Reads a TOML file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Applies `LOCALNET_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|var| std::env::var(var).ok())
    }

    /// Applies overrides resolved through `lookup`.
    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(key) = lookup(ENV_RELAYER_KEY) {
            self.relayer_key = key;
        }
        if let Some(key) = lookup(ENV_SENDER_KEY) {
            self.sender_key = key;
        }
        if let Some(value) = lookup(ENV_RECIPIENT) {
            self.recipient = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_RECIPIENT,
                value,
            })?;
        }
        for (var, slot) in [(ENV_CHAIN_A_PORT, ChainSlot::A), (ENV_CHAIN_B_PORT, ChainSlot::B)] {
            if let Some(value) = lookup(var) {
                let port = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnv { var, value })?;
                self.chain_mut(slot).port = Some(port);
            }
        }
        if let Some(dir) = lookup(ENV_ARTIFACTS_DIR) {
            self.artifacts_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Checks keys, amounts and that the chains do not collide.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.relayer_signer()?;
        self.funded_signers()?;
        self.check_amounts()?;
        if self.denomination()?.is_zero() {
            return Err(ConfigError::ZeroDenomination);
        }
        if self.block_time_secs == 0 {
            return Err(ConfigError::ZeroBlockTime);
        }

        if self.chain_a.network_id == self.chain_b.network_id {
            return Err(ConfigError::DuplicateNetworkId(self.chain_a.network_id));
        }
        let port = self.chain_a.effective_port()?;
        if port == self.chain_b.effective_port()? {
            return Err(ConfigError::DuplicatePort(port));
        }
        Ok(())
    }

    pub const fn chain(&self, slot: ChainSlot) -> &ChainConfig {
        match slot {
            ChainSlot::A => &self.chain_a,
            ChainSlot::B => &self.chain_b,
        }
    }

    pub const fn chain_mut(&mut self, slot: ChainSlot) -> &mut ChainConfig {
        match slot {
            ChainSlot::A => &mut self.chain_a,
            ChainSlot::B => &mut self.chain_b,
        }
    }

    pub fn relayer_signer(&self) -> Result<PrivateKeySigner, ConfigError> {
        parse_key("relayer_key", &self.relayer_key)
    }

    /// Relayer, sender and every extra funded key, in that order.
    pub fn funded_signers(&self) -> Result<Vec<PrivateKeySigner>, ConfigError> {
        let mut signers = vec![
            self.relayer_signer()?,
            parse_key("sender_key", &self.sender_key)?,
        ];
        for key in &self.funded_keys {
            signers.push(parse_key("funded_keys", key)?);
        }
        Ok(signers)
    }

    pub fn initial_balance(&self) -> Result<U256, ConfigError> {
        parse_amount("initial_balance", &self.initial_balance)
    }

    pub fn denomination(&self) -> Result<U256, ConfigError> {
        parse_amount("denomination", &self.denomination)
    }

    pub fn priming_value(&self) -> Result<U256, ConfigError> {
        parse_amount("priming_value", &self.priming_value)
    }

    pub fn mint_amount(&self) -> Result<U256, ConfigError> {
        parse_amount("mint_amount", &self.mint_amount)
    }

    pub const fn block_time(&self) -> Duration {
        Duration::from_secs(self.block_time_secs)
    }

    fn check_amounts(&self) -> Result<(), ConfigError> {
        self.initial_balance()?;
        self.priming_value()?;
        self.mint_amount()?;
        Ok(())
    }
}

fn parse_key(field: &'static str, key: &str) -> Result<PrivateKeySigner, ConfigError> {
    key.parse().map_err(|_| ConfigError::InvalidKey { field })
}

fn parse_amount(field: &'static str, value: &str) -> Result<U256, ConfigError> {
    parse_ether(value).map_err(|_| ConfigError::InvalidAmount {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_matches_fixed_test_setup() {
        let config = HarnessConfig::default_local();
        config.validate().unwrap();

        assert_eq!(config.chain_a.effective_port().unwrap(), 5001);
        assert_eq!(config.chain_b.effective_port().unwrap(), 5002);
        assert_eq!(config.denomination().unwrap(), parse_ether("1").unwrap());
        assert_eq!(config.funded_signers().unwrap().len(), 3);
        assert_eq!(
            config.relayer_signer().unwrap().address(),
            address!("0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf")
        );
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("localnet.toml");
        std::fs::write(
            &path,
            r#"
withdraw_order = "fifo"
denomination = "0.5"

[chain_b]
name = "Athena"
network_id = 5003
token_name = "ChainB"
token_symbol = "webbB"
"#,
        )
        .unwrap();

        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.withdraw_order, WithdrawOrder::Fifo);
        assert_eq!(config.chain_b.network_id, 5003);
        assert!(config.chain_b.extra_token_holders.is_empty());
        assert_eq!(config.chain_a, HarnessConfig::default_local().chain_a);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("localnet.toml");
        std::fs::write(&path, "blocktime = 2\n").unwrap();

        assert!(matches!(HarnessConfig::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn rendered_default_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("localnet.toml");
        let config = HarnessConfig::default_local();
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        assert_eq!(HarnessConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn env_overrides() {
        let env = HashMap::from([
            (ENV_CHAIN_A_PORT, "8545"),
            (ENV_ARTIFACTS_DIR, "/tmp/fixtures"),
            (ENV_RECIPIENT, "0x0000000000000000000000000000000000000001"),
        ]);
        let mut config = HarnessConfig::default_local();
        config
            .apply_env_with(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.chain_a.port, Some(8545));
        assert_eq!(config.chain_b.port, None);
        assert_eq!(config.artifacts_dir, PathBuf::from("/tmp/fixtures"));
        assert_eq!(config.recipient, Address::with_last_byte(1));
    }

    #[test]
    fn bad_env_port_is_reported() {
        let mut config = HarnessConfig::default_local();
        let err = config
            .apply_env_with(|var| (var == ENV_CHAIN_B_PORT).then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: ENV_CHAIN_B_PORT, .. }));
    }

    #[test]
    fn validate_rejects_collisions() {
        let mut config = HarnessConfig::default_local();
        config.chain_b.network_id = 5001;
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateNetworkId(5001))));

        let mut config = HarnessConfig::default_local();
        config.chain_b.port = Some(5001);
        assert!(matches!(config.validate(), Err(ConfigError::DuplicatePort(5001))));

        let mut config = HarnessConfig::default_local();
        config.chain_a.network_id = 70_000;
        assert!(matches!(config.validate(), Err(ConfigError::PortRequired { .. })));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = HarnessConfig::default_local();
        config.relayer_key = "0x01".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidKey { field: "relayer_key" })));

        let mut config = HarnessConfig::default_local();
        config.denomination = "one".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAmount { .. })));

        let mut config = HarnessConfig::default_local();
        config.denomination = "0".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::ZeroDenomination)));
    }
}
