//! Node Configuration

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use head_codec::PlutusData;
use head_multiplayer::{Role, DEFAULT_DISAGREEMENT_WINDOW};
use head_tx::{ExUnits, ValidatorRef};
use head_types::{decode_fixed, KeyHash, Network, PeerIndex, UnitRef};
use serde::{Deserialize, Serialize};

/// Participant kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Player chaining through the lobby multisig
    Client,
    /// Referee chaining at its own key address
    #[default]
    Server,
    /// Referee that cross-checks kill reports
    Dedicated,
}

/// Game validator, as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Script hash (hex)
    pub script_hash: String,
    /// `"{tx_id}#{index}"` of the unit holding the reference script
    pub reference_input: String,
    pub collateral: String,
    /// CBOR hex of the redeemer; unit constructor when absent
    #[serde(default)]
    pub redeemer: Option<String>,
    #[serde(default)]
    pub ex_units: ExUnits,
    /// Pre-encoded language views (hex)
    pub language_views: String,
}

impl ValidatorConfig {
    pub fn to_validator_ref(&self) -> Result<ValidatorRef> {
        let redeemer = match &self.redeemer {
            Some(cbor_hex) => {
                PlutusData::from_cbor(&hex::decode(cbor_hex).context("redeemer is not hex")?)
                    .context("redeemer is not valid data")?
            }
            None => PlutusData::constr(0, vec![]),
        };
        Ok(ValidatorRef {
            script_hash: decode_fixed::<28>(&self.script_hash).context("script_hash")?,
            reference_input: self
                .reference_input
                .parse::<UnitRef>()
                .context("reference_input")?,
            collateral: self.collateral.parse::<UnitRef>().context("collateral")?,
            redeemer,
            ex_units: self.ex_units,
            language_views: hex::decode(&self.language_views).context("language_views")?,
        })
    }
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub mode: Mode,
    /// Coordinator base URL
    pub node_url: String,
    pub key_file: Option<PathBuf>,
    pub network: Network,
    pub peer_index: PeerIndex,
    /// Stream only transactions touching this address
    pub address_filter: Option<String>,
    /// Admin key hash (hex), required in client mode
    pub admin_key_hash: Option<String>,
    pub validator: Option<ValidatorConfig>,
    /// Synthetic packets per second, at most one per tic; off when absent
    pub synthetic_rate: Option<u32>,
    /// Peer synthetic packets are addressed to
    pub synthetic_to: PeerIndex,
    pub disagreement_window: u64,
    pub min_value: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Server,
            node_url: "http://127.0.0.1:4001".to_string(),
            key_file: None,
            network: Network::Testnet,
            peer_index: 1,
            address_filter: None,
            admin_key_hash: None,
            validator: None,
            synthetic_rate: None,
            synthetic_to: 2,
            disagreement_window: DEFAULT_DISAGREEMENT_WINDOW,
            min_value: 0,
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn role(&self) -> Result<Role> {
        Ok(match self.mode {
            Mode::Client => {
                let admin = self
                    .admin_key_hash
                    .as_deref()
                    .context("client mode needs an admin key hash")?;
                Role::Client {
                    admin_key_hash: parse_key_hash(admin)?,
                    validator: self
                        .validator
                        .as_ref()
                        .map(ValidatorConfig::to_validator_ref)
                        .transpose()?,
                }
            }
            Mode::Server => Role::Server,
            Mode::Dedicated => Role::Dedicated,
        })
    }
}

pub fn parse_key_hash(s: &str) -> Result<KeyHash> {
    decode_fixed::<28>(s).with_context(|| format!("invalid key hash {s}"))
}

pub fn parse_network(s: &str) -> Result<Network, String> {
    match s.to_ascii_lowercase().as_str() {
        "testnet" | "preprod" | "preview" | "0" => Ok(Network::Testnet),
        "mainnet" | "1" => Ok(Network::Mainnet),
        other => Err(format!("unknown network {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"mode": "client", "peer_index": 3, "admin_key_hash": "{}",
                "validator": {{
                    "script_hash": "{}",
                    "reference_input": "{}#0",
                    "collateral": "{}#1",
                    "language_views": "a0"
                }}}}"#,
            "ab".repeat(28),
            "cd".repeat(28),
            "11".repeat(32),
            "22".repeat(32)
        )
        .unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.mode, Mode::Client);
        assert_eq!(config.peer_index, 3);
        assert_eq!(config.disagreement_window, 10);
        assert_eq!(config.node_url, "http://127.0.0.1:4001");

        match config.role().unwrap() {
            Role::Client {
                admin_key_hash,
                validator: Some(validator),
            } => {
                assert_eq!(admin_key_hash, [0xab; 28]);
                assert_eq!(validator.collateral.index, 1);
                assert_eq!(validator.redeemer, PlutusData::constr(0, vec![]));
                assert_eq!(validator.language_views, vec![0xa0]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_client_needs_admin() {
        let config = NodeConfig {
            mode: Mode::Client,
            ..Default::default()
        };
        assert!(config.role().is_err());
        assert_eq!(
            NodeConfig {
                mode: Mode::Dedicated,
                ..Default::default()
            }
            .role()
            .unwrap(),
            Role::Dedicated
        );
    }

    #[test]
    fn test_parse_network() {
        assert_eq!(parse_network("Mainnet"), Ok(Network::Mainnet));
        assert_eq!(parse_network("preprod"), Ok(Network::Testnet));
        assert!(parse_network("moon").is_err());
    }
}
