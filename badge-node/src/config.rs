//! Node configuration
//!
//! Built-in defaults, overridden by an optional JSON file (`--config`), then
//! by command-line flags. Read once at startup.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use badge_protocol::codec::{MAX_INTERESTS, MAX_NAME_CHARS};
use badge_protocol::{AdmissionPolicy, Identity, IdentityError, IDENTITY_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_NAME: &str = "MagTag";
const DEFAULT_INTERESTS: &str = "python,circuitpython";
const DEFAULT_CHANNEL: u8 = 6;
const DEFAULT_SIGNAL_DBM: i8 = -50;

/// Valid radio channels
const CHANNELS: std::ops::RangeInclusive<u8> = 1..=14;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("invalid identity: {0}")]
    Identity(#[from] IdentityError),
    #[error("no entropy available to generate an identity")]
    Entropy,
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        reason: reason.into(),
    }
}

// ============================================================================
// Node Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Display name (cut to 20 characters)
    pub name: String,
    /// Comma-separated interests
    pub interests: String,
    pub channel: u8,
    /// 12 hex digits; random when absent
    pub identity: Option<String>,
    /// Signal strength peers attribute to this node's frames
    pub signal_dbm: i8,
    pub admission: AdmissionPolicy,
    pub broadcast_ip: IpAddr,
    /// UDP address for UI commands
    pub control: SocketAddr,
    /// TCP address for the metrics endpoint
    pub metrics: Option<SocketAddr>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            name: DEFAULT_NAME.to_string(),
            interests: DEFAULT_INTERESTS.to_string(),
            channel: DEFAULT_CHANNEL,
            identity: None,
            signal_dbm: DEFAULT_SIGNAL_DBM,
            admission: AdmissionPolicy::default(),
            broadcast_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            control: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            metrics: None,
        }
    }
}

impl NodeConfig {
    /// Defaults, then `--config <path>`, then flags
    pub fn load(args: &[String]) -> Result<Self, ConfigError> {
        let mut config = match parse_arg(args, "--config") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => NodeConfig::default(),
        };
        config.apply_args(args)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Command-line overrides
    //
    // --name <text>          Display name
    // --interests <a,b,c>    Interests
    // --channel <n>          Radio channel
    // --identity <hex>       Hardware identity
    // --signal <dBm>         Emulated signal strength
    // --admission <policy>   mutual | open
    // --broadcast <ip>       Broadcast destination
    // --control <addr:port>  UI command socket
    // --metrics <addr:port>  Metrics endpoint
    pub fn apply_args(&mut self, args: &[String]) -> Result<(), ConfigError> {
        if let Some(v) = parse_arg(args, "--name") {
            self.name = v;
        }
        if let Some(v) = parse_arg(args, "--interests") {
            self.interests = v;
        }
        if let Some(v) = parse_arg(args, "--channel") {
            self.channel = v.parse().map_err(|_| invalid("channel", v))?;
        }
        if let Some(v) = parse_arg(args, "--identity") {
            self.identity = Some(v);
        }
        if let Some(v) = parse_arg(args, "--signal") {
            self.signal_dbm = v.parse().map_err(|_| invalid("signal_dbm", v))?;
        }
        if let Some(v) = parse_arg(args, "--admission") {
            self.admission = v.parse().map_err(|e: String| invalid("admission", e))?;
        }
        if let Some(v) = parse_arg(args, "--broadcast") {
            self.broadcast_ip = v.parse().map_err(|_| invalid("broadcast_ip", v))?;
        }
        if let Some(v) = parse_arg(args, "--control") {
            self.control = v.parse().map_err(|_| invalid("control", v))?;
        }
        if let Some(v) = parse_arg(args, "--metrics") {
            self.metrics = Some(v.parse().map_err(|_| invalid("metrics", v))?);
        }
        Ok(())
    }

    /// Reject values that cannot be put on the wire
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(invalid("name", "must not be empty"));
        }
        if self.name.contains('|') {
            return Err(invalid("name", "must not contain '|'"));
        }
        if self.name.chars().count() > MAX_NAME_CHARS {
            log::warn!("Name '{}' will be cut to {} characters", self.name, MAX_NAME_CHARS);
        }
        if self.interests.contains('|') {
            return Err(invalid("interests", "must not contain '|'"));
        }
        if self.interest_list().len() > MAX_INTERESTS {
            log::warn!("Only the first {} interests are advertised", MAX_INTERESTS);
        }
        if !CHANNELS.contains(&self.channel) {
            return Err(invalid(
                "channel",
                format!("{} not in {}-{}", self.channel, CHANNELS.start(), CHANNELS.end()),
            ));
        }
        if let Some(hex) = &self.identity {
            Identity::from_hex(hex)?;
        }
        Ok(())
    }

    /// Interests as a list: trimmed, empties dropped
    pub fn interest_list(&self) -> Vec<String> {
        self.interests
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Configured identity, or a fresh random one
    pub fn identity(&self, rng: &SystemRandom) -> Result<Identity, ConfigError> {
        match &self.identity {
            Some(hex) => Ok(Identity::from_hex(hex)?),
            None => random_identity(rng),
        }
    }
}

/// Locally administered unicast address
fn random_identity(rng: &SystemRandom) -> Result<Identity, ConfigError> {
    let mut bytes = [0u8; IDENTITY_LEN];
    rng.fill(&mut bytes).map_err(|_| ConfigError::Entropy)?;
    bytes[0] = (bytes[0] | 0x02) & 0xFE;
    Ok(Identity::new(bytes))
}

pub fn parse_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

// ============================================================================
// Tests
// ============================================================================
