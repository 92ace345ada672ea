//! Bridge connection configuration and well-known ports.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

/// UDP port bridges listen on for discovery probes.
pub const PORT_DISCOVER: u16 = 48899;
/// Default control port of legacy (v2) bridges.
pub const PORT_VER2: u16 = 50000;
/// Default control port of v3/v4/v5 bridges.
pub const PORT_VER3: u16 = 8899;
/// Default control port of v6 (iBox) bridges.
pub const PORT_VER6: u16 = 5987;

/// Protocol generation spoken by a bridge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
pub enum ProtocolVersion {
    /// Legacy single-shot commands, no discovery or feedback.
    #[strum(serialize = "v2")]
    V2,
    /// Three byte commands, discoverable.
    #[strum(serialize = "v3")]
    V3,
    /// Session based, checksummed 22 byte frames.
    #[strum(serialize = "v6")]
    V6,
}

impl ProtocolVersion {
    pub fn number(self) -> u8 {
        match self {
            ProtocolVersion::V2 => 2,
            ProtocolVersion::V3 => 3,
            ProtocolVersion::V6 => 6,
        }
    }

    /// The well-known control port of this generation.
    pub fn default_port(self) -> u16 {
        match self {
            ProtocolVersion::V2 => PORT_VER2,
            ProtocolVersion::V3 => PORT_VER3,
            ProtocolVersion::V6 => PORT_VER6,
        }
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            2 => Ok(ProtocolVersion::V2),
            3 => Ok(ProtocolVersion::V3),
            6 => Ok(ProtocolVersion::V6),
            other => Err(Error::UnknownProtocolVersion(other)),
        }
    }
}

/// Connection parameters of one bridge.
///
/// # Example
///
/// ```
/// use milight_rs::{BridgeConfig, ProtocolVersion};
///
/// let config = BridgeConfig::from_json(
///     r#"{"host": "192.168.1.40", "id": "ACCF23F57AD4", "protocol": "V6"}"#,
/// ).unwrap();
/// assert_eq!(config.protocol, ProtocolVersion::V6);
/// assert_eq!(config.control_port(), 5987);
/// assert_eq!(config.delay_ms, 100);
/// ```
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    pub host: IpAddr,
    /// Bridge MAC as 12 hex characters. Without it only the legacy protocol is usable.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "BridgeConfig::default_protocol")]
    pub protocol: ProtocolVersion,
    /// Overrides the generation's default control port.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub password: [u8; 2],
    #[serde(default = "BridgeConfig::default_repeat")]
    pub repeat: u8,
    #[serde(default = "BridgeConfig::default_delay_ms")]
    pub delay_ms: u64,
    /// Interval of the discovery refresh, 0 disables it.
    #[serde(default)]
    pub refresh_secs: u64,
}

impl BridgeConfig {
    pub const MAX_PORT: u16 = 65000;
    pub const MAX_REPEAT: u8 = 5;
    pub const MAX_DELAY_MS: u64 = 200;

    fn default_protocol() -> ProtocolVersion {
        ProtocolVersion::V3
    }

    fn default_repeat() -> u8 {
        1
    }

    fn default_delay_ms() -> u64 {
        100
    }

    pub fn new(host: IpAddr, id: Option<&str>, protocol: ProtocolVersion) -> Self {
        BridgeConfig {
            host,
            id: id.map(String::from),
            protocol,
            port: None,
            password: [0, 0],
            repeat: Self::default_repeat(),
            delay_ms: Self::default_delay_ms(),
            refresh_secs: 0,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::JsonLoad)
    }

    /// Check every value against the ranges the bridges accept.
    pub fn validate(&self) -> Result<()> {
        if let Some(port) = self.port
            && (port == 0 || port > Self::MAX_PORT)
        {
            return Err(Error::invalid_config("port", "must be within 1..=65000"));
        }
        if !(1..=Self::MAX_REPEAT).contains(&self.repeat) {
            return Err(Error::invalid_config("repeat", "must be within 1..=5"));
        }
        if !(1..=Self::MAX_DELAY_MS).contains(&self.delay_ms) {
            return Err(Error::invalid_config("delayMs", "must be within 1..=200"));
        }
        Ok(())
    }

    /// The bridge id if it is usable, i.e. exactly 12 characters.
    pub fn bridge_id(&self) -> Option<String> {
        match &self.id {
            Some(id) if id.len() == 12 => Some(id.to_uppercase()),
            Some(id) => {
                warn!("Bridge id {id:?} is not 12 characters long, ignoring it");
                None
            }
            None => None,
        }
    }

    /// The protocol to actually speak. Bridges without a usable id fall back to v2.
    pub fn effective_protocol(&self) -> ProtocolVersion {
        if self.bridge_id().is_none() {
            ProtocolVersion::V2
        } else {
            self.protocol
        }
    }

    pub fn control_port(&self) -> u16 {
        self.port
            .unwrap_or_else(|| self.effective_protocol().default_port())
    }

    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.control_port())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Parameters of a discovery session.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryConfig {
    /// Where probes are sent; the broadcast address or one known bridge.
    pub target: SocketAddr,
    pub resend_interval: Duration,
    pub max_attempts: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig::new(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), PORT_DISCOVER),
            Duration::from_millis(1000),
            3,
        )
    }
}

impl DiscoveryConfig {
    /// Upper bound of the resend interval.
    pub const MAX_RESEND_INTERVAL: Duration = Duration::from_millis(200);

    /// The resend interval is clamped to at most 200ms.
    pub fn new(target: SocketAddr, resend_interval: Duration, max_attempts: u32) -> Self {
        DiscoveryConfig {
            target,
            resend_interval: resend_interval.min(Self::MAX_RESEND_INTERVAL),
            max_attempts,
        }
    }

    /// Probe a single bridge instead of broadcasting.
    pub fn unicast(host: IpAddr) -> Self {
        DiscoveryConfig {
            target: SocketAddr::new(host, PORT_DISCOVER),
            ..Self::default()
        }
    }
}
