use std::str::Utf8Error;

use crate::bulb::BulbFamily;
use crate::config::ProtocolVersion;

/// All error types that can be returned to a caller of this crate.
///
/// Protocol violations seen by the receive loops and operations a bulb family
/// does not support are logged instead of returned.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A network socket operation failed while talking to a bridge.
    #[error("socket {action} error: {err:?}")]
    Socket { action: String, err: std::io::Error },

    /// A discovery response contained invalid UTF-8.
    #[error("utf8 decoding error: {0:?}")]
    Utf8Decode(Utf8Error),

    /// Failed to deserialize a JSON configuration.
    #[error("failed to load json: {0:?}")]
    JsonLoad(serde_json::Error),

    /// The command queue already holds its maximum number of unsent frames.
    #[error("command queue is full ({capacity} frames pending)")]
    QueueFull { capacity: usize },

    /// The command queue was disposed; no further frames are accepted.
    #[error("command queue is closed")]
    QueueClosed,

    /// A bridge id must be 12 hexadecimal characters (the bridge MAC).
    #[error("invalid bridge id {0:?}")]
    InvalidBridgeId(String),

    /// A configuration value is out of range.
    #[error("invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    /// The bulb family cannot be addressed on the requested zone.
    #[error("zone {zone} is not available for {family} bulbs")]
    UnsupportedZone { family: BulbFamily, zone: u8 },

    /// The bulb family belongs to another protocol generation than the bridge.
    #[error("{family} bulbs cannot be driven by a {version} bridge")]
    FamilyMismatch {
        family: BulbFamily,
        version: ProtocolVersion,
    },

    /// A protocol version number outside of 2, 3 and 6.
    #[error("unknown protocol version {0}")]
    UnknownProtocolVersion(u8),

    /// A packet that does not follow the bridge protocol.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
}

impl Error {
    /// Create a new socket error
    pub fn socket(action: &str, err: std::io::Error) -> Self {
        Error::Socket {
            action: action.to_string(),
            err,
        }
    }

    /// Create a new invalid configuration error
    pub fn invalid_config(key: &str, reason: &str) -> Self {
        Error::InvalidConfig {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
