//! # milight_rs
//!
//! An async Rust library for controlling Milight / LimitlessLED lighting bridges over UDP.
//!
//! The crate speaks all three bridge generations: the legacy v2 bridge, the v3
//! WiFi bridge and the v6 (iBox) bridge with its session handshake. It is
//! **runtime-agnostic** and works with tokio, async-std or smol.
//!
//! ## Quick Start
//!
//! ```ignore
//! use milight_rs::{Bridge, BridgeConfig, BulbFamily, ProtocolVersion};
//!
//! async fn control_light() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::new("10.1.1.27".parse()?, Some("ACCF23F57AD4"), ProtocolVersion::V6);
//!     let bridge = Bridge::connect(config).await?;
//!
//!     // zone 2 of the RGB+CW/WW bulbs
//!     let mut light = bridge.light(BulbFamily::V6RgbCwWw, 2, Some("Living Room"))?;
//!     light.set_hsb(240.0, Some(100), Some(60))?;
//!
//!     bridge.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Runtime Agnostic**: Works with tokio, async-std, or smol async runtimes
//! - **Command Queue**: Frames are paced for the bridge and superseded values are
//!   dropped before they are sent, see [`CommandQueue`]
//! - **Sessions**: The v6 handshake and keep-alive are handled by [`SessionManager`]
//! - **Bulb Families**: One encoder per [`BulbFamily`], with absolute brightness,
//!   temperature, speed and mode emulated on bulbs that only know relative steps
//! - **Discovery**: Find bridges on your network with [`discover_bridges`]
//!
//! ## Communication
//!
//! Bridges are discovered on UDP port 48899. Commands go to port 50000 (v2),
//! 8899 (v3) or 5987 (v6). Bridges never report the state of their bulbs, so
//! [`LightState`] holds what was last commanded.
//!
//! ## Runtime Selection
//!
//! ### Using tokio (default)
//!
//! ```toml
//! [dependencies]
//! milight-rs = "0.1"
//! tokio = { version = "1", features = ["rt-multi-thread", "macros"] }
//! ```
//!
//! ### Using async-std
//!
//! ```toml
//! [dependencies]
//! milight-rs = { version = "0.1", default-features = false, features = ["runtime-async-std"] }
//! async-std = { version = "1.12", features = ["attributes"] }
//! ```
//!
//! ### Using smol
//!
//! ```toml
//! [dependencies]
//! milight-rs = { version = "0.1", default-features = false, features = ["runtime-smol"] }
//! smol = "2"
//! ```
//!
//! ## Feature Flags
//!
//! - `runtime-tokio` (default): Use the tokio async runtime
//! - `runtime-async-std`: Use the async-std runtime
//! - `runtime-smol`: Use the smol runtime

mod bridge;
pub mod bulb;
pub mod config;
pub mod discovery;
mod errors;
pub mod frame;
mod light;
pub mod queue;
pub mod runtime;
pub mod session;
mod state;

// Re-export public API
pub use bridge::Bridge;
pub use bulb::{Bulb, BulbFamily, Capability};
pub use config::{BridgeConfig, DiscoveryConfig, ProtocolVersion};
pub use discovery::{BridgeDiscovery, DiscoveredBridge, DiscoveryResult, discover_bridges};
pub use errors::Error;
pub use light::Light;
pub use queue::CommandQueue;
pub use session::{SessionManager, SessionState};
pub use state::LightState;
