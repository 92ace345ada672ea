//! Bulb command encoders.
//!
//! One [`Bulb`] implementation exists per bulb family. Encoders turn abstract
//! operations into frames for the bridge's [`CommandQueue`] and update the
//! caller's [`LightState`] to what was commanded. Families without absolute
//! brightness, speed or mode commands emulate them with relative step frames,
//! diffing against the stored state.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use log::info;
use serde::Serialize;
use strum_macros::{Display, EnumIter, EnumString};

use crate::config::ProtocolVersion;
use crate::errors::Error;
use crate::queue::CommandQueue;
use crate::session::SessionManager;
use crate::state::LightState;

pub mod legacy;
pub mod v3;
pub mod v6;

pub use legacy::V2Rgb;
pub use v3::{V3Rgbw, V3White};
pub use v6::V6Bulb;

type Result<T> = std::result::Result<T, Error>;

/// Range of animation modes on every family.
pub const LED_MODES: RangeInclusive<i32> = 1..=9;

/// An operation a bulb family may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
pub enum Capability {
    Power,
    Color,
    Brightness,
    Saturation,
    ColorTemperature,
    /// Animation mode selection.
    Animation,
    AnimationSpeed,
    WhiteMode,
    NightMode,
    Link,
}

/// Bulb families, by protocol generation and feature set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumIter, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum BulbFamily {
    /// RGB bulbs of legacy bridges.
    V2Rgb,
    /// Dimmable white bulbs with adjustable temperature.
    V3White,
    /// RGB plus white bulbs.
    V3Rgbw,
    /// RGB plus cold/warm white bulbs.
    V6RgbCwWw,
    /// RGB plus white bulbs on a v6 bridge.
    V6Rgbw,
    /// The lamp built into the v6 bridge itself.
    V6BridgeLamp,
}

impl BulbFamily {
    pub fn version(self) -> ProtocolVersion {
        match self {
            BulbFamily::V2Rgb => ProtocolVersion::V2,
            BulbFamily::V3White | BulbFamily::V3Rgbw => ProtocolVersion::V3,
            BulbFamily::V6RgbCwWw | BulbFamily::V6Rgbw | BulbFamily::V6BridgeLamp => {
                ProtocolVersion::V6
            }
        }
    }

    /// Offset separating the coalescing ids of families sharing a bridge.
    pub fn type_offset(self) -> u8 {
        match self {
            BulbFamily::V3White | BulbFamily::V6BridgeLamp => 0,
            BulbFamily::V2Rgb => 5,
            BulbFamily::V3Rgbw | BulbFamily::V6RgbCwWw => 10,
            BulbFamily::V6Rgbw => 20,
        }
    }

    /// Zones a bulb of this family can be addressed on; 0 means all zones.
    pub fn zones(self) -> RangeInclusive<u8> {
        match self {
            BulbFamily::V2Rgb => 0..=0,
            BulbFamily::V6BridgeLamp => 1..=1,
            _ => 0..=4,
        }
    }

    pub fn capabilities(self) -> &'static [Capability] {
        use Capability::*;
        match self {
            BulbFamily::V2Rgb => &[Power, Color, Brightness],
            BulbFamily::V3White => &[Power, Brightness, ColorTemperature, NightMode, Animation],
            BulbFamily::V3Rgbw => &[
                Power,
                Color,
                Brightness,
                Animation,
                AnimationSpeed,
                WhiteMode,
                NightMode,
            ],
            BulbFamily::V6RgbCwWw => &[
                Power,
                Color,
                Brightness,
                Saturation,
                ColorTemperature,
                Animation,
                AnimationSpeed,
                WhiteMode,
                NightMode,
                Link,
            ],
            BulbFamily::V6Rgbw => &[
                Power,
                Color,
                Brightness,
                Animation,
                AnimationSpeed,
                WhiteMode,
                NightMode,
                Link,
            ],
            BulbFamily::V6BridgeLamp => &[
                Power,
                Color,
                Brightness,
                Animation,
                AnimationSpeed,
                WhiteMode,
            ],
        }
    }

    pub fn supports(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

/// Log an operation the family cannot perform.
pub(crate) fn unsupported(family: BulbFamily, operation: &str) -> Result<()> {
    info!("{operation} is not supported by {family} bulbs");
    Ok(())
}

/// Reject zones the family cannot address.
pub(crate) fn check_zone(family: BulbFamily, zone: u8) -> Result<()> {
    if family.zones().contains(&zone) {
        Ok(())
    } else {
        Err(Error::UnsupportedZone { family, zone })
    }
}

/// Number of relative steps emulating a change from `from` to `to`.
///
/// ```
/// use milight_rs::bulb::step_count;
///
/// assert_eq!(step_count(20, 50, 10), 3);
/// assert_eq!(step_count(50, 20, 10), 3);
/// assert_eq!(step_count(20, 24, 10), 0);
/// ```
pub fn step_count(from: i32, to: i32, step: i32) -> usize {
    ((to - from).abs() as f64 / step as f64).round() as usize
}

/// A controller for one bulb family on one zone.
///
/// Every operation takes the zone's [`LightState`] and leaves it holding the
/// commanded values. Operations the family does not support log at info
/// level and succeed without sending anything. Errors are only returned when
/// a frame could not be queued.
pub trait Bulb: Send + Sync + fmt::Debug {
    fn family(&self) -> BulbFamily;

    fn zone(&self) -> u8;

    fn set_power(&self, on: bool, state: &mut LightState) -> Result<()>;

    /// Set the colour. `hue` is in degrees; saturation and brightness are
    /// applied afterwards when given.
    fn set_hsb(
        &self,
        _hue: f32,
        _saturation: Option<i32>,
        _brightness: Option<i32>,
        _state: &mut LightState,
    ) -> Result<()> {
        unsupported(self.family(), "Colour")
    }

    fn white_mode(&self, _state: &mut LightState) -> Result<()> {
        unsupported(self.family(), "White mode")
    }

    fn night_mode(&self, _state: &mut LightState) -> Result<()> {
        unsupported(self.family(), "Night mode")
    }

    /// Colour temperature in percent, 0 is coldest.
    fn set_color_temperature(&self, _value: i32, _state: &mut LightState) -> Result<()> {
        unsupported(self.family(), "Colour temperature")
    }

    fn change_color_temperature(&self, _delta: i32, _state: &mut LightState) -> Result<()> {
        unsupported(self.family(), "Colour temperature")
    }

    /// Brightness in percent; 0 switches the bulb off.
    fn set_brightness(&self, value: i32, state: &mut LightState) -> Result<()>;

    fn change_brightness(&self, delta: i32, state: &mut LightState) -> Result<()>;

    fn set_saturation(&self, _value: i32, _state: &mut LightState) -> Result<()> {
        unsupported(self.family(), "Saturation")
    }

    fn set_led_mode(&self, _mode: i32, _state: &mut LightState) -> Result<()> {
        unsupported(self.family(), "Animation mode")
    }

    fn next_animation_mode(&self, _state: &mut LightState) -> Result<()> {
        unsupported(self.family(), "Animation mode")
    }

    fn previous_animation_mode(&self, _state: &mut LightState) -> Result<()> {
        unsupported(self.family(), "Animation mode")
    }

    /// One speed step up (`delta > 0`) or down (`delta < 0`).
    fn change_speed(&self, _delta: i32, _state: &mut LightState) -> Result<()> {
        unsupported(self.family(), "Animation speed")
    }

    /// Emulated with 10 unit [`Bulb::change_speed`] steps.
    fn set_animation_speed(&self, speed: i32, state: &mut LightState) -> Result<()> {
        if !self.family().supports(Capability::AnimationSpeed) {
            return unsupported(self.family(), "Animation speed");
        }
        let direction = (speed - state.animation_speed).signum();
        for _ in 0..step_count(state.animation_speed, speed, 10) {
            self.change_speed(direction, state)?;
        }
        state.animation_speed = speed;
        Ok(())
    }

    /// Pair the bulbs currently powered on the zone with the bridge.
    fn link(&self) -> Result<()> {
        unsupported(self.family(), "Linking")
    }

    fn unlink(&self) -> Result<()> {
        unsupported(self.family(), "Unlinking")
    }
}

/// Build the encoder for `family` on `zone` of a bridge speaking `version`.
///
/// v6 families need the bridge's session.
pub fn new_bulb(
    family: BulbFamily,
    zone: u8,
    version: ProtocolVersion,
    queue: Arc<CommandQueue>,
    session: Option<Arc<SessionManager>>,
) -> Result<Box<dyn Bulb>> {
    let mismatch = Error::FamilyMismatch { family, version };
    if family.version() != version {
        return Err(mismatch);
    }
    check_zone(family, zone)?;

    let bulb: Box<dyn Bulb> = match family {
        BulbFamily::V2Rgb => Box::new(V2Rgb::new(queue)),
        BulbFamily::V3White => Box::new(V3White::new(queue, zone)?),
        BulbFamily::V3Rgbw => Box::new(V3Rgbw::new(queue, zone)?),
        BulbFamily::V6RgbCwWw | BulbFamily::V6Rgbw | BulbFamily::V6BridgeLamp => {
            let session = session.ok_or(mismatch)?;
            Box::new(V6Bulb::new(family, zone, queue, session)?)
        }
    };
    Ok(bulb)
}
