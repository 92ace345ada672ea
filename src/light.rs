//! Individual zone control.

use serde_json::{Value, json};

use crate::bulb::{Bulb, BulbFamily, Capability};
use crate::errors::Error;
use crate::state::LightState;

type Result<T> = std::result::Result<T, Error>;

/// One bulb family on one zone, together with what was last commanded to it.
///
/// A `Light` is the single writer of its [`LightState`]; every operation takes
/// `&mut self`, so two commands for the same zone can never interleave.
///
/// # Example
///
/// ```ignore
/// use milight_rs::{Bridge, BridgeConfig, BulbFamily, ProtocolVersion};
///
/// let config = BridgeConfig::new("10.1.1.27".parse()?, Some("ACCF23F57AD4"), ProtocolVersion::V6);
/// let bridge = Bridge::connect(config).await?;
/// let mut kitchen = bridge.light(BulbFamily::V6RgbCwWw, 1, Some("Kitchen"))?;
/// kitchen.set_brightness(60)?;
/// ```
#[derive(Debug)]
pub struct Light {
    bulb: Box<dyn Bulb>,
    name: Option<String>,
    state: LightState,
}

impl Light {
    pub fn new(bulb: Box<dyn Bulb>, name: Option<&str>) -> Self {
        Light {
            bulb,
            name: name.map(String::from),
            state: LightState::default(),
        }
    }

    /// Start from a previously saved state instead of the default one.
    pub fn with_state(mut self, state: LightState) -> Self {
        self.state = state;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn family(&self) -> BulbFamily {
        self.bulb.family()
    }

    pub fn zone(&self) -> u8 {
        self.bulb.zone()
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.family().supports(capability)
    }

    /// The last commanded state.
    pub fn state(&self) -> &LightState {
        &self.state
    }

    pub fn set_power(&mut self, on: bool) -> Result<()> {
        self.bulb.set_power(on, &mut self.state)
    }

    /// Colour from a hue in degrees, with optional saturation and brightness in percent.
    pub fn set_hsb(&mut self, hue: f32, saturation: Option<i32>, brightness: Option<i32>) -> Result<()> {
        self.bulb.set_hsb(hue, saturation, brightness, &mut self.state)
    }

    pub fn white_mode(&mut self) -> Result<()> {
        self.bulb.white_mode(&mut self.state)
    }

    pub fn night_mode(&mut self) -> Result<()> {
        self.bulb.night_mode(&mut self.state)
    }

    pub fn set_brightness(&mut self, value: i32) -> Result<()> {
        self.bulb.set_brightness(value, &mut self.state)
    }

    pub fn change_brightness(&mut self, delta: i32) -> Result<()> {
        self.bulb.change_brightness(delta, &mut self.state)
    }

    pub fn set_saturation(&mut self, value: i32) -> Result<()> {
        self.bulb.set_saturation(value, &mut self.state)
    }

    pub fn set_color_temperature(&mut self, value: i32) -> Result<()> {
        self.bulb.set_color_temperature(value, &mut self.state)
    }

    pub fn change_color_temperature(&mut self, delta: i32) -> Result<()> {
        self.bulb.change_color_temperature(delta, &mut self.state)
    }

    pub fn set_led_mode(&mut self, mode: i32) -> Result<()> {
        self.bulb.set_led_mode(mode, &mut self.state)
    }

    pub fn next_animation_mode(&mut self) -> Result<()> {
        self.bulb.next_animation_mode(&mut self.state)
    }

    pub fn previous_animation_mode(&mut self) -> Result<()> {
        self.bulb.previous_animation_mode(&mut self.state)
    }

    pub fn set_animation_speed(&mut self, speed: i32) -> Result<()> {
        self.bulb.set_animation_speed(speed, &mut self.state)
    }

    pub fn change_speed(&mut self, delta: i32) -> Result<()> {
        self.bulb.change_speed(delta, &mut self.state)
    }

    pub fn link(&self) -> Result<()> {
        self.bulb.link()
    }

    pub fn unlink(&self) -> Result<()> {
        self.bulb.unlink()
    }

    pub fn diagnostics(&self) -> Value {
        json!({
            "name": self.name,
            "family": self.family().to_string(),
            "zone": self.zone(),
            "capabilities": self.family().capabilities(),
            "state": self.state,
        })
    }
}
