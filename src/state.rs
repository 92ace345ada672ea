use serde::{Deserialize, Serialize};

/// Last commanded state of one zone.
///
/// Bridges never report back, so this is a write-through cache of what was
/// sent, not a confirmed state. Encoders diff against it to emulate absolute
/// values with relative step commands.
///
/// ```
/// use milight_rs::LightState;
///
/// let state = LightState::default();
/// assert!(!state.power);
/// assert_eq!(state.brightness, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightState {
    pub power: bool,
    /// Hue as a fraction of the colour wheel, `0.0..=1.0`.
    pub hue: f32,
    pub saturation: i32,
    pub brightness: i32,
    pub color_temperature: i32,
    pub led_mode: i32,
    pub animation_speed: i32,
}

impl LightState {
    /// Hue in degrees.
    pub fn hue_degrees(&self) -> f32 {
        self.hue * 360.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_camel_case() {
        let state = LightState {
            color_temperature: 40,
            led_mode: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["colorTemperature"], 40);
        assert_eq!(json["ledMode"], 3);
        assert_eq!(json["power"], false);
    }

    #[test]
    fn test_hue_degrees() {
        let state = LightState {
            hue: 0.5,
            ..Default::default()
        };
        assert_eq!(state.hue_degrees(), 180.0);
    }
}
