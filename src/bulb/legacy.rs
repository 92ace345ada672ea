//! RGB bulbs of legacy (v2) bridges, and the three byte frame channel shared
//! with the v3 families.

use std::sync::Arc;

use log::debug;

use super::{Bulb, BulbFamily, Result, step_count};
use crate::frame::{CommandCategory, Frame, coalesce_id, hue_to_color_byte, legacy};
use crate::queue::CommandQueue;
use crate::state::LightState;

const ON: u8 = 0x22;
const OFF: u8 = 0x21;
const COLOR: u8 = 0x20;
const BRIGHTER: u8 = 0x23;
const DIMMER: u8 = 0x24;

/// Brightness change of one step, in percent.
const BRIGHTNESS_STEP: i32 = 10;

/// Queues `{cmd, arg, 0x55}` frames for one family and zone.
#[derive(Debug, Clone)]
pub(crate) struct LegacyChannel {
    queue: Arc<CommandQueue>,
    family: BulbFamily,
    zone: u8,
}

impl LegacyChannel {
    pub(crate) fn new(queue: Arc<CommandQueue>, family: BulbFamily, zone: u8) -> Self {
        LegacyChannel {
            queue,
            family,
            zone,
        }
    }

    pub(crate) fn zone(&self) -> u8 {
        self.zone
    }

    /// Queue an absolute command, replacing an unsent one of the same category.
    pub(crate) fn send(
        &self,
        category: CommandCategory,
        cmd: u8,
        arg: u8,
        repeatable: bool,
    ) -> Result<()> {
        let id = coalesce_id(category, self.family.type_offset(), self.zone);
        self.queue
            .enqueue(Frame::new(legacy(cmd, arg).to_vec(), id, repeatable))
    }

    /// Queue a relative command. Every step is delivered.
    pub(crate) fn step(&self, cmd: u8) -> Result<()> {
        self.queue.enqueue(Frame::relative(legacy(cmd, 0).to_vec()))
    }
}

/// RGB bulb on a legacy bridge. Such bridges have no zones.
#[derive(Debug, Clone)]
pub struct V2Rgb {
    channel: LegacyChannel,
}

impl V2Rgb {
    pub fn new(queue: Arc<CommandQueue>) -> Self {
        V2Rgb {
            channel: LegacyChannel::new(queue, BulbFamily::V2Rgb, 0),
        }
    }
}

impl Bulb for V2Rgb {
    fn family(&self) -> BulbFamily {
        BulbFamily::V2Rgb
    }

    fn zone(&self) -> u8 {
        0
    }

    fn set_power(&self, on: bool, state: &mut LightState) -> Result<()> {
        debug!("Legacy RGB power {}", if on { "on" } else { "off" });
        let cmd = if on { ON } else { OFF };
        self.channel.send(CommandCategory::Power, cmd, 0, true)?;
        state.power = on;
        Ok(())
    }

    fn set_hsb(
        &self,
        hue: f32,
        saturation: Option<i32>,
        brightness: Option<i32>,
        state: &mut LightState,
    ) -> Result<()> {
        // no saturation control: low saturation means white, which this bulb lacks
        if saturation.is_some_and(|s| s < 50) {
            return self.white_mode(state);
        }

        let color = hue_to_color_byte(hue as f64);
        self.channel.send(CommandCategory::Color, COLOR, color, true)?;
        state.hue = hue / 360.0;

        if let Some(brightness) = brightness {
            self.set_brightness(brightness, state)?;
        }
        Ok(())
    }

    fn set_brightness(&self, value: i32, state: &mut LightState) -> Result<()> {
        if value <= 0 {
            self.set_power(false, state)?;
            state.brightness = 0;
            return Ok(());
        }

        let value = value.min(100);
        let steps = step_count(state.brightness, value, BRIGHTNESS_STEP);
        debug!(
            "Dim legacy RGB from {} to {value} in {steps} steps",
            state.brightness
        );
        if steps > 0 {
            self.set_power(true, state)?;
            let (cmd, delta) = if value > state.brightness {
                (BRIGHTER, BRIGHTNESS_STEP)
            } else {
                (DIMMER, -BRIGHTNESS_STEP)
            };
            // the state follows every queued step, so a full queue leaves it accurate
            for _ in 0..steps {
                self.channel.step(cmd)?;
                state.brightness = (state.brightness + delta).clamp(0, 100);
            }
        }
        state.brightness = value;
        Ok(())
    }

    fn change_brightness(&self, delta: i32, state: &mut LightState) -> Result<()> {
        if delta < 0 {
            let target = (state.brightness - BRIGHTNESS_STEP).max(0);
            if target == 0 {
                self.set_power(false, state)?;
            } else {
                self.set_power(true, state)?;
                self.channel.step(DIMMER)?;
            }
            state.brightness = target;
        } else if delta > 0 {
            self.set_power(true, state)?;
            self.channel.step(BRIGHTER)?;
            state.brightness = (state.brightness + BRIGHTNESS_STEP).min(100);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::queue::tests::idle_queue;

    fn bytes(frames: &[Frame]) -> Vec<Vec<u8>> {
        frames.iter().map(|f| f.bytes().to_vec()).collect()
    }

    #[tokio::test]
    async fn test_absolute_brightness_is_stepped() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = V2Rgb::new(Arc::clone(&queue));
        let mut state = LightState {
            power: true,
            brightness: 20,
            ..Default::default()
        };

        bulb.set_brightness(50, &mut state).unwrap();

        let frames = queue.take_pending();
        let steps: Vec<&Frame> = frames
            .iter()
            .filter(|f| f.bytes() == [BRIGHTER, 0x00, 0x55])
            .collect();
        assert_eq!(steps.len(), 3);
        assert!(steps.iter().all(|f| f.coalesce_id() == 0));
        assert_eq!(bytes(&frames)[0], vec![ON, 0x00, 0x55]);
        assert_eq!(state.brightness, 50);
    }

    #[tokio::test]
    async fn test_brightness_zero_switches_off() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = V2Rgb::new(Arc::clone(&queue));
        let mut state = LightState {
            power: true,
            brightness: 60,
            ..Default::default()
        };

        bulb.set_brightness(0, &mut state).unwrap();

        assert_eq!(bytes(&queue.take_pending()), vec![vec![OFF, 0x00, 0x55]]);
        assert!(!state.power);
        assert_eq!(state.brightness, 0);
    }

    #[tokio::test]
    async fn test_color_and_low_saturation() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = V2Rgb::new(Arc::clone(&queue));
        let mut state = LightState::default();

        bulb.set_hsb(180.0, Some(100), None, &mut state).unwrap();
        assert_eq!(bytes(&queue.take_pending()), vec![vec![COLOR, 48, 0x55]]);
        assert_eq!(state.hue, 0.5);

        bulb.set_hsb(0.0, Some(10), None, &mut state).unwrap();
        assert!(queue.take_pending().is_empty());
        assert_eq!(state.hue, 0.5);
    }

    #[tokio::test]
    async fn test_brightness_is_clamped() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = V2Rgb::new(Arc::clone(&queue));
        let mut state = LightState {
            power: true,
            brightness: 90,
            ..Default::default()
        };

        bulb.set_brightness(150, &mut state).unwrap();

        let frames = queue.take_pending();
        assert_eq!(frames.iter().filter(|f| f.bytes()[0] == BRIGHTER).count(), 1);
        assert_eq!(state.brightness, 100);
    }

    #[tokio::test]
    async fn test_full_queue_keeps_state_at_queued_steps() {
        let (queue, _bridge) = idle_queue().await;
        for _ in 0..15 {
            queue.enqueue(Frame::relative(vec![0x00, 0x00, 0x55])).unwrap();
        }
        let bulb = V2Rgb::new(Arc::clone(&queue));
        let mut state = LightState {
            power: true,
            brightness: 10,
            ..Default::default()
        };

        assert_eq!(
            bulb.set_brightness(100, &mut state),
            Err(crate::errors::Error::QueueFull {
                capacity: CommandQueue::CAPACITY
            })
        );

        let frames = queue.take_pending();
        let queued = frames.iter().filter(|f| f.bytes()[0] == BRIGHTER).count() as i32;
        // the power frame took one slot, four steps fit
        assert_eq!(queued, 4);
        assert_eq!(state.brightness, 10 + queued * BRIGHTNESS_STEP);
    }

    #[tokio::test]
    async fn test_relative_steps() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = V2Rgb::new(Arc::clone(&queue));
        let mut state = LightState {
            brightness: 10,
            ..Default::default()
        };

        bulb.change_brightness(1, &mut state).unwrap();
        assert_eq!(state.brightness, 20);
        bulb.change_brightness(-1, &mut state).unwrap();
        bulb.change_brightness(-1, &mut state).unwrap();
        assert_eq!(state.brightness, 0);
        assert!(!state.power);

        let frames = bytes(&queue.take_pending());
        // the power frames coalesce into the newest one
        assert_eq!(
            frames,
            vec![
                vec![BRIGHTER, 0, 0x55],
                vec![DIMMER, 0, 0x55],
                vec![OFF, 0, 0x55],
            ]
        );
    }
}
