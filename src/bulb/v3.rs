//! Bulbs of v3/v4/v5 bridges.
//!
//! Power, night and white commands carry the zone in the command byte; the
//! tables below are indexed by zone, 0 meaning all zones.

use std::sync::Arc;

use log::debug;

use super::legacy::LegacyChannel;
use super::{Bulb, BulbFamily, LED_MODES, Result, check_zone};
use crate::frame::{CommandCategory, hue_to_color_byte};
use crate::queue::CommandQueue;
use crate::state::LightState;

/// `ceil(value * levels / 100)` for percentages.
fn level(value: i32, levels: i32) -> i32 {
    (value * levels + 99) / 100
}

/// Inverse of [`level`].
fn percent(level: i32, levels: i32) -> i32 {
    level * 100 / levels
}

mod white {
    pub const ON: [u8; 5] = [0x35, 0x38, 0x3D, 0x37, 0x32];
    pub const OFF: [u8; 5] = [0x39, 0x3B, 0x33, 0x3A, 0x36];
    pub const FULL: [u8; 5] = [0xB5, 0xB8, 0xBD, 0xB7, 0xB2];
    pub const NIGHT: [u8; 5] = [0xB9, 0xBB, 0xB3, 0xBA, 0xB6];
    pub const BRIGHTER: u8 = 0x3C;
    pub const DIMMER: u8 = 0x34;
    pub const WARMER: u8 = 0x3E;
    pub const COOLER: u8 = 0x3F;
    pub const NEXT_MODE: u8 = 0x27;
    pub const PREVIOUS_MODE: u8 = 0x28;
    /// Brightness and temperature levels, not counting off.
    pub const LEVELS: i32 = 11;
}

mod rgbw {
    pub const ON: [u8; 5] = [0x42, 0x45, 0x47, 0x49, 0x4B];
    pub const OFF: [u8; 5] = [0x41, 0x46, 0x48, 0x4A, 0x4C];
    pub const WHITE: [u8; 5] = [0xC2, 0xC5, 0xC7, 0xC9, 0xCB];
    pub const NIGHT: [u8; 5] = [0xC1, 0xC6, 0xC8, 0xCA, 0xCC];
    pub const COLOR: u8 = 0x40;
    pub const BRIGHTNESS: u8 = 0x4E;
    pub const SPEED_UP: u8 = 0x44;
    pub const SPEED_DOWN: u8 = 0x43;
    pub const NEXT_MODE: u8 = 0x4D;
    pub const LEVELS: i32 = 26;
}

/// Dimmable white bulb with adjustable colour temperature.
#[derive(Debug, Clone)]
pub struct V3White {
    channel: LegacyChannel,
}

impl V3White {
    /// Fails for zones above 4.
    pub fn new(queue: Arc<CommandQueue>, zone: u8) -> Result<Self> {
        check_zone(BulbFamily::V3White, zone)?;
        Ok(V3White {
            channel: LegacyChannel::new(queue, BulbFamily::V3White, zone),
        })
    }

    fn zone_cmd(&self, table: &[u8; 5]) -> u8 {
        table[self.channel.zone() as usize]
    }

    fn set_full(&self, state: &mut LightState) -> Result<()> {
        let cmd = self.zone_cmd(&white::FULL);
        self.channel
            .send(CommandCategory::Brightness, cmd, 0, true)?;
        state.power = true;
        state.brightness = 100;
        Ok(())
    }

    /// One step towards `to`, a level in `1..=LEVELS`.
    fn temperature_step(&self, warmer: bool, to: i32, state: &mut LightState) -> Result<()> {
        let cmd = if warmer { white::WARMER } else { white::COOLER };
        self.channel.step(cmd)?;
        state.color_temperature = percent(to.clamp(1, white::LEVELS), white::LEVELS);
        Ok(())
    }

    fn mode_step(&self, next: bool, state: &mut LightState) -> Result<()> {
        let cmd = if next {
            white::NEXT_MODE
        } else {
            white::PREVIOUS_MODE
        };
        self.channel.step(cmd)?;
        let delta = if next { 1 } else { -1 };
        state.led_mode = (state.led_mode + delta).clamp(*LED_MODES.start(), *LED_MODES.end());
        Ok(())
    }
}

impl Bulb for V3White {
    fn family(&self) -> BulbFamily {
        BulbFamily::V3White
    }

    fn zone(&self) -> u8 {
        self.channel.zone()
    }

    fn set_power(&self, on: bool, state: &mut LightState) -> Result<()> {
        let cmd = self.zone_cmd(if on { &white::ON } else { &white::OFF });
        self.channel.send(CommandCategory::Power, cmd, 0, true)?;
        state.power = on;
        Ok(())
    }

    /// Only the brightness applies to white bulbs.
    fn set_hsb(
        &self,
        _hue: f32,
        _saturation: Option<i32>,
        brightness: Option<i32>,
        state: &mut LightState,
    ) -> Result<()> {
        match brightness {
            Some(brightness) => self.set_brightness(brightness, state),
            None => Ok(()),
        }
    }

    fn night_mode(&self, _state: &mut LightState) -> Result<()> {
        let cmd = self.zone_cmd(&white::NIGHT);
        self.channel.send(CommandCategory::NightMode1, cmd, 0, true)
    }

    fn set_color_temperature(&self, value: i32, state: &mut LightState) -> Result<()> {
        // the extremes reset the bulb to a known level
        let (value, target, current) = if value <= 0 {
            (0, 1, white::LEVELS)
        } else if value >= 100 {
            (100, white::LEVELS, 1)
        } else {
            (
                value,
                level(value, white::LEVELS),
                level(state.color_temperature, white::LEVELS),
            )
        };

        let steps = (target - current).abs();
        if steps > 0 {
            self.set_power(true, state)?;
        }
        let warmer = target > current;
        for i in 1..=steps {
            let to = if warmer { current + i } else { current - i };
            self.temperature_step(warmer, to, state)?;
        }
        state.color_temperature = value;
        Ok(())
    }

    fn change_color_temperature(&self, delta: i32, state: &mut LightState) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        self.set_power(true, state)?;
        let current = level(state.color_temperature, white::LEVELS);
        let to = if delta > 0 { current + 1 } else { current - 1 };
        self.temperature_step(delta > 0, to, state)
    }

    fn set_brightness(&self, value: i32, state: &mut LightState) -> Result<()> {
        if value <= 0 {
            self.set_power(false, state)?;
            state.brightness = 0;
            return Ok(());
        }
        if value >= 100 {
            return self.set_full(state);
        }

        let target = level(value, white::LEVELS);
        // when turning on, start from full brightness
        let current = if state.brightness <= 0 {
            self.set_full(state)?;
            white::LEVELS
        } else {
            self.set_power(true, state)?;
            level(state.brightness, white::LEVELS)
        };

        let steps = (target - current).abs();
        debug!(
            "Dim white zone {} from {} to {value} in {steps} steps",
            self.channel.zone(),
            state.brightness
        );
        let brighter = target > current;
        let cmd = if brighter {
            white::BRIGHTER
        } else {
            white::DIMMER
        };
        for i in 1..=steps {
            self.channel.step(cmd)?;
            let reached = if brighter { current + i } else { current - i };
            state.brightness = percent(reached, white::LEVELS);
        }
        state.brightness = value;
        Ok(())
    }

    fn change_brightness(&self, delta: i32, state: &mut LightState) -> Result<()> {
        if delta < 0 {
            let target = (state.brightness - 10).max(0);
            if target == 0 {
                self.set_power(false, state)?;
            } else {
                self.set_power(true, state)?;
                self.channel.step(white::DIMMER)?;
            }
            state.brightness = target;
        } else if delta > 0 {
            self.set_power(true, state)?;
            self.channel.step(white::BRIGHTER)?;
            state.brightness = (state.brightness + 10).min(100);
        }
        Ok(())
    }

    fn set_led_mode(&self, mode: i32, state: &mut LightState) -> Result<()> {
        let mode = mode.clamp(*LED_MODES.start(), *LED_MODES.end());
        let steps = (mode - state.led_mode).abs();
        if steps == 0 {
            return Ok(());
        }
        self.set_power(true, state)?;
        let next = mode > state.led_mode;
        for _ in 0..steps {
            self.mode_step(next, state)?;
        }
        state.led_mode = mode;
        Ok(())
    }

    fn next_animation_mode(&self, state: &mut LightState) -> Result<()> {
        self.set_power(true, state)?;
        self.mode_step(true, state)
    }

    fn previous_animation_mode(&self, state: &mut LightState) -> Result<()> {
        self.set_power(true, state)?;
        self.mode_step(false, state)
    }
}

/// RGB plus white bulb.
#[derive(Debug, Clone)]
pub struct V3Rgbw {
    channel: LegacyChannel,
}

impl V3Rgbw {
    /// Fails for zones above 4.
    pub fn new(queue: Arc<CommandQueue>, zone: u8) -> Result<Self> {
        check_zone(BulbFamily::V3Rgbw, zone)?;
        Ok(V3Rgbw {
            channel: LegacyChannel::new(queue, BulbFamily::V3Rgbw, zone),
        })
    }

    fn zone_cmd(&self, table: &[u8; 5]) -> u8 {
        table[self.channel.zone() as usize]
    }

    /// The bulb only cycles forward through its modes.
    fn mode_step(&self, state: &mut LightState) -> Result<()> {
        self.channel.step(rgbw::NEXT_MODE)?;
        state.led_mode = if LED_MODES.contains(&state.led_mode) {
            state.led_mode % LED_MODES.end() + 1
        } else {
            *LED_MODES.start()
        };
        Ok(())
    }
}

impl Bulb for V3Rgbw {
    fn family(&self) -> BulbFamily {
        BulbFamily::V3Rgbw
    }

    fn zone(&self) -> u8 {
        self.channel.zone()
    }

    fn set_power(&self, on: bool, state: &mut LightState) -> Result<()> {
        let cmd = self.zone_cmd(if on { &rgbw::ON } else { &rgbw::OFF });
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
        // no saturation control: low saturation selects the white LEDs
        if saturation.is_some_and(|s| s < 50) {
            return self.white_mode(state);
        }

        self.set_power(true, state)?;
        let color = hue_to_color_byte(hue as f64);
        self.channel
            .send(CommandCategory::Color, rgbw::COLOR, color, true)?;
        state.hue = hue / 360.0;

        if let Some(brightness) = brightness {
            self.set_brightness(brightness, state)?;
        }
        Ok(())
    }

    fn white_mode(&self, state: &mut LightState) -> Result<()> {
        self.set_power(true, state)?;
        let cmd = self.zone_cmd(&rgbw::WHITE);
        self.channel.send(CommandCategory::WhiteMode, cmd, 0, true)
    }

    /// Night mode needs the zone's off command followed by the night command.
    fn night_mode(&self, _state: &mut LightState) -> Result<()> {
        debug!("Night mode for RGBW zone {}", self.channel.zone());
        let off = self.zone_cmd(&rgbw::OFF);
        let night = self.zone_cmd(&rgbw::NIGHT);
        self.channel
            .send(CommandCategory::NightMode1, off, 0, false)?;
        self.channel
            .send(CommandCategory::NightMode2, night, 0, false)
    }

    fn set_brightness(&self, value: i32, state: &mut LightState) -> Result<()> {
        if value <= 0 {
            self.set_power(false, state)?;
            state.brightness = 0;
            return Ok(());
        }

        let value = value.min(100);
        self.set_power(true, state)?;
        let br = level(value, rgbw::LEVELS) + 1;
        self.channel
            .send(CommandCategory::Brightness, rgbw::BRIGHTNESS, br as u8, true)?;
        state.brightness = value;
        Ok(())
    }

    fn change_brightness(&self, delta: i32, state: &mut LightState) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        self.set_brightness((state.brightness + delta).clamp(0, 100), state)
    }

    fn set_led_mode(&self, mode: i32, state: &mut LightState) -> Result<()> {
        let mode = mode.clamp(*LED_MODES.start(), *LED_MODES.end());
        let current = if LED_MODES.contains(&state.led_mode) {
            state.led_mode
        } else {
            *LED_MODES.start()
        };
        let steps = (mode - current).rem_euclid(*LED_MODES.end());
        if steps > 0 {
            self.set_power(true, state)?;
            for _ in 0..steps {
                self.mode_step(state)?;
            }
        }
        state.led_mode = mode;
        Ok(())
    }

    fn next_animation_mode(&self, state: &mut LightState) -> Result<()> {
        self.set_power(true, state)?;
        self.mode_step(state)
    }

    /// There is no previous mode command; this cycles forward like
    /// [`Bulb::next_animation_mode`].
    fn previous_animation_mode(&self, state: &mut LightState) -> Result<()> {
        self.set_power(true, state)?;
        self.mode_step(state)
    }

    fn change_speed(&self, delta: i32, state: &mut LightState) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        self.set_power(true, state)?;
        let cmd = if delta > 0 {
            rgbw::SPEED_UP
        } else {
            rgbw::SPEED_DOWN
        };
        self.channel.step(cmd)?;
        state.animation_speed = (state.animation_speed + 10 * delta.signum()).clamp(0, 100);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::errors::Error;
    use crate::frame::Frame;
    use crate::queue::tests::idle_queue;

    fn bytes(frames: &[Frame]) -> Vec<Vec<u8>> {
        frames.iter().map(|f| f.bytes().to_vec()).collect()
    }

    fn count(frames: &[Frame], cmd: u8) -> usize {
        frames.iter().filter(|f| f.bytes()[0] == cmd).count()
    }

    #[test]
    fn test_level_rounds_up() {
        assert_eq!(level(50, 11), 6);
        assert_eq!(level(1, 11), 1);
        assert_eq!(level(100, 26), 26);
        assert_eq!(level(50, 26), 13);
    }

    #[tokio::test]
    async fn test_white_turning_on_starts_from_full() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = V3White::new(Arc::clone(&queue), 2).unwrap();
        let mut state = LightState::default();

        bulb.set_brightness(50, &mut state).unwrap();

        let frames = queue.take_pending();
        assert_eq!(bytes(&frames)[0], vec![0xBD, 0x00, 0x55]);
        // level 11 down to level 6
        assert_eq!(count(&frames, white::DIMMER), 5);
        assert_eq!(state.brightness, 50);
        assert!(state.power);
    }

    #[tokio::test]
    async fn test_white_brightness_extremes() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = V3White::new(Arc::clone(&queue), 0).unwrap();
        let mut state = LightState {
            brightness: 40,
            power: true,
            ..Default::default()
        };

        bulb.set_brightness(100, &mut state).unwrap();
        assert_eq!(bytes(&queue.take_pending()), vec![vec![0xB5, 0, 0x55]]);
        assert_eq!(state.brightness, 100);

        bulb.set_brightness(0, &mut state).unwrap();
        assert_eq!(bytes(&queue.take_pending()), vec![vec![0x39, 0, 0x55]]);
        assert_eq!(state.brightness, 0);
        assert!(!state.power);
    }

    #[tokio::test]
    async fn test_zone_above_four_is_rejected() {
        let (queue, _bridge) = idle_queue().await;
        assert_eq!(
            V3White::new(Arc::clone(&queue), 5).unwrap_err(),
            Error::UnsupportedZone {
                family: BulbFamily::V3White,
                zone: 5
            }
        );
        assert!(V3Rgbw::new(Arc::clone(&queue), 9).is_err());
        assert_eq!(V3Rgbw::new(queue, 4).unwrap().zone(), 4);
    }

    #[tokio::test]
    async fn test_white_full_queue_keeps_state_at_queued_steps() {
        let (queue, _bridge) = idle_queue().await;
        for _ in 0..16 {
            queue.enqueue(Frame::relative(vec![0x00, 0x00, 0x55])).unwrap();
        }
        let bulb = V3White::new(Arc::clone(&queue), 1).unwrap();
        let mut state = LightState {
            power: true,
            brightness: 10,
            ..Default::default()
        };

        // level 2 up to level 10; the power frame and three steps fit
        assert!(bulb.set_brightness(90, &mut state).is_err());
        let frames = queue.take_pending();
        assert_eq!(count(&frames, white::BRIGHTER), 3);
        assert_eq!(state.brightness, percent(5, white::LEVELS));

        let mut state = LightState {
            color_temperature: 100,
            ..Default::default()
        };
        for _ in 0..18 {
            queue.enqueue(Frame::relative(vec![0x00, 0x00, 0x55])).unwrap();
        }
        // the power frame and one cooler step fit
        assert!(bulb.set_color_temperature(0, &mut state).is_err());
        assert_eq!(count(&queue.take_pending(), white::COOLER), 1);
        assert_eq!(state.color_temperature, percent(10, white::LEVELS));
    }

    #[tokio::test]
    async fn test_rgbw_full_queue_keeps_speed_at_queued_steps() {
        let (queue, _bridge) = idle_queue().await;
        for _ in 0..17 {
            queue.enqueue(Frame::relative(vec![0x00, 0x00, 0x55])).unwrap();
        }
        let bulb = V3Rgbw::new(Arc::clone(&queue), 2).unwrap();
        let mut state = LightState::default();

        assert_eq!(
            bulb.set_animation_speed(100, &mut state),
            Err(Error::QueueFull {
                capacity: CommandQueue::CAPACITY
            })
        );
        assert_eq!(count(&queue.take_pending(), rgbw::SPEED_UP), 2);
        assert_eq!(state.animation_speed, 20);
    }

    #[tokio::test]
    async fn test_white_color_temperature_reset() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = V3White::new(Arc::clone(&queue), 1).unwrap();
        let mut state = LightState {
            color_temperature: 50,
            ..Default::default()
        };

        bulb.set_color_temperature(100, &mut state).unwrap();
        let frames = queue.take_pending();
        assert_eq!(count(&frames, white::WARMER), 10);
        assert_eq!(state.color_temperature, 100);

        bulb.set_color_temperature(60, &mut state).unwrap();
        let frames = queue.take_pending();
        // level 11 down to ceil(6.6) = 7
        assert_eq!(count(&frames, white::COOLER), 4);
        assert_eq!(state.color_temperature, 60);
    }

    #[tokio::test]
    async fn test_white_mode_steps_are_relative() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = V3White::new(Arc::clone(&queue), 1).unwrap();
        let mut state = LightState {
            led_mode: 2,
            ..Default::default()
        };

        bulb.set_led_mode(5, &mut state).unwrap();
        let frames = queue.take_pending();
        assert_eq!(count(&frames, white::NEXT_MODE), 3);
        assert_eq!(state.led_mode, 5);
    }

    #[tokio::test]
    async fn test_rgbw_absolute_brightness() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = V3Rgbw::new(Arc::clone(&queue), 3).unwrap();
        let mut state = LightState::default();

        bulb.set_brightness(50, &mut state).unwrap();
        bulb.change_brightness(-20, &mut state).unwrap();

        let frames = queue.take_pending();
        // the newer brightness replaced the unsent one
        assert_eq!(
            bytes(&frames),
            vec![vec![0x49, 0, 0x55], vec![0x4E, 9, 0x55]]
        );
        assert_eq!(state.brightness, 30);
    }

    #[tokio::test]
    async fn test_rgbw_low_saturation_selects_white() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = V3Rgbw::new(Arc::clone(&queue), 1).unwrap();
        let mut state = LightState::default();

        bulb.set_hsb(120.0, Some(20), None, &mut state).unwrap();
        assert_eq!(
            bytes(&queue.take_pending()),
            vec![vec![0x45, 0, 0x55], vec![0xC5, 0, 0x55]]
        );

        bulb.set_hsb(0.0, Some(100), None, &mut state).unwrap();
        let frames = queue.take_pending();
        assert_eq!(frames[1].bytes(), &[rgbw::COLOR, 176, 0x55]);
    }

    #[tokio::test]
    async fn test_rgbw_night_mode_sends_both_frames() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = V3Rgbw::new(Arc::clone(&queue), 4).unwrap();
        let mut state = LightState::default();

        bulb.night_mode(&mut state).unwrap();
        let frames = queue.take_pending();
        assert_eq!(bytes(&frames), vec![vec![0x4C, 0, 0x55], vec![0xCC, 0, 0x55]]);
        assert!(frames.iter().all(|f| !f.repeatable()));
    }

    #[tokio::test]
    async fn test_rgbw_speed_emulation() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = V3Rgbw::new(Arc::clone(&queue), 1).unwrap();
        let mut state = LightState {
            animation_speed: 50,
            ..Default::default()
        };

        bulb.set_animation_speed(20, &mut state).unwrap();
        let frames = queue.take_pending();
        assert_eq!(count(&frames, rgbw::SPEED_DOWN), 3);
        assert_eq!(count(&frames, rgbw::SPEED_UP), 0);
        assert_eq!(state.animation_speed, 20);
    }

    #[tokio::test]
    async fn test_rgbw_modes_cycle_forward() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = V3Rgbw::new(Arc::clone(&queue), 1).unwrap();
        let mut state = LightState {
            led_mode: 8,
            ..Default::default()
        };

        bulb.set_led_mode(2, &mut state).unwrap();
        let frames = queue.take_pending();
        // 8 -> 9 -> 1 -> 2
        assert_eq!(count(&frames, rgbw::NEXT_MODE), 3);
        assert_eq!(state.led_mode, 2);
    }
}
