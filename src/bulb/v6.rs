//! Bulbs of v6 (iBox) bridges.
//!
//! All v6 families share one frame layout and differ only in their remote
//! byte and command pairs, so a single table driven encoder serves them.
//! Every operation needs a valid session; without one it logs an error and
//! sends nothing.

use std::sync::Arc;

use log::error;

use super::{Bulb, BulbFamily, Capability, LED_MODES, Result, check_zone, step_count, unsupported};
use crate::config::ProtocolVersion;
use crate::errors::Error;
use crate::frame::{self, CommandCategory, Frame, SessionFields, coalesce_id, hue_to_color_byte};
use crate::queue::CommandQueue;
use crate::session::SessionManager;
use crate::state::LightState;

/// Largest brightness and saturation byte.
const MAX_LEVEL: i32 = 0x64;
/// Largest colour temperature byte.
const MAX_TEMPERATURE: i32 = 64;

type Command = (u8, u8);

#[derive(Debug)]
struct V6Commands {
    /// `08` for remote controlled bulbs, `00` for the lamp in the bridge.
    remote: u8,
    on: Command,
    off: Command,
    white: Command,
    night: Option<Command>,
    brightness: u8,
    saturation: Option<u8>,
    temperature: Option<u8>,
    mode: u8,
    speed_up: Command,
    speed_down: Command,
}

static RGB_CW_WW: V6Commands = V6Commands {
    remote: 0x08,
    on: (0x04, 0x01),
    off: (0x04, 0x02),
    white: (0x05, 0x64),
    night: Some((0x04, 0x05)),
    brightness: 0x03,
    saturation: Some(0x02),
    temperature: Some(0x05),
    mode: 0x06,
    speed_up: (0x04, 0x03),
    speed_down: (0x04, 0x04),
};

static RGBW: V6Commands = V6Commands {
    remote: 0x07,
    on: (0x03, 0x01),
    off: (0x03, 0x02),
    white: (0x03, 0x05),
    night: Some((0x03, 0x06)),
    brightness: 0x02,
    saturation: None,
    temperature: None,
    mode: 0x06,
    speed_up: (0x04, 0x03),
    speed_down: (0x04, 0x04),
};

static BRIDGE_LAMP: V6Commands = V6Commands {
    remote: 0x00,
    on: (0x03, 0x03),
    off: (0x03, 0x04),
    white: (0x03, 0x05),
    night: None,
    brightness: 0x02,
    saturation: None,
    temperature: None,
    mode: 0x04,
    speed_up: (0x03, 0x02),
    speed_down: (0x03, 0x01),
};

/// Encoder for every v6 bulb family.
#[derive(Debug)]
pub struct V6Bulb {
    family: BulbFamily,
    zone: u8,
    commands: &'static V6Commands,
    queue: Arc<CommandQueue>,
    session: Arc<SessionManager>,
}

impl V6Bulb {
    /// Fails for families of other generations and zones the family cannot address.
    pub fn new(
        family: BulbFamily,
        zone: u8,
        queue: Arc<CommandQueue>,
        session: Arc<SessionManager>,
    ) -> Result<Self> {
        let commands = match family {
            BulbFamily::V6RgbCwWw => &RGB_CW_WW,
            BulbFamily::V6Rgbw => &RGBW,
            BulbFamily::V6BridgeLamp => &BRIDGE_LAMP,
            family => {
                return Err(Error::FamilyMismatch {
                    family,
                    version: ProtocolVersion::V6,
                });
            }
        };
        check_zone(family, zone)?;
        Ok(V6Bulb {
            family,
            zone,
            commands,
            queue,
            session,
        })
    }

    fn session_valid(&self) -> bool {
        if self.session.is_valid() {
            return true;
        }
        error!(
            "Session with bridge {} not valid yet, dropping {} command",
            self.session.bridge_id(),
            self.family
        );
        false
    }

    fn fields(&self) -> Option<SessionFields> {
        let fields = self.session.next_fields();
        if fields.is_none() {
            error!("Session with bridge {} was lost", self.session.bridge_id());
        }
        fields
    }

    fn id(&self, category: CommandCategory) -> u32 {
        coalesce_id(category, self.family.type_offset(), self.zone)
    }

    fn command(&self, category: CommandCategory, (cmd1, cmd2): Command) -> Result<()> {
        let Some(fields) = self.fields() else {
            return Ok(());
        };
        let bytes = frame::v6_command(&fields, self.commands.remote, cmd1, cmd2, self.zone);
        self.queue
            .enqueue(Frame::new(bytes.to_vec(), self.id(category), true))
    }

    fn step(&self, (cmd1, cmd2): Command) -> Result<()> {
        let Some(fields) = self.fields() else {
            return Ok(());
        };
        let bytes = frame::v6_command(&fields, self.commands.remote, cmd1, cmd2, self.zone);
        self.queue.enqueue(Frame::relative(bytes.to_vec()))
    }

    fn send_link(&self, link: bool) -> Result<()> {
        if !self.family.supports(Capability::Link) {
            return unsupported(self.family, if link { "Linking" } else { "Unlinking" });
        }
        if !self.session_valid() {
            return Ok(());
        }
        let Some(fields) = self.fields() else {
            return Ok(());
        };
        let bytes = frame::v6_link(&fields, self.commands.remote, link, self.zone);
        self.queue.enqueue(Frame::new(
            bytes.to_vec(),
            self.id(CommandCategory::Link),
            true,
        ))
    }
}

impl Bulb for V6Bulb {
    fn family(&self) -> BulbFamily {
        self.family
    }

    fn zone(&self) -> u8 {
        self.zone
    }

    fn set_power(&self, on: bool, state: &mut LightState) -> Result<()> {
        if !self.session_valid() {
            return Ok(());
        }
        let cmd = if on {
            self.commands.on
        } else {
            self.commands.off
        };
        self.command(CommandCategory::Power, cmd)?;
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
        if !self.session_valid() {
            return Ok(());
        }
        // without saturation control low saturation selects the white LEDs
        if self.commands.saturation.is_none() && saturation.is_some_and(|s| s < 50) {
            return self.white_mode(state);
        }

        let Some(fields) = self.fields() else {
            return Ok(());
        };
        let color = hue_to_color_byte(hue as f64);
        let bytes = frame::v6_color(&fields, self.commands.remote, color, self.zone);
        self.queue.enqueue(Frame::new(
            bytes.to_vec(),
            self.id(CommandCategory::Color),
            true,
        ))?;
        state.hue = hue / 360.0;

        if let Some(brightness) = brightness {
            self.set_brightness(brightness, state)?;
        }
        if let Some(saturation) = saturation
            && self.commands.saturation.is_some()
        {
            self.set_saturation(saturation, state)?;
        }
        Ok(())
    }

    fn white_mode(&self, _state: &mut LightState) -> Result<()> {
        if !self.session_valid() {
            return Ok(());
        }
        self.command(CommandCategory::WhiteMode, self.commands.white)
    }

    fn night_mode(&self, state: &mut LightState) -> Result<()> {
        let Some(night) = self.commands.night else {
            return unsupported(self.family, "Night mode");
        };
        if !self.session_valid() {
            return Ok(());
        }
        self.set_power(true, state)?;
        self.command(CommandCategory::NightMode1, night)
    }

    fn set_color_temperature(&self, value: i32, state: &mut LightState) -> Result<()> {
        let Some(cmd) = self.commands.temperature else {
            return unsupported(self.family, "Colour temperature");
        };
        if !self.session_valid() {
            return Ok(());
        }
        let value = value.clamp(0, 100);
        let ct = value * MAX_TEMPERATURE / 100;
        self.command(CommandCategory::Temperature, (cmd, ct as u8))?;
        state.color_temperature = value;
        Ok(())
    }

    fn change_color_temperature(&self, delta: i32, state: &mut LightState) -> Result<()> {
        if self.commands.temperature.is_none() {
            return unsupported(self.family, "Colour temperature");
        }
        if !self.session_valid() || delta == 0 {
            return Ok(());
        }
        let ct = (state.color_temperature * MAX_TEMPERATURE / 100 + delta).clamp(0, MAX_TEMPERATURE);
        self.set_color_temperature(ct * 100 / MAX_TEMPERATURE, state)
    }

    fn set_brightness(&self, value: i32, state: &mut LightState) -> Result<()> {
        if !self.session_valid() {
            return Ok(());
        }
        if value <= 0 {
            self.set_power(false, state)?;
            state.brightness = 0;
            return Ok(());
        }
        if state.brightness <= 0 {
            self.set_power(true, state)?;
        }

        let value = value.min(100);
        let br = (value * MAX_LEVEL / 100).clamp(0, MAX_LEVEL);
        self.command(
            CommandCategory::Brightness,
            (self.commands.brightness, br as u8),
        )?;
        state.brightness = value;
        Ok(())
    }

    fn change_brightness(&self, delta: i32, state: &mut LightState) -> Result<()> {
        if !self.session_valid() || delta == 0 {
            return Ok(());
        }
        self.set_brightness((state.brightness + delta).clamp(0, 100), state)
    }

    fn set_saturation(&self, value: i32, state: &mut LightState) -> Result<()> {
        let Some(cmd) = self.commands.saturation else {
            return unsupported(self.family, "Saturation");
        };
        if !self.session_valid() {
            return Ok(());
        }
        let sat = (value * MAX_LEVEL / 100).clamp(0, MAX_LEVEL);
        self.command(CommandCategory::Saturation, (cmd, sat as u8))?;
        state.saturation = value.clamp(0, 100);
        Ok(())
    }

    fn set_led_mode(&self, mode: i32, state: &mut LightState) -> Result<()> {
        if !self.session_valid() {
            return Ok(());
        }
        let mode = mode.clamp(*LED_MODES.start(), *LED_MODES.end());
        self.command(CommandCategory::Mode, (self.commands.mode, mode as u8))?;
        state.led_mode = mode;
        Ok(())
    }

    fn next_animation_mode(&self, state: &mut LightState) -> Result<()> {
        self.set_led_mode(state.led_mode + 1, state)
    }

    fn previous_animation_mode(&self, state: &mut LightState) -> Result<()> {
        self.set_led_mode(state.led_mode - 1, state)
    }

    fn change_speed(&self, delta: i32, state: &mut LightState) -> Result<()> {
        if !self.session_valid() || delta == 0 {
            return Ok(());
        }
        let cmd = if delta > 0 {
            self.commands.speed_up
        } else {
            self.commands.speed_down
        };
        self.step(cmd)?;
        state.animation_speed = (state.animation_speed + 10 * delta.signum()).clamp(0, 100);
        Ok(())
    }

    fn set_animation_speed(&self, speed: i32, state: &mut LightState) -> Result<()> {
        if !self.session_valid() {
            return Ok(());
        }
        let direction = (speed - state.animation_speed).signum();
        for _ in 0..step_count(state.animation_speed, speed, 10) {
            self.change_speed(direction, state)?;
        }
        state.animation_speed = speed;
        Ok(())
    }

    fn link(&self) -> Result<()> {
        self.send_link(true)
    }

    fn unlink(&self) -> Result<()> {
        self.send_link(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::frame::command_checksum;
    use crate::queue::tests::idle_queue;
    use crate::session::tests::{ID, valid_session};

    fn bulb(family: BulbFamily, zone: u8, queue: &Arc<CommandQueue>) -> V6Bulb {
        V6Bulb::new(family, zone, Arc::clone(queue), valid_session(queue)).unwrap()
    }

    /// `(remote, cmd1, cmd2, zone)` of each frame.
    fn commands(frames: &[Frame]) -> Vec<(u8, u8, u8, u8)> {
        frames
            .iter()
            .map(|f| {
                let b = f.bytes();
                (b[13], b[14], b[15], b[19])
            })
            .collect()
    }

    #[tokio::test]
    async fn test_power_frame_layout() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = bulb(BulbFamily::V6RgbCwWw, 1, &queue);
        let mut state = LightState::default();

        bulb.set_power(true, &mut state).unwrap();

        let frames = queue.take_pending();
        assert_eq!(frames.len(), 1);
        let bytes: [u8; 22] = frames[0].bytes().try_into().unwrap();
        assert_eq!(&bytes[..11], &[0x80, 0, 0, 0, 0x11, 0xED, 0xAB, 0, 1, 0, 0x31]);
        assert_eq!(commands(&frames), vec![(0x08, 0x04, 0x01, 1)]);
        assert_eq!(bytes[21], command_checksum(&bytes));
        assert!(state.power);
    }

    #[tokio::test]
    async fn test_invalid_session_sends_nothing() {
        let (queue, _bridge) = idle_queue().await;
        let session = Arc::new(SessionManager::start(Arc::clone(&queue), ID, [0, 0]));
        let bulb = V6Bulb::new(BulbFamily::V6Rgbw, 2, Arc::clone(&queue), session).unwrap();
        let mut state = LightState::default();

        bulb.set_brightness(50, &mut state).unwrap();
        bulb.set_hsb(90.0, Some(100), None, &mut state).unwrap();

        assert!(queue.take_pending().is_empty());
        assert_eq!(state, LightState::default());
    }

    #[tokio::test]
    async fn test_only_v6_families() {
        let (queue, _bridge) = idle_queue().await;
        let session = valid_session(&queue);
        assert!(V6Bulb::new(BulbFamily::V3Rgbw, 1, Arc::clone(&queue), session).is_err());
    }

    #[tokio::test]
    async fn test_zone_outside_family_is_rejected() {
        let (queue, _bridge) = idle_queue().await;
        let session = valid_session(&queue);
        assert_eq!(
            V6Bulb::new(BulbFamily::V6Rgbw, 5, Arc::clone(&queue), Arc::clone(&session))
                .unwrap_err(),
            Error::UnsupportedZone {
                family: BulbFamily::V6Rgbw,
                zone: 5
            }
        );
        assert!(V6Bulb::new(BulbFamily::V6BridgeLamp, 0, Arc::clone(&queue), session).is_err());
    }

    #[tokio::test]
    async fn test_brightness_zero_is_power_off() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = bulb(BulbFamily::V6Rgbw, 3, &queue);
        let mut state = LightState {
            power: true,
            brightness: 70,
            ..Default::default()
        };

        bulb.set_brightness(0, &mut state).unwrap();
        assert_eq!(commands(&queue.take_pending()), vec![(0x07, 0x03, 0x02, 3)]);
        assert_eq!(state.brightness, 0);

        // turning on again from zero
        bulb.set_brightness(40, &mut state).unwrap();
        assert_eq!(
            commands(&queue.take_pending()),
            vec![(0x07, 0x03, 0x01, 3), (0x07, 0x02, 40, 3)]
        );
        assert_eq!(state.brightness, 40);
    }

    #[tokio::test]
    async fn test_color_temperature() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = bulb(BulbFamily::V6RgbCwWw, 0, &queue);
        let mut state = LightState::default();

        bulb.set_color_temperature(50, &mut state).unwrap();
        bulb.change_color_temperature(10, &mut state).unwrap();

        // the second value replaced the first in the queue
        assert_eq!(commands(&queue.take_pending()), vec![(0x08, 0x05, 41, 0)]);
        assert_eq!(state.color_temperature, 65);
    }

    #[tokio::test]
    async fn test_low_saturation_without_saturation_control() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = bulb(BulbFamily::V6Rgbw, 1, &queue);
        let mut state = LightState::default();

        bulb.set_hsb(200.0, Some(10), None, &mut state).unwrap();
        assert_eq!(commands(&queue.take_pending()), vec![(0x07, 0x03, 0x05, 1)]);

        bulb.set_hsb(0.0, Some(90), None, &mut state).unwrap();
        let frames = queue.take_pending();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].bytes()[13..19], &[0x07, 0x01, 176, 176, 176, 176]);
        assert_eq!(state.hue, 0.0);
    }

    #[tokio::test]
    async fn test_hsb_with_saturation_control() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = bulb(BulbFamily::V6RgbCwWw, 2, &queue);
        let mut state = LightState {
            brightness: 30,
            ..Default::default()
        };

        bulb.set_hsb(90.0, Some(20), Some(80), &mut state).unwrap();
        let frames = queue.take_pending();
        assert_eq!(frames[0].bytes()[14], 0x01);
        assert_eq!(
            commands(&frames[1..]),
            vec![(0x08, 0x03, 80, 2), (0x08, 0x02, 20, 2)]
        );
        assert_eq!(state.saturation, 20);
        assert_eq!(state.hue, 0.25);
    }

    #[tokio::test]
    async fn test_modes_are_clamped() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = bulb(BulbFamily::V6BridgeLamp, 1, &queue);
        let mut state = LightState {
            led_mode: 9,
            ..Default::default()
        };

        bulb.next_animation_mode(&mut state).unwrap();
        assert_eq!(state.led_mode, 9);
        bulb.set_led_mode(0, &mut state).unwrap();
        assert_eq!(state.led_mode, 1);
        assert_eq!(commands(&queue.take_pending()), vec![(0x00, 0x04, 1, 1)]);
    }

    #[tokio::test]
    async fn test_speed_steps_are_never_coalesced() {
        let (queue, _bridge) = idle_queue().await;
        let bulb = bulb(BulbFamily::V6BridgeLamp, 1, &queue);
        let mut state = LightState::default();

        bulb.set_animation_speed(30, &mut state).unwrap();
        bulb.change_speed(-1, &mut state).unwrap();

        let frames = queue.take_pending();
        assert_eq!(
            commands(&frames),
            vec![
                (0x00, 0x03, 0x02, 1),
                (0x00, 0x03, 0x02, 1),
                (0x00, 0x03, 0x02, 1),
                (0x00, 0x03, 0x01, 1),
            ]
        );
        assert!(frames.iter().all(|f| f.coalesce_id() == 0));
        // each step carries its own sequence number
        let sequences: Vec<u8> = frames.iter().map(|f| f.bytes()[8]).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
        assert_eq!(state.animation_speed, 20);
    }

    #[tokio::test]
    async fn test_link_support() {
        let (queue, _bridge) = idle_queue().await;

        bulb(BulbFamily::V6BridgeLamp, 1, &queue).link().unwrap();
        assert!(queue.take_pending().is_empty());

        bulb(BulbFamily::V6Rgbw, 4, &queue).unlink().unwrap();
        let frames = queue.take_pending();
        assert_eq!(frames[0].bytes()[0], 0x3E);
        assert_eq!(frames[0].bytes()[19], 4);
    }

    #[tokio::test]
    async fn test_night_mode() {
        let (queue, _bridge) = idle_queue().await;
        let mut state = LightState::default();

        bulb(BulbFamily::V6BridgeLamp, 1, &queue)
            .night_mode(&mut state)
            .unwrap();
        assert!(queue.take_pending().is_empty());

        bulb(BulbFamily::V6RgbCwWw, 1, &queue)
            .night_mode(&mut state)
            .unwrap();
        assert_eq!(
            commands(&queue.take_pending()),
            vec![(0x08, 0x04, 0x01, 1), (0x08, 0x04, 0x05, 1)]
        );
    }
}
