//! Wire frames for all three bridge generations.
//!
//! Legacy and v3 bridges take three byte frames `{cmd, arg, 0x55}`. v6 bridges
//! take 22 byte frames laid out as
//!
//! ```text
//! 80 00 00 00 11 S1 S2 00 SN 00 31 P1 P2 WB C1 C2 00 00 00 ZN 00 CK
//! ```
//!
//! with S1/S2 the session bytes, SN the sequence number, P1/P2 the password
//! bytes, WB the remote style (08 for RGBW/CCT bulbs, 00 for the lamp built into
//! the bridge), C1/C2 the light command, ZN the zone and CK the checksum.

use std::fmt;

/// Coalescing id that is never coalesced.
pub const NO_COALESCE: u32 = 0;

/// Trailing byte of every legacy/v3 frame.
pub const LEGACY_SUFFIX: u8 = 0x55;

/// Length of a v6 command, colour, link or registration frame.
pub const V6_FRAME_LEN: usize = 22;

/// Protocol tag of v6 light commands.
pub const V6_TAG_COMMAND: u8 = 0x31;

/// Protocol tag of the v6 registration frame.
pub const V6_TAG_REGISTRATION: u8 = 0x33;

/// Probe answered by a v6 bridge with its session bytes.
pub const V6_SESSION_REQUEST: [u8; 27] = [
    0x20, 0x00, 0x00, 0x00, 0x16, 0x02, 0x62, 0x3A, 0xD5, 0xED, 0xA3, 0x01, 0xAE, 0x08, 0x2D, 0x46,
    0x61, 0x41, 0xA7, 0xF6, 0xDC, 0xAF, 0xD3, 0xE6, 0x00, 0x00, 0x1E,
];

/// Discovery probe answered by v3/v4/v5 bridges.
pub const DISCOVER_V3: &[u8] = b"Link_Wi-Fi";

/// Discovery probe answered by v6 bridges.
pub const DISCOVER_V6: &[u8] = b"HF-A11ASSISTHREAD";

/// Logical command kind of a frame; part of its coalescing id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[repr(u32)]
pub enum CommandCategory {
    Session = 1,
    KeepAlive = 2,
    Power = 3,
    Color = 4,
    Brightness = 5,
    Saturation = 6,
    Temperature = 7,
    Mode = 8,
    WhiteMode = 9,
    NightMode1 = 10,
    NightMode2 = 11,
    Link = 12,
}

/// Coalescing id of an absolute command.
///
/// Unique per category, bulb family (`type_offset`) and zone, so queued
/// commands for different bulbs sharing a bridge never replace each other.
///
/// ```
/// use milight_rs::frame::{CommandCategory, coalesce_id};
///
/// assert_eq!(coalesce_id(CommandCategory::Brightness, 10, 2), 512);
/// ```
pub fn coalesce_id(category: CommandCategory, type_offset: u8, zone: u8) -> u32 {
    category as u32 * 100 + type_offset as u32 + zone as u32
}

/// An immutable outbound frame.
///
/// `coalesce_id` is the queue category of the frame; see [`crate::CommandQueue`].
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
    coalesce_id: u32,
    repeatable: bool,
}

impl Frame {
    pub fn new(bytes: Vec<u8>, coalesce_id: u32, repeatable: bool) -> Self {
        Frame {
            bytes,
            coalesce_id,
            repeatable,
        }
    }

    /// A frame that is delivered exactly once and never replaced.
    pub fn relative(bytes: Vec<u8>) -> Self {
        Frame::new(bytes, NO_COALESCE, false)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn coalesce_id(&self) -> u32 {
        self.coalesce_id
    }

    pub fn repeatable(&self) -> bool {
        self.repeatable
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("bytes", &hex(&self.bytes))
            .field("coalesce_id", &self.coalesce_id)
            .field("repeatable", &self.repeatable)
            .finish()
    }
}

/// Render bytes the way bridge traffic is logged: `"80 00 00 ..."`.
pub fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render a MAC the way bridges report their id: `"ACCF23F57AD4"`.
pub fn mac_id(mac: &[u8]) -> String {
    mac.iter().map(|b| format!("{b:02X}")).collect()
}

/// Build a legacy/v3 frame.
pub fn legacy(cmd: u8, arg: u8) -> [u8; 3] {
    [cmd, arg, LEGACY_SUFFIX]
}

/// Map a hue in degrees to the bridge colour wheel.
///
/// The wheel runs backwards and hue 0 (red) sits at 176 (0xB0).
///
/// ```
/// use milight_rs::frame::hue_to_color_byte;
///
/// assert_eq!(hue_to_color_byte(0.0), 176);
/// assert_eq!(hue_to_color_byte(180.0), 48);
/// ```
pub fn hue_to_color_byte(hue: f64) -> u8 {
    let wheel = (hue / 360.0 * 255.0).round() as i64;
    (256 + 176 - wheel).rem_euclid(256) as u8
}

/// Session dependent header fields of one v6 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionFields {
    pub sid1: u8,
    pub sid2: u8,
    pub pw1: u8,
    pub pw2: u8,
    pub sequence: u8,
}

fn v6_frame(lead: u8, fields: &SessionFields, tag: u8, payload: [u8; 6], zone: u8) -> [u8; 22] {
    let mut t = [0u8; V6_FRAME_LEN];
    t[0] = lead;
    t[4] = 0x11;
    t[5] = fields.sid1;
    t[6] = fields.sid2;
    t[8] = fields.sequence;
    t[10] = tag;
    t[11] = fields.pw1;
    t[12] = fields.pw2;
    t[13..19].copy_from_slice(&payload);
    t[19] = zone;
    t
}

/// Checksum of v6 command and link frames: bytes 10..=18 plus the zone, modulo 256.
pub fn command_checksum(frame: &[u8; 22]) -> u8 {
    frame[10..19]
        .iter()
        .fold(frame[19], |acc, b| acc.wrapping_add(*b))
}

/// Checksum of v6 colour frames.
///
/// The bridge firmware sums the same span as signed bytes and reduces it
/// modulo 255 (keeping the sign) before truncating to a byte.
pub fn color_checksum(frame: &[u8; 22]) -> u8 {
    let sum: i32 = frame[10..19].iter().map(|b| *b as i8 as i32).sum::<i32>() + frame[19] as i32;
    (sum % 0xFF) as u8
}

/// `80 .. 31 P1 P2 WB C1 C2 00 00 00 ZN 00 CK`
pub fn v6_command(fields: &SessionFields, remote: u8, cmd1: u8, cmd2: u8, zone: u8) -> [u8; 22] {
    let mut t = v6_frame(
        0x80,
        fields,
        V6_TAG_COMMAND,
        [remote, cmd1, cmd2, 0, 0, 0],
        zone,
    );
    t[21] = command_checksum(&t);
    t
}

/// `80 .. 31 P1 P2 WB 01 CC CC CC CC ZN 00 CK`
pub fn v6_color(fields: &SessionFields, remote: u8, color: u8, zone: u8) -> [u8; 22] {
    let mut t = v6_frame(
        0x80,
        fields,
        V6_TAG_COMMAND,
        [remote, 0x01, color, color, color, color],
        zone,
    );
    t[21] = color_checksum(&t);
    t
}

/// Pair (`3D`) or unpair (`3E`) the bulbs of a zone with the bridge.
pub fn v6_link(fields: &SessionFields, remote: u8, link: bool, zone: u8) -> [u8; 22] {
    let lead = if link { 0x3D } else { 0x3E };
    let mut t = v6_frame(lead, fields, V6_TAG_COMMAND, [remote, 0, 0, 0, 0, 0], zone);
    t[21] = command_checksum(&t);
    t
}

/// Registration sent after the bridge assigned session bytes.
pub fn v6_registration(fields: &SessionFields) -> [u8; 22] {
    let mut t = v6_frame(
        0x80,
        fields,
        V6_TAG_REGISTRATION,
        [0x08, 0, 0, 0, 0, 0],
        0,
    );
    t[21] = V6_TAG_REGISTRATION;
    t
}

/// `D0 00 00 00 02 S1 S2`
pub fn v6_keep_alive(sid1: u8, sid2: u8) -> [u8; 7] {
    [0xD0, 0x00, 0x00, 0x00, 0x02, sid1, sid2]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> SessionFields {
        SessionFields {
            sid1: 0x84,
            sid2: 0x00,
            pw1: 0,
            pw2: 0,
            sequence: 0x0c,
        }
    }

    #[test]
    fn test_v6_zone_one_on_matches_capture() {
        // "zone 1 on" as captured from the official app
        let frame = v6_command(&fields(), 0x08, 0x04, 0x01, 1);
        assert_eq!(
            hex(&frame),
            "80 00 00 00 11 84 00 00 0C 00 31 00 00 08 04 01 00 00 00 01 00 3F"
        );
    }

    #[test]
    fn test_command_checksum_recomputes() {
        let f = SessionFields {
            sid1: 0xED,
            sid2: 0xAB,
            pw1: 0xF1,
            pw2: 0x9A,
            sequence: 0xFF,
        };
        for zone in 0..=4 {
            for (cmd1, cmd2) in [(0x02, 0x64), (0x05, 0x40), (0x06, 0x09), (0xFF, 0xFF)] {
                let frame = v6_command(&f, 0x07, cmd1, cmd2, zone);
                let sum = frame[10..19]
                    .iter()
                    .map(|b| *b as u32)
                    .sum::<u32>()
                    + zone as u32;
                assert_eq!(frame[21], (sum % 256) as u8);
                assert_eq!(frame.len(), V6_FRAME_LEN);
            }
        }
    }

    #[test]
    fn test_color_frame_layout() {
        let f = SessionFields {
            sid1: 0xD4,
            sid2: 0x00,
            pw1: 0,
            pw2: 0,
            sequence: 0x12,
        };
        let frame = v6_color(&f, 0x08, 0xFF, 1);
        assert_eq!(&frame[13..20], &[0x08, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        // 0x31 + 0x08 + 0x01 - 4 + zone 1, as signed bytes
        assert_eq!(frame[21], 0x37);
    }

    #[test]
    fn test_color_checksum_small_values_equal_plain_sum() {
        let frame = v6_color(&fields(), 0x08, 0x10, 2);
        assert_eq!(frame[21], command_checksum(&frame));
    }

    #[test]
    fn test_link_frames() {
        let link = v6_link(&fields(), 0x07, true, 3);
        let unlink = v6_link(&fields(), 0x07, false, 3);
        assert_eq!(link[0], 0x3D);
        assert_eq!(unlink[0], 0x3E);
        assert_eq!(link[19], 3);
        assert_eq!(link[21], command_checksum(&link));
    }

    #[test]
    fn test_registration_frame() {
        let f = SessionFields {
            sid1: 0xED,
            sid2: 0xAB,
            pw1: 0x01,
            pw2: 0x02,
            sequence: 5,
        };
        let reg = v6_registration(&f);
        assert_eq!(
            hex(&reg),
            "80 00 00 00 11 ED AB 00 05 00 33 01 02 08 00 00 00 00 00 00 00 33"
        );
    }

    #[test]
    fn test_keep_alive_and_legacy_layout() {
        assert_eq!(v6_keep_alive(0x1D, 0x00), [0xD0, 0, 0, 0, 0x02, 0x1D, 0x00]);
        assert_eq!(legacy(0x4E, 0x1B), [0x4E, 0x1B, 0x55]);
    }

    #[test]
    fn test_hue_mapping() {
        assert_eq!(hue_to_color_byte(0.0), 176);
        assert_eq!(hue_to_color_byte(180.0), 48);
        assert_eq!(hue_to_color_byte(360.0), 177);
        // 176/255 of the way around wraps to zero
        assert_eq!(hue_to_color_byte(176.0 / 255.0 * 360.0), 0);
    }

    #[test]
    fn test_coalesce_ids_are_distinct_per_zone_and_family() {
        use std::collections::HashSet;

        let mut ids = HashSet::new();
        for offset in [0, 5, 10, 20] {
            for zone in 0..=4 {
                assert!(ids.insert(coalesce_id(CommandCategory::Power, offset, zone)));
            }
        }
        assert_ne!(
            coalesce_id(CommandCategory::Power, 0, 1),
            coalesce_id(CommandCategory::Color, 0, 1)
        );
        assert_ne!(coalesce_id(CommandCategory::Session, 0, 0), NO_COALESCE);
    }

    #[test]
    fn test_mac_id() {
        assert_eq!(
            mac_id(&[0xAC, 0xCF, 0x23, 0xF5, 0x7A, 0xD4]),
            "ACCF23F57AD4"
        );
    }
}
