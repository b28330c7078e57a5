//! DMX channel mappings
//!
//! A mapping ties one entertainment channel (a bulb) to a run of DMX slots
//! and describes how those slots decode into the 16-bit RGB triple the
//! streaming protocol carries.

use serde::{Deserialize, Serialize};

/// A 16-bit RGB triple as carried by the entertainment stream.
pub type Rgb16 = [u16; 3];

/// One per-channel color update, transient within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorUpdate {
    /// Entertainment channel id on the hub
    pub channel_id: u8,
    /// Color to push, full 16-bit range per component
    pub rgb: Rgb16,
}

/// How a mapping's DMX slots decode into RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelMode {
    /// R, G, B — one slot each, expanded to 16 bits.
    #[serde(rename = "8bit")]
    EightBit,
    /// Dimmer, R, G, B — colors scaled by the dimmer slot.
    #[serde(rename = "8bit-dimmable")]
    EightBitDimmable,
    /// R, G, B as big-endian 16-bit pairs.
    #[serde(rename = "16bit")]
    SixteenBit,
}

impl ChannelMode {
    /// Number of DMX slots this mode consumes.
    pub fn width(&self) -> u16 {
        match self {
            ChannelMode::EightBit => 3,
            ChannelMode::EightBitDimmable => 4,
            ChannelMode::SixteenBit => 6,
        }
    }
}

/// Maps one entertainment channel to a run of DMX slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMapping {
    /// Entertainment channel id on the hub (0-based).
    pub channel_id: u8,
    /// First DMX slot, 1-indexed (1-512).
    pub dmx_start: u16,
    /// Slot layout and decoding rule
    #[serde(rename = "channelMode")]
    pub mode: ChannelMode,
}

impl ChannelMapping {
    /// Last DMX slot this mapping reads, 1-indexed.
    pub fn end_slot(&self) -> u16 {
        self.dmx_start + self.mode.width() - 1
    }

    /// Whether the mapping fits inside a 512-slot universe.
    pub fn fits_universe(&self) -> bool {
        self.dmx_start >= 1 && self.end_slot() <= 512
    }

    /// Decode this mapping's slots from a DMX data buffer.
    ///
    /// Slots past the end of a truncated frame read as 0.
    pub fn decode(&self, dmx: &[u8]) -> Rgb16 {
        let base = (self.dmx_start as usize).saturating_sub(1);
        let slot = |i: usize| dmx.get(base + i).copied().unwrap_or(0);

        match self.mode {
            ChannelMode::EightBit => {
                [expand_8bit(slot(0)), expand_8bit(slot(1)), expand_8bit(slot(2))]
            }
            ChannelMode::EightBitDimmable => {
                let dim = slot(0);
                [
                    dim_8bit(slot(1), dim),
                    dim_8bit(slot(2), dim),
                    dim_8bit(slot(3), dim),
                ]
            }
            ChannelMode::SixteenBit => [
                u16::from_be_bytes([slot(0), slot(1)]),
                u16::from_be_bytes([slot(2), slot(3)]),
                u16::from_be_bytes([slot(4), slot(5)]),
            ],
        }
    }
}

/// Expand 0-255 to 0-65535 with byte duplication (0xFF -> 0xFFFF).
fn expand_8bit(v: u8) -> u16 {
    v as u16 * 257
}

/// Scale an 8-bit color by an 8-bit dimmer and expand to 16 bits.
fn dim_8bit(v: u8, dim: u8) -> u16 {
    let scaled = (v as u32 * dim as u32 * 257 * 257) / 65535;
    scaled.min(u16::MAX as u32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(channel_id: u8, dmx_start: u16, mode: ChannelMode) -> ChannelMapping {
        ChannelMapping {
            channel_id,
            dmx_start,
            mode,
        }
    }

    #[test]
    fn test_mode_widths() {
        assert_eq!(ChannelMode::EightBit.width(), 3);
        assert_eq!(ChannelMode::EightBitDimmable.width(), 4);
        assert_eq!(ChannelMode::SixteenBit.width(), 6);
    }

    #[test]
    fn test_universe_bounds() {
        assert!(mapping(0, 1, ChannelMode::EightBit).fits_universe());
        assert!(mapping(0, 510, ChannelMode::EightBit).fits_universe());
        assert!(!mapping(0, 511, ChannelMode::EightBit).fits_universe());
        assert!(mapping(0, 507, ChannelMode::SixteenBit).fits_universe());
        assert!(!mapping(0, 508, ChannelMode::SixteenBit).fits_universe());
        assert!(!mapping(0, 0, ChannelMode::EightBit).fits_universe());
    }

    #[test]
    fn test_8bit_expansion_is_byte_duplication() {
        let m = mapping(0, 1, ChannelMode::EightBit);
        for v in 0..=255u8 {
            let rgb = m.decode(&[v, v, v]);
            assert_eq!(rgb, [v as u16 * 257; 3]);
        }
        // 0xFF maps to full scale exactly
        assert_eq!(m.decode(&[0xFF, 0x00, 0x00]), [0xFFFF, 0x0000, 0x0000]);
    }

    #[test]
    fn test_dimmable_half_brightness() {
        // Dimmer 0x80 on full green: (0xFF * 0x80 * 257 * 257) / 65535 = 33024
        let m = mapping(3, 5, ChannelMode::EightBitDimmable);
        let mut dmx = [0u8; 8];
        dmx[4] = 0x80; // dimmer at slot 5
        dmx[6] = 0xFF; // green at slot 7
        let rgb = m.decode(&dmx);
        assert_eq!(rgb[0], 0);
        assert!((rgb[1] as i32 - 33024).abs() <= 1);
        assert_eq!(rgb[2], 0);
    }

    #[test]
    fn test_dimmable_extremes() {
        let m = mapping(0, 1, ChannelMode::EightBitDimmable);
        assert_eq!(m.decode(&[0xFF, 0xFF, 0xFF, 0xFF]), [0xFFFF; 3]);
        assert_eq!(m.decode(&[0x00, 0xFF, 0xFF, 0xFF]), [0x0000; 3]);
        assert_eq!(m.decode(&[0xFF, 0x00, 0x00, 0x00]), [0x0000; 3]);
    }

    #[test]
    fn test_16bit_big_endian_pairs() {
        let m = mapping(7, 100, ChannelMode::SixteenBit);
        let mut dmx = [0u8; 105];
        dmx[103] = 0x12;
        dmx[104] = 0x34;
        assert_eq!(m.decode(&dmx), [0, 0, 0x1234]);
    }

    #[test]
    fn test_truncated_frame_reads_zero() {
        let m = mapping(0, 1, ChannelMode::EightBit);
        assert_eq!(m.decode(&[0xFF]), [0xFFFF, 0, 0]);
        assert_eq!(m.decode(&[]), [0, 0, 0]);

        let m16 = mapping(0, 510, ChannelMode::SixteenBit);
        let dmx = [0xAB; 512];
        // Slots 510-512 exist, 513-515 read as zero
        assert_eq!(m16.decode(&dmx), [0xABAB, 0xAB00, 0x0000]);
    }

    #[test]
    fn test_serde_mode_names() {
        let m: ChannelMapping =
            serde_json::from_str(r#"{"channelId":2,"dmxStart":10,"channelMode":"8bit-dimmable"}"#)
                .unwrap();
        assert_eq!(m.channel_id, 2);
        assert_eq!(m.dmx_start, 10);
        assert_eq!(m.mode, ChannelMode::EightBitDimmable);

        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"channelMode\":\"8bit-dimmable\""));
    }
}
