//! Hue Entertainment streaming message format
//!
//! Format (per official Hue Entertainment API documentation):
//! - 16-byte Header:
//!   - 9 bytes: "HueStream" (protocol name)
//!   - 2 bytes: Version (0x02, 0x00 for v2.0)
//!   - 1 byte:  Sequence number (unused, always 0x00)
//!   - 2 bytes: Reserved (0x00, 0x00)
//!   - 1 byte:  Color space (0x00 = RGB)
//!   - 1 byte:  Reserved (0x00)
//! - 36-byte Entertainment Configuration ID (UUID as ASCII string)
//! - N x 7-byte Channel Records:
//!   - 1 byte:  Channel ID
//!   - 6 bytes: RGB as 3x 16-bit big-endian

use hueflow_core::ColorUpdate;

/// Header length up to and including the configuration id.
pub const HEADER_LEN: usize = 16 + 36;
/// Bytes per channel record.
pub const RECORD_LEN: usize = 7;

/// Encode one streaming update packet.
///
/// Records are emitted in input order; callers must not pass duplicate
/// channel ids.
pub fn encode_update(config_id: &str, updates: &[ColorUpdate]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(HEADER_LEN + updates.len() * RECORD_LEN);

    buffer.extend_from_slice(b"HueStream");
    buffer.extend_from_slice(&[0x02, 0x00]); // version 2.0
    buffer.push(0x00); // sequence, unused
    buffer.extend_from_slice(&[0x00, 0x00]); // reserved
    buffer.push(0x00); // color space: RGB
    buffer.push(0x00); // reserved

    // The configuration id must be exactly 36 ASCII characters; pad or
    // truncate defensively (cannot happen with a validated config).
    let id = config_id.as_bytes();
    if id.len() == 36 {
        buffer.extend_from_slice(id);
    } else {
        let mut padded = [0u8; 36];
        let len = id.len().min(36);
        padded[..len].copy_from_slice(&id[..len]);
        buffer.extend_from_slice(&padded);
    }

    for update in updates {
        buffer.push(update.channel_id);
        for component in update.rgb {
            buffer.extend_from_slice(&component.to_be_bytes());
        }
    }

    buffer
}

/// Parse a streaming update packet back into its configuration id and
/// channel records. Counterpart of [`encode_update`], used by diagnostics
/// and tests.
pub fn decode_update(packet: &[u8]) -> Option<(String, Vec<ColorUpdate>)> {
    if packet.len() < HEADER_LEN || (packet.len() - HEADER_LEN) % RECORD_LEN != 0 {
        return None;
    }
    if &packet[0..9] != b"HueStream" || packet[9] != 0x02 {
        return None;
    }

    let config_id = std::str::from_utf8(&packet[16..52]).ok()?.to_string();

    let mut updates = Vec::with_capacity((packet.len() - HEADER_LEN) / RECORD_LEN);
    for record in packet[HEADER_LEN..].chunks_exact(RECORD_LEN) {
        updates.push(ColorUpdate {
            channel_id: record[0],
            rgb: [
                u16::from_be_bytes([record[1], record[2]]),
                u16::from_be_bytes([record[3], record[4]]),
                u16::from_be_bytes([record[5], record[6]]),
            ],
        });
    }

    Some((config_id, updates))
}
