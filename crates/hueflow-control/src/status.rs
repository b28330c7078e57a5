//! Runtime status registry
//!
//! In-memory counters and flags for the receiver and every hub, written by
//! the pipeline components through small event methods and snapshotted on
//! demand. The snapshot is a deep copy, safe to serialize.

use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use hueflow_core::{ColorUpdate, Rgb16};

/// Receiver-side counters
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverStatus {
    pub bind_address: Option<String>,
    /// Epoch milliseconds of the last parsed frame
    pub last_frame_at: Option<u64>,
    pub frames_total: u64,
    pub frames_malformed: u64,
    pub frames_by_universe: HashMap<u16, u64>,
}

/// Last color pushed to one entertainment channel
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LightStatus {
    pub rgb16: Rgb16,
    pub last_update_at: Option<u64>,
}

/// Per-hub counters and flags
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStatus {
    pub started: bool,
    pub streaming_enabled: bool,
    pub dtls_connected: bool,
    pub last_dmx_at: Option<u64>,
    pub last_send_at: Option<u64>,
    pub frames_matched: u64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
    pub packets_throttled: u64,
    pub last_error: Option<String>,
    pub lights: HashMap<u8, LightStatus>,
}

/// Aggregated snapshot of the whole process
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub receiver: ReceiverStatus,
    pub hubs: HashMap<String, HubStatus>,
}

/// Shared handle to the status registry. Cheap to clone.
#[derive(Clone, Default)]
pub struct StatusRegistry {
    inner: Arc<Mutex<StatusSnapshot>>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut StatusSnapshot) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }

    fn with_hub<R>(&self, hub: &str, f: impl FnOnce(&mut HubStatus) -> R) -> R {
        self.with(|s| f(s.hubs.entry(hub.to_string()).or_default()))
    }

    /// Deep copy of the current state.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.with(|s| s.clone())
    }

    // Receiver events

    pub fn receiver_bound(&self, addr: SocketAddr) {
        self.with(|s| s.receiver.bind_address = Some(addr.to_string()));
    }

    pub fn record_frame(&self, universe: u16) {
        self.with(|s| {
            s.receiver.frames_total += 1;
            s.receiver.last_frame_at = Some(now_ms());
            *s.receiver.frames_by_universe.entry(universe).or_default() += 1;
        });
    }

    pub fn record_malformed(&self) {
        self.with(|s| s.receiver.frames_malformed += 1);
    }

    // Hub events

    pub fn hub_started(&self, hub: &str) {
        self.with_hub(hub, |h| h.started = true);
    }

    pub fn hub_streaming(&self, hub: &str, enabled: bool) {
        self.with_hub(hub, |h| h.streaming_enabled = enabled);
    }

    pub fn hub_dtls(&self, hub: &str, connected: bool) {
        self.with_hub(hub, |h| h.dtls_connected = connected);
    }

    pub fn record_dmx_match(&self, hub: &str) {
        self.with_hub(hub, |h| {
            h.frames_matched += 1;
            h.last_dmx_at = Some(now_ms());
        });
    }

    pub fn record_sent(&self, hub: &str, updates: &[ColorUpdate]) {
        let now = now_ms();
        self.with_hub(hub, |h| {
            h.packets_sent += 1;
            h.last_send_at = Some(now);
            for update in updates {
                let light = h.lights.entry(update.channel_id).or_default();
                light.rgb16 = update.rgb;
                light.last_update_at = Some(now);
            }
        });
    }

    /// A keepalive resend carries no new colors but is a packet on the wire.
    pub fn record_keepalive(&self, hub: &str) {
        self.with_hub(hub, |h| {
            h.packets_sent += 1;
            h.last_send_at = Some(now_ms());
        });
    }

    pub fn record_throttled(&self, hub: &str) {
        self.with_hub(hub, |h| h.packets_throttled += 1);
    }

    pub fn record_dropped(&self, hub: &str) {
        self.with_hub(hub, |h| h.packets_dropped += 1);
    }

    pub fn record_error(&self, hub: &str, error: &str) {
        self.with_hub(hub, |h| h.last_error = Some(error.to_string()));
    }

    /// Convenience for log lines: (frames received, hubs with a live stream).
    pub fn summary(&self) -> (u64, usize, usize) {
        self.with(|s| {
            let connected = s.hubs.values().filter(|h| h.dtls_connected).count();
            (s.receiver.frames_total, connected, s.hubs.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_deep_copy() {
        let registry = StatusRegistry::new();
        registry.record_frame(7);
        let before = registry.snapshot();
        registry.record_frame(7);
        let after = registry.snapshot();

        assert_eq!(before.receiver.frames_total, 1);
        assert_eq!(after.receiver.frames_total, 2);
        assert_eq!(after.receiver.frames_by_universe[&7], 2);
    }

    #[test]
    fn test_send_updates_light_states() {
        let registry = StatusRegistry::new();
        registry.record_sent(
            "hub-a",
            &[ColorUpdate {
                channel_id: 3,
                rgb: [0xFFFF, 0, 0],
            }],
        );
        registry.record_throttled("hub-a");
        registry.record_dropped("hub-a");

        let snap = registry.snapshot();
        let hub = &snap.hubs["hub-a"];
        assert_eq!(hub.packets_sent, 1);
        assert_eq!(hub.packets_throttled, 1);
        assert_eq!(hub.packets_dropped, 1);
        assert_eq!(hub.lights[&3].rgb16, [0xFFFF, 0, 0]);
        assert!(hub.lights[&3].last_update_at.is_some());
    }

    #[test]
    fn test_snapshot_serializes() {
        let registry = StatusRegistry::new();
        registry.hub_started("hub-a");
        registry.record_error("hub-a", "boom");
        let json = serde_json::to_string(&registry.snapshot()).unwrap();
        assert!(json.contains("\"lastError\":\"boom\""));
    }
}
