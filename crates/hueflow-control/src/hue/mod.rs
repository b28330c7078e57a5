//! Philips Hue integration
//!
//! Two planes per hub: the HTTPS REST control plane (enumerate and
//! start/stop entertainment configurations, resolve the PSK identity) and
//! the DTLS streaming plane carrying per-channel color updates.

/// REST v2 control-plane client
pub mod api;
/// Per-hub lifecycle driver
pub mod runner;
/// Entertainment streaming: wire format and DTLS transport
pub mod stream;

pub use runner::HubRunner;
