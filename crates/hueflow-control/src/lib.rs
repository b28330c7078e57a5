//! hueflow-control - Real-time Art-Net to Hue Entertainment pipeline
//!
//! This crate contains the streaming core of the bridge:
//! - **Art-Net receiver**: UDP 6454 ingestion with frame fan-out
//! - **Hue REST client**: entertainment configuration control plane
//! - **DTLS streaming**: PSK transport, send cadence, keepalive
//! - **Hub runner**: per-hub lifecycle from configuration to live stream
//! - **Coordinator**: startup fan-out and graceful shutdown
//! - **Status**: runtime counters and snapshots
//!
//! ## Modules
//!
//! - [`artnet`] - Art-Net ingestion
//! - [`hue`] - REST control plane and DTLS streaming plane
//! - [`coordinator`] - process-level lifecycle
//! - [`status`] - observability
//! - [`error`] - error types

#![allow(missing_docs)]

/// Art-Net ingestion
pub mod artnet;
/// Process-level lifecycle
pub mod coordinator;
/// Error types
pub mod error;
/// Philips Hue integration
pub mod hue;
/// Runtime status registry
pub mod status;

pub use artnet::{ArtDmxFrame, ArtNetReceiver};
pub use coordinator::Coordinator;
pub use error::{BridgeError, Result};
pub use hue::HubRunner;
pub use status::{StatusRegistry, StatusSnapshot};
