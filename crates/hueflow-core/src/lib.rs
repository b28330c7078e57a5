//! hueflow-core - Domain Model for the Art-Net to Hue Entertainment bridge
//!
//! This crate contains the configuration document and the DMX decoding model:
//! - Configuration load/validate/migrate (JSON, `version: 3`)
//! - Channel mappings and the DMX slot -> 16-bit RGB decoder
//! - Shared color types used by the streaming pipeline

#![warn(missing_docs)]

/// Configuration document and migrations
pub mod config;
/// Channel mappings and DMX decoding
pub mod mapping;

pub use config::{ArtNetSettings, BridgeConfig, ConfigError, HubConfig, CONFIG_VERSION};
pub use mapping::{ChannelMapping, ChannelMode, ColorUpdate, Rgb16};
