//! Hue REST v2 control plane

pub mod client;

pub use client::{EntertainmentConfiguration, HubApiClient};
