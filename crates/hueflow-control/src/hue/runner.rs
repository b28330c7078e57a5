//! Per-hub lifecycle driver
//!
//! Takes one hub from configuration to live streaming: verify the remote
//! entertainment configuration, resolve the PSK identity, enable streaming
//! mode, connect DTLS, then pump Art-Net frames into the stream. Teardown
//! releases the remote session on every exit path, including startup
//! failures.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::artnet::ArtDmxFrame;
use crate::error::{BridgeError, Result};
use crate::hue::api::client::HubApiClient;
use crate::hue::stream::dtls::{
    SendOutcome, StreamController, StreamEvent, StreamState, KEEPALIVE_INTERVAL,
};
use crate::status::StatusRegistry;
use hueflow_core::{ColorUpdate, HubConfig, Rgb16};

/// The hub needs this long after `start` to enter streaming mode and open
/// its UDP listener; connecting earlier fails the handshake.
const STREAM_MODE_DELAY: Duration = Duration::from_millis(1000);
/// Bound on teardown steps so one slow hub cannot stall shutdown
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Check the channel-id equality invariant: the configured mapping must
/// cover exactly the channels the hub reports, no missing, no extra.
pub fn verify_channel_sets(
    mappings: &[hueflow_core::ChannelMapping],
    remote_channel_ids: &[u8],
) -> Result<()> {
    let configured: BTreeSet<u8> = mappings.iter().map(|m| m.channel_id).collect();
    let remote: BTreeSet<u8> = remote_channel_ids.iter().copied().collect();

    let missing: Vec<u8> = remote.difference(&configured).copied().collect();
    let extra: Vec<u8> = configured.difference(&remote).copied().collect();

    if missing.is_empty() && extra.is_empty() {
        Ok(())
    } else {
        Err(BridgeError::ConfigMismatch { missing, extra })
    }
}

/// One hub, from configuration to live stream.
pub struct HubRunner {
    hub: HubConfig,
    config_id: String,
    api: HubApiClient,
    controller: Arc<StreamController>,
    status: StatusRegistry,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl HubRunner {
    /// Start streaming for one hub. On failure the remote session is
    /// released before the error is returned; other hubs are unaffected.
    pub async fn start(
        hub: HubConfig,
        frames: broadcast::Receiver<ArtDmxFrame>,
        status: StatusRegistry,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let config_id = hub.validate_for_start()?.to_string();
        let psk_secret = hub.psk_secret()?;
        status.hub_started(&hub.id);
        info!("hub {}: starting", hub.label());

        let api = HubApiClient::new(&hub.host, &hub.username, false)?;

        // Locate the chosen remote configuration and hold it to the
        // channel-set equality invariant before anything is mutated.
        let configurations = api.list_entertainment_configurations().await?;
        let chosen = configurations
            .into_iter()
            .find(|c| c.id == config_id)
            .ok_or_else(|| {
                BridgeError::Config(hueflow_core::ConfigError::Invalid(format!(
                    "hub {}: entertainment configuration {} not found on hub",
                    hub.id, config_id
                )))
            })?;
        verify_channel_sets(&hub.channels, &chosen.channel_ids)?;

        // PSK identity; the stored application key works when discovery fails
        let identity = match api.resolve_application_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    "hub {}: could not resolve application id ({}); using stored key",
                    hub.label(),
                    e
                );
                hub.username.clone()
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let controller = Arc::new(StreamController::new(
            &hub.id,
            &hub.host,
            &config_id,
            &identity,
            psk_secret,
            events_tx,
        ));

        let runner = Self {
            hub,
            config_id,
            api,
            controller,
            status,
            cancel,
            tasks: TaskTracker::new(),
        };
        runner.spawn_event_pump(events_rx);

        match runner.activate(frames).await {
            Ok(()) => Ok(runner),
            Err(e) => {
                runner.status.record_error(&runner.hub.id, &e.to_string());
                runner.shutdown().await;
                Err(e)
            }
        }
    }

    /// Stages that mutate hub state: enable streaming, wait, handshake, arm.
    async fn activate(&self, frames: broadcast::Receiver<ArtDmxFrame>) -> Result<()> {
        self.api
            .start_entertainment_configuration(&self.config_id)
            .await?;
        self.status.hub_streaming(&self.hub.id, true);
        info!("hub {}: streaming enabled", self.hub.label());

        tokio::select! {
            _ = self.cancel.cancelled() => return Err(BridgeError::Shutdown),
            _ = tokio::time::sleep(STREAM_MODE_DELAY) => {}
        }

        self.controller.connect().await?;
        info!("hub {}: connected", self.hub.label());

        // Arm the session so the hub starts its traffic timer on our packet
        self.deliver(self.solid_updates([0, 0, 0]));

        self.spawn_frame_pump(frames);
        self.spawn_keepalive();
        self.tasks.close();
        Ok(())
    }

    /// Stable identifier of the hub this runner drives.
    pub fn id(&self) -> &str {
        &self.hub.id
    }

    /// Operator-driven verification: one update with every mapped channel
    /// set to the given color, bypassing Art-Net.
    pub fn send_solid_color(&self, rgb: Rgb16) {
        self.deliver(self.solid_updates(rgb));
    }

    fn solid_updates(&self, rgb: Rgb16) -> Vec<ColorUpdate> {
        self.hub
            .channels
            .iter()
            .map(|m| ColorUpdate {
                channel_id: m.channel_id,
                rgb,
            })
            .collect()
    }

    fn deliver(&self, updates: Vec<ColorUpdate>) {
        deliver(&self.controller, &self.status, &self.hub.id, updates);
    }

    /// Close the stream and release the remote session. Safe to call on any
    /// exit path; both steps are best-effort and bounded.
    pub async fn shutdown(&self) {
        info!("hub {}: closing", self.hub.label());
        self.cancel.cancel();
        self.controller.close();

        let stop = self
            .api
            .stop_entertainment_configuration(&self.config_id);
        match tokio::time::timeout(CLOSE_GRACE, stop).await {
            Ok(Ok(())) => info!("hub {}: streaming released", self.hub.label()),
            Ok(Err(e)) => warn!(
                "hub {}: failed to release streaming: {}",
                self.hub.label(),
                e
            ),
            Err(_) => warn!("hub {}: release timed out", self.hub.label()),
        }
        self.status.hub_streaming(&self.hub.id, false);

        self.tasks.close();
        let _ = tokio::time::timeout(CLOSE_GRACE, self.tasks.wait()).await;
    }

    fn spawn_event_pump(&self, mut events: mpsc::UnboundedReceiver<StreamEvent>) {
        let status = self.status.clone();
        let hub_id = self.hub.id.clone();
        self.tasks.spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    StreamEvent::Connected => status.hub_dtls(&hub_id, true),
                    StreamEvent::Error { kind, message } => {
                        warn!("hub {}: stream error ({:?}): {}", hub_id, kind, message);
                        status.record_error(&hub_id, &message);
                    }
                    StreamEvent::Closed => {
                        status.hub_dtls(&hub_id, false);
                        break;
                    }
                }
            }
        });
    }

    fn spawn_frame_pump(&self, mut frames: broadcast::Receiver<ArtDmxFrame>) {
        let controller = self.controller.clone();
        let status = self.status.clone();
        let hub_id = self.hub.id.clone();
        let universe = self.hub.art_net_universe;
        let mappings = self.hub.channels.clone();
        let cancel = self.cancel.clone();

        self.tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = frames.recv() => match received {
                        Ok(frame) => {
                            if frame.universe != universe {
                                continue;
                            }
                            status.record_dmx_match(&hub_id);
                            let updates: Vec<ColorUpdate> = mappings
                                .iter()
                                .map(|m| ColorUpdate {
                                    channel_id: m.channel_id,
                                    rgb: m.decode(&frame.data),
                                })
                                .collect();
                            deliver(&controller, &status, &hub_id, updates);
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("hub {}: frame fan-out lagged, missed {}", hub_id, missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    fn spawn_keepalive(&self) {
        let controller = self.controller.clone();
        let status = self.status.clone();
        let hub_id = self.hub.id.clone();
        let cancel = self.cancel.clone();

        self.tasks.spawn(async move {
            let mut ticks = tokio::time::interval(KEEPALIVE_INTERVAL);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticks.tick() => match controller.keepalive_tick() {
                        Ok(true) => status.record_keepalive(&hub_id),
                        Ok(false) => {
                            // Ticks stop once the controller leaves Open
                            if controller.state() == StreamState::Closed {
                                break;
                            }
                        }
                        Err(e) => {
                            status.record_error(&hub_id, &e.to_string());
                            break;
                        }
                    }
                }
            }
        });
    }
}

fn deliver(
    controller: &StreamController,
    status: &StatusRegistry,
    hub_id: &str,
    updates: Vec<ColorUpdate>,
) {
    match controller.send_update(&updates) {
        Ok(SendOutcome::Sent) => status.record_sent(hub_id, &updates),
        // Never logged per-frame; the counters carry the signal
        Ok(SendOutcome::Throttled) | Ok(SendOutcome::Skipped) => status.record_throttled(hub_id),
        Ok(SendOutcome::NotOpen) => status.record_dropped(hub_id),
        Err(e) => {
            status.record_dropped(hub_id);
            status.record_error(hub_id, &e.to_string());
        }
    }
}
