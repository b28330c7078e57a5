//! Startup fan-out and graceful shutdown
//!
//! Owns the single Art-Net receiver and one runner per configured hub.
//! Runners start in parallel; a hub that fails setup is reported and skipped
//! while the others proceed. Shutdown cancels the receiver first, then
//! closes every runner concurrently, swallowing individual close errors so
//! one slow hub cannot block teardown.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::artnet::ArtNetReceiver;
use crate::error::Result;
use crate::hue::runner::HubRunner;
use crate::status::{StatusRegistry, StatusSnapshot};
use hueflow_core::BridgeConfig;

/// Process-level owner of the receiver and all hub runners.
pub struct Coordinator {
    receiver: ArtNetReceiver,
    runners: Vec<Arc<HubRunner>>,
    cancel: CancellationToken,
    status: StatusRegistry,
}

impl Coordinator {
    /// Validate the configuration, bind the receiver and start every hub
    /// runner in parallel.
    pub async fn start(config: BridgeConfig) -> Result<Self> {
        config.validate()?;

        let status = StatusRegistry::new();
        let cancel = CancellationToken::new();
        let receiver = ArtNetReceiver::bind(&config.artnet.bind_ip, status.clone()).await?;

        let mut starts = JoinSet::new();
        for hub in config.hubs {
            let frames = receiver.subscribe();
            let status = status.clone();
            let child = cancel.child_token();
            starts.spawn(async move {
                let id = hub.id.clone();
                (id, HubRunner::start(hub, frames, status, child).await)
            });
        }

        let mut runners = Vec::new();
        while let Some(joined) = starts.join_next().await {
            match joined {
                Ok((id, Ok(runner))) => {
                    info!("hub {}: ready", id);
                    runners.push(Arc::new(runner));
                }
                // Setup errors abort the affected runner only
                Ok((id, Err(e))) => {
                    error!("hub {}: startup failed: {}", id, e);
                    status.record_error(&id, &e.to_string());
                }
                Err(e) => error!("hub startup task panicked: {}", e),
            }
        }

        Ok(Self {
            receiver,
            runners,
            cancel,
            status,
        })
    }

    /// Runners that made it to live streaming.
    pub fn runners(&self) -> &[Arc<HubRunner>] {
        &self.runners
    }

    /// Current aggregate status, deep-copied.
    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Shared status handle for observers.
    pub fn status_registry(&self) -> &StatusRegistry {
        &self.status
    }

    /// Drain: stop the receiver, then close all runners concurrently.
    pub async fn shutdown(self) {
        info!("Draining: stopping receiver and {} runner(s)", self.runners.len());
        self.cancel.cancel();
        self.receiver.shutdown().await;

        let mut closes = JoinSet::new();
        for runner in &self.runners {
            let runner = runner.clone();
            closes.spawn(async move { runner.shutdown().await });
        }
        while closes.join_next().await.is_some() {}

        info!("Shutdown complete");
    }
}
