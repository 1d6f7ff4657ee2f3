// Client - Wires pairing, channel and cooldown tracker together

use crate::config::{ClientConfig, ConfigError};
use crate::cooldown::{Clock, RevivalCooldownTracker, SystemClock};
use crate::pairing::Pairing;
use crate::storage::SecretStore;
use crate::sync::SyncChannel;
use crate::transport::Connector;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A paired-or-pairable client with its channel and cooldown tracker
pub struct MirrorClient {
    config: ClientConfig,
    pairing: Arc<Pairing>,
    channel: SyncChannel,
    tracker: RevivalCooldownTracker,
}

impl MirrorClient {
    /// Build a client on the system clock
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn SecretStore>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(config, store, connector, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: ClientConfig,
        store: Arc<dyn SecretStore>,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pairing = Arc::new(Pairing::new(store));
        let channel = SyncChannel::new(config.clone(), Arc::clone(&pairing), connector);
        let tracker = RevivalCooldownTracker::new(clock, config.countdown_tick());
        Ok(Self {
            config,
            pairing,
            channel,
            tracker,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pairing(&self) -> &Arc<Pairing> {
        &self.pairing
    }

    pub fn channel(&self) -> &SyncChannel {
        &self.channel
    }

    pub fn tracker(&self) -> &RevivalCooldownTracker {
        &self.tracker
    }

    /// Route the channel's cooldown signals into the tracker. Must run inside a tokio runtime.
    pub fn track_cooldowns(&self) -> JoinHandle<()> {
        self.tracker
            .attach(self.channel.events().subscribe_cooldown())
    }
}
