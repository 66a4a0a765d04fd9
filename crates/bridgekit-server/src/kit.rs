//! The wired set of bridge components handed to connectors and commands.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use bridgekit_matrix::{
    DeliveryEngine, GhostRegistry, IdentityResolver, MediaFetcher, RoomController, Transport,
};
use bridgekit_store::{IdentityStore, MemDb};

use crate::commands::CommandProcessor;
use crate::config::BridgeConfig;

pub struct BridgeKit {
    pub config: Arc<BridgeConfig>,
    pub transport: Arc<dyn Transport>,
    /// Users and rooms, snapshotted on stop.
    pub db: Arc<Mutex<MemDb>>,
    pub registry: Arc<GhostRegistry>,
    pub resolver: Arc<IdentityResolver>,
    pub rooms: Arc<RoomController>,
    pub delivery: Arc<DeliveryEngine>,
    pub commands: CommandProcessor,
    /// Cancelled when the bridge stops. Background work takes child tokens.
    pub shutdown: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl BridgeKit {
    pub fn new(
        config: BridgeConfig,
        transport: Arc<dyn Transport>,
        fetcher: Arc<dyn MediaFetcher>,
    ) -> Arc<Self> {
        let registry = Arc::new(GhostRegistry::new(
            transport.clone(),
            fetcher,
            config.localpart.clone(),
        ));
        let resolver = Arc::new(IdentityResolver::new(
            IdentityStore::new(),
            registry.clone(),
            transport.clone(),
        ));
        let rooms = Arc::new(RoomController::new(
            transport.clone(),
            resolver.clone(),
            registry.clone(),
            config.encryption.clone(),
            config.bot_avatar.clone(),
        ));
        let delivery = Arc::new(DeliveryEngine::new(transport.clone(), resolver.clone()));
        let commands = CommandProcessor::new(config.command_prefix.clone());

        debug!(bot = %transport.bot_user_id(), prefix = %config.localpart, "Bridge components wired");

        Arc::new(Self {
            config: Arc::new(config),
            transport,
            db: Arc::new(Mutex::new(MemDb::new())),
            registry,
            resolver,
            rooms,
            delivery,
            commands,
            shutdown: CancellationToken::new(),
            started_at: Utc::now(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::BuildInfo;
    use bridgekit_matrix::{HttpFetcher, InMemoryTransport};
    use std::time::Duration;

    /// A kit over an in-memory transport on `example.org`.
    pub(crate) fn kit() -> (Arc<InMemoryTransport>, Arc<BridgeKit>) {
        kit_with(|_| {})
    }

    pub(crate) fn kit_with(
        configure: impl FnOnce(&mut BridgeConfig),
    ) -> (Arc<InMemoryTransport>, Arc<BridgeKit>) {
        let mut config = BridgeConfig::new(BuildInfo::current());
        config.domain = "example.org".to_string();
        config.demo_rename_delay = Duration::ZERO;
        configure(&mut config);

        let transport = Arc::new(InMemoryTransport::new(&config.bot_localpart, &config.domain));
        let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(1)).unwrap());
        let kit = BridgeKit::new(config, transport.clone(), fetcher);
        (transport, kit)
    }
}
