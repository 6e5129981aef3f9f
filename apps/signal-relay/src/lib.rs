pub mod bus;
pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod routes;

use std::sync::Arc;

use bus::EventBus;
use config::Config;
use directory::{DirectoryClient, DirectoryService};
use gateway::bridge::{Backoff, BusBridge};
use gateway::registry::MembershipRegistry;

/// Shared application state available to all route handlers.
///
/// This is the relay's composition root: one registry, one bus bridge and
/// one directory client per process.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<MembershipRegistry>,
    pub bridge: Arc<BusBridge>,
    pub directory: DirectoryClient,
}

impl AppState {
    /// Wire the relay together. The bus listener is not started; call
    /// `state.bridge.start()` once the runtime is up.
    pub fn new(config: Config, bus: Arc<dyn EventBus>, directory: Arc<dyn DirectoryService>) -> Self {
        let registry = Arc::new(MembershipRegistry::new());
        let bridge = Arc::new(BusBridge::new(
            bus,
            registry.clone(),
            Backoff {
                initial: config.bus_retry_initial,
                max: config.bus_retry_max,
            },
        ));
        let directory = DirectoryClient::new(directory, config.directory_timeout);

        Self {
            config: Arc::new(config),
            registry,
            bridge,
            directory,
        }
    }
}
