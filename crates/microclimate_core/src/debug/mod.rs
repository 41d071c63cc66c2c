//! Debugger attachment: endpoint negotiation, transports, launch bookkeeping
//! and the per-application session state machine.

pub mod launch;
pub mod negotiator;
pub mod session;
pub mod transport;

pub use launch::{LaunchConfig, LaunchHandle, LaunchManager, LaunchRecord};
pub use negotiator::{rewrite_ws_address, DebugAttachNegotiator, DEBUG_INFO_PATH};
pub use session::{DebugSession, SessionStatus, StateObserver};
pub use transport::{DebugConnector, DebugTransport, SocketConnector};

use crate::{McConfig, RemoteProbe};
use std::sync::Arc;
use std::time::Duration;

/// Collaborators shared by every debug session of one registry.
#[derive(Clone)]
pub struct DebugServices {
    pub negotiator: DebugAttachNegotiator,
    pub connector: Arc<dyn DebugConnector>,
    pub launches: Arc<LaunchManager>,
    pub connect_timeout_secs: i64,
    pub health_check_interval: Duration,
}

impl DebugServices {
    pub fn new(probe: Arc<dyn RemoteProbe>, config: &McConfig) -> Self {
        Self {
            negotiator: DebugAttachNegotiator::new(probe.clone(), config),
            connector: Arc::new(SocketConnector::new(probe, config)),
            launches: Arc::new(LaunchManager::new(config.launch_dir.clone())),
            connect_timeout_secs: config.debug_connect_timeout_secs,
            health_check_interval: config.health_check_interval,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn DebugConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_launches(mut self, launches: Arc<LaunchManager>) -> Self {
        self.launches = launches;
        self
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        probe: Arc<dyn RemoteProbe>,
        connector: Arc<dyn DebugConnector>,
        launches: Arc<LaunchManager>,
    ) -> Self {
        Self::new(probe, &McConfig::default())
            .with_connector(connector)
            .with_launches(launches)
    }
}
