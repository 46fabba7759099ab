//! Application state

use std::sync::Arc;

use gatekeeper_core::{EventBus, RoutingEngine};
use gatekeeper_proxy::{Merger, RegistryTarget};

use crate::forward::{CredentialService, Forwarder};

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RoutingEngine>,
    pub merger: Arc<Merger>,
    pub private_target: Arc<RegistryTarget>,
    pub forwarder: Arc<dyn Forwarder>,
    pub credentials: Arc<dyn CredentialService>,
    pub events: EventBus,
}

impl AppState {
    pub fn new(
        engine: Arc<RoutingEngine>,
        merger: Arc<Merger>,
        private_target: Arc<RegistryTarget>,
        forwarder: Arc<dyn Forwarder>,
        credentials: Arc<dyn CredentialService>,
        events: EventBus,
    ) -> Self {
        Self {
            engine,
            merger,
            private_target,
            forwarder,
            credentials,
            events,
        }
    }
}
