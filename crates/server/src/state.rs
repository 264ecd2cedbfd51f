use std::sync::Arc;
use ticketgate_core::{Config, SanitizedConfig, TicketGateway};

/// Shared application state
pub struct AppState {
    config: Config,
    gateway: Arc<TicketGateway>,
}

impl AppState {
    pub fn new(config: Config, gateway: Arc<TicketGateway>) -> Self {
        Self { config, gateway }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn gateway(&self) -> &TicketGateway {
        self.gateway.as_ref()
    }
}
