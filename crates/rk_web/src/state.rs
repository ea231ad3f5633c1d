use std::sync::Arc;

use rk_core::CredentialStore;
use rk_notify::DeliveryFanout;
use rk_scraper::ScrapeOrchestrator;

pub struct AppState {
    pub orchestrator: Arc<ScrapeOrchestrator>,
    pub fanout: Arc<DeliveryFanout>,
    pub credentials: Arc<dyn CredentialStore>,
    /// Shared secret for the token-management endpoints. The scraping
    /// trigger stays open so a plain cron curl can hit it.
    pub api_key: String,
}
