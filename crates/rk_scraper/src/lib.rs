//! The scrape-dedup-deliver pipeline: one headless-browser session per
//! run logs into the announcement portal, discovers new articles,
//! downloads attachments, and hands content to the delivery fan-out.

pub mod browser;
pub mod dedup;
pub mod orchestrator;
pub mod portal;

pub use browser::BrowserSession;
pub use dedup::ArticleDeduplicator;
pub use orchestrator::{OrchestratorConfig, ScrapeOrchestrator};
pub use portal::{BrowserPortal, Portal, PortalClient, PortalConfig, PortalSelectors, PortalSession};

pub mod prelude {
    pub use super::{Portal, PortalSession, ScrapeOrchestrator};
    pub use rk_core::{Article, Result, RunStatus, TextAndFile};
}
