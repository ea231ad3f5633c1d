//! Timing-tolerant automation primitives over a single headless
//! Chrome tab.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::EventDomContentEventFired;
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use rk_core::{Error, Result};
use tokio::task::JoinHandle;
use tracing::debug;

/// Default wait for an element to appear before concluding the page
/// structure changed (or login failed).
pub const SELECTOR_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default ceiling on waiting for a triggered download to finish.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const SELECTOR_POLL: Duration = Duration::from_millis(100);
const DOWNLOAD_POLL: Duration = Duration::from_secs(1);

/// Chrome writes in-progress downloads under this extension.
const PARTIAL_DOWNLOAD_EXT: &str = "crdownload";

/// Delay between arming the download directory and clicking the link,
/// so page scripts can finish wiring the download trigger.
const DOWNLOAD_SETTLE: Duration = Duration::from_secs(3);

fn browser_err(e: impl std::fmt::Display) -> Error {
    Error::Browser(e.to_string())
}

/// Owns one headless browser instance and a single tab.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    download_timeout: Duration,
}

impl BrowserSession {
    /// Launch headless Chrome and open one blank tab. Sandbox is off
    /// so Chrome can run under root in the scheduler's container.
    pub async fn launch() -> Result<Self> {
        let config = BrowserConfig::builder()
            .no_sandbox()
            .build()
            .map_err(Error::Browser)?;
        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_err)?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        let page = browser.new_page("about:blank").await.map_err(browser_err)?;
        Ok(Self {
            browser,
            page,
            handler_task,
            download_timeout: DOWNLOAD_TIMEOUT,
        })
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    /// Load `url`, returning once the DOM content is loaded (full
    /// resource load is not awaited).
    pub async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| Error::Navigation(format!("{}: {}", url, e)))?;
        tokio::time::timeout(NAVIGATION_TIMEOUT, self.page.wait_for_navigation())
            .await
            .map_err(|_| Error::Navigation(format!("timed out loading {}", url)))?
            .map_err(|e| Error::Navigation(format!("{}: {}", url, e)))?;
        Ok(())
    }

    async fn find(&self, selector: &str) -> Result<Element> {
        self.page
            .find_element(selector)
            .await
            .map_err(|_| Error::ElementNotFound(selector.to_string()))
    }

    /// Focus the target and type into it.
    pub async fn fill_field(&self, selector: &str, value: &str) -> Result<()> {
        let element = self.find(selector).await?;
        element.focus().await.map_err(browser_err)?;
        element.type_str(value).await.map_err(browser_err)?;
        Ok(())
    }

    /// Click `selector` and await the resulting navigation. The
    /// navigation listener is armed before the click so a fast
    /// navigation cannot slip past it.
    pub async fn click_and_wait_for_navigation(&self, selector: &str) -> Result<()> {
        let mut loaded = self
            .page
            .event_listener::<EventDomContentEventFired>()
            .await
            .map_err(browser_err)?;
        self.find(selector).await?.click().await.map_err(browser_err)?;
        tokio::time::timeout(NAVIGATION_TIMEOUT, loaded.next())
            .await
            .map_err(|_| Error::Navigation(format!("no navigation after clicking {}", selector)))?;
        Ok(())
    }

    /// Poll for element presence. Timing out is the primary signal
    /// that the page structure changed or a login failed.
    pub async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::ElementNotFound(selector.to_string()));
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
    }

    pub async fn exists(&self, selector: &str) -> bool {
        self.page.find_element(selector).await.is_ok()
    }

    /// Current HTML of the page, post-rendering.
    pub async fn content(&self) -> Result<String> {
        self.page.content().await.map_err(browser_err)
    }

    /// Purge `download_dir`, arm Chrome to download into it, click the
    /// link, and poll until exactly one completed file exists there.
    pub async fn download_via_click(&self, selector: &str, download_dir: &Path) -> Result<PathBuf> {
        purge_directory(download_dir).await?;
        self.page
            .execute(
                SetDownloadBehaviorParams::builder()
                    .behavior(SetDownloadBehaviorBehavior::Allow)
                    .download_path(download_dir.to_string_lossy().to_string())
                    .build()
                    .map_err(Error::Browser)?,
            )
            .await
            .map_err(browser_err)?;
        tokio::time::sleep(DOWNLOAD_SETTLE).await;
        self.find(selector).await?.click().await.map_err(browser_err)?;
        debug!("waiting for download into {}", download_dir.display());
        wait_for_download(download_dir, self.download_timeout).await
    }

    /// Shut the browser down. Awaited so no orphaned Chrome process
    /// survives the run.
    pub async fn close(&mut self) -> Result<()> {
        self.browser.close().await.map_err(browser_err)?;
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        Ok(())
    }
}

/// Recreate `dir` as an empty directory.
pub async fn purge_directory(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        debug!("rm {}", path.display());
        if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
    }
    Ok(())
}

/// Poll `dir` until it holds exactly one file that is not an
/// in-progress download, or the timeout expires.
pub async fn wait_for_download(dir: &Path, timeout: Duration) -> Result<PathBuf> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(path) = completed_download(dir).await? {
            debug!("downloaded: {}", path.display());
            return Ok(path);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::DownloadTimeout(timeout));
        }
        tokio::time::sleep(DOWNLOAD_POLL).await;
    }
}

async fn completed_download(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        files.push(entry.path());
    }
    match files.as_slice() {
        [single]
            if single
                .extension()
                .map_or(true, |ext| ext != PARTIAL_DOWNLOAD_EXT) =>
        {
            Ok(Some(single.clone()))
        }
        _ => Ok(None),
    }
}
