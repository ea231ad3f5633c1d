//! End-to-end run driver: recipients → login → list → dedup filter →
//! per-article scrape, persist, deliver → mark sent.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use rk_core::{
    Article, ArticleStore, Credential, Error, FileStorage, RecipientToken, Result, RunStatus,
    TextAndFile,
};
use rk_notify::DeliveryFanout;
use rk_pdf::{ImageFormat, PdfConverter, RenderedPage, MAX_PAGES};
use tracing::{error, info, warn};

use crate::dedup::ArticleDeduplicator;
use crate::portal::{Portal, PortalSession};

/// Sent when an article has neither title nor body text.
const EMPTY_CONTENT_FALLBACK: &str = "保育園からのお知らせです。";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub credential: Credential,
    pub image_format: ImageFormat,
    /// Abort the whole run on a single article failure (the observed
    /// behavior) instead of skipping that article. Dedup makes a
    /// retry on the next scheduled run safe either way.
    pub abort_on_article_error: bool,
    pub max_pdf_pages: u16,
}

impl OrchestratorConfig {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            image_format: ImageFormat::Jpeg,
            abort_on_article_error: true,
            max_pdf_pages: MAX_PAGES,
        }
    }
}

pub struct ScrapeOrchestrator {
    portal: Arc<dyn Portal>,
    fanout: Arc<DeliveryFanout>,
    dedup: ArticleDeduplicator,
    files: Arc<dyn FileStorage>,
    config: OrchestratorConfig,
}

impl ScrapeOrchestrator {
    pub fn new(
        portal: Arc<dyn Portal>,
        fanout: Arc<DeliveryFanout>,
        articles: Arc<dyn ArticleStore>,
        files: Arc<dyn FileStorage>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            portal,
            fanout,
            dedup: ArticleDeduplicator::new(articles),
            files,
            config,
        }
    }

    /// One complete run. The browser session is opened only after at
    /// least one recipient validates, and closed on every exit path.
    pub async fn run(&self) -> Result<RunStatus> {
        let recipients = self.fanout.validate_all().await?;
        if recipients.is_empty() {
            info!("no valid recipient tokens, not opening a browser session");
            return Ok(RunStatus::NoValidTokens);
        }

        let mut session = self.portal.open().await?;
        let result = self.run_session(session.as_mut(), &recipients).await;
        if let Err(e) = session.close().await {
            warn!("failed to close portal session: {}", e);
        }
        result
    }

    async fn run_session(
        &self,
        session: &mut dyn PortalSession,
        recipients: &[RecipientToken],
    ) -> Result<RunStatus> {
        session.login(&self.config.credential).await?;
        let mut articles = session.list_articles().await?;
        // The site lists newest first; deliver oldest first.
        articles.reverse();

        let unsent = self.dedup.filter_unsent(articles).await?;
        if unsent.is_empty() {
            return Ok(RunStatus::NoUnsentArticles);
        }
        info!("{} unsent articles to process", unsent.len());

        let mut delivered = 0;
        for article in &unsent {
            match self.process_article(session, article, recipients).await {
                Ok(()) => delivered += 1,
                Err(e) if self.config.abort_on_article_error => return Err(e),
                Err(e) => error!("skipping article {}: {}", article.url, e),
            }
        }
        Ok(RunStatus::Succeeded { delivered })
    }

    async fn process_article(
        &self,
        session: &mut dyn PortalSession,
        article: &Article,
        recipients: &[RecipientToken],
    ) -> Result<()> {
        info!("processing article: {}", article.title);
        let detail = session.scrape_detail(&article.url).await?;

        let remote_path = match &detail.file_path {
            Some(local) => Some(self.upload_attachment(local, &article.title).await?),
            None => None,
        };
        // Record before delivery: a crash from here on leaves an
        // unsent record that the next run retries.
        let record_id = self.dedup.create_record(article, remote_path.as_deref()).await?;

        let message = compose_message(&detail, &article.url);
        let mut succeeded = self.fanout.notify_all(recipients.to_vec(), &message, None).await;

        if let Some(local) = &detail.file_path {
            if rk_pdf::is_pdf(local)? {
                match self.render_pages(local).await {
                    Ok(pages) => {
                        for page in pages {
                            let label = format!("{}ページ目", page.page_no);
                            // A recipient that fails once is dropped for the
                            // remaining pages of this article only.
                            succeeded = self
                                .fanout
                                .notify_all(succeeded, &label, Some(&page.data))
                                .await;
                        }
                    }
                    // The text notification already went out; a render
                    // failure must not keep the article unsent forever.
                    Err(e) => error!("PDF conversion failed for {}: {}", article.url, e),
                }
            }
            if let Err(e) = tokio::fs::remove_file(local).await {
                warn!("could not remove {}: {}", local.display(), e);
            }
        }

        self.dedup.mark_sent(&record_id).await?;
        Ok(())
    }

    async fn upload_attachment(&self, local: &Path, title: &str) -> Result<String> {
        let extension = local
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_string);
        let name = format!("{}_{}", Utc::now().format("%Y%m%d%H%M%S"), title);
        self.files.store(local, &name, extension.as_deref()).await
    }

    /// pdfium is synchronous; rendering runs off the async runtime.
    async fn render_pages(&self, path: &Path) -> Result<Vec<RenderedPage>> {
        let path = path.to_path_buf();
        let format = self.config.image_format;
        let max_pages = self.config.max_pdf_pages;
        tokio::task::spawn_blocking(move || {
            PdfConverter::new()?.render_all_pages_capped(&path, format, max_pages)
        })
        .await
        .map_err(|e| Error::External(anyhow::anyhow!("render task failed: {}", e)))?
    }
}

/// Title, body and URL joined per notification, with a fixed phrase
/// when the article carried no text at all.
pub fn compose_message(detail: &TextAndFile, url: &str) -> String {
    if detail.title.is_empty() && detail.text.is_empty() {
        EMPTY_CONTENT_FALLBACK.to_string()
    } else {
        format!("{}\n{}\n{}", detail.title, detail.text, url)
    }
}
