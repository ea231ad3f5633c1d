//! Domain-specific navigation sequences against the announcement
//! portal. Row and detail extraction is plain HTML parsing over the
//! rendered page, so it stays testable without a browser.

use std::path::PathBuf;

use async_trait::async_trait;
use rk_core::{Article, Credential, Error, Result, TextAndFile};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::browser::{BrowserSession, SELECTOR_TIMEOUT};

/// CSS selectors for the portal's login, list and detail pages.
#[derive(Debug, Clone)]
pub struct PortalSelectors {
    pub login_email: String,
    pub login_password: String,
    pub login_submit: String,
    pub list_container: String,
    pub list_row: String,
    pub list_anchor: String,
    pub list_title: String,
    pub list_date: String,
    pub detail_container: String,
    pub detail_title: String,
    pub detail_text: String,
    pub attachment_link: String,
}

impl Default for PortalSelectors {
    fn default() -> Self {
        Self {
            login_email: "input[name=email]".to_string(),
            login_password: "input[name=password]".to_string(),
            login_submit: "input[name=login]".to_string(),
            list_container: ".sys-newmail td.hidden-anchor a".to_string(),
            list_row: ".sys-newmail tr".to_string(),
            list_anchor: "td.hidden-anchor a".to_string(),
            list_title: ".sys-title".to_string(),
            list_date: ".date-cell".to_string(),
            detail_container: ".topic-contents".to_string(),
            detail_title: ".topic-headline .val-mail-title".to_string(),
            detail_text: ".topic-contents".to_string(),
            attachment_link: ".sys-attached-file-dl-link a".to_string(),
        }
    }
}

/// Where the portal lives and how to navigate it.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub base_url: Url,
    pub login_path: String,
    pub list_path: String,
    pub download_dir: PathBuf,
    pub selectors: PortalSelectors,
}

impl PortalConfig {
    pub fn new(base_url: Url, login_path: &str, list_path: &str) -> Self {
        Self {
            base_url,
            login_path: login_path.to_string(),
            list_path: list_path.to_string(),
            download_dir: PathBuf::from("./downloads"),
            selectors: PortalSelectors::default(),
        }
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn login_url(&self) -> Result<Url> {
        self.base_url
            .join(&self.login_path)
            .map_err(|e| Error::InvalidUrl(e.to_string()))
    }

    pub fn list_url(&self) -> Result<Url> {
        self.base_url
            .join(&self.list_path)
            .map_err(|e| Error::InvalidUrl(e.to_string()))
    }
}

/// One logged-in browsing session against the portal.
#[async_trait]
pub trait PortalSession: Send {
    /// Submit the login form. Success is not verified here; the next
    /// operation's selector wait is the de facto failure signal.
    async fn login(&mut self, credential: &Credential) -> Result<()>;

    /// Articles on the listing page, in the site's own (newest-first)
    /// order. Rows missing any field are dropped.
    async fn list_articles(&mut self) -> Result<Vec<Article>>;

    /// Extract title, body text and the attachment (if any) from one
    /// article's detail page.
    async fn scrape_detail(&mut self, url: &str) -> Result<TextAndFile>;

    /// Tear the session down. Must be called on every exit path.
    async fn close(&mut self) -> Result<()>;
}

/// Opens portal sessions; the seam that lets the orchestrator run
/// against a test double instead of Chrome.
#[async_trait]
pub trait Portal: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PortalSession>>;
}

/// The real portal, backed by a headless browser session.
pub struct BrowserPortal {
    config: PortalConfig,
}

impl BrowserPortal {
    pub fn new(config: PortalConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Portal for BrowserPortal {
    async fn open(&self) -> Result<Box<dyn PortalSession>> {
        let session = BrowserSession::launch().await?;
        Ok(Box::new(PortalClient::new(session, self.config.clone())))
    }
}

pub struct PortalClient {
    session: BrowserSession,
    config: PortalConfig,
}

impl PortalClient {
    pub fn new(session: BrowserSession, config: PortalConfig) -> Self {
        Self { session, config }
    }
}

#[async_trait]
impl PortalSession for PortalClient {
    async fn login(&mut self, credential: &Credential) -> Result<()> {
        let selectors = &self.config.selectors;
        self.session.navigate(self.config.login_url()?.as_str()).await?;
        self.session
            .wait_for_selector(&selectors.login_email, SELECTOR_TIMEOUT)
            .await?;
        self.session.fill_field(&selectors.login_email, &credential.id).await?;
        self.session
            .fill_field(&selectors.login_password, &credential.password)
            .await?;
        self.session
            .click_and_wait_for_navigation(&selectors.login_submit)
            .await
    }

    async fn list_articles(&mut self) -> Result<Vec<Article>> {
        self.session.navigate(self.config.list_url()?.as_str()).await?;
        self.session
            .wait_for_selector(&self.config.selectors.list_container, SELECTOR_TIMEOUT)
            .await?;
        let html = self.session.content().await?;
        let articles = parse_article_rows(&html, &self.config.selectors, &self.config.base_url)?;
        info!("found {} articles on the listing page", articles.len());
        Ok(articles)
    }

    async fn scrape_detail(&mut self, url: &str) -> Result<TextAndFile> {
        let selectors = self.config.selectors.clone();
        self.session.navigate(url).await?;
        self.session
            .wait_for_selector(&selectors.detail_container, SELECTOR_TIMEOUT)
            .await?;
        let html = self.session.content().await?;
        let (title, text) = parse_detail(&html, &selectors)?;
        debug!("title: {}", title);

        let file_path = if self.session.exists(&selectors.attachment_link).await {
            Some(
                self.session
                    .download_via_click(&selectors.attachment_link, &self.config.download_dir)
                    .await?,
            )
        } else {
            None
        };
        Ok(TextAndFile { title, text, file_path })
    }

    async fn close(&mut self) -> Result<()> {
        self.session.close().await
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| Error::External(anyhow::anyhow!("invalid selector {}: {}", s, e)))
}

fn text_of(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Extract `{url, title, date}` from every listing row that has all
/// three fields; malformed rows are silently dropped. Relative hrefs
/// are resolved against the portal base URL.
pub fn parse_article_rows(
    html: &str,
    selectors: &PortalSelectors,
    base: &Url,
) -> Result<Vec<Article>> {
    let document = Html::parse_document(html);
    let row = parse_selector(&selectors.list_row)?;
    let anchor = parse_selector(&selectors.list_anchor)?;
    let title = parse_selector(&selectors.list_title)?;
    let date = parse_selector(&selectors.list_date)?;

    let mut articles = Vec::new();
    for element in document.select(&row) {
        let link = element.select(&anchor).next().and_then(|a| a.value().attr("href"));
        let title = element.select(&title).next().map(text_of);
        let date = element.select(&date).next().map(text_of);
        let (Some(link), Some(title), Some(date)) = (link, title, date) else {
            continue;
        };
        if title.is_empty() || date.is_empty() {
            continue;
        }
        let Ok(url) = base.join(link) else {
            continue;
        };
        articles.push(Article {
            url: url.to_string(),
            title,
            date,
        });
    }
    Ok(articles)
}

/// Title and body text of a detail page; either may be missing, in
/// which case an empty string is returned (never null).
pub fn parse_detail(html: &str, selectors: &PortalSelectors) -> Result<(String, String)> {
    let document = Html::parse_document(html);
    let title = parse_selector(&selectors.detail_title)?;
    let text = parse_selector(&selectors.detail_text)?;

    let title = document.select(&title).next().map(text_of).unwrap_or_default();
    let text = document.select(&text).next().map(text_of).unwrap_or_default();
    Ok((title, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PortalConfig {
        PortalConfig::new(
            Url::parse("https://portal.example.com").unwrap(),
            "/user",
            "/teams/1/2",
        )
    }

    const LIST_HTML: &str = r#"
        <table class="sys-newmail">
          <tr>
            <td class="hidden-anchor"><a href="/topics/3">open</a></td>
            <td class="sys-title">遠足のお知らせ</td>
            <td class="date-cell">2021/04/03</td>
          </tr>
          <tr>
            <td class="hidden-anchor"><a href="https://portal.example.com/topics/2">open</a></td>
            <td class="sys-title">献立表</td>
            <td class="date-cell">2021/04/02</td>
          </tr>
          <tr>
            <td class="sys-title">リンクのない行</td>
            <td class="date-cell">2021/04/01</td>
          </tr>
          <tr>
            <td class="hidden-anchor"><a href="/topics/0">open</a></td>
            <td class="date-cell">2021/03/31</td>
          </tr>
        </table>
    "#;

    #[test]
    fn test_parse_article_rows() {
        let cfg = config();
        let articles = parse_article_rows(LIST_HTML, &cfg.selectors, &cfg.base_url).unwrap();
        // rows missing the anchor or the title are dropped
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].url, "https://portal.example.com/topics/3");
        assert_eq!(articles[0].title, "遠足のお知らせ");
        assert_eq!(articles[0].date, "2021/04/03");
        assert_eq!(articles[1].url, "https://portal.example.com/topics/2");
    }

    #[test]
    fn test_parse_article_rows_empty_page() {
        let cfg = config();
        let articles = parse_article_rows("<html><body></body></html>", &cfg.selectors, &cfg.base_url).unwrap();
        assert!(articles.is_empty());
    }

    #[test]
    fn test_parse_detail() {
        let html = r#"
            <div class="topic-headline"><span class="val-mail-title">遠足のお知らせ</span></div>
            <div class="topic-contents">雨天の場合は中止です。</div>
        "#;
        let cfg = config();
        let (title, text) = parse_detail(html, &cfg.selectors).unwrap();
        assert_eq!(title, "遠足のお知らせ");
        assert_eq!(text, "雨天の場合は中止です。");
    }

    #[test]
    fn test_parse_detail_missing_fields_are_empty() {
        let cfg = config();
        let (title, text) = parse_detail("<html></html>", &cfg.selectors).unwrap();
        assert_eq!(title, "");
        assert_eq!(text, "");
    }

    #[test]
    fn test_urls() {
        let cfg = config();
        assert_eq!(cfg.login_url().unwrap().as_str(), "https://portal.example.com/user");
        assert_eq!(cfg.list_url().unwrap().as_str(), "https://portal.example.com/teams/1/2");
    }
}
