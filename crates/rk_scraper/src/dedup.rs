use std::collections::HashSet;
use std::sync::Arc;

use rk_core::{Article, ArticleStore, Result};
use tracing::debug;

/// Store backends may cap IN-filter cardinality, so URL lookups go
/// out in chunks this size.
const MAX_URL_FILTER_BATCH: usize = 10;

/// Guarantees at most one delivered notification per article URL
/// across runs.
pub struct ArticleDeduplicator {
    store: Arc<dyn ArticleStore>,
}

impl ArticleDeduplicator {
    pub fn new(store: Arc<dyn ArticleStore>) -> Self {
        Self { store }
    }

    /// Keep only articles with no record or an unsent record. A
    /// record with `sent = false` means a previous run crashed
    /// mid-delivery; the article is retried.
    pub async fn filter_unsent(&self, articles: Vec<Article>) -> Result<Vec<Article>> {
        let urls: Vec<String> = articles.iter().map(|a| a.url.clone()).collect();
        let mut sent = HashSet::new();
        for chunk in urls.chunks(MAX_URL_FILTER_BATCH) {
            for record in self.store.find_records_by_urls(chunk).await? {
                if record.sent {
                    sent.insert(record.url);
                }
            }
        }
        debug!("{} of {} articles already sent", sent.len(), articles.len());
        Ok(articles
            .into_iter()
            .filter(|article| !sent.contains(&article.url))
            .collect())
    }

    /// Record the article before delivery starts, so a crash
    /// mid-delivery leaves a retryable unsent record instead of
    /// silently losing the article.
    pub async fn create_record(&self, article: &Article, remote_path: Option<&str>) -> Result<String> {
        self.store.insert_record(article, remote_path).await
    }

    /// Flip the record to sent once the fan-out attempt completed
    /// (regardless of individual recipient failures).
    pub async fn mark_sent(&self, id: &str) -> Result<()> {
        self.store.mark_sent(id).await
    }
}
