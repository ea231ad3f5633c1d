use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rk_core::{Article, ArticleRecord, ArticleStore, CredentialStore, Error, RecipientToken, Result};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    // uid -> token; None means the token was invalidated but the user
    // record persists.
    tokens: BTreeMap<String, Option<String>>,
    records: Vec<ArticleRecord>,
}

/// In-memory backend for both the credential and article stores. The
/// default for tests and one-shot local runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn all_recipient_tokens(&self) -> Result<Vec<RecipientToken>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tokens
            .iter()
            .filter_map(|(uid, token)| {
                token.as_ref().map(|token| RecipientToken {
                    uid: uid.clone(),
                    token: token.clone(),
                })
            })
            .collect())
    }

    async fn recipient_token(&self, uid: &str) -> Result<Option<RecipientToken>> {
        let inner = self.inner.read().await;
        Ok(inner.tokens.get(uid).and_then(|token| {
            token.as_ref().map(|token| RecipientToken {
                uid: uid.to_string(),
                token: token.clone(),
            })
        }))
    }

    async fn set_token(&self, uid: &str, token: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.tokens.insert(uid.to_string(), Some(token.to_string()));
        Ok(())
    }

    async fn clear_token(&self, uid: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.tokens.insert(uid.to_string(), None);
        Ok(())
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn find_records_by_urls(&self, urls: &[String]) -> Result<Vec<ArticleRecord>> {
        let wanted: HashSet<&str> = urls.iter().map(String::as_str).collect();
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .iter()
            .filter(|record| wanted.contains(record.url.as_str()))
            .cloned()
            .collect())
    }

    async fn insert_record(&self, article: &Article, remote_path: Option<&str>) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut inner = self.inner.write().await;
        inner.records.push(ArticleRecord {
            id: id.clone(),
            url: article.url.clone(),
            title: article.title.clone(),
            date: article.date.clone(),
            file_path: remote_path.map(str::to_string),
            sent: false,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn mark_sent(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or_else(|| Error::Storage(format!("No record with id {}", id)))?;
        record.sent = true;
        Ok(())
    }
}
