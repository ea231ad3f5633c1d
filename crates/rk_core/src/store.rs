use std::path::Path;

use async_trait::async_trait;

use crate::models::{Article, ArticleRecord, RecipientToken};
use crate::Result;

/// Store of per-user delivery credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// All recipients that currently hold a token.
    async fn all_recipient_tokens(&self) -> Result<Vec<RecipientToken>>;

    /// Look up one recipient's token, if any.
    async fn recipient_token(&self, uid: &str) -> Result<Option<RecipientToken>>;

    /// Save a token after OAuth linking.
    async fn set_token(&self, uid: &str, token: &str) -> Result<()>;

    /// Clear a dead token. The user record itself persists.
    async fn clear_token(&self, uid: &str) -> Result<()>;
}

/// Store of article dedup records.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Records whose URL is in the given set. Implementations may cap
    /// IN-filter cardinality; callers batch accordingly.
    async fn find_records_by_urls(&self, urls: &[String]) -> Result<Vec<ArticleRecord>>;

    /// Insert a new record with `sent = false`, returning its id.
    async fn insert_record(&self, article: &Article, remote_path: Option<&str>) -> Result<String>;

    /// Flip a record to `sent = true`.
    async fn mark_sent(&self, id: &str) -> Result<()>;
}

/// Durable storage for downloaded attachments.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Persist a local file under `name` (plus optional extension),
    /// returning the remote path.
    async fn store(&self, local: &Path, name: &str, extension: Option<&str>) -> Result<String>;

    /// Time-limited URL for a stored file.
    async fn signed_url(&self, remote_path: &str, ttl_minutes: u32) -> Result<String>;
}
