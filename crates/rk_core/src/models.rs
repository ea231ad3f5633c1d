use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// One announcement discovered on the portal's listing page, keyed by
/// its detail-page URL. `date` is kept in the site's native display
/// format and never parsed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub date: String,
}

/// Result of scraping one article's detail page. `file_path` points at
/// a temporary local download and is gone once the article has been
/// uploaded and delivered.
#[derive(Debug, Clone)]
pub struct TextAndFile {
    pub title: String,
    pub text: String,
    pub file_path: Option<PathBuf>,
}

/// Persisted dedup marker for one article. At most one record per URL
/// is ever marked `sent`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ArticleRecord {
    pub id: String,
    pub url: String,
    pub title: String,
    pub date: String,
    pub file_path: Option<String>,
    pub sent: bool,
    pub created_at: DateTime<Utc>,
}

/// Portal login credential.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: String,
    pub password: String,
}

/// One recipient's delivery credential. A cleared token means the
/// provider reported it dead; the record persists so the user can
/// re-link later.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RecipientToken {
    pub uid: String,
    pub token: String,
}

/// Provider-side status of a recipient credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    Valid { target_type: String, target: String },
    NoToken,
    Unknown,
}

impl TokenStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenStatus::Valid { .. })
    }
}

/// Coarse completion signal of one orchestrator run. The scheduler and
/// the manual trigger only ever see the display string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded { delivered: usize },
    NoValidTokens,
    NoUnsentArticles,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Succeeded { .. } => write!(f, "Succeeded"),
            RunStatus::NoValidTokens => write!(f, "No valid tokens"),
            RunStatus::NoUnsentArticles => write!(f, "No unsent articles"),
        }
    }
}
