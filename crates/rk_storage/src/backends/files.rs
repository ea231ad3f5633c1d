use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rk_core::{Error, FileStorage, Result};
use tracing::debug;

/// Durable attachment storage rooted at a local directory. Remote
/// paths are file names relative to the root; signed URLs are file
/// URLs carrying an expiry query parameter.
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn sanitize(name: &str) -> String {
        name.chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '\0' => '_',
                c if c.is_whitespace() => '_',
                c => c,
            })
            .collect()
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn store(&self, local: &Path, name: &str, extension: Option<&str>) -> Result<String> {
        tokio::fs::create_dir_all(&self.root).await?;
        let file_name = match extension {
            Some(ext) => format!("{}.{}", Self::sanitize(name), ext),
            None => Self::sanitize(name),
        };
        let dest = self.root.join(&file_name);
        tokio::fs::copy(local, &dest).await?;
        debug!("stored {} as {}", local.display(), dest.display());
        Ok(file_name)
    }

    async fn signed_url(&self, remote_path: &str, ttl_minutes: u32) -> Result<String> {
        let path = self.root.join(remote_path);
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::Storage(format!("No stored file at {}", remote_path)));
        }
        let expires = Utc::now() + Duration::minutes(i64::from(ttl_minutes));
        Ok(format!(
            "file://{}?expires={}",
            path.canonicalize()?.display(),
            expires.timestamp()
        ))
    }
}
