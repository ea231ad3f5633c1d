use std::sync::Arc;

use rk_core::{ArticleStore, CredentialStore, Error, Result};

pub mod backends;

pub use backends::files::LocalFileStorage;
pub use backends::memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use backends::sqlite::SqliteStore;

/// Build the article and credential stores for the given backend name.
/// Both views may share one underlying store.
pub async fn create_stores(
    backend: &str,
    url: Option<&str>,
) -> Result<(Arc<dyn ArticleStore>, Arc<dyn CredentialStore>)> {
    match backend {
        "memory" => {
            let store = Arc::new(MemoryStore::new());
            Ok((store.clone(), store))
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let store = Arc::new(SqliteStore::connect(url.unwrap_or("sqlite::memory:")).await?);
            Ok((store.clone(), store))
        }
        other => {
            let _ = url;
            Err(Error::Storage(format!("Unknown storage backend: {}", other)))
        }
    }
}

pub mod prelude {
    pub use super::{LocalFileStorage, MemoryStore};
    pub use rk_core::{ArticleStore, CredentialStore, FileStorage};
}
