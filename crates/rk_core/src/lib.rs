pub mod error;
pub mod models;
pub mod store;

pub use error::Error;
pub use models::{
    Article, ArticleRecord, Credential, RecipientToken, RunStatus, TextAndFile, TokenStatus,
};
pub use store::{ArticleStore, CredentialStore, FileStorage};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use super::models::{Article, ArticleRecord, RecipientToken, RunStatus, TextAndFile};
    pub use super::{Error, Result};
}
