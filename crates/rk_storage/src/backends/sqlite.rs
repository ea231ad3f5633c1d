use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rk_core::{Article, ArticleRecord, ArticleStore, CredentialStore, Error, RecipientToken, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

fn db_err(e: sqlx::Error) -> Error {
    Error::Storage(e.to_string())
}

/// Sqlite-backed credential and article stores.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(db_err)?;
        sqlx::query("CREATE TABLE IF NOT EXISTS users (uid TEXT PRIMARY KEY, token TEXT)")
            .execute(&pool)
            .await
            .map_err(db_err)?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                date TEXT NOT NULL,
                file_path TEXT,
                sent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;
        Ok(Self { pool })
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ArticleRecord> {
    let created_at: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Storage(format!("bad created_at: {}", e)))?
        .with_timezone(&Utc);
    Ok(ArticleRecord {
        id: row.get("id"),
        url: row.get("url"),
        title: row.get("title"),
        date: row.get("date"),
        file_path: row.get("file_path"),
        sent: row.get::<i64, _>("sent") != 0,
        created_at,
    })
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn all_recipient_tokens(&self) -> Result<Vec<RecipientToken>> {
        let rows = sqlx::query("SELECT uid, token FROM users WHERE token IS NOT NULL ORDER BY uid")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| RecipientToken {
                uid: row.get("uid"),
                token: row.get("token"),
            })
            .collect())
    }

    async fn recipient_token(&self, uid: &str) -> Result<Option<RecipientToken>> {
        let row = sqlx::query("SELECT uid, token FROM users WHERE uid = ? AND token IS NOT NULL")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|row| RecipientToken {
            uid: row.get("uid"),
            token: row.get("token"),
        }))
    }

    async fn set_token(&self, uid: &str, token: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (uid, token) VALUES (?, ?)
             ON CONFLICT(uid) DO UPDATE SET token = excluded.token",
        )
        .bind(uid)
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn clear_token(&self, uid: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (uid, token) VALUES (?, NULL)
             ON CONFLICT(uid) DO UPDATE SET token = NULL",
        )
        .bind(uid)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl ArticleStore for SqliteStore {
    async fn find_records_by_urls(&self, urls: &[String]) -> Result<Vec<ArticleRecord>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; urls.len()].join(", ");
        let sql = format!(
            "SELECT id, url, title, date, file_path, sent, created_at
             FROM articles WHERE url IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for url in urls {
            query = query.bind(url);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(row_to_record).collect()
    }

    async fn insert_record(&self, article: &Article, remote_path: Option<&str>) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO articles (id, url, title, date, file_path, sent, created_at)
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(&article.url)
        .bind(&article.title)
        .bind(&article.date)
        .bind(remote_path)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(id)
    }

    async fn mark_sent(&self, id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE articles SET sent = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::Storage(format!("No record with id {}", id)));
        }
        Ok(())
    }
}
