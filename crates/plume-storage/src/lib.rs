//! Article persistence (insert-if-absent keyed by permalink) and session cookie storage.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use plume_core::{Article, CreationMethod, MediaRef};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub mod session;

pub use session::{bootstrap_cookie_file, CookieJar, SessionCookie};

pub const CRATE_NAME: &str = "plume-storage";

/// Persisted-article collaborator. The storage layer owns the permalink
/// uniqueness constraint; callers never re-check it.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Returns the subset of `permalinks` already stored, in one round trip.
    async fn existing_permalinks(&self, permalinks: &[String]) -> anyhow::Result<HashSet<String>>;

    /// Inserts `article` unless its permalink exists. `Ok(false)` means it was
    /// already there, including when a concurrent writer won the race.
    async fn insert_if_absent(&self, article: &Article) -> anyhow::Result<bool>;

    /// Most recently published articles first.
    async fn recent(&self, limit: usize) -> anyhow::Result<Vec<Article>>;
}

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("connecting to postgres")
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .context("applying migrations")
}

#[derive(Debug, Clone)]
pub struct PgArticleStore {
    pool: PgPool,
}

impl PgArticleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArticleStore for PgArticleStore {
    async fn existing_permalinks(&self, permalinks: &[String]) -> anyhow::Result<HashSet<String>> {
        if permalinks.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT permalink
              FROM articles
             WHERE permalink = ANY($1)
            "#,
        )
        .bind(permalinks.to_vec())
        .fetch_all(&self.pool)
        .await
        .context("looking up existing permalinks")?;

        let mut out = HashSet::with_capacity(rows.len());
        for row in rows {
            out.insert(row.try_get::<String, _>("permalink")?);
        }
        Ok(out)
    }

    async fn insert_if_absent(&self, article: &Article) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO articles (id, title, summary, body, permalink, source_label,
                creation_method, published_at, media, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (permalink) DO NOTHING
            "#,
        )
        .bind(article.id)
        .bind(&article.title)
        .bind(&article.summary)
        .bind(&article.body)
        .bind(&article.permalink)
        .bind(&article.source_label)
        .bind(article.creation_method.as_str())
        .bind(article.published_at)
        .bind(Json(&article.media))
        .bind(article.created_at)
        .bind(article.updated_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                debug!(permalink = %article.permalink, "concurrent insert lost the race");
                Ok(false)
            }
            Err(err) => Err(err)
                .with_context(|| format!("inserting article {}", article.permalink)),
        }
    }

    async fn recent(&self, limit: usize) -> anyhow::Result<Vec<Article>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, summary, body, permalink, source_label, creation_method,
                   published_at, media, created_at, updated_at
              FROM articles
             ORDER BY published_at DESC, created_at DESC
             LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("loading recent articles")?;

        rows.iter().map(article_from_row).collect()
    }
}

fn article_from_row(row: &PgRow) -> anyhow::Result<Article> {
    let method: String = row.try_get("creation_method")?;
    let creation_method = CreationMethod::parse(&method)
        .with_context(|| format!("unknown creation_method {method}"))?;
    let media: Json<Vec<MediaRef>> = row.try_get("media")?;
    Ok(Article {
        id: row.try_get::<Uuid, _>("id")?,
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        body: row.try_get("body")?,
        permalink: row.try_get("permalink")?,
        source_label: row.try_get("source_label")?,
        creation_method,
        published_at: row.try_get::<DateTime<Utc>, _>("published_at")?,
        media: media.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// In-process store with the same insert-if-absent contract, used for dry runs
/// and tests. Counts calls so callers can assert batching behavior.
#[derive(Debug, Default)]
pub struct MemoryArticleStore {
    articles: Mutex<HashMap<String, Article>>,
    lookups: AtomicUsize,
    inserts: AtomicUsize,
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.articles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.articles.lock().await.is_empty()
    }

    pub async fn get(&self, permalink: &str) -> Option<Article> {
        self.articles.lock().await.get(permalink).cloned()
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn existing_permalinks(&self, permalinks: &[String]) -> anyhow::Result<HashSet<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let map = self.articles.lock().await;
        Ok(permalinks
            .iter()
            .filter(|p| map.contains_key(p.as_str()))
            .cloned()
            .collect())
    }

    async fn insert_if_absent(&self, article: &Article) -> anyhow::Result<bool> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        let mut map = self.articles.lock().await;
        if map.contains_key(&article.permalink) {
            return Ok(false);
        }
        map.insert(article.permalink.clone(), article.clone());
        Ok(true)
    }

    async fn recent(&self, limit: usize) -> anyhow::Result<Vec<Article>> {
        let map = self.articles.lock().await;
        let mut out = map.values().cloned().collect::<Vec<_>>();
        out.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then(b.created_at.cmp(&a.created_at))
        });
        out.truncate(limit);
        Ok(out)
    }
}
