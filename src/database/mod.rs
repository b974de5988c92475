pub mod models;


use anyhow::{Context, Result};
use chrono::NaiveDate;
use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use models::{Article, ArticleForEmbedding, Neighbor, NewArticle, NewVector};

pub type DbPool = Pool<Postgres>;

/// Relational+vector store: the `articles` table owns one optional row in
/// the `vectors` table (cascading delete, unique article reference).
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

/// Rendered at runtime because the vector dimension is a deployment-wide
/// constant from configuration, not a compile-time literal.
const SCHEMA_SQL: &str = "
CREATE EXTENSION IF NOT EXISTS vector;

CREATE TABLE IF NOT EXISTS articles (
    id BIGSERIAL PRIMARY KEY,
    title TEXT NOT NULL,
    unit TEXT,
    link TEXT NOT NULL UNIQUE,
    published_on DATE NOT NULL,
    content TEXT NOT NULL,
    summary TEXT NOT NULL,
    attachments JSONB NOT NULL DEFAULT '[]'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_articles_published_on ON articles (published_on);

CREATE TABLE IF NOT EXISTS vectors (
    id BIGSERIAL PRIMARY KEY,
    article_id BIGINT NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    embedding vector(<VECTOR_DIM>),
    published_on DATE NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_vectors_published_on ON vectors (published_on);
CREATE UNIQUE INDEX IF NOT EXISTS idx_vectors_article ON vectors (article_id);
CREATE INDEX IF NOT EXISTS idx_vectors_embedding
    ON vectors USING hnsw (embedding vector_cosine_ops);
";

/// Serializes concurrent `ensure_schema` calls across processes.
const SCHEMA_LOCK_ID: i64 = 6_211_503;

pub(crate) fn render_schema(vector_dim: u32) -> String {
    SCHEMA_SQL.replace("<VECTOR_DIM>", &vector_dim.to_string())
}

impl Database {
    #[inline]
    pub async fn connect(config: &Config) -> Result<Self> {
        let url = config.database_url()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .context("Failed to create database connection pool")?;

        Ok(Self { pool })
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Idempotent schema bootstrap; safe to run on every invocation.
    #[inline]
    pub async fn ensure_schema(&self, vector_dim: u32) -> Result<()> {
        debug!("Ensuring schema with vector dimension {}", vector_dim);
        let schema = render_schema(vector_dim);

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(SCHEMA_LOCK_ID)
            .execute(&self.pool)
            .await
            .context("Failed to take schema lock")?;

        let mut failure = None;
        for statement in schema.split(';') {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Err(error) = sqlx::query(trimmed).execute(&self.pool).await {
                failure = Some(anyhow::Error::from(error).context("Schema statement failed"));
                break;
            }
        }

        let _ = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(SCHEMA_LOCK_ID)
            .execute(&self.pool)
            .await;

        if let Some(error) = failure {
            return Err(error);
        }
        debug!("Schema check completed");
        Ok(())
    }

    /// Links already stored for a date; the deduplication gate's lookup.
    #[inline]
    pub async fn existing_links(&self, date: NaiveDate) -> Result<HashSet<String>> {
        let links: Vec<String> =
            sqlx::query_scalar("SELECT link FROM articles WHERE published_on = $1")
                .bind(date)
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch existing links")?;

        Ok(links.into_iter().collect())
    }

    /// Insert articles, silently ignoring links that already exist. The
    /// unique constraint is the idempotency mechanism; no check-then-insert
    /// race. Returns the number of rows actually inserted.
    #[inline]
    pub async fn upsert_articles(&self, articles: &[NewArticle]) -> Result<u64> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let mut inserted = 0;

        for article in articles {
            let result = sqlx::query(
                "INSERT INTO articles (title, unit, link, published_on, content, summary, attachments)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (link) DO NOTHING",
            )
            .bind(&article.title)
            .bind(&article.unit)
            .bind(&article.link)
            .bind(article.published_on)
            .bind(&article.content)
            .bind(&article.summary)
            .bind(sqlx::types::Json(&article.attachments))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert article: {}", article.link))?;

            inserted += result.rows_affected();
        }

        tx.commit().await.context("Failed to commit article batch")?;
        info!("Inserted {} of {} articles", inserted, articles.len());
        Ok(inserted)
    }

    /// Resolve server-assigned IDs for just-inserted links so the
    /// embedding stage can reference them.
    #[inline]
    pub async fn lookup_for_embedding(&self, links: &[String]) -> Result<Vec<ArticleForEmbedding>> {
        if links.is_empty() {
            return Ok(Vec::new());
        }

        let articles = sqlx::query_as::<_, ArticleForEmbedding>(
            "SELECT id, link, title, summary, content, published_on
             FROM articles WHERE link = ANY($1)",
        )
        .bind(links)
        .fetch_all(&self.pool)
        .await
        .context("Failed to look up articles for embedding")?;

        Ok(articles)
    }

    /// Insert vector rows, ignoring conflicts on the per-article
    /// uniqueness constraint.
    #[inline]
    pub async fn upsert_vectors(&self, vectors: &[NewVector]) -> Result<u64> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let mut inserted = 0;

        for vector in vectors {
            let result = sqlx::query(
                "INSERT INTO vectors (article_id, embedding, published_on)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (article_id) DO NOTHING",
            )
            .bind(vector.article_id)
            .bind(&vector.embedding)
            .bind(vector.published_on)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert vector for article {}", vector.article_id))?;

            inserted += result.rows_affected();
        }

        tx.commit().await.context("Failed to commit vector batch")?;
        info!("Inserted {} of {} vectors", inserted, vectors.len());
        Ok(inserted)
    }

    /// Nearest neighbors by cosine distance, ascending (smaller = more
    /// similar). The ranker over-fetches here and re-ranks in memory.
    #[inline]
    pub async fn nearest_neighbors(
        &self,
        query: Vec<f32>,
        candidate_limit: i64,
    ) -> Result<Vec<Neighbor>> {
        let query_vector = Vector::from(query);

        let neighbors = sqlx::query_as::<_, Neighbor>(
            "SELECT a.id, a.title, a.unit, a.link, a.published_on, a.summary, a.content,
                    v.embedding <=> $1 AS distance
             FROM vectors v
             JOIN articles a ON v.article_id = a.id
             ORDER BY v.embedding <=> $1
             LIMIT $2",
        )
        .bind(&query_vector)
        .bind(candidate_limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to run nearest-neighbor query")?;

        Ok(neighbors)
    }

    /// Full rows for one date, newest first; feeds the today cache region.
    #[inline]
    pub async fn fetch_for_cache(&self, date: NaiveDate) -> Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(
            "SELECT id, title, unit, link, published_on, content, summary, attachments,
                    created_at, updated_at
             FROM articles
             WHERE published_on = $1
             ORDER BY created_at DESC, id DESC",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch articles for cache refresh")?;

        Ok(articles)
    }

    /// One id-descending window for infinite-scroll pagination.
    #[inline]
    pub async fn fetch_page(&self, before_id: Option<i64>, limit: i64) -> Result<Vec<Article>> {
        let articles = match before_id {
            Some(before_id) => {
                sqlx::query_as::<_, Article>(
                    "SELECT id, title, unit, link, published_on, content, summary, attachments,
                            created_at, updated_at
                     FROM articles
                     WHERE id < $1
                     ORDER BY id DESC
                     LIMIT $2",
                )
                .bind(before_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Article>(
                    "SELECT id, title, unit, link, published_on, content, summary, attachments,
                            created_at, updated_at
                     FROM articles
                     ORDER BY id DESC
                     LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to fetch article page")?;

        Ok(articles)
    }

    #[inline]
    pub async fn fetch_detail(&self, id: i64) -> Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>(
            "SELECT id, title, unit, link, published_on, content, summary, attachments,
                    created_at, updated_at
             FROM articles
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch article detail")?;

        Ok(article)
    }
}
