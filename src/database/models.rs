use chrono::{DateTime, NaiveDate, Utc};
use pgvector::Vector;
use serde::Serialize;
use sqlx::types::Json;

use crate::fetcher::Attachment;

/// One stored announcement. `link` is the natural key; content and summary
/// are immutable once written.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub unit: Option<String>,
    pub link: String,
    pub published_on: NaiveDate,
    pub content: String,
    pub summary: String,
    pub attachments: Json<Vec<Attachment>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for the conflict-tolerant article upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub title: String,
    pub unit: Option<String>,
    pub link: String,
    pub published_on: NaiveDate,
    pub content: String,
    pub summary: String,
    pub attachments: Vec<Attachment>,
}

/// Fields the embedding stage needs to compose input text and link the
/// resulting vector back to its article.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleForEmbedding {
    pub id: i64,
    pub link: String,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub published_on: NaiveDate,
}

/// Insert payload for the vector table; `published_on` is denormalized
/// from the article to keep range scans off the join path.
#[derive(Debug, Clone)]
pub struct NewVector {
    pub article_id: i64,
    pub embedding: Vector,
    pub published_on: NaiveDate,
}

/// One nearest-neighbor candidate with its raw cosine distance.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Neighbor {
    pub id: i64,
    pub title: String,
    pub unit: Option<String>,
    pub link: String,
    pub published_on: NaiveDate,
    pub summary: String,
    pub content: String,
    pub distance: f64,
}
