
use anyhow::Result;
use chrono::NaiveDate;
use std::cmp::Ordering;
use tracing::debug;

use crate::config::RankingConfig;
use crate::database::Database;
use crate::database::models::Neighbor;

/// Over-fetch ceiling: enough candidates for re-ranking without scanning
/// the whole corpus.
pub const MAX_CANDIDATE_LIMIT: i64 = 50;

/// One ranked retrieval result. `similarity` is the raw cosine distance
/// (lower is more similar); `score` folds in the recency bonus.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedArticle {
    pub id: i64,
    pub title: String,
    pub unit: Option<String>,
    pub link: String,
    pub published_on: NaiveDate,
    pub summary: String,
    pub content: String,
    pub similarity: f64,
    pub score: f64,
}

/// `clamp(top_k * 5, top_k, 50)`: over-fetch for re-ranking, bounded.
#[inline]
pub fn candidate_limit(top_k: i64) -> i64 {
    (top_k * 5).max(top_k).min(MAX_CANDIDATE_LIMIT)
}

/// Recency-decayed score; lower wins. The exponential bonus is subtracted
/// so recent items move forward without overriding topical relevance, and
/// a zero weight degenerates to pure distance order.
#[inline]
pub fn recency_adjusted_score(
    distance: f64,
    age_days: i64,
    recency_weight: f64,
    half_life_days: f64,
) -> f64 {
    let age = age_days.max(0) as f64;
    distance - recency_weight * (-age / half_life_days).exp()
}

/// Re-rank candidates in memory and keep the best `top_k`. Pure so the
/// ordering properties are testable without a store.
#[inline]
pub fn rank_neighbors(
    neighbors: Vec<Neighbor>,
    top_k: usize,
    today: NaiveDate,
    config: &RankingConfig,
) -> Vec<RankedArticle> {
    let recency_weight = config.recency_weight.max(0.0);
    let half_life_days = config.half_life_days.max(1.0);

    let mut ranked: Vec<RankedArticle> = neighbors
        .into_iter()
        .filter(|neighbor| {
            config
                .max_age_days
                .is_none_or(|max_age| (today - neighbor.published_on).num_days() <= max_age)
        })
        .map(|neighbor| {
            let age_days = (today - neighbor.published_on).num_days();
            let score =
                recency_adjusted_score(neighbor.distance, age_days, recency_weight, half_life_days);
            RankedArticle {
                id: neighbor.id,
                title: neighbor.title,
                unit: neighbor.unit,
                link: neighbor.link,
                published_on: neighbor.published_on,
                summary: neighbor.summary,
                content: neighbor.content,
                similarity: neighbor.distance,
                score,
            }
        })
        .collect();

    // Stable sort keeps the store's distance order for exact score ties.
    ranked.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal));
    ranked.truncate(top_k);
    ranked
}

/// Recency-aware nearest-neighbor retrieval over the vector store. This is
/// the stable seam the API and agent layers call.
pub struct Ranker {
    database: Database,
    config: RankingConfig,
}

impl Ranker {
    #[inline]
    pub fn new(database: Database, config: RankingConfig) -> Self {
        Self { database, config }
    }

    #[inline]
    pub async fn rank(&self, query: Vec<f32>, top_k: usize) -> Result<Vec<RankedArticle>> {
        let limit = candidate_limit(top_k as i64);
        let neighbors = self.database.nearest_neighbors(query, limit).await?;
        debug!(
            "Fetched {} candidates for top_k={} (limit {})",
            neighbors.len(),
            top_k,
            limit
        );

        let today = chrono::Local::now().date_naive();
        Ok(rank_neighbors(neighbors, top_k, today, &self.config))
    }
}
