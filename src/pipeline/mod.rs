pub mod schedule;


use anyhow::Result;
use chrono::{Local, NaiveDate};
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use pgvector::Vector;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::IngestError;
use crate::cache::{ArticleCache, CacheRefresher, PrewarmWorker};
use crate::config::{Config, StoreErrorPolicy};
use crate::database::Database;
use crate::database::models::{NewArticle, NewVector};
use crate::enrichment::{
    Embedder, SUMMARY_FAILED_SENTINEL, Summarizer, compose_embed_text,
};
use crate::fetcher::{Attachment, Candidate, SourceClient};

/// An item in flight between detail fetch and persistence.
#[derive(Debug, Clone)]
pub struct ArticleDraft {
    pub candidate: Candidate,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub summary: Option<String>,
}

/// Counters for one ingestion pass; surfaced in logs and used by tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub candidates: usize,
    pub new_items: usize,
    pub fetched: usize,
    pub inserted: u64,
    pub vectors_inserted: u64,
    pub cache_entries: usize,
}

/// The incremental ingestion pipeline: one date, one pass. Items are
/// processed sequentially; the dominant cost is network latency to a
/// single slow upstream, and persistence is idempotent per link, so no
/// internal parallelism is needed for correctness.
pub struct Pipeline {
    config: Config,
    source: SourceClient,
    summarizer: Summarizer,
    embedder: Embedder,
    cache: Arc<dyn ArticleCache>,
}

impl Pipeline {
    #[inline]
    pub fn new(config: Config, cache: Arc<dyn ArticleCache>) -> Result<Self> {
        let source = SourceClient::new(&config.source)?;
        let summarizer = Summarizer::new(&config.summarizer);
        let embedder = Embedder::new(&config.embedding);

        Ok(Self {
            config,
            source,
            summarizer,
            embedder,
            cache,
        })
    }

    /// Run one ingestion pass for `target_date`. Per-item and per-stage
    /// failures are contained and logged; the error path is reserved for
    /// startup configuration problems and the fail-fast store policy.
    #[inline]
    pub async fn run(&self, target_date: NaiveDate) -> Result<RunStats> {
        let mut stats = RunStats::default();

        let now = Local::now().naive_local();
        if !schedule::may_run(target_date, now) {
            info!(
                "Outside the {}:00-24:00 run window; skipping ingestion for {}",
                schedule::RUN_WINDOW_START_HOUR,
                target_date
            );
            return Ok(stats);
        }

        info!("Starting incremental ingestion for {}", target_date);

        let mut store = self.open_store().await?;
        let mut existing = HashSet::new();
        if let Some(db) = &store {
            match db.existing_links(target_date).await {
                Ok(links) => {
                    info!("{} links already stored for {}", links.len(), target_date);
                    existing = links;
                }
                Err(error) => {
                    self.tolerate_store_error(error)?;
                    store = None;
                }
            }
        }

        let candidates = self.source.list_candidates(target_date);
        stats.candidates = candidates.len();
        if candidates.is_empty() {
            info!("No listing rows for {}; ending run", target_date);
            return Ok(stats);
        }

        let new_items = select_new(candidates, &existing);
        stats.new_items = new_items.len();
        info!(
            "Listing has {} rows, {} new for {}",
            stats.candidates, stats.new_items, target_date
        );
        if new_items.is_empty() {
            return Ok(stats);
        }

        let mut drafts = self.fetch_details(new_items);
        stats.fetched = drafts.len();
        if drafts.is_empty() {
            info!("No new article bodies could be fetched; ending run");
            return Ok(stats);
        }

        fill_summaries(
            &mut drafts,
            |content| self.summarizer.summarize(content),
            self.config.pipeline.max_summary_retries,
        );

        let Some(db) = store else {
            warn!(
                "Store unavailable; fetched and summarized {} articles without persisting",
                drafts.len()
            );
            return Ok(stats);
        };

        let records: Vec<NewArticle> = drafts
            .iter()
            .map(|draft| NewArticle {
                title: draft.candidate.title.clone(),
                unit: draft.candidate.unit.clone(),
                link: draft.candidate.link.clone(),
                published_on: draft.candidate.published_on,
                content: draft.content.clone(),
                summary: draft
                    .summary
                    .clone()
                    .unwrap_or_else(|| SUMMARY_FAILED_SENTINEL.to_string()),
                attachments: draft.attachments.clone(),
            })
            .collect();

        stats.inserted = match db.upsert_articles(&records).await {
            Ok(inserted) => inserted,
            Err(error) => {
                error!("Persisting articles for {} failed: {:#}", target_date, error);
                return Ok(stats);
            }
        };
        if stats.inserted == 0 {
            info!("Every fetched article was already stored; ending run");
            return Ok(stats);
        }

        let prewarm = PrewarmWorker::spawn(
            db.clone(),
            Arc::clone(&self.cache),
            &self.config.cache,
        );
        self.refresh_cache(&db, &prewarm, target_date, &mut stats).await;
        self.store_vectors(&db, &drafts, &mut stats).await;
        prewarm.shutdown().await;

        info!(
            "Run for {} complete: {} candidates, {} new, {} fetched, {} inserted, {} vectors, {} cache entries",
            target_date,
            stats.candidates,
            stats.new_items,
            stats.fetched,
            stats.inserted,
            stats.vectors_inserted,
            stats.cache_entries
        );
        Ok(stats)
    }

    /// Connect and bootstrap the schema, honoring the degraded-mode policy
    /// when the store is unreachable.
    async fn open_store(&self) -> Result<Option<Database>> {
        let db = match Database::connect(&self.config).await {
            Ok(db) => db,
            Err(error) => {
                self.tolerate_store_error(error)?;
                return Ok(None);
            }
        };

        match db.ensure_schema(self.config.embedding.dimension).await {
            Ok(()) => Ok(Some(db)),
            Err(error) => {
                self.tolerate_store_error(error)?;
                Ok(None)
            }
        }
    }

    /// Configuration problems are fatal regardless of policy; transient
    /// store failures either degrade the run or abort it, per config.
    fn tolerate_store_error(&self, error: anyhow::Error) -> Result<()> {
        let is_config_error = error
            .chain()
            .any(|cause| matches!(cause.downcast_ref::<IngestError>(), Some(IngestError::Config(_))));
        if is_config_error {
            return Err(error);
        }

        match self.config.pipeline.on_store_error {
            StoreErrorPolicy::FailFast => {
                Err(error.context("Store unavailable and on_store_error is fail-fast"))
            }
            StoreErrorPolicy::Degraded => {
                warn!(
                    "Store unavailable, continuing in degraded mode (fetch and enrichment only): {:#}",
                    error
                );
                Ok(())
            }
        }
    }

    /// Fetch detail pages sequentially, skipping items with no extractable
    /// body. Empty content means the fetch failed, not an empty document.
    fn fetch_details(&self, new_items: Vec<Candidate>) -> Vec<ArticleDraft> {
        let bar = if console::user_attended_stderr() {
            ProgressBar::new(new_items.len() as u64).with_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] Fetching {msg}")
                    .expect("style template is valid"),
            )
        } else {
            ProgressBar::hidden()
        };

        let mut drafts = Vec::with_capacity(new_items.len());
        for candidate in new_items {
            bar.set_message(candidate.title.clone());
            let detail = self.source.fetch_detail(&candidate.link);
            bar.inc(1);

            if detail.content.is_empty() {
                warn!("Skipping {}: no body content extracted", candidate.link);
                continue;
            }
            drafts.push(ArticleDraft {
                candidate,
                content: detail.content,
                attachments: detail.attachments,
                summary: None,
            });
        }
        bar.finish_and_clear();
        drafts
    }

    async fn refresh_cache(
        &self,
        db: &Database,
        prewarm: &PrewarmWorker,
        target_date: NaiveDate,
        stats: &mut RunStats,
    ) {
        let today = Local::now().date_naive();
        let refresher = CacheRefresher::new(Arc::clone(&self.cache), self.config.cache.clone());

        // Backfills insert rows behind the head of the feed and leave
        // previously cached windows stale.
        if target_date != today {
            refresher.invalidate_pages();
        }

        match db.fetch_for_cache(target_date).await {
            Ok(rows) => {
                stats.cache_entries = refresher
                    .refresh(db, prewarm, &rows, target_date, today)
                    .await;
            }
            Err(error) => {
                warn!("Cache refresh skipped; could not load rows: {:#}", error);
            }
        }
    }

    /// Embedding runs strictly after persistence: vectors reference the
    /// server-assigned article IDs.
    async fn store_vectors(&self, db: &Database, drafts: &[ArticleDraft], stats: &mut RunStats) {
        let links: Vec<String> = drafts
            .iter()
            .map(|draft| draft.candidate.link.clone())
            .collect();

        let articles = match db.lookup_for_embedding(&links).await {
            Ok(articles) => articles,
            Err(error) => {
                error!("Could not resolve article IDs for embedding: {:#}", error);
                return;
            }
        };
        if articles.is_empty() {
            warn!("No stored articles resolved for embedding");
            return;
        }

        let texts: Vec<String> = articles
            .iter()
            .map(|article| {
                compose_embed_text(
                    &article.title,
                    &article.summary,
                    &article.content,
                    self.config.embedding.max_input_chars,
                )
            })
            .collect();

        let Some(vectors) = self.embedder.embed_batch(&texts) else {
            warn!(
                "Embedding batch discarded; {} articles remain without vectors",
                articles.len()
            );
            return;
        };

        let rows: Vec<NewVector> = articles
            .iter()
            .zip(vectors)
            .map(|(article, embedding)| NewVector {
                article_id: article.id,
                embedding: Vector::from(embedding),
                published_on: article.published_on,
            })
            .collect();

        match db.upsert_vectors(&rows).await {
            Ok(inserted) => stats.vectors_inserted = inserted,
            Err(error) => error!("Persisting vectors failed: {:#}", error),
        }
    }
}

/// Dedup gate: drop candidates whose link is already stored, and repeated
/// links within the same listing. Exact string match on the absolute URL.
pub(crate) fn select_new(candidates: Vec<Candidate>, existing: &HashSet<String>) -> Vec<Candidate> {
    candidates
        .into_iter()
        .unique_by(|candidate| candidate.link.clone())
        .filter(|candidate| !existing.contains(&candidate.link))
        .collect()
}

/// Two-level retry bookkeeping for summaries: full passes over the
/// remaining-failed subset, up to `max_retries` rounds after the initial
/// pass. Items still failing afterwards keep `None` and are persisted with
/// the sentinel marker, so one bad item never blocks the batch.
pub(crate) fn fill_summaries<F>(drafts: &mut [ArticleDraft], summarize: F, max_retries: u32)
where
    F: Fn(&str) -> Option<String>,
{
    let mut remaining: Vec<usize> = (0..drafts.len()).collect();
    let mut attempt = 0;

    while !remaining.is_empty() && attempt <= max_retries {
        let mut failures = Vec::new();
        for &index in &remaining {
            match summarize(&drafts[index].content) {
                Some(summary) => drafts[index].summary = Some(summary),
                None => failures.push(index),
            }
        }

        if failures.is_empty() {
            break;
        }
        attempt += 1;
        remaining = failures;
        if attempt <= max_retries {
            info!(
                "Summaries failed for {} items; starting retry round {}",
                remaining.len(),
                attempt
            );
        }
    }

    for draft in drafts.iter_mut().filter(|draft| draft.summary.is_none()) {
        warn!(
            "Summary permanently failed for {}; storing sentinel",
            draft.candidate.link
        );
        draft.summary = Some(SUMMARY_FAILED_SENTINEL.to_string());
    }
}
