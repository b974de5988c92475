use chrono::NaiveDate;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ArticleCache, CacheEntry, detail_key, page_key, today_key};
use crate::config::CacheConfig;
use crate::database::Database;
use crate::database::models::Article;

/// Pushes freshly persisted articles into the read-serving cache regions.
/// Every write is best-effort: cache unavailability is logged, never
/// propagated, and never fails the ingestion run.
pub struct CacheRefresher {
    cache: Arc<dyn ArticleCache>,
    config: CacheConfig,
}

impl CacheRefresher {
    #[inline]
    pub fn new(cache: Arc<dyn ArticleCache>, config: CacheConfig) -> Self {
        Self { cache, config }
    }

    /// Refresh the today / head-page / detail regions after a persisted
    /// batch. Returns the number of entries written.
    #[inline]
    pub async fn refresh(
        &self,
        database: &Database,
        prewarm: &PrewarmWorker,
        articles: &[Article],
        target_date: NaiveDate,
        today: NaiveDate,
    ) -> usize {
        if !self.config.enabled {
            return 0;
        }

        let mut written = 0;

        // The today region always reflects the full day, so its TTL
        // effectively resets with every ingestion that finds new items.
        if target_date == today {
            let payload = json!({
                "articles": articles.iter().map(listing_value).collect::<Vec<_>>(),
            });
            if self.set_json(today_key(), &payload, self.today_ttl()) {
                written += 1;
            }
        }

        written += self.refresh_head_page(database, prewarm).await;

        for article in articles {
            let payload = serde_json::to_value(article).unwrap_or(Value::Null);
            if self.set_json(&detail_key(article.id), &payload, self.detail_ttl()) {
                written += 1;
            }
        }

        info!(
            "Cache refresh for {} wrote {} entries",
            target_date, written
        );
        written
    }

    /// Rewrite the head pagination window and, when it came back full
    /// (meaning more data exists), hand the next window to the pre-warm
    /// worker unless it is already cached.
    async fn refresh_head_page(&self, database: &Database, prewarm: &PrewarmWorker) -> usize {
        let limit = self.config.page_limit;
        let rows = match database.fetch_page(None, limit).await {
            Ok(rows) => rows,
            Err(error) => {
                warn!("Skipping page cache refresh: {}", error);
                return 0;
            }
        };

        let payload = page_payload(&rows);
        let written = usize::from(self.set_json(&page_key(None, limit), &payload, self.page_ttl()));

        if rows.len() as i64 == limit {
            if let Some(last) = rows.last() {
                let next_key = page_key(Some(last.id), limit);
                if self.cache.exists(&next_key) {
                    debug!("Next page {} already cached; no pre-warm", next_key);
                } else {
                    prewarm.enqueue(last.id, limit);
                }
            }
        }

        written
    }

    /// Drop every pagination window. Used after a historical backfill,
    /// which inserts rows into the middle of the id sequence and leaves
    /// previously cached windows stale.
    #[inline]
    pub fn invalidate_pages(&self) -> usize {
        let cleared = self.cache.clear_pattern("items:page:*");
        if cleared > 0 {
            info!("Invalidated {} cached pages", cleared);
        }
        cleared
    }

    fn set_json(&self, key: &str, payload: &Value, ttl: Duration) -> bool {
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(error) => {
                warn!("Failed to serialize cache payload for {}: {}", key, error);
                return false;
            }
        };
        let stored = self.cache.set(key, CacheEntry::new(body), ttl);
        if !stored {
            warn!("Cache write failed for {}", key);
        }
        stored
    }

    fn today_ttl(&self) -> Duration {
        Duration::from_secs(self.config.today_ttl_hours * 3600)
    }

    fn page_ttl(&self) -> Duration {
        Duration::from_secs(self.config.page_ttl_days * 86400)
    }

    fn detail_ttl(&self) -> Duration {
        Duration::from_secs(self.config.detail_ttl_days * 86400)
    }
}

/// Strip the content field so list payloads stay small.
pub(super) fn listing_value(article: &Article) -> Value {
    let mut value = serde_json::to_value(article).unwrap_or(Value::Null);
    if let Some(map) = value.as_object_mut() {
        map.remove("content");
    }
    value
}

fn page_payload(rows: &[Article]) -> Value {
    json!({
        "articles": rows.iter().map(listing_value).collect::<Vec<_>>(),
    })
}

#[derive(Debug)]
struct PrewarmJob {
    before_id: i64,
    limit: i64,
}

/// Background worker that warms the next pagination window ahead of the
/// common keep-scrolling access pattern. It holds its own database and
/// cache handles so it outlives the run that enqueued the job, and it is
/// shut down explicitly rather than abandoned.
pub struct PrewarmWorker {
    sender: mpsc::Sender<PrewarmJob>,
    handle: JoinHandle<()>,
}

impl PrewarmWorker {
    #[inline]
    pub fn spawn(database: Database, cache: Arc<dyn ArticleCache>, config: &CacheConfig) -> Self {
        let (sender, mut receiver) = mpsc::channel::<PrewarmJob>(16);
        let page_ttl = Duration::from_secs(config.page_ttl_days * 86400);

        let handle = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let key = page_key(Some(job.before_id), job.limit);
                if cache.exists(&key) {
                    debug!("Pre-warm target {} already cached", key);
                    continue;
                }

                match database.fetch_page(Some(job.before_id), job.limit).await {
                    Ok(rows) => {
                        let body = match serde_json::to_string(&page_payload(&rows)) {
                            Ok(body) => body,
                            Err(error) => {
                                warn!("Failed to serialize pre-warm payload: {}", error);
                                continue;
                            }
                        };
                        if cache.set(&key, CacheEntry::new(body), page_ttl) {
                            debug!("Pre-warmed {} ({} rows)", key, rows.len());
                        } else {
                            warn!("Pre-warm cache write failed for {}", key);
                        }
                    }
                    Err(error) => {
                        warn!("Pre-warm fetch failed for {}: {}", key, error);
                    }
                }
            }
        });

        Self { sender, handle }
    }

    /// Queue one window; drops the job (with a log line) when the queue is
    /// full rather than blocking the caller.
    #[inline]
    pub fn enqueue(&self, before_id: i64, limit: i64) {
        if self
            .sender
            .try_send(PrewarmJob { before_id, limit })
            .is_err()
        {
            warn!("Pre-warm queue full; dropping window before_id={}", before_id);
        } else {
            debug!("Queued pre-warm for window before_id={}", before_id);
        }
    }

    /// Drain the queue and stop the worker task.
    #[inline]
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(error) = self.handle.await {
            warn!("Pre-warm worker did not shut down cleanly: {}", error);
        }
    }
}
