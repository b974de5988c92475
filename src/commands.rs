use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use tracing::info;

use crate::IngestError;
use crate::cache::MemoryCache;
use crate::config::Config;
use crate::database::Database;
use crate::enrichment::Embedder;
use crate::pipeline::Pipeline;
use crate::ranking::Ranker;

/// Resolve the `--date` argument; no argument means today, local time.
#[inline]
pub fn normalize_target_date(raw: Option<&str>) -> Result<NaiveDate> {
    match raw {
        None => Ok(Local::now().date_naive()),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| IngestError::Config(format!("Invalid date '{raw}'; expected YYYY-MM-DD")).into()),
    }
}

/// One ingestion pass, triggered by a scheduler or run by hand.
#[inline]
pub async fn run_ingest(config: Config, date: Option<String>) -> Result<()> {
    let target_date = normalize_target_date(date.as_deref())?;
    info!("Planning ingestion for {}", target_date);

    let cache = Arc::new(MemoryCache::new());
    let pipeline = Pipeline::new(config, cache).context("Failed to build pipeline")?;
    let stats = pipeline.run(target_date).await?;

    println!("Ingestion for {} finished:", target_date);
    println!("  Candidates listed:  {}", stats.candidates);
    println!("  New items:          {}", stats.new_items);
    println!("  Bodies fetched:     {}", stats.fetched);
    println!("  Articles inserted:  {}", stats.inserted);
    println!("  Vectors inserted:   {}", stats.vectors_inserted);
    println!("  Cache entries:      {}", stats.cache_entries);
    Ok(())
}

/// Connect and run the idempotent schema bootstrap, nothing else.
#[inline]
pub async fn ensure_schema(config: Config) -> Result<()> {
    let database = Database::connect(&config).await?;
    database.ensure_schema(config.embedding.dimension).await?;
    println!("Schema is up to date.");
    Ok(())
}

/// Embed a query and print the recency-aware ranking over stored vectors.
#[inline]
pub async fn search(config: Config, query: String, top_k: usize) -> Result<()> {
    let embedder = Embedder::new(&config.embedding);
    let Some(vector) = embedder.embed_one(&query) else {
        return Err(IngestError::Enrichment(
            "Embedding endpoint is not configured or did not answer".to_string(),
        )
        .into());
    };

    let database = Database::connect(&config).await?;
    let ranker = Ranker::new(database, config.ranking.clone());
    let results = ranker.rank(vector, top_k).await?;

    if results.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    for (position, article) in results.iter().enumerate() {
        println!(
            "{}. [{}] {} (score {:.4}, distance {:.4})",
            position + 1,
            article.published_on,
            article.title,
            article.score,
            article.similarity
        );
        if let Some(unit) = &article.unit {
            println!("   {}", unit);
        }
        println!("   {}", article.link);
        println!("   {}", article.summary);
    }
    Ok(())
}

/// Print the resolved configuration with credentials masked.
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.display_masked()?);
    Ok(())
}
