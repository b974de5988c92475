mod extract;

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use ureq::Agent;
use url::Url;

use crate::config::SourceConfig;

/// One row of the portal's listing table. Transient; the deduplication gate
/// consumes these before any detail fetch is spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub title: String,
    pub unit: Option<String>,
    /// Absolute detail-page URL; the global deduplication key.
    pub link: String,
    pub published_on: NaiveDate,
}

/// Downloadable attachment descriptor extracted from a detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

/// Normalized detail-page payload. Empty `content` means the fetch failed
/// and the item must be skipped, not stored as an empty document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DetailPage {
    pub content: String,
    pub attachments: Vec<Attachment>,
}

/// HTTP client for the bulletin portal. All failures are logged and
/// converted to empty results; resilience is the pipeline's concern.
#[derive(Debug)]
pub struct SourceClient {
    agent: Agent,
    base_url: Url,
    list_url: String,
    page_size: String,
    unit_filter: String,
}

impl SourceClient {
    #[inline]
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid source base URL: {}", config.base_url))?;

        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .user_agent(&config.user_agent)
            .build()
            .into();

        Ok(Self {
            agent,
            base_url,
            list_url: config.list_url.clone(),
            page_size: config.page_size.to_string(),
            unit_filter: config.unit_filter.clone(),
        })
    }

    /// Fetch the listing page and return the rows published on `date`.
    /// Returns an empty list on any network or parse failure.
    #[inline]
    pub fn list_candidates(&self, date: NaiveDate) -> Vec<Candidate> {
        let Some(html) = self.post_form(&self.list_url) else {
            return Vec::new();
        };

        let candidates = extract::parse_listing(&html, date, &self.base_url);
        debug!(
            "Listing for {} returned {} candidate rows",
            date,
            candidates.len()
        );
        candidates
    }

    /// Fetch one detail page and normalize it to plain text plus attachment
    /// descriptors. Returns an empty `DetailPage` on failure.
    #[inline]
    pub fn fetch_detail(&self, link: &str) -> DetailPage {
        let Some(html) = self.post_form(link) else {
            return DetailPage::default();
        };

        extract::parse_detail(&html, &self.base_url)
    }

    /// The portal answers form POSTs for both the listing and detail views.
    fn post_form(&self, url: &str) -> Option<String> {
        let result = self
            .agent
            .post(url)
            .send_form([
                ("pageindex", "1"),
                ("pagesize", self.page_size.as_str()),
                ("fwdw", self.unit_filter.as_str()),
            ])
            .and_then(|mut resp| resp.body_mut().read_to_string());

        match result {
            Ok(body) => Some(body),
            Err(ureq::Error::StatusCode(status)) => {
                warn!("Portal request failed: {} status={}", url, status);
                None
            }
            Err(error) => {
                warn!("Portal request failed: {} error={}", url, error);
                None
            }
        }
    }
}
