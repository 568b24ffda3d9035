//! CISA Known Exploited Vulnerabilities (KEV) catalog client.
//!
//! A small, slow-changing list: the full catalog is fetched at most once
//! per TTL (default 24h) and served from memory. Many readers share the
//! cache; one refresher rebuilds it. Lookups return membership and the
//! date the CVE was added to the catalog.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;

use sentinel_connectors::http::RestClient;
use sentinel_core::SentinelError;

const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_KEV_URL: &str =
    "https://www.cisa.gov/sites/default/files/feeds/known_exploited_vulnerabilities.json";

/// One catalog entry.
#[derive(Debug, Clone)]
pub struct KevEntry {
    pub cve_id: String,
    pub date_added: Option<DateTime<Utc>>,
}

/// The raw feed behind the cache.
#[async_trait]
pub trait KevFeed: Send + Sync {
    async fn fetch_catalog(&self) -> Result<Vec<KevEntry>, SentinelError>;
}

struct CachedCatalog {
    entries: HashMap<String, Option<DateTime<Utc>>>,
    fetched_at: Instant,
}

/// TTL-cached KEV lookups.
pub struct KevClient {
    feed: Arc<dyn KevFeed>,
    ttl: Duration,
    cache: RwLock<Option<CachedCatalog>>,
}

impl KevClient {
    pub fn new(feed: Arc<dyn KevFeed>) -> Self {
        Self::with_ttl(feed, DEFAULT_TTL)
    }

    pub fn with_ttl(feed: Arc<dyn KevFeed>, ttl: Duration) -> Self {
        Self {
            feed,
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Membership and date-added for one CVE, from cache.
    pub async fn lookup(&self, cve_id: &str) -> Result<Option<Option<DateTime<Utc>>>, SentinelError> {
        self.refresh_if_stale().await?;
        let cache = self.cache.read().await;
        Ok(cache
            .as_ref()
            .and_then(|c| c.entries.get(cve_id).cloned()))
    }

    /// Whether a CVE is in the catalog.
    pub async fn is_known_exploited(&self, cve_id: &str) -> Result<bool, SentinelError> {
        Ok(self.lookup(cve_id).await?.is_some())
    }

    pub async fn catalog_size(&self) -> Result<usize, SentinelError> {
        self.refresh_if_stale().await?;
        let cache = self.cache.read().await;
        Ok(cache.as_ref().map(|c| c.entries.len()).unwrap_or(0))
    }

    async fn refresh_if_stale(&self) -> Result<(), SentinelError> {
        {
            let cache = self.cache.read().await;
            if let Some(c) = cache.as_ref() {
                if c.fetched_at.elapsed() < self.ttl {
                    return Ok(());
                }
            }
        }

        // Single refresher: the write guard serializes concurrent
        // refresh attempts; late arrivals see a fresh cache and return.
        let mut cache = self.cache.write().await;
        if let Some(c) = cache.as_ref() {
            if c.fetched_at.elapsed() < self.ttl {
                return Ok(());
            }
        }

        let entries = self.feed.fetch_catalog().await?;
        tracing::info!(entries = entries.len(), "KEV catalog loaded");
        *cache = Some(CachedCatalog {
            entries: entries
                .into_iter()
                .map(|e| (e.cve_id, e.date_added))
                .collect(),
            fetched_at: Instant::now(),
        });
        Ok(())
    }
}

// ── HTTP feed ─────────────────────────────────────────────────────

mod feed {
    use serde::Deserialize;

    #[derive(Deserialize)]
    pub struct Catalog {
        #[serde(default)]
        pub vulnerabilities: Vec<Entry>,
    }

    #[derive(Deserialize)]
    pub struct Entry {
        #[serde(rename = "cveID", default)]
        pub cve_id: String,
        #[serde(rename = "dateAdded", default)]
        pub date_added: Option<String>,
    }
}

/// Fetches the published CISA catalog.
pub struct HttpKevFeed {
    rest: RestClient,
    url: String,
}

impl HttpKevFeed {
    pub fn new(url: Option<&str>) -> Result<Self, SentinelError> {
        Ok(Self {
            rest: RestClient::new("kev")?,
            url: url.unwrap_or(DEFAULT_KEV_URL).to_string(),
        })
    }
}

#[async_trait]
impl KevFeed for HttpKevFeed {
    async fn fetch_catalog(&self) -> Result<Vec<KevEntry>, SentinelError> {
        let catalog: feed::Catalog = self.rest.get_json(&self.url, &[], &[]).await?;
        Ok(catalog
            .vulnerabilities
            .into_iter()
            .filter(|e| !e.cve_id.is_empty())
            .map(|e| KevEntry {
                cve_id: e.cve_id,
                date_added: e.date_added.as_deref().and_then(parse_kev_date),
            })
            .collect())
    }
}

/// The catalog publishes plain dates (`2024-03-07`).
fn parse_kev_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingFeed {
        fetches: AtomicU32,
    }

    #[async_trait]
    impl KevFeed for CountingFeed {
        async fn fetch_catalog(&self) -> Result<Vec<KevEntry>, SentinelError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![KevEntry {
                cve_id: "CVE-2024-1234".to_string(),
                date_added: parse_kev_date("2024-03-07"),
            }])
        }
    }

    #[tokio::test]
    async fn lookups_are_served_from_cache() {
        let feed = Arc::new(CountingFeed {
            fetches: AtomicU32::new(0),
        });
        let client = KevClient::new(feed.clone());

        assert!(client.is_known_exploited("CVE-2024-1234").await.unwrap());
        assert!(!client.is_known_exploited("CVE-2020-0001").await.unwrap());
        assert_eq!(client.catalog_size().await.unwrap(), 1);

        // Three calls, one fetch.
        assert_eq!(feed.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lookup_returns_date_added() {
        let feed = Arc::new(CountingFeed {
            fetches: AtomicU32::new(0),
        });
        let client = KevClient::new(feed);

        let hit = client.lookup("CVE-2024-1234").await.unwrap();
        let date = hit.expect("membership").expect("date recorded");
        assert_eq!(date.format("%Y-%m-%d").to_string(), "2024-03-07");
    }

    #[test]
    fn kev_dates_parse() {
        assert!(parse_kev_date("2024-03-07").is_some());
        assert!(parse_kev_date("not-a-date").is_none());
    }
}
