//! NVD (National Vulnerability Database) API 2.0 client.
//!
//! Authoritative CVE metadata: CVSS vectors, descriptions, publication
//! dates. The API meters requests per 30-second window in two regimes —
//! 5 without an API key, 50 with one — both configurable. The client
//! enforces the regime locally with a sliding-window limiter and honors
//! `Retry-After` on top.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sentinel_connectors::config::RetryConfig;
use sentinel_connectors::http::RestClient;
use sentinel_connectors::retry::{with_retry, WindowLimiter};
use sentinel_core::SentinelError;

const DEFAULT_NVD_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";
const RATE_WINDOW: Duration = Duration::from_secs(30);
const PAGE_SIZE: u32 = 100;

/// Local request-metering regime, selected by API-key presence.
#[derive(Debug, Clone, Copy)]
pub struct RateRegime {
    pub max_calls: usize,
    pub window: Duration,
}

impl RateRegime {
    pub fn keyless() -> Self {
        Self {
            max_calls: 5,
            window: RATE_WINDOW,
        }
    }

    pub fn keyed() -> Self {
        Self {
            max_calls: 50,
            window: RATE_WINDOW,
        }
    }

    pub fn for_key(api_key: Option<&str>) -> Self {
        match api_key {
            Some(_) => Self::keyed(),
            None => Self::keyless(),
        }
    }
}

/// Parsed CVE record from the NVD response.
#[derive(Debug, Clone)]
pub struct NvdCveRecord {
    pub cve_id: String,
    pub description: Option<String>,
    pub cvss_score: Option<f64>,
    pub cvss_vector: Option<String>,
    pub published_date: Option<DateTime<Utc>>,
}

/// The raw source: single-CVE and paged CPE queries.
#[async_trait]
pub trait NvdSource: Send + Sync {
    async fn fetch_cve(&self, cve_id: &str) -> Result<Option<NvdCveRecord>, SentinelError>;

    /// One page of CVEs matching a CPE 2.3 name.
    async fn fetch_by_cpe(
        &self,
        cpe: &str,
        start_index: u32,
        page_size: u32,
    ) -> Result<NvdPage, SentinelError>;
}

/// One page plus the total the source reports.
#[derive(Debug, Default)]
pub struct NvdPage {
    pub records: Vec<NvdCveRecord>,
    pub total_results: u32,
}

/// Rate-limited, retrying NVD lookups.
pub struct NvdClient {
    source: Arc<dyn NvdSource>,
    limiter: WindowLimiter,
    retry: RetryConfig,
}

impl NvdClient {
    pub fn new(source: Arc<dyn NvdSource>, regime: RateRegime, retry: RetryConfig) -> Self {
        Self {
            source,
            limiter: WindowLimiter::new(regime.max_calls, regime.window),
            retry,
        }
    }

    pub async fn get_cve(&self, cve_id: &str) -> Result<Option<NvdCveRecord>, SentinelError> {
        self.limiter.acquire().await;
        with_retry(&self.retry, "nvd:cve", || self.source.fetch_cve(cve_id)).await
    }

    /// All CVEs matching a CPE, following pagination up to `max_results`.
    pub async fn cves_for_cpe(
        &self,
        cpe: &str,
        max_results: usize,
    ) -> Result<Vec<NvdCveRecord>, SentinelError> {
        let mut records = Vec::new();
        let mut start_index = 0u32;

        loop {
            self.limiter.acquire().await;
            let page = with_retry(&self.retry, "nvd:cpe", || {
                self.source.fetch_by_cpe(cpe, start_index, PAGE_SIZE)
            })
            .await?;

            let fetched = page.records.len() as u32;
            records.extend(page.records);
            start_index += fetched;

            if fetched == 0 || start_index >= page.total_results || records.len() >= max_results {
                break;
            }
        }

        records.truncate(max_results);
        Ok(records)
    }
}

// ── HTTP source ───────────────────────────────────────────────────

mod api {
    use serde::Deserialize;

    #[derive(Deserialize, Default)]
    pub struct Response {
        #[serde(default)]
        pub vulnerabilities: Vec<Item>,
        #[serde(rename = "totalResults", default)]
        pub total_results: u32,
    }

    #[derive(Deserialize)]
    pub struct Item {
        pub cve: Cve,
    }

    #[derive(Deserialize)]
    pub struct Cve {
        #[serde(default)]
        pub id: String,
        #[serde(default)]
        pub descriptions: Vec<Description>,
        #[serde(default)]
        pub metrics: Metrics,
        #[serde(default)]
        pub published: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct Description {
        #[serde(default)]
        pub lang: String,
        #[serde(default)]
        pub value: String,
    }

    #[derive(Deserialize, Default)]
    pub struct Metrics {
        #[serde(rename = "cvssMetricV31", default)]
        pub cvss_v31: Vec<CvssMetric>,
    }

    #[derive(Deserialize)]
    pub struct CvssMetric {
        #[serde(rename = "cvssData")]
        pub cvss_data: CvssData,
    }

    #[derive(Deserialize)]
    pub struct CvssData {
        #[serde(rename = "baseScore", default)]
        pub base_score: Option<f64>,
        #[serde(rename = "vectorString", default)]
        pub vector_string: Option<String>,
    }
}

/// NVD REST source; the API key rides in a header when present.
pub struct HttpNvdSource {
    rest: RestClient,
    url: String,
    api_key: Option<String>,
}

impl HttpNvdSource {
    pub fn new(url: Option<&str>, api_key: Option<String>) -> Result<Self, SentinelError> {
        Ok(Self {
            rest: RestClient::new("nvd")?,
            url: url.unwrap_or(DEFAULT_NVD_URL).to_string(),
            api_key,
        })
    }

    async fn fetch(&self, query: &[(&str, &str)]) -> Result<api::Response, SentinelError> {
        let mut headers: Vec<(&str, &str)> = vec![("Accept", "application/json")];
        if let Some(key) = &self.api_key {
            headers.push(("apiKey", key.as_str()));
        }
        self.rest.get_json(&self.url, query, &headers).await
    }
}

#[async_trait]
impl NvdSource for HttpNvdSource {
    async fn fetch_cve(&self, cve_id: &str) -> Result<Option<NvdCveRecord>, SentinelError> {
        let response = self.fetch(&[("cveId", cve_id)]).await?;
        Ok(response
            .vulnerabilities
            .into_iter()
            .next()
            .and_then(parse_item))
    }

    async fn fetch_by_cpe(
        &self,
        cpe: &str,
        start_index: u32,
        page_size: u32,
    ) -> Result<NvdPage, SentinelError> {
        let start = start_index.to_string();
        let per_page = page_size.to_string();
        let response = self
            .fetch(&[
                ("cpeName", cpe),
                ("startIndex", start.as_str()),
                ("resultsPerPage", per_page.as_str()),
            ])
            .await?;

        Ok(NvdPage {
            total_results: response.total_results,
            records: response
                .vulnerabilities
                .into_iter()
                .filter_map(parse_item)
                .collect(),
        })
    }
}

fn parse_item(item: api::Item) -> Option<NvdCveRecord> {
    let cve = item.cve;
    if cve.id.is_empty() {
        return None;
    }

    let description = cve
        .descriptions
        .iter()
        .find(|d| d.lang == "en")
        .map(|d| d.value.clone());

    let (cvss_score, cvss_vector) = cve
        .metrics
        .cvss_v31
        .first()
        .map(|m| (m.cvss_data.base_score, m.cvss_data.vector_string.clone()))
        .unwrap_or((None, None));

    let published_date = cve
        .published
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc));

    Some(NvdCveRecord {
        cve_id: cve.id,
        description,
        cvss_score,
        cvss_vector,
        published_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn regime_selection_by_key_presence() {
        assert_eq!(RateRegime::for_key(None).max_calls, 5);
        assert_eq!(RateRegime::for_key(Some("key")).max_calls, 50);
    }

    struct PagedSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl NvdSource for PagedSource {
        async fn fetch_cve(&self, cve_id: &str) -> Result<Option<NvdCveRecord>, SentinelError> {
            Ok(Some(NvdCveRecord {
                cve_id: cve_id.to_string(),
                description: None,
                cvss_score: Some(9.8),
                cvss_vector: None,
                published_date: None,
            }))
        }

        async fn fetch_by_cpe(
            &self,
            _cpe: &str,
            start_index: u32,
            page_size: u32,
        ) -> Result<NvdPage, SentinelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let total = 150u32;
            let count = page_size.min(total.saturating_sub(start_index));
            Ok(NvdPage {
                total_results: total,
                records: (0..count)
                    .map(|i| NvdCveRecord {
                        cve_id: format!("CVE-2024-{:04}", start_index + i),
                        description: None,
                        cvss_score: None,
                        cvss_vector: None,
                        published_date: None,
                    })
                    .collect(),
            })
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            cap_delay_ms: 2,
        }
    }

    #[tokio::test]
    async fn follows_pagination_to_total() {
        let source = Arc::new(PagedSource {
            calls: AtomicU32::new(0),
        });
        let client = NvdClient::new(source.clone(), RateRegime::keyed(), fast_retry());

        let records = client.cves_for_cpe("cpe:2.3:a:f5:nginx:1.18.0", 500).await.unwrap();
        assert_eq!(records.len(), 150);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn caps_results_at_requested_maximum() {
        let source = Arc::new(PagedSource {
            calls: AtomicU32::new(0),
        });
        let client = NvdClient::new(source, RateRegime::keyed(), fast_retry());

        let records = client.cves_for_cpe("cpe:2.3:a:f5:nginx:1.18.0", 40).await.unwrap();
        assert_eq!(records.len(), 40);
    }
}
