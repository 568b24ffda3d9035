//! EPSS (Exploit Prediction Scoring System) client.
//!
//! Queries the FIRST.org EPSS API for exploitation probabilities in
//! `[0, 1]`. Requests are grouped into batches of 30 CVE ids and
//! dispatched concurrently under a token-bucket rate limiter.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use sentinel_connectors::config::RateLimitConfig;
use sentinel_connectors::http::RestClient;
use sentinel_connectors::retry::RateLimiter;
use sentinel_core::SentinelError;

const BATCH_SIZE: usize = 30;
const DEFAULT_EPSS_URL: &str = "https://api.first.org/data/v1/epss";

/// The raw source: one batched query, at most [`BATCH_SIZE`] ids.
#[async_trait]
pub trait EpssSource: Send + Sync {
    async fn batch_fetch(&self, cve_ids: &[String]) -> Result<HashMap<String, f64>, SentinelError>;
}

/// Batching, rate-limited EPSS lookups.
pub struct EpssClient {
    source: Arc<dyn EpssSource>,
    limiter: Arc<RateLimiter>,
}

impl EpssClient {
    pub fn new(source: Arc<dyn EpssSource>, rate_limit: &RateLimitConfig) -> Self {
        Self {
            source,
            limiter: Arc::new(RateLimiter::new(rate_limit)),
        }
    }

    /// Scores for the given CVE ids. Ids unknown to EPSS are absent from
    /// the result; scores are clamped to `[0, 1]`.
    pub async fn scores(
        &self,
        cve_ids: &[String],
    ) -> Result<HashMap<String, f64>, SentinelError> {
        if cve_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut unique: Vec<String> = cve_ids.to_vec();
        unique.sort();
        unique.dedup();

        let mut tasks: JoinSet<Result<HashMap<String, f64>, SentinelError>> = JoinSet::new();
        for chunk in unique.chunks(BATCH_SIZE) {
            let source = self.source.clone();
            let limiter = self.limiter.clone();
            let batch: Vec<String> = chunk.to_vec();
            tasks.spawn(async move {
                limiter.acquire().await;
                source.batch_fetch(&batch).await
            });
        }

        let mut scores = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            let batch = joined
                .map_err(|e| SentinelError::Internal(format!("epss batch task: {e}")))??;
            for (cve, score) in batch {
                scores.insert(cve, score.clamp(0.0, 1.0));
            }
        }
        Ok(scores)
    }
}

// ── HTTP source ───────────────────────────────────────────────────

mod api {
    use serde::Deserialize;

    #[derive(Deserialize)]
    pub struct Response {
        #[serde(default)]
        pub data: Vec<Row>,
    }

    #[derive(Deserialize)]
    pub struct Row {
        #[serde(default)]
        pub cve: String,
        /// The API returns scores as strings.
        #[serde(default)]
        pub epss: String,
    }
}

/// FIRST.org EPSS API source.
pub struct HttpEpssSource {
    rest: RestClient,
    url: String,
}

impl HttpEpssSource {
    pub fn new(url: Option<&str>) -> Result<Self, SentinelError> {
        Ok(Self {
            rest: RestClient::new("epss")?,
            url: url.unwrap_or(DEFAULT_EPSS_URL).to_string(),
        })
    }
}

#[async_trait]
impl EpssSource for HttpEpssSource {
    async fn batch_fetch(&self, cve_ids: &[String]) -> Result<HashMap<String, f64>, SentinelError> {
        let joined = cve_ids.join(",");
        let response: api::Response = self
            .rest
            .get_json(&self.url, &[("cve", joined.as_str())], &[])
            .await?;

        Ok(response
            .data
            .into_iter()
            .filter_map(|row| {
                let score: f64 = row.epss.parse().ok()?;
                if row.cve.is_empty() {
                    return None;
                }
                Some((row.cve, score))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RecordingSource {
        calls: AtomicU32,
        max_batch: AtomicU32,
    }

    #[async_trait]
    impl EpssSource for RecordingSource {
        async fn batch_fetch(
            &self,
            cve_ids: &[String],
        ) -> Result<HashMap<String, f64>, SentinelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.max_batch
                .fetch_max(cve_ids.len() as u32, Ordering::SeqCst);
            Ok(cve_ids
                .iter()
                .enumerate()
                .map(|(i, cve)| (cve.clone(), (i as f64) / 100.0))
                .collect())
        }
    }

    #[tokio::test]
    async fn chunks_into_batches_of_thirty() {
        let source = Arc::new(RecordingSource {
            calls: AtomicU32::new(0),
            max_batch: AtomicU32::new(0),
        });
        let client = EpssClient::new(
            source.clone(),
            &RateLimitConfig {
                rps: 1000.0,
                burst: 10,
            },
        );

        let ids: Vec<String> = (0..75).map(|i| format!("CVE-2024-{i:04}")).collect();
        let scores = client.scores(&ids).await.unwrap();

        assert_eq!(scores.len(), 75);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert!(source.max_batch.load(Ordering::SeqCst) <= 30);
    }

    #[tokio::test]
    async fn duplicate_ids_collapse() {
        let source = Arc::new(RecordingSource {
            calls: AtomicU32::new(0),
            max_batch: AtomicU32::new(0),
        });
        let client = EpssClient::new(
            source.clone(),
            &RateLimitConfig {
                rps: 1000.0,
                burst: 10,
            },
        );

        let ids = vec![
            "CVE-2024-0001".to_string(),
            "CVE-2024-0001".to_string(),
            "CVE-2024-0002".to_string(),
        ];
        let scores = client.scores(&ids).await.unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_input_short_circuits() {
        let source = Arc::new(RecordingSource {
            calls: AtomicU32::new(0),
            max_batch: AtomicU32::new(0),
        });
        let client = EpssClient::new(
            source.clone(),
            &RateLimitConfig {
                rps: 1000.0,
                burst: 10,
            },
        );

        assert!(client.scores(&[]).await.unwrap().is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
