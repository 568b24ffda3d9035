//! Shared REST transport for connectors that speak JSON over HTTP.
//!
//! Maps HTTP failures onto the platform error taxonomy: connection and
//! 5xx problems are transient, 429 carries the server's `Retry-After`,
//! 401/403 are credential failures, and other 4xx are terminal. There is
//! no implicit global client; each source constructs its own.

use std::time::Duration;

use serde::de::DeserializeOwned;

use sentinel_core::SentinelError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "sentinel-connectors/0.4";

/// Thin JSON-over-HTTP client bound to one source.
pub struct RestClient {
    source: String,
    client: reqwest::Client,
}

impl RestClient {
    pub fn new(source: &str) -> Result<Self, SentinelError> {
        Self::with_timeout(source, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(source: &str, timeout: Duration) -> Result<Self, SentinelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SentinelError::Config(format!("http client: {e}")))?;
        Ok(Self {
            source: source.to_string(),
            client,
        })
    }

    /// GET a JSON document.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<T, SentinelError> {
        let mut request = self.client.get(url).query(query);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        self.read_json(response).await
    }

    /// POST a form body (token endpoints) and read a JSON document.
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<T, SentinelError> {
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.read_json(response).await
    }

    fn transport_error(&self, e: reqwest::Error) -> SentinelError {
        if e.is_timeout() {
            SentinelError::Timeout(format!("{}: {e}", self.source))
        } else {
            SentinelError::Transient(format!("{}: {e}", self.source))
        }
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, SentinelError> {
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(SentinelError::RateLimited { retry_after_secs });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SentinelError::Credential {
                connector: self.source.clone(),
                reason: format!("source rejected credentials ({status})"),
            });
        }

        if status.is_server_error() {
            return Err(SentinelError::Transient(format!(
                "{}: HTTP {status}",
                self.source
            )));
        }

        if !status.is_success() {
            return Err(SentinelError::Internal(format!(
                "{}: HTTP {status}",
                self.source
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SentinelError::Internal(format!("{}: decode: {e}", self.source)))
    }
}

/// OAuth2 client-credentials token response.
#[derive(Debug, serde::Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Fetch a bearer token via the OAuth2 client-credentials flow.
pub async fn client_credentials_token(
    client: &RestClient,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    scope: &str,
) -> Result<TokenResponse, SentinelError> {
    client
        .post_form(
            token_url,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("scope", scope),
            ],
        )
        .await
}
