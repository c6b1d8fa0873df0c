use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};
use url::Url;

/// Everything that can go wrong talking to an upstream service.
///
/// Callers treat all variants the same way: the fetch failed and the cause is
/// recorded on the user's sync state.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Parse and check a user supplied base URL, dropping any trailing slash.
pub fn parse_base_url(raw: &str) -> FetchResult<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|e| FetchError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(FetchError::InvalidUrl {
                url: raw.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            })
        }
    }
    if url.host_str().is_none() {
        return Err(FetchError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}

/// Join a path onto a base URL without losing a sub-path the base may carry
/// (e.g. `https://host/jellyfin`).
pub fn endpoint(base: &Url, path: &str) -> String {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("media-janitor/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    #[instrument(skip(self, api_key), fields(url = %url))]
    pub async fn get(&self, url: &str, header: &str, api_key: &str) -> FetchResult<Response> {
        debug!("Making GET request");
        let response = self
            .client
            .get(url)
            .header(header, api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            error!("HTTP request failed with status: {}", response.status());
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response)
    }

    #[instrument(skip(self, api_key), fields(url = %url))]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        header: &str,
        api_key: &str,
    ) -> FetchResult<T> {
        let response = self.get(url, header, api_key).await?;
        let body = response.bytes().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;

        serde_json::from_slice(&body).map_err(|e| FetchError::Malformed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}
