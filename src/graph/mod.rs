pub mod folders;
pub mod messages;
pub mod token;

use std::time::Duration as StdDuration;

use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::FetchError;

pub use folders::FolderResolver;
pub use messages::{FetchCriteria, FetchLimits, Strategy};
pub use token::{Credentials, TokenManager, TokenStatus};

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
pub const GRAPH_API_BASE_ENV: &str = "MAILSCAN_GRAPH_API_BASE";
pub const TOKEN_URL_ENV: &str = "MAILSCAN_TOKEN_URL";

const REDACTED_BODY_MAX_LEN: usize = 200;
const MAX_RATE_LIMIT_RETRIES: u32 = 5;
const MAX_RETRY_AFTER_SECS: u64 = 120;

/// Base URLs for the identity and mailbox endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEndpoints {
    pub api_base: String,
    pub token_url: String,
}

impl GraphEndpoints {
    pub fn for_tenant(tenant_id: &str) -> Self {
        Self {
            api_base: GRAPH_API_BASE.to_string(),
            token_url: format!("https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token"),
        }
    }

    /// Defaults, overridden by `MAILSCAN_GRAPH_API_BASE` / `MAILSCAN_TOKEN_URL`.
    pub fn from_env(tenant_id: &str) -> Self {
        let defaults = Self::for_tenant(tenant_id);
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            api_base: read(GRAPH_API_BASE_ENV).unwrap_or(defaults.api_base),
            token_url: read(TOKEN_URL_ENV).unwrap_or(defaults.token_url),
        }
    }
}

/// Authenticated GET access to the mailbox API.
///
/// Every request carries the current bearer token. A 401 triggers exactly one
/// token refresh and one retry of the same URL.
pub struct GraphClient {
    http: Client,
    api_base: String,
    tokens: TokenManager,
}

impl GraphClient {
    pub fn new(http: Client, api_base: impl Into<String>, tokens: TokenManager) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            tokens,
        }
    }

    /// `{api_base}/seg/seg/...` with each segment percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|error| FetchError::InvalidUrl(format!("{}: {error}", self.api_base)))?;
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidUrl(self.api_base.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn get_json<T: DeserializeOwned>(&mut self, url: &str) -> Result<T, FetchError> {
        let (status, body) = self.send_authorized(url).await?;
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
                body: redact_response_body(&body),
            });
        }
        decode(url, &body)
    }

    /// Like [`GraphClient::get_json`] but a 404 yields `Ok(None)`.
    pub async fn get_json_optional<T: DeserializeOwned>(
        &mut self,
        url: &str,
    ) -> Result<Option<T>, FetchError> {
        let (status, body) = self.send_authorized(url).await?;
        if status == StatusCode::NOT_FOUND {
            debug!("{url} returned 404");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
                body: redact_response_body(&body),
            });
        }
        decode(url, &body).map(Some)
    }

    async fn send_authorized(&mut self, url: &str) -> Result<(StatusCode, String), FetchError> {
        let token = self.tokens.access_token().await?;
        let (status, body) = self.send(url, &token).await?;
        if status != StatusCode::UNAUTHORIZED {
            return Ok((status, body));
        }

        warn!("{url} returned 401; refreshing token and retrying once");
        let token = self.tokens.refresh().await?;
        let (status, body) = self.send(url, &token).await?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized {
                url: url.to_string(),
                body: redact_response_body(&body),
            });
        }
        Ok((status, body))
    }

    /// One GET, waiting out throttling. After the last retry the 429 is
    /// returned like any other status.
    async fn send(&self, url: &str, token: &str) -> Result<(StatusCode, String), FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let mut backoff_seconds = 1u64;
        let mut attempt = 0;

        loop {
            debug!("GET {url}");
            let response = self
                .http
                .get(url)
                .bearer_auth(token)
                .header("accept", "application/json")
                .send()
                .await
                .map_err(transport)?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RATE_LIMIT_RETRIES {
                let retry_after_seconds = response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .unwrap_or(backoff_seconds)
                    .min(MAX_RETRY_AFTER_SECS);
                warn!("{url} throttled; retrying in {retry_after_seconds}s");
                sleep(StdDuration::from_secs(retry_after_seconds)).await;
                backoff_seconds = (backoff_seconds * 2).min(32);
                attempt += 1;
                continue;
            }

            let body = response.text().await.map_err(transport)?;
            return Ok((status, body));
        }
    }
}

fn decode<T: DeserializeOwned>(url: &str, body: &str) -> Result<T, FetchError> {
    serde_json::from_str(body).map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })
}

pub(crate) fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= REDACTED_BODY_MAX_LEN {
        return trimmed.to_string();
    }
    let mut cut = REDACTED_BODY_MAX_LEN;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…[truncated {} bytes]", &trimmed[..cut], trimmed.len())
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GraphPage<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GraphMailFolder {
    pub id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GraphMessage {
    pub id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<GraphRecipient>,
    #[serde(rename = "toRecipients")]
    pub to_recipients: Option<Vec<GraphRecipient>>,
    #[serde(rename = "ccRecipients")]
    pub cc_recipients: Option<Vec<GraphRecipient>>,
    #[serde(rename = "receivedDateTime")]
    pub received_date_time: Option<String>,
    #[serde(rename = "sentDateTime")]
    pub sent_date_time: Option<String>,
    #[serde(rename = "parentFolderId")]
    pub parent_folder_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GraphRecipient {
    #[serde(rename = "emailAddress")]
    pub email_address: Option<GraphEmailAddress>,
}

impl GraphRecipient {
    pub fn address(&self) -> Option<&str> {
        self.email_address
            .as_ref()
            .and_then(|email| email.address.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        self.email_address
            .as_ref()
            .and_then(|email| email.name.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GraphEmailAddress {
    pub name: Option<String>,
    pub address: Option<String>,
}
