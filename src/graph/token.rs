use std::fmt;

use chrono::{DateTime, Duration, Local, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{AuthError, StoreError};
use crate::filters::{parse_local_timestamp, parse_timestamp};
use crate::store::EnvFileStore;

use super::redact_response_body;

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Lifetime assumed for every issued token, whatever the server reports.
pub const TOKEN_LIFETIME_SECS: i64 = 3600;
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 300;

pub const ACCESS_TOKEN_KEY: &str = "ACCESS_TOKEN";
pub const TOKEN_TIMESTAMP_KEY: &str = "TOKEN_TIMESTAMP";
/// Older scripts wrote this key instead of `TOKEN_TIMESTAMP`.
pub const LEGACY_TIMESTAMP_KEY: &str = "TOKEN_GENERATED_AT";

const TENANT_ID_KEY: &str = "TENANT_ID";
const CLIENT_ID_KEY: &str = "CLIENT_ID";
const CLIENT_SECRET_KEY: &str = "CLIENT_SECRET";

#[derive(Clone)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Process environment first, then the env file.
    pub fn resolve(store: &EnvFileStore) -> Result<Self, AuthError> {
        let file = store.load()?;
        let lookup = |key: &'static str| -> Result<String, AuthError> {
            std::env::var(key)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .or_else(|| {
                    file.get(key)
                        .filter(|value| !value.trim().is_empty())
                        .cloned()
                })
                .map(|value| value.trim().to_string())
                .ok_or(AuthError::MissingCredential(key))
        };

        Ok(Self {
            tenant_id: lookup(TENANT_ID_KEY)?,
            client_id: lookup(CLIENT_ID_KEY)?,
            client_secret: lookup(CLIENT_SECRET_KEY)?,
        })
    }
}

#[derive(Clone)]
pub struct Token {
    value: String,
    issued_at: DateTime<Utc>,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

impl Token {
    pub fn new(value: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            issued_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + Duration::seconds(TOKEN_LIFETIME_SECS)
    }

    /// A token stamped in the future is never fresh: its real age is unknown.
    pub fn is_fresh(&self, now: DateTime<Utc>, refresh_margin: Duration) -> bool {
        let age = now - self.issued_at;
        age >= Duration::zero()
            && age < Duration::seconds(TOKEN_LIFETIME_SECS) - refresh_margin
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStatus {
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining: Duration,
    pub fresh: bool,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// Client-credentials token source backed by the env file cache.
///
/// The cache is read once on construction and rewritten after every
/// refresh. Tokens are never logged.
pub struct TokenManager {
    http: Client,
    token_url: String,
    credentials: Credentials,
    store: EnvFileStore,
    refresh_margin: Duration,
    cached: Option<Token>,
}

impl TokenManager {
    pub fn new(
        http: Client,
        token_url: impl Into<String>,
        credentials: Credentials,
        store: EnvFileStore,
        refresh_margin: Duration,
    ) -> Result<Self, AuthError> {
        let cached = load_cached_token(&store)?;
        Ok(Self {
            http,
            token_url: token_url.into(),
            credentials,
            store,
            refresh_margin,
            cached,
        })
    }

    /// Cached token when still fresh, otherwise a newly issued one.
    pub async fn access_token(&mut self) -> Result<String, AuthError> {
        let now = Utc::now();
        if let Some(token) = self
            .cached
            .as_ref()
            .filter(|token| token.is_fresh(now, self.refresh_margin))
        {
            debug!(
                "reusing cached access token (age {}s)",
                (now - token.issued_at).num_seconds()
            );
            return Ok(token.value.clone());
        }

        self.refresh().await
    }

    /// Always requests a new token and persists it.
    pub async fn refresh(&mut self) -> Result<String, AuthError> {
        let token = self.request_token().await?;
        self.persist(&token)?;
        info!(
            "obtained new access token, valid until {}",
            token.expires_at().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let value = token.value.clone();
        self.cached = Some(token);
        Ok(value)
    }

    pub fn status(&self) -> Option<TokenStatus> {
        let now = Utc::now();
        self.cached.as_ref().map(|token| TokenStatus {
            issued_at: token.issued_at,
            expires_at: token.expires_at(),
            remaining: token.expires_at() - now,
            fresh: token.is_fresh(now, self.refresh_margin),
        })
    }

    async fn request_token(&self) -> Result<Token, AuthError> {
        let issued_at = Utc::now();
        debug!("POST {}", self.token_url);
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|source| AuthError::Transport {
                url: self.token_url.clone(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| AuthError::Transport {
                url: self.token_url.clone(),
                source,
            })?;
        if !status.is_success() {
            return Err(AuthError::Rejected {
                status,
                body: redact_response_body(&body),
            });
        }

        let payload: OAuthTokenResponse = serde_json::from_str(&body)?;
        if let Some(expires_in) = payload.expires_in {
            debug!("identity endpoint reported expires_in={expires_in}s");
        }
        Ok(Token::new(payload.access_token, issued_at))
    }

    fn persist(&self, token: &Token) -> Result<(), StoreError> {
        let timestamp = token
            .issued_at
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let legacy = token
            .issued_at
            .with_timezone(&Local)
            .naive_local()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string();
        let mut pairs = vec![
            (ACCESS_TOKEN_KEY, token.value.as_str()),
            (TOKEN_TIMESTAMP_KEY, timestamp.as_str()),
        ];
        if self.store.contains_key(LEGACY_TIMESTAMP_KEY)? {
            pairs.push((LEGACY_TIMESTAMP_KEY, legacy.as_str()));
        }
        self.store.upsert(&pairs)
    }
}

fn load_cached_token(store: &EnvFileStore) -> Result<Option<Token>, StoreError> {
    let values = store.load()?;
    let Some(value) = values
        .get(ACCESS_TOKEN_KEY)
        .filter(|value| !value.trim().is_empty())
    else {
        return Ok(None);
    };

    let present = |key: &str| values.get(key).filter(|value| !value.trim().is_empty());
    let parsed = if let Some(raw) = present(TOKEN_TIMESTAMP_KEY) {
        parse_timestamp(raw)
    } else if let Some(raw) = present(LEGACY_TIMESTAMP_KEY) {
        // Written as naive local wall time.
        parse_local_timestamp(raw)
    } else {
        debug!("cached access token has no timestamp; ignoring it");
        return Ok(None);
    };

    match parsed {
        Ok(issued_at) => Ok(Some(Token::new(value.trim(), issued_at))),
        Err(error) => {
            warn!("ignoring cached access token: {error}");
            Ok(None)
        }
    }
}
