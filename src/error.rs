use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: dotenvy::Error,
    },
}

/// Token acquisition failures. Always fatal for a run.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credential {0} (set it in the environment or the env file)")]
    MissingCredential(&'static str),

    #[error("request oauth token from {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("oauth token request failed: status={status} body={body}")]
    Rejected { status: StatusCode, body: String },

    #[error("decode oauth token response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("token cache: {0}")]
    Store(#[from] StoreError),
}

/// Failures while talking to the mailbox API. Scoped to one folder unless
/// the failure came from token acquisition.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request {url} failed: status={status} body={body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("request {url} still unauthorized after token refresh: body={body}")]
    Unauthorized { url: String, body: String },

    #[error("decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid url {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[derive(Debug, Error)]
#[error("invalid timestamp '{raw}'")]
pub struct ParseError {
    pub raw: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown time zone '{0}'")]
    TimeZone(String),

    #[error("invalid date '{value}', expected YYYY-MM-DD")]
    Date { value: String },

    #[error("{0}")]
    Invalid(String),
}
