use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A mailbox folder as the provider knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Folder {
    pub id: String,
    pub display_name: String,
}

/// Message metadata after mapping from the wire record.
///
/// `mailbox`, `folder` and `parent_folder` are annotations added by the
/// pipeline; they are not part of the provider's record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    pub to_addresses: Vec<String>,
    pub cc_addresses: Vec<String>,
    /// `None` when the wire value was missing or unparseable.
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_timestamp: Option<String>,
    pub parent_folder_id: Option<String>,
    pub mailbox: String,
    pub folder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_folder: Option<String>,
}

impl Message {
    /// Sort key; unparseable timestamps sort before everything else.
    pub fn sort_key(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to_addresses
            .iter()
            .chain(self.cc_addresses.iter())
            .map(String::as_str)
    }
}

/// Which wire timestamp drives date filtering and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampField {
    #[default]
    Received,
    Sent,
}

impl TimestampField {
    pub fn graph_name(self) -> &'static str {
        match self {
            Self::Received => "receivedDateTime",
            Self::Sent => "sentDateTime",
        }
    }

    /// Property name in the free-text query syntax.
    pub fn kql_name(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Sent => "sent",
        }
    }
}

impl Display for TimestampField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kql_name())
    }
}

impl FromStr for TimestampField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "received" | "receiveddatetime" => Ok(Self::Received),
            "sent" | "sentdatetime" => Ok(Self::Sent),
            other => Err(format!("invalid timestamp field: {other}")),
        }
    }
}
