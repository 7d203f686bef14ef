use std::str::FromStr;

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ParseError};
use crate::models::Message;

/// Which addresses a domain term is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOn {
    /// To and Cc lists.
    #[default]
    Recipients,
    /// From address or from display name.
    Sender,
    Any,
}

impl FromStr for MatchOn {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "recipients" | "to" => Ok(Self::Recipients),
            "sender" | "from" => Ok(Self::Sender),
            "any" | "both" => Ok(Self::Any),
            other => Err(format!("invalid match target: {other}")),
        }
    }
}

/// Case-insensitive substring matching of domain (or address) terms.
///
/// Matching is not anchored on a domain boundary: `acme.com` also matches
/// `x@notacme.com` and `x@acme.com.evil.org`. Several callers depend on
/// that, so it is the contract rather than an accident.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainFilter {
    terms: Vec<String>,
    match_on: MatchOn,
}

impl DomainFilter {
    pub fn new<I, S>(terms: I, match_on: MatchOn) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for term in terms {
            let term = normalize_domain_term(term.as_ref());
            if !term.is_empty() && !normalized.contains(&term) {
                normalized.push(term);
            }
        }
        Self {
            terms: normalized,
            match_on,
        }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn match_on(&self) -> MatchOn {
        self.match_on
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// An empty filter matches everything.
    pub fn matches(&self, message: &Message) -> bool {
        if self.terms.is_empty() {
            return true;
        }

        let recipients = || message.recipients().any(|address| self.hits(address));
        let sender = || {
            message
                .from_address
                .iter()
                .chain(message.from_name.iter())
                .any(|value| self.hits(value))
        };

        match self.match_on {
            MatchOn::Recipients => recipients(),
            MatchOn::Sender => sender(),
            MatchOn::Any => recipients() || sender(),
        }
    }

    pub fn apply(&self, mut messages: Vec<Message>) -> Vec<Message> {
        if !self.terms.is_empty() {
            messages.retain(|message| self.matches(message));
        }
        messages
    }

    fn hits(&self, value: &str) -> bool {
        let value = value.to_lowercase();
        self.terms.iter().any(|term| value.contains(term.as_str()))
    }
}

/// Keep messages with any To/Cc address containing any of `terms`.
pub fn filter_by_domains(messages: Vec<Message>, terms: &[String]) -> Vec<Message> {
    DomainFilter::new(terms, MatchOn::Recipients).apply(messages)
}

/// Lowercase, strip scheme, `www.` and trailing slashes. Double quotes and
/// backslashes are dropped so a term can sit inside a quoted search query.
pub fn normalize_domain_term(raw: &str) -> String {
    let mut term: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '"' | '\\'))
        .collect();
    for prefix in ["https://", "http://", "www."] {
        if let Some(rest) = term.strip_prefix(prefix) {
            term = rest.to_string();
        }
    }
    term.trim().trim_matches('/').to_string()
}

fn domain_part(address: &str) -> &str {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .unwrap_or(address)
}

fn normalize_org_domain(org_domain: &str) -> String {
    org_domain.trim().trim_start_matches('@').to_ascii_lowercase()
}

pub fn is_internal_address(address: &str, org_domain: &str) -> bool {
    domain_part(address.trim()).eq_ignore_ascii_case(&normalize_org_domain(org_domain))
}

/// True when any non-empty To/Cc address lives outside `org_domain`.
pub fn has_external_recipient(message: &Message, org_domain: &str) -> bool {
    message
        .recipients()
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .any(|address| !is_internal_address(address, org_domain))
}

/// Stable ascending sort; messages without a timestamp come first.
pub fn sort_chronologically(messages: &mut [Message]) {
    messages.sort_by_key(Message::sort_key);
}

/// Inclusive day range in a local time zone, resolved to UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// `first_day` 00:00:00 through `last_day` 23:59:59 in `tz`.
    pub fn new(first_day: NaiveDate, last_day: NaiveDate, tz: Tz) -> Result<Self, ConfigError> {
        if last_day < first_day {
            return Err(ConfigError::Invalid(format!(
                "date range end {last_day} is before start {first_day}"
            )));
        }

        let start = start_of_day(first_day, tz)?;
        let end = end_of_day(last_day, tz)?;
        Ok(Self {
            first_day,
            last_day,
            start,
            end,
        })
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }

    /// Bounds as the API expects them in a `$filter` predicate.
    pub fn wire_bounds(&self) -> (String, String) {
        (
            self.start.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            self.end.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        )
    }

    /// Drop messages outside the range, including ones whose timestamp
    /// could not be parsed.
    pub fn retain(&self, mut messages: Vec<Message>) -> Vec<Message> {
        messages.retain(|message| match message.timestamp {
            Some(timestamp) => self.contains(timestamp),
            None => {
                debug!(
                    "dropping message {} without a usable timestamp ({})",
                    message.id.as_deref().unwrap_or("<missing-id>"),
                    message.raw_timestamp.as_deref().unwrap_or("missing")
                );
                false
            }
        });
        messages
    }
}

fn start_of_day(date: NaiveDate, tz: Tz) -> Result<DateTime<Utc>, ConfigError> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| ConfigError::Invalid(format!("invalid lower bound date: {date}")))?;
    tz.from_local_datetime(&midnight)
        .earliest()
        // Midnight can fall inside a DST gap in a few zones.
        .or_else(|| {
            tz.from_local_datetime(&(midnight + Duration::hours(1)))
                .earliest()
        })
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| ConfigError::Invalid(format!("no local midnight on {date} in {tz}")))
}

fn end_of_day(date: NaiveDate, tz: Tz) -> Result<DateTime<Utc>, ConfigError> {
    let latest = date
        .and_hms_opt(23, 59, 59)
        .ok_or_else(|| ConfigError::Invalid(format!("invalid upper bound date: {date}")))?;
    tz.from_local_datetime(&latest)
        .latest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| ConfigError::Invalid(format!("no local 23:59:59 on {date} in {tz}")))
}

/// Parse a wire timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ParseError> {
    parse_with(raw, |naive| Some(naive.and_utc()))
}

/// Like [`parse_timestamp`] but a value without an offset is local wall time.
pub fn parse_local_timestamp(raw: &str) -> Result<DateTime<Utc>, ParseError> {
    parse_with(raw, |naive| {
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    })
}

fn parse_with(
    raw: &str,
    assume: impl Fn(NaiveDateTime) -> Option<DateTime<Utc>>,
) -> Result<DateTime<Utc>, ParseError> {
    let value = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .into_iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .and_then(assume)
        .ok_or_else(|| ParseError {
            raw: raw.to_string(),
        })
}
