use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::Days;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::filters::{parse_timestamp, sort_chronologically, DateRange, DomainFilter, MatchOn};
use crate::models::{Folder, Message, TimestampField};

use super::{GraphClient, GraphMessage, GraphPage, GraphRecipient};

pub const MESSAGE_SELECT_FIELDS: &str =
    "id,subject,from,toRecipients,ccRecipients,receivedDateTime,sentDateTime,parentFolderId";

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_MAX_PAGES: u32 = 100;
pub const DEFAULT_MAX_PER_FOLDER: usize = 1000;

/// Pagination ceilings for one folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    /// `$top` per request.
    pub page_size: u32,
    pub max_pages: u32,
    /// `None` is unlimited; the page ceiling still applies.
    pub max_per_folder: Option<usize>,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            max_per_folder: Some(DEFAULT_MAX_PER_FOLDER),
        }
    }
}

impl FetchLimits {
    /// `0` means unlimited.
    pub fn per_folder_from(value: usize) -> Option<usize> {
        (value > 0).then_some(value)
    }
}

/// Everything needed to fetch one folder of one mailbox.
#[derive(Debug, Clone, Copy)]
pub struct FetchCriteria<'a> {
    pub mailbox: &'a str,
    pub folder: &'a Folder,
    /// Folder name as requested; copied onto every message.
    pub folder_label: &'a str,
    pub date_range: Option<&'a DateRange>,
    pub domain_filter: &'a DomainFilter,
    pub timestamp_field: TimestampField,
    pub limits: FetchLimits,
}

/// How the server is asked for messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Server-side date predicate and ordering; domains matched locally.
    #[default]
    Filter,
    /// Free-text query covering domains and a widened date window; dates,
    /// domains and ordering are re-applied locally.
    Search,
}

impl Display for Strategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Filter => f.write_str("filter"),
            Self::Search => f.write_str("search"),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "filter" => Ok(Self::Filter),
            "search" => Ok(Self::Search),
            other => Err(format!("invalid strategy: {other}")),
        }
    }
}

impl Strategy {
    /// Fetch, filter and sort the messages of one folder.
    ///
    /// Any request failure discards what was collected for the folder.
    pub async fn fetch(
        self,
        client: &mut GraphClient,
        criteria: &FetchCriteria<'_>,
    ) -> Result<Vec<Message>, FetchError> {
        let url = self.first_page_url(client, criteria)?;
        let raw = collect_pages(client, url.to_string(), criteria).await?;
        let fetched = raw.len();

        let messages: Vec<Message> = raw
            .into_iter()
            .map(|message| map_message(message, criteria))
            .collect();
        let messages = match (self, criteria.date_range) {
            (Self::Search, Some(range)) => range.retain(messages),
            _ => messages,
        };
        let mut messages = criteria.domain_filter.apply(messages);
        sort_chronologically(&mut messages);

        info!(
            "{}/{}: {} fetched, {} kept ({self})",
            criteria.mailbox,
            criteria.folder_label,
            fetched,
            messages.len()
        );
        Ok(messages)
    }

    pub fn first_page_url(
        self,
        client: &GraphClient,
        criteria: &FetchCriteria<'_>,
    ) -> Result<Url, FetchError> {
        let mut url = client.endpoint(&[
            "users",
            criteria.mailbox,
            "mailFolders",
            &criteria.folder.id,
            "messages",
        ])?;
        let field = criteria.timestamp_field;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("$select", MESSAGE_SELECT_FIELDS)
                .append_pair("$top", &criteria.limits.page_size.max(1).to_string());
            match self {
                Self::Filter => {
                    if let Some(range) = criteria.date_range {
                        let (start, end) = range.wire_bounds();
                        let name = field.graph_name();
                        query.append_pair(
                            "$filter",
                            &format!("{name} ge {start} and {name} le {end}"),
                        );
                    }
                    query.append_pair("$orderby", &format!("{} asc", field.graph_name()));
                }
                Self::Search => {
                    if let Some(kql) =
                        build_search_query(criteria.domain_filter, criteria.date_range, field)
                    {
                        query.append_pair("$search", &format!("\"{kql}\""));
                    }
                }
            }
        }

        Ok(url)
    }
}

/// KQL for the search strategy, or `None` when there is nothing to narrow by.
///
/// The day window is one day wider on each side than the requested range.
pub fn build_search_query(
    filter: &DomainFilter,
    date_range: Option<&DateRange>,
    field: TimestampField,
) -> Option<String> {
    let prefixes: &[&str] = match filter.match_on() {
        MatchOn::Recipients => &["to"],
        MatchOn::Sender => &["from"],
        MatchOn::Any => &["to", "from"],
    };
    let terms: Vec<String> = filter
        .terms()
        .iter()
        .flat_map(|term| prefixes.iter().map(move |prefix| format!("{prefix}:{term}")))
        .collect();

    let mut clauses = Vec::new();
    if !terms.is_empty() {
        clauses.push(format!("({})", terms.join(" OR ")));
    }
    if let Some(range) = date_range {
        let from = range
            .first_day
            .checked_sub_days(Days::new(1))
            .unwrap_or(range.first_day);
        let to = range
            .last_day
            .checked_add_days(Days::new(1))
            .unwrap_or(range.last_day);
        clauses.push(format!(
            "{}:{}..{}",
            field.kql_name(),
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        ));
    }

    (!clauses.is_empty()).then(|| clauses.join(" AND "))
}

async fn collect_pages(
    client: &mut GraphClient,
    first_url: String,
    criteria: &FetchCriteria<'_>,
) -> Result<Vec<GraphMessage>, FetchError> {
    let limits = criteria.limits;
    let max_pages = limits.max_pages.max(1);
    let mut collected: Vec<GraphMessage> = Vec::new();
    let mut next = Some(first_url);
    let mut pages = 0u32;

    while let Some(url) = next.take() {
        let page: GraphPage<GraphMessage> = client.get_json(&url).await?;
        pages += 1;
        collected.extend(page.value);
        next = page.next_link;
        info!(
            "{}/{}: page {pages} ({} messages so far)",
            criteria.mailbox,
            criteria.folder_label,
            collected.len()
        );

        if let Some(max) = limits.max_per_folder {
            if collected.len() >= max {
                if collected.len() > max || next.is_some() {
                    warn!(
                        "{}/{}: stopping at the per-folder ceiling of {max} messages",
                        criteria.mailbox, criteria.folder_label
                    );
                }
                collected.truncate(max);
                break;
            }
        }
        if next.is_some() && pages >= max_pages {
            warn!(
                "{}/{}: stopping at the page ceiling of {max_pages} pages",
                criteria.mailbox, criteria.folder_label
            );
            break;
        }
    }

    Ok(collected)
}

fn map_message(raw: GraphMessage, criteria: &FetchCriteria<'_>) -> Message {
    let non_empty = |value: Option<String>| value.filter(|value| !value.trim().is_empty());
    let (preferred, fallback) = match criteria.timestamp_field {
        TimestampField::Received => (raw.received_date_time, raw.sent_date_time),
        TimestampField::Sent => (raw.sent_date_time, raw.received_date_time),
    };
    let raw_timestamp = non_empty(preferred).or_else(|| non_empty(fallback));
    let timestamp = raw_timestamp
        .as_deref()
        .and_then(|value| match parse_timestamp(value) {
            Ok(parsed) => Some(parsed),
            Err(error) => {
                debug!("{error}");
                None
            }
        });

    Message {
        id: raw.id,
        subject: raw.subject,
        from_address: raw
            .from
            .as_ref()
            .and_then(GraphRecipient::address)
            .map(str::to_string),
        from_name: raw
            .from
            .as_ref()
            .and_then(GraphRecipient::name)
            .map(str::to_string),
        to_addresses: recipient_addresses(raw.to_recipients.as_deref()),
        cc_addresses: recipient_addresses(raw.cc_recipients.as_deref()),
        timestamp,
        raw_timestamp,
        parent_folder_id: raw.parent_folder_id,
        mailbox: criteria.mailbox.to_string(),
        folder: criteria.folder_label.to_string(),
        parent_folder: None,
    }
}

fn recipient_addresses(recipients: Option<&[GraphRecipient]>) -> Vec<String> {
    recipients
        .unwrap_or_default()
        .iter()
        .filter_map(GraphRecipient::address)
        .map(str::to_string)
        .collect()
}
