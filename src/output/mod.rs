pub mod csv;
pub mod json;
pub mod table;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::filters::is_internal_address;
use crate::graph::folders::well_known_alias;
use crate::models::Message;

pub const CSV_FILE_NAME: &str = "messages.csv";
pub const JSON_FILE_NAME: &str = "messages.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Csv,
    Json,
}

/// Display order of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first.
    #[default]
    Earliest,
    /// Newest first; messages without a timestamp go last.
    Latest,
}

impl SortOrder {
    /// Reorder an ascending report and keep at most `limit` messages from
    /// the head. Equal timestamps keep their incoming order.
    pub fn arrange(self, mut messages: Vec<Message>, limit: Option<usize>) -> Vec<Message> {
        if self == Self::Latest {
            messages.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
        }
        if let Some(limit) = limit {
            messages.truncate(limit);
        }
        messages
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Addresses in this domain are left out of the contact and CC columns.
    pub org_domain: Option<String>,
    pub timezone: Tz,
    pub show_cc: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            org_domain: None,
            timezone: chrono_tz::America::New_York,
            show_cc: false,
        }
    }
}

/// Which files a run leaves behind in the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFiles {
    pub csv: bool,
    pub json: bool,
}

/// A message projected onto the presentation columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub index: usize,
    pub user: String,
    pub folder: String,
    pub subject: String,
    pub local_timestamp: String,
    pub utc_timestamp: String,
    pub contact: String,
    pub cc: String,
}

pub fn message_rows(messages: &[Message], options: &RenderOptions) -> Vec<MessageRow> {
    messages
        .iter()
        .enumerate()
        .map(|(position, message)| MessageRow {
            index: position + 1,
            user: mailbox_user(&message.mailbox).to_string(),
            folder: message.folder.clone(),
            subject: message.subject.clone().unwrap_or_default(),
            local_timestamp: message
                .timestamp
                .map(|ts| {
                    ts.with_timezone(&options.timezone)
                        .format("%Y-%m-%d %H:%M")
                        .to_string()
                })
                .unwrap_or_default(),
            utc_timestamp: message
                .timestamp
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
                .or_else(|| message.raw_timestamp.clone())
                .unwrap_or_default(),
            contact: contact_for(message, options.org_domain.as_deref()),
            cc: external_addresses(&message.cc_addresses, options.org_domain.as_deref()),
        })
        .collect()
}

pub fn format_messages(
    format: OutputFormat,
    messages: &[Message],
    options: &RenderOptions,
) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_messages(messages, options)),
        OutputFormat::Csv => csv::format_messages(messages, options),
        OutputFormat::Json => json::format_messages(messages),
    }
}

/// Write `messages.csv` and/or `messages.json` into `dir`, replacing
/// earlier files. Returns the paths written.
pub fn write_output_files(
    dir: &Path,
    messages: &[Message],
    options: &RenderOptions,
    files: OutputFiles,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    if !files.csv && !files.json {
        return Ok(written);
    }

    std::fs::create_dir_all(dir)
        .with_context(|| format!("create output directory {}", dir.display()))?;

    if files.csv {
        let path = dir.join(CSV_FILE_NAME);
        let contents = csv::format_messages(messages, options)?;
        std::fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        written.push(path);
    }
    if files.json {
        let path = dir.join(JSON_FILE_NAME);
        let contents = json::format_messages(messages)?;
        std::fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        written.push(path);
    }

    Ok(written)
}

fn mailbox_user(mailbox: &str) -> &str {
    mailbox
        .split_once('@')
        .map(|(user, _)| user)
        .unwrap_or(mailbox)
}

fn is_sent_folder(folder: &str) -> bool {
    well_known_alias(folder) == Some("sentitems")
}

/// Outside recipients for sent mail, the sender otherwise.
fn contact_for(message: &Message, org_domain: Option<&str>) -> String {
    if is_sent_folder(&message.folder) {
        external_addresses(&message.to_addresses, org_domain)
    } else {
        message.from_address.clone().unwrap_or_default()
    }
}

fn external_addresses(addresses: &[String], org_domain: Option<&str>) -> String {
    addresses
        .iter()
        .map(|address| address.trim())
        .filter(|address| !address.is_empty())
        .filter(|address| !org_domain.is_some_and(|org| is_internal_address(address, org)))
        .collect::<Vec<_>>()
        .join("; ")
}
