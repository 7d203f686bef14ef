use anyhow::{Context, Result};

use crate::models::Message;
use crate::output::{message_rows, RenderOptions};

pub const CSV_HEADER: [&str; 12] = [
    "index",
    "user",
    "mailbox",
    "folder",
    "parent_folder",
    "subject",
    "timestamp",
    "from_address",
    "from_name",
    "to",
    "cc",
    "contact",
];

/// One row per message, untruncated, with a UTC RFC 3339 timestamp.
pub fn format_messages(messages: &[Message], options: &RenderOptions) -> Result<String> {
    let mut writer = ::csv::WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(CSV_HEADER)
        .context("write csv header")?;

    for (message, row) in messages.iter().zip(message_rows(messages, options)) {
        let index = row.index.to_string();
        let to = message.to_addresses.join("; ");
        let cc = message.cc_addresses.join("; ");
        writer
            .write_record([
                index.as_str(),
                row.user.as_str(),
                message.mailbox.as_str(),
                row.folder.as_str(),
                message.parent_folder.as_deref().unwrap_or_default(),
                row.subject.as_str(),
                row.utc_timestamp.as_str(),
                message.from_address.as_deref().unwrap_or_default(),
                message.from_name.as_deref().unwrap_or_default(),
                to.as_str(),
                cc.as_str(),
                row.contact.as_str(),
            ])
            .context("write csv row")?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|error| anyhow::anyhow!("flush csv output: {}", error.error()))?;
    String::from_utf8(bytes).context("csv output is not utf-8")
}
