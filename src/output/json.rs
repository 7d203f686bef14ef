use anyhow::Result;

use crate::models::Message;

pub fn format_messages(messages: &[Message]) -> Result<String> {
    Ok(serde_json::to_string_pretty(messages)?)
}
