use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::models::Message;
use crate::output::{message_rows, RenderOptions};

const SUBJECT_MAX_WIDTH: usize = 50;
const CONTACT_MAX_WIDTH: usize = 40;
const CC_MAX_WIDTH: usize = 40;

pub fn format_messages(messages: &[Message], options: &RenderOptions) -> String {
    if messages.is_empty() {
        return "No messages found.".to_string();
    }

    let mut headers = vec!["#", "User", "Folder", "Subject", "Timestamp", "Contact"];
    if options.show_cc {
        headers.push("CC");
    }

    let rows: Vec<Vec<String>> = message_rows(messages, options)
        .into_iter()
        .map(|row| {
            let mut cells = vec![
                row.index.to_string(),
                row.user,
                row.folder,
                truncate_for_width(&row.subject, SUBJECT_MAX_WIDTH),
                row.local_timestamp,
                truncate_for_width(&row.contact, CONTACT_MAX_WIDTH),
            ];
            if options.show_cc {
                cells.push(truncate_for_width(&row.cc, CC_MAX_WIDTH));
            }
            cells
        })
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(column, header)| {
            rows.iter()
                .map(|cells| UnicodeWidthStr::width(cells[column].as_str()))
                .chain(std::iter::once(UnicodeWidthStr::width(*header)))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    push_line(&mut out, headers.iter().copied(), &widths);
    let rules: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    push_line(&mut out, rules.iter().map(String::as_str), &widths);
    for cells in &rows {
        push_line(&mut out, cells.iter().map(String::as_str), &widths);
    }
    out.push_str(&format!("{} message(s)", rows.len()));
    out
}

fn push_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let line = cells
        .zip(widths)
        .map(|(cell, width)| pad_to_width(cell, *width))
        .collect::<Vec<_>>()
        .join("  ");
    out.push_str(line.trim_end());
    out.push('\n');
}

fn pad_to_width(value: &str, width: usize) -> String {
    let used = UnicodeWidthStr::width(value);
    format!("{value}{}", " ".repeat(width.saturating_sub(used)))
}

fn truncate_for_width(value: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(value) <= max_width {
        return value.to_string();
    }
    if max_width <= 1 {
        return "…".to_string();
    }

    let mut out = String::new();
    let mut width = 0usize;
    for c in value.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw + 1 > max_width {
            break;
        }
        out.push(c);
        width += cw;
    }
    out.push('…');
    out
}
