use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{AuthError, FetchError};
use crate::filters::{has_external_recipient, sort_chronologically, DateRange, DomainFilter};
use crate::graph::{FetchCriteria, FetchLimits, FolderResolver, GraphClient, Strategy};
use crate::models::{Message, TimestampField};

/// One scan over a set of mailboxes and folders.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub mailboxes: Vec<String>,
    pub folders: Vec<String>,
    pub date_range: Option<DateRange>,
    pub domain_filter: DomainFilter,
    pub strategy: Strategy,
    pub timestamp_field: TimestampField,
    pub limits: FetchLimits,
    pub org_domain: Option<String>,
    /// Keep only messages with a recipient outside `org_domain`.
    pub require_external: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderIssue {
    pub mailbox: String,
    pub folder: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct RunReport {
    /// Ascending by timestamp across every mailbox and folder.
    pub messages: Vec<Message>,
    /// Folders that do not exist in a mailbox.
    pub skipped_folders: Vec<FolderIssue>,
    /// Folders abandoned after a request failure.
    pub failed_folders: Vec<FolderIssue>,
}

/// Scan every folder of every mailbox, one request at a time.
///
/// Folder-level failures are recorded and the scan moves on; only token
/// acquisition failures abort the run.
pub async fn run(client: &mut GraphClient, request: &RunRequest) -> Result<RunReport, AuthError> {
    let mut resolver = FolderResolver::new();
    let mut report = RunReport::default();

    for mailbox in &request.mailboxes {
        for name in &request.folders {
            let issue = |reason: String| FolderIssue {
                mailbox: mailbox.clone(),
                folder: name.clone(),
                reason,
            };

            let folder = match resolver.resolve(client, mailbox, name).await {
                Ok(Some(folder)) => folder,
                Ok(None) => {
                    warn!("folder '{name}' not found for {mailbox}; skipping");
                    report
                        .skipped_folders
                        .push(issue("folder not found".to_string()));
                    continue;
                }
                Err(FetchError::Auth(auth)) => return Err(auth),
                Err(failure) => {
                    error!("resolve folder '{name}' for {mailbox}: {failure}");
                    report.failed_folders.push(issue(failure.to_string()));
                    continue;
                }
            };

            let criteria = FetchCriteria {
                mailbox,
                folder: &folder,
                folder_label: name,
                date_range: request.date_range.as_ref(),
                domain_filter: &request.domain_filter,
                timestamp_field: request.timestamp_field,
                limits: request.limits,
            };
            let mut messages = match request.strategy.fetch(client, &criteria).await {
                Ok(messages) => messages,
                Err(FetchError::Auth(auth)) => return Err(auth),
                Err(failure) => {
                    error!("fetch {mailbox}/{name}: {failure}");
                    report.failed_folders.push(issue(failure.to_string()));
                    continue;
                }
            };

            for message in &mut messages {
                if let Some(parent_id) = message.parent_folder_id.as_deref() {
                    let parent = resolver.display_name(client, mailbox, parent_id).await?;
                    message.parent_folder = Some(parent);
                }
            }

            if request.require_external {
                if let Some(org_domain) = request.org_domain.as_deref() {
                    messages.retain(|message| has_external_recipient(message, org_domain));
                }
            }

            info!("{mailbox}/{name}: {} message(s)", messages.len());
            report.messages.extend(messages);
        }
    }

    sort_chronologically(&mut report.messages);
    Ok(report)
}
