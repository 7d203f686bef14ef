use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{AuthError, FetchError};
use crate::models::Folder;

use super::{GraphClient, GraphMailFolder, GraphPage};

const FOLDER_PAGE_SIZE: &str = "100";

/// Human names accepted for the provider's well-known folders.
const WELL_KNOWN_ALIASES: &[(&str, &str)] = &[
    ("inbox", "inbox"),
    ("drafts", "drafts"),
    ("sent items", "sentitems"),
    ("sent", "sentitems"),
    ("sentitems", "sentitems"),
    ("deleted items", "deleteditems"),
    ("deleteditems", "deleteditems"),
    ("junk email", "junkemail"),
    ("junk", "junkemail"),
    ("junkemail", "junkemail"),
    ("archive", "archive"),
    ("outbox", "outbox"),
];

pub fn well_known_alias(name: &str) -> Option<&'static str> {
    let lower = name.trim().to_lowercase();
    WELL_KNOWN_ALIASES
        .iter()
        .find(|(human, _)| *human == lower)
        .map(|(_, alias)| *alias)
}

/// Folder name/id lookups, cached per mailbox for the life of the resolver.
#[derive(Debug, Default)]
pub struct FolderResolver {
    by_name: HashMap<(String, String), Folder>,
    by_id: HashMap<(String, String), String>,
}

impl FolderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a display name (or well-known alias) to a folder.
    ///
    /// `Ok(None)` means the mailbox has no such folder.
    pub async fn resolve(
        &mut self,
        client: &mut GraphClient,
        mailbox: &str,
        name: &str,
    ) -> Result<Option<Folder>, FetchError> {
        let key = (mailbox.to_string(), name.trim().to_lowercase());
        if let Some(folder) = self.by_name.get(&key) {
            return Ok(Some(folder.clone()));
        }

        if let Some(alias) = well_known_alias(name) {
            let url = client.endpoint(&["users", mailbox, "mailFolders", alias])?;
            match client
                .get_json_optional::<GraphMailFolder>(url.as_str())
                .await?
            {
                Some(found) => {
                    let folder = self.remember(mailbox, found);
                    self.by_name.insert(key, folder.clone());
                    return Ok(Some(folder));
                }
                None => debug!("well-known folder '{alias}' missing for {mailbox}; listing folders"),
            }
        }

        let wanted = name.trim();
        let found = self
            .list_folders(client, mailbox)
            .await?
            .into_iter()
            .find(|folder| folder.display_name.trim().eq_ignore_ascii_case(wanted));
        if let Some(folder) = &found {
            self.by_name.insert(key, folder.clone());
        }
        Ok(found)
    }

    /// Display name for a folder id. Non-auth failures fall back to the id.
    pub async fn display_name(
        &mut self,
        client: &mut GraphClient,
        mailbox: &str,
        folder_id: &str,
    ) -> Result<String, AuthError> {
        let key = (mailbox.to_string(), folder_id.to_string());
        if let Some(name) = self.by_id.get(&key) {
            return Ok(name.clone());
        }

        match fetch_folder(client, mailbox, folder_id).await {
            Ok(found) => Ok(self.remember(mailbox, found).display_name),
            Err(FetchError::Auth(error)) => Err(error),
            Err(error) => {
                warn!("could not resolve folder id {folder_id} for {mailbox}: {error}");
                self.by_id.insert(key, folder_id.to_string());
                Ok(folder_id.to_string())
            }
        }
    }

    /// Every top-level folder of the mailbox, following pagination.
    pub async fn list_folders(
        &mut self,
        client: &mut GraphClient,
        mailbox: &str,
    ) -> Result<Vec<Folder>, FetchError> {
        let mut url = client.endpoint(&["users", mailbox, "mailFolders"])?;
        url.query_pairs_mut().append_pair("$top", FOLDER_PAGE_SIZE);
        let mut next = Some(url.to_string());
        let mut folders = Vec::new();

        while let Some(url) = next.take() {
            let page: GraphPage<GraphMailFolder> = client.get_json(&url).await?;
            for found in page.value {
                let folder = self.remember(mailbox, found);
                self.by_name
                    .entry((mailbox.to_string(), folder.display_name.trim().to_lowercase()))
                    .or_insert_with(|| folder.clone());
                folders.push(folder);
            }
            next = page.next_link;
        }

        debug!("listed {} folders for {mailbox}", folders.len());
        Ok(folders)
    }

    fn remember(&mut self, mailbox: &str, found: GraphMailFolder) -> Folder {
        self.by_id.insert(
            (mailbox.to_string(), found.id.clone()),
            found.display_name.clone(),
        );
        Folder {
            id: found.id,
            display_name: found.display_name,
        }
    }
}

async fn fetch_folder(
    client: &mut GraphClient,
    mailbox: &str,
    folder_id: &str,
) -> Result<GraphMailFolder, FetchError> {
    let url = client.endpoint(&["users", mailbox, "mailFolders", folder_id])?;
    client.get_json(url.as_str()).await
}
