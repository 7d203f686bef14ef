use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{Duration, NaiveDate, SecondsFormat, Utc};
use mailscan::error::AuthError;
use mailscan::filters::{DateRange, DomainFilter, MatchOn};
use mailscan::graph::{
    Credentials, FetchCriteria, FetchLimits, FolderResolver, GraphClient, Strategy, TokenManager,
};
use mailscan::models::{Folder, TimestampField};
use mailscan::output::{self, OutputFiles, OutputFormat, RenderOptions};
use mailscan::pipeline::{self, RunRequest};
use mailscan::store::EnvFileStore;
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MAILBOX: &str = "a@x.com";
const FOLDERS_PATH: &str = "/v1.0/users/a@x.com/mailFolders";
const INBOX_ALIAS_PATH: &str = "/v1.0/users/a@x.com/mailFolders/inbox";
const INBOX_MESSAGES_PATH: &str = "/v1.0/users/a@x.com/mailFolders/inbox-id/messages";

fn temp_root() -> PathBuf {
    let root = std::env::temp_dir().join(format!("mailscan-pipeline-it-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&root).expect("create temp test root");
    root
}

fn seed_env(root: &Path, contents: &str) -> PathBuf {
    let env_path = root.join(".env");
    std::fs::write(&env_path, contents).expect("seed env file");
    env_path
}

fn fresh_cache(token: &str) -> String {
    format!(
        "TENANT_ID=tenant\nACCESS_TOKEN={token}\nTOKEN_TIMESTAMP={}\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

fn credentials() -> Credentials {
    Credentials {
        tenant_id: "tenant".to_string(),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
    }
}

fn token_manager(server: &MockServer, env_path: &Path) -> Result<TokenManager> {
    Ok(TokenManager::new(
        reqwest::Client::new(),
        format!("{}/token", server.uri()),
        credentials(),
        EnvFileStore::new(env_path),
        Duration::seconds(300),
    )?)
}

fn graph_client(server: &MockServer, env_path: &Path) -> Result<GraphClient> {
    let tokens = token_manager(server, env_path)?;
    Ok(GraphClient::new(
        reqwest::Client::new(),
        format!("{}/v1.0", server.uri()),
        tokens,
    ))
}

fn january() -> DateRange {
    DateRange::new(
        NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid start"),
        NaiveDate::from_ymd_opt(2025, 1, 31).expect("valid end"),
        chrono_tz::America::New_York,
    )
    .expect("build date range")
}

fn graph_message(id: &str, to: &str, received: &str) -> Value {
    json!({
        "id": id,
        "subject": format!("Subject {id}"),
        "from": { "emailAddress": { "name": "Sender", "address": "sender@partner.org" } },
        "toRecipients": [{ "emailAddress": { "name": "To", "address": to } }],
        "ccRecipients": [],
        "receivedDateTime": received,
        "sentDateTime": received,
        "parentFolderId": "inbox-id"
    })
}

fn token_response(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "token_type": "Bearer",
        "expires_in": 3599,
        "access_token": token
    }))
}

async fn mount_inbox_alias(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(INBOX_ALIAS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "inbox-id", "displayName": "Inbox" })),
        )
        .mount(server)
        .await;
}

fn inbox_request(domains: &[&str]) -> RunRequest {
    RunRequest {
        mailboxes: vec![MAILBOX.to_string()],
        folders: vec!["Inbox".to_string()],
        date_range: Some(january()),
        domain_filter: DomainFilter::new(domains.iter().copied(), MatchOn::Recipients),
        ..RunRequest::default()
    }
}

#[tokio::test]
async fn single_mailbox_scan_end_to_end() -> Result<()> {
    let root = temp_root();
    let env_path = seed_env(&root, &fresh_cache("cached-token"));
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(token_response("unused"))
        .expect(0)
        .mount(&server)
        .await;
    mount_inbox_alias(&server).await;
    Mock::given(method("GET"))
        .and(path(INBOX_MESSAGES_PATH))
        .and(query_param("$orderby", "receivedDateTime asc"))
        .and(query_param(
            "$filter",
            "receivedDateTime ge 2025-01-01T05:00:00Z and receivedDateTime le 2025-02-01T04:59:59Z",
        ))
        .and(header("authorization", "Bearer cached-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                graph_message("m1", "x@acme.com", "2025-01-10T15:00:00Z"),
                graph_message("m2", "y@other.com", "2025-01-11T15:00:00Z")
            ],
            "@odata.nextLink": format!("{}{INBOX_MESSAGES_PATH}?page=2", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(INBOX_MESSAGES_PATH))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [graph_message("m3", "z@other.org", "2025-01-12T15:00:00Z")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = graph_client(&server, &env_path)?;
    let report = pipeline::run(&mut client, &inbox_request(&["acme.com"])).await?;

    assert_eq!(report.messages.len(), 1);
    let message = &report.messages[0];
    assert_eq!(message.id.as_deref(), Some("m1"));
    assert_eq!(message.mailbox, MAILBOX);
    assert_eq!(message.folder, "Inbox");
    assert_eq!(message.parent_folder.as_deref(), Some("Inbox"));
    assert!(report.skipped_folders.is_empty());
    assert!(report.failed_folders.is_empty());

    let options = RenderOptions::default();
    let table = output::format_messages(OutputFormat::Table, &report.messages, &options)?;
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[2].starts_with("1  a "));
    assert!(lines[2].contains("2025-01-10 10:00"));
    assert_eq!(lines[3], "1 message(s)");

    let out_dir = root.join("out");
    let written = output::write_output_files(
        &out_dir,
        &report.messages,
        &options,
        OutputFiles {
            csv: true,
            json: false,
        },
    )?;
    assert_eq!(written, vec![out_dir.join("messages.csv")]);
    let csv = std::fs::read_to_string(out_dir.join("messages.csv"))?;
    assert_eq!(csv.lines().count(), 2);
    assert!(csv.contains("2025-01-10T15:00:00Z"));

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[tokio::test]
async fn unauthorized_response_refreshes_token_once_and_retries() -> Result<()> {
    let root = temp_root();
    let env_path = seed_env(&root, &fresh_cache("stale-token"));
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(token_response("fresh-token"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer stale-token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token revoked"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(INBOX_ALIAS_PATH))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "inbox-id", "displayName": "Inbox" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(INBOX_MESSAGES_PATH))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [graph_message("m1", "x@acme.com", "2025-01-10T15:00:00Z")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = graph_client(&server, &env_path)?;
    let report = pipeline::run(&mut client, &inbox_request(&["acme.com"])).await?;
    assert_eq!(report.messages.len(), 1);

    let cache = std::fs::read_to_string(&env_path)?;
    assert!(cache.starts_with("TENANT_ID=tenant\n"));
    assert!(cache.contains("ACCESS_TOKEN=fresh-token\n"));
    assert_eq!(cache.matches("ACCESS_TOKEN=").count(), 1);

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[tokio::test]
async fn second_unauthorized_response_fails_only_that_folder() -> Result<()> {
    let root = temp_root();
    let env_path = seed_env(&root, &fresh_cache("cached-token"));
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(token_response("also-rejected"))
        .expect(1)
        .mount(&server)
        .await;
    mount_inbox_alias(&server).await;
    Mock::given(method("GET"))
        .and(path(INBOX_MESSAGES_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let mut client = graph_client(&server, &env_path)?;
    let report = pipeline::run(&mut client, &inbox_request(&[])).await?;
    assert!(report.messages.is_empty());
    assert_eq!(report.failed_folders.len(), 1);
    assert!(report.failed_folders[0].reason.contains("unauthorized"));

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[tokio::test]
async fn throttled_page_is_retried_after_retry_after() -> Result<()> {
    let root = temp_root();
    let env_path = seed_env(&root, &fresh_cache("cached-token"));
    let server = MockServer::start().await;

    mount_inbox_alias(&server).await;
    Mock::given(method("GET"))
        .and(path(INBOX_MESSAGES_PATH))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "0")
                .set_body_string("slow down"),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(INBOX_MESSAGES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [graph_message("m1", "x@acme.com", "2025-01-10T15:00:00Z")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = graph_client(&server, &env_path)?;
    let report = pipeline::run(&mut client, &inbox_request(&["acme.com"])).await?;
    assert_eq!(report.messages.len(), 1);
    assert!(report.failed_folders.is_empty());

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[tokio::test]
async fn fresh_cached_token_makes_no_token_request() -> Result<()> {
    let root = temp_root();
    let env_path = seed_env(&root, &fresh_cache("cached-token"));
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(token_response("unused"))
        .expect(0)
        .mount(&server)
        .await;

    let mut tokens = token_manager(&server, &env_path)?;
    assert_eq!(tokens.access_token().await?, "cached-token");
    assert_eq!(tokens.access_token().await?, "cached-token");
    assert!(tokens.status().expect("status").fresh);

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[tokio::test]
async fn stale_cached_token_is_replaced_with_one_request() -> Result<()> {
    let root = temp_root();
    let issued = (Utc::now() - Duration::minutes(56)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let env_path = seed_env(
        &root,
        &format!(
            "# mail scanner\nTENANT_ID=tenant\nACCESS_TOKEN=old-token\nTOKEN_GENERATED_AT={issued}\nOTHER=keep\n"
        ),
    );
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("client_id=client"))
        .respond_with(token_response("new-token"))
        .expect(1)
        .mount(&server)
        .await;

    let mut tokens = token_manager(&server, &env_path)?;
    assert_eq!(tokens.access_token().await?, "new-token");
    assert_eq!(tokens.access_token().await?, "new-token");

    let cache = std::fs::read_to_string(&env_path)?;
    let lines: Vec<&str> = cache.lines().collect();
    assert_eq!(lines[0], "# mail scanner");
    assert_eq!(lines[1], "TENANT_ID=tenant");
    assert_eq!(lines[2], "ACCESS_TOKEN=new-token");
    assert!(lines[3].starts_with("TOKEN_GENERATED_AT="));
    assert_ne!(lines[3], format!("TOKEN_GENERATED_AT={issued}"));
    assert!(!lines[3].ends_with('Z'));
    assert_eq!(lines[4], "OTHER=keep");
    assert!(lines[5].starts_with("TOKEN_TIMESTAMP="));
    assert_eq!(lines.len(), 6);

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[tokio::test]
async fn rejected_token_request_aborts_the_run() -> Result<()> {
    let root = temp_root();
    let env_path = seed_env(&root, "TENANT_ID=tenant\n");
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("{\"error\":\"invalid_client\"}"))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = graph_client(&server, &env_path)?;
    match pipeline::run(&mut client, &inbox_request(&[])).await {
        Err(AuthError::Rejected { status, body }) => {
            assert_eq!(status.as_u16(), 400);
            assert!(body.contains("invalid_client"));
        }
        other => panic!("expected rejected token request, got {other:?}"),
    }

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[tokio::test]
async fn pagination_issues_one_request_per_page() -> Result<()> {
    let root = temp_root();
    let env_path = seed_env(&root, &fresh_cache("cached-token"));
    let server = MockServer::start().await;

    for page in 1..=3 {
        let next = (page < 3).then(|| {
            format!("{}{INBOX_MESSAGES_PATH}?page={}", server.uri(), page + 1)
        });
        let matcher = if page == 1 {
            query_param("$top", "2")
        } else {
            query_param("page", page.to_string())
        };
        Mock::given(method("GET"))
            .and(path(INBOX_MESSAGES_PATH))
            .and(matcher)
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    graph_message(&format!("p{page}a"), "x@acme.com", &format!("2025-01-{:02}T12:00:00Z", 20 - page)),
                    graph_message(&format!("p{page}b"), "x@acme.com", &format!("2025-01-{:02}T13:00:00Z", 20 - page))
                ],
                "@odata.nextLink": next
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let mut client = graph_client(&server, &env_path)?;
    let folder = Folder {
        id: "inbox-id".to_string(),
        display_name: "Inbox".to_string(),
    };
    let domains = DomainFilter::default();
    let criteria = FetchCriteria {
        mailbox: MAILBOX,
        folder: &folder,
        folder_label: "Inbox",
        date_range: None,
        domain_filter: &domains,
        timestamp_field: TimestampField::Received,
        limits: FetchLimits {
            page_size: 2,
            ..FetchLimits::default()
        },
    };
    let messages = Strategy::Filter.fetch(&mut client, &criteria).await?;

    let ids: Vec<&str> = messages.iter().filter_map(|m| m.id.as_deref()).collect();
    assert_eq!(ids, vec!["p3a", "p3b", "p2a", "p2b", "p1a", "p1b"]);
    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 3);

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[tokio::test]
async fn ceilings_stop_pagination() -> Result<()> {
    let root = temp_root();
    let env_path = seed_env(&root, &fresh_cache("cached-token"));
    let server = MockServer::start().await;

    for page in 1..=3 {
        let matcher = if page == 1 {
            query_param("$top", "2")
        } else {
            query_param("page", page.to_string())
        };
        Mock::given(method("GET"))
            .and(path(INBOX_MESSAGES_PATH))
            .and(matcher)
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    graph_message(&format!("p{page}a"), "x@acme.com", "2025-01-10T12:00:00Z"),
                    graph_message(&format!("p{page}b"), "x@acme.com", "2025-01-10T13:00:00Z")
                ],
                "@odata.nextLink": format!("{}{INBOX_MESSAGES_PATH}?page={}", server.uri(), page + 1)
            })))
            .mount(&server)
            .await;
    }

    let mut client = graph_client(&server, &env_path)?;
    let folder = Folder {
        id: "inbox-id".to_string(),
        display_name: "Inbox".to_string(),
    };
    let domains = DomainFilter::default();
    let mut criteria = FetchCriteria {
        mailbox: MAILBOX,
        folder: &folder,
        folder_label: "Inbox",
        date_range: None,
        domain_filter: &domains,
        timestamp_field: TimestampField::Received,
        limits: FetchLimits {
            page_size: 2,
            max_pages: 2,
            max_per_folder: None,
        },
    };
    let messages = Strategy::Filter.fetch(&mut client, &criteria).await?;
    assert_eq!(messages.len(), 4);
    assert_eq!(
        server.received_requests().await.expect("recording enabled").len(),
        2
    );

    criteria.limits = FetchLimits {
        page_size: 2,
        max_pages: 10,
        max_per_folder: Some(3),
    };
    let messages = Strategy::Filter.fetch(&mut client, &criteria).await?;
    assert_eq!(messages.len(), 3);
    assert_eq!(
        server.received_requests().await.expect("recording enabled").len(),
        4
    );

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[tokio::test]
async fn search_strategy_reapplies_precise_dates() -> Result<()> {
    let root = temp_root();
    let env_path = seed_env(&root, &fresh_cache("cached-token"));
    let server = MockServer::start().await;

    mount_inbox_alias(&server).await;
    Mock::given(method("GET"))
        .and(path(INBOX_MESSAGES_PATH))
        .and(query_param(
            "$search",
            "\"(to:acme.com) AND received:2024-12-31..2025-02-01\"",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                graph_message("late", "x@acme.com", "2025-01-20T12:00:00Z"),
                graph_message("before", "x@acme.com", "2024-12-31T20:00:00Z"),
                graph_message("garbled", "x@acme.com", "sometime in january"),
                graph_message("early", "x@notacme.com", "2025-01-01T05:00:00Z"),
                graph_message("elsewhere", "x@other.com", "2025-01-15T12:00:00Z")
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = graph_client(&server, &env_path)?;
    let request = RunRequest {
        strategy: Strategy::Search,
        ..inbox_request(&["acme.com"])
    };
    let report = pipeline::run(&mut client, &request).await?;

    let ids: Vec<&str> = report
        .messages
        .iter()
        .filter_map(|m| m.id.as_deref())
        .collect();
    assert_eq!(ids, vec!["early", "late"]);

    let requests = server.received_requests().await.expect("recording enabled");
    let search_request = requests
        .iter()
        .find(|request| request.url.path() == INBOX_MESSAGES_PATH)
        .expect("messages request");
    let keys: Vec<String> = search_request
        .url
        .query_pairs()
        .map(|(key, _)| key.into_owned())
        .collect();
    assert!(!keys.iter().any(|key| key == "$filter" || key == "$orderby"));

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[tokio::test]
async fn folder_failures_do_not_abort_the_run() -> Result<()> {
    let root = temp_root();
    let env_path = seed_env(&root, &fresh_cache("cached-token"));
    let server = MockServer::start().await;

    mount_inbox_alias(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users/a@x.com/mailFolders/archive"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "archive-id", "displayName": "Archive" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users/a@x.com/mailFolders/archive-id/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend exploded"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FOLDERS_PATH))
        .and(query_param("$top", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                { "id": "inbox-id", "displayName": "Inbox" },
                { "id": "archive-id", "displayName": "Archive" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(INBOX_MESSAGES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [graph_message("m1", "x@acme.com", "2025-01-10T15:00:00Z")]
        })))
        .mount(&server)
        .await;

    let mut client = graph_client(&server, &env_path)?;
    let request = RunRequest {
        folders: vec![
            "Archive".to_string(),
            "Projects".to_string(),
            "Inbox".to_string(),
        ],
        ..inbox_request(&[])
    };
    let report = pipeline::run(&mut client, &request).await?;

    assert_eq!(report.messages.len(), 1);
    assert_eq!(report.failed_folders.len(), 1);
    assert_eq!(report.failed_folders[0].folder, "Archive");
    assert!(report.failed_folders[0].reason.contains("500"));
    assert_eq!(report.skipped_folders.len(), 1);
    assert_eq!(report.skipped_folders[0].folder, "Projects");

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[tokio::test]
async fn alias_miss_falls_back_to_listing() -> Result<()> {
    let root = temp_root();
    let env_path = seed_env(&root, &fresh_cache("cached-token"));
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/users/a@x.com/mailFolders/archive"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FOLDERS_PATH))
        .and(query_param("$top", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "inbox-id", "displayName": "Inbox" }],
            "@odata.nextLink": format!("{}{FOLDERS_PATH}?page=2", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FOLDERS_PATH))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "custom-archive", "displayName": "ARCHIVE" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = graph_client(&server, &env_path)?;
    let mut resolver = FolderResolver::new();
    let folder = resolver
        .resolve(&mut client, MAILBOX, "archive")
        .await?
        .expect("archive folder");
    assert_eq!(folder.id, "custom-archive");

    // Cached: no further requests.
    let again = resolver.resolve(&mut client, MAILBOX, "Archive").await?;
    assert_eq!(again, Some(folder));
    assert_eq!(
        resolver
            .display_name(&mut client, MAILBOX, "inbox-id")
            .await?,
        "Inbox"
    );

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[tokio::test]
async fn unknown_parent_folder_ids_are_resolved_once() -> Result<()> {
    let root = temp_root();
    let env_path = seed_env(&root, &fresh_cache("cached-token"));
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/users/a@x.com/mailFolders/sub-id"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "sub-id", "displayName": "Clients" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users/a@x.com/mailFolders/gone-id"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = graph_client(&server, &env_path)?;
    let mut resolver = FolderResolver::new();
    for _ in 0..2 {
        assert_eq!(
            resolver.display_name(&mut client, MAILBOX, "sub-id").await?,
            "Clients"
        );
        assert_eq!(
            resolver.display_name(&mut client, MAILBOX, "gone-id").await?,
            "gone-id"
        );
    }

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}
