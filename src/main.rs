use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Filter,
    Search,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MatchOnArg {
    Recipients,
    Sender,
    Any,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TimestampFieldArg {
    Received,
    Sent,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Earliest,
    Latest,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Table,
    Csv,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "mailscan",
    version,
    about = "Scan Microsoft 365 mailboxes for mail exchanged with given domains"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Run configuration file (TOML)
    #[arg(long, global = true, env = "MAILSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Credentials and token cache file
    #[arg(long, global = true, env = "MAILSCAN_ENV_FILE")]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, filter and report messages
    Run(RunArgs),
    /// List the folders of each mailbox
    Folders(FoldersArgs),
    /// Obtain (or reuse) an access token and show its lifetime
    Token,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Mailbox to scan (repeatable)
    #[arg(long = "user")]
    users: Vec<String>,
    /// Folder name or well-known alias (repeatable)
    #[arg(long = "folder")]
    folders: Vec<String>,
    /// Domain or address substring to match (repeatable)
    #[arg(long = "domain")]
    domains: Vec<String>,
    /// First day, YYYY-MM-DD
    #[arg(long)]
    since: Option<String>,
    /// Last day, YYYY-MM-DD
    #[arg(long)]
    until: Option<String>,
    /// IANA time zone for the date range and displayed times
    #[arg(long)]
    timezone: Option<String>,
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
    #[arg(long, value_enum)]
    match_on: Option<MatchOnArg>,
    #[arg(long, value_enum)]
    timestamp_field: Option<TimestampFieldArg>,
    /// Page size
    #[arg(long)]
    top: Option<u32>,
    #[arg(long)]
    max_pages: Option<u32>,
    /// Per-folder message ceiling, 0 for unlimited
    #[arg(long)]
    max_per_folder: Option<usize>,
    #[arg(long)]
    org_domain: Option<String>,
    /// Keep only messages with a recipient outside the organisation domain
    #[arg(long, default_value_t = false)]
    external_only: bool,
    /// Include the CC column in table output
    #[arg(long, default_value_t = false)]
    show_cc: bool,
    /// Report order (oldest or newest first)
    #[arg(long, value_enum)]
    sort: Option<SortArg>,
    /// Most messages to report after sorting, 0 for all
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long, value_enum, default_value = "table")]
    format: FormatArg,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Also write messages.json
    #[arg(long, default_value_t = false)]
    json_file: bool,
    /// Write no files, only print
    #[arg(long, default_value_t = false)]
    no_files: bool,
}

#[derive(Debug, Args)]
struct FoldersArgs {
    #[arg(long = "user")]
    users: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mailscan=info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use std::path::{Path, PathBuf};

    use anyhow::{Context, Result};
    use chrono::{Duration, Local, SecondsFormat};
    use clap::error::ErrorKind;
    use clap::CommandFactory;
    use tracing::{info, warn};

    use mailscan::config::{FileConfig, Overrides};
    use mailscan::filters::MatchOn;
    use mailscan::graph::{
        Credentials, FolderResolver, GraphClient, GraphEndpoints, Strategy, TokenManager,
    };
    use mailscan::models::TimestampField;
    use mailscan::output::{self, OutputFormat, RenderOptions, SortOrder};
    use mailscan::pipeline;
    use mailscan::store::EnvFileStore;

    use super::{
        Cli, Commands, FormatArg, FoldersArgs, MatchOnArg, RunArgs, SortArg, StrategyArg,
        TimestampFieldArg,
    };

    pub async fn dispatch(cli: Cli) -> Result<()> {
        let config = load_config(cli.config.as_deref())?;
        match cli.command {
            Commands::Run(args) => handle_run(config, args, cli.env_file).await,
            Commands::Folders(args) => handle_folders(config, args, cli.env_file).await,
            Commands::Token => handle_token(config, cli.env_file).await,
        }
    }

    fn load_config(path: Option<&Path>) -> Result<FileConfig> {
        match path {
            Some(path) => FileConfig::load(path)
                .with_context(|| format!("load config {}", path.display())),
            None => match FileConfig::default_path() {
                Some(path) => FileConfig::load_or_default(&path)
                    .with_context(|| format!("load config {}", path.display())),
                None => Ok(FileConfig::default()),
            },
        }
    }

    fn missing_mailboxes() -> ! {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "no mailbox given: pass --user or set [mailbox] users in the config file",
            )
            .exit()
    }

    fn token_manager(env_file: &Path, refresh_margin: Duration) -> Result<(TokenManager, String)> {
        let store = EnvFileStore::new(env_file);
        let credentials = Credentials::resolve(&store)
            .with_context(|| format!("resolve credentials from {}", env_file.display()))?;
        let endpoints = GraphEndpoints::from_env(&credentials.tenant_id);
        let tokens = TokenManager::new(
            reqwest::Client::new(),
            endpoints.token_url,
            credentials,
            store,
            refresh_margin,
        )?;
        Ok((tokens, endpoints.api_base))
    }

    fn graph_client(env_file: &Path, refresh_margin: Duration) -> Result<GraphClient> {
        let (tokens, api_base) = token_manager(env_file, refresh_margin)?;
        Ok(GraphClient::new(reqwest::Client::new(), api_base, tokens))
    }

    async fn handle_run(config: FileConfig, args: RunArgs, env_file: Option<PathBuf>) -> Result<()> {
        let format = map_format(args.format);
        let show_cc = args.show_cc;
        let overrides = Overrides {
            users: args.users,
            folders: args.folders,
            domains: args.domains,
            since: args.since,
            until: args.until,
            timezone: args.timezone,
            strategy: args.strategy.map(map_strategy),
            match_on: args.match_on.map(map_match_on),
            timestamp_field: args.timestamp_field.map(map_timestamp_field),
            top: args.top,
            max_pages: args.max_pages,
            max_per_folder: args.max_per_folder,
            org_domain: args.org_domain,
            external_only: args.external_only,
            output_dir: args.output_dir,
            json_file: args.json_file,
            no_files: args.no_files,
            sort: args.sort.map(map_sort),
            limit: args.limit,
            env_file,
        };
        let settings = config.resolve(overrides, Local::now().date_naive())?;
        if settings.request.mailboxes.is_empty() {
            missing_mailboxes();
        }

        let request = &settings.request;
        if let Some(range) = &request.date_range {
            info!(
                "scanning {} mailbox(es), {} folder(s), {} to {} ({}, {} strategy)",
                request.mailboxes.len(),
                request.folders.len(),
                range.first_day,
                range.last_day,
                settings.timezone,
                request.strategy
            );
        }

        let mut client = graph_client(&settings.env_file, settings.refresh_margin)?;
        let report = pipeline::run(&mut client, request)
            .await
            .context("authentication failed; run aborted")?;

        let messages = settings.sort.arrange(report.messages, settings.limit);
        let options = RenderOptions {
            org_domain: request.org_domain.clone(),
            timezone: settings.timezone,
            show_cc,
        };
        let formatted = output::format_messages(format, &messages, &options)?;
        println!("{formatted}");

        let written = output::write_output_files(
            &settings.output_dir,
            &messages,
            &options,
            settings.files,
        )?;
        for path in written {
            info!("wrote {}", path.display());
        }

        for skipped in &report.skipped_folders {
            warn!("skipped {}/{}: {}", skipped.mailbox, skipped.folder, skipped.reason);
        }
        if !report.failed_folders.is_empty() {
            warn!(
                "{} folder(s) failed; their messages are missing from the report",
                report.failed_folders.len()
            );
        }
        Ok(())
    }

    async fn handle_folders(
        config: FileConfig,
        args: FoldersArgs,
        env_file: Option<PathBuf>,
    ) -> Result<()> {
        let refresh_margin = config.refresh_margin()?;
        let env_file = config.env_file_path(env_file);
        let requested = if args.users.is_empty() {
            config.mailbox.users
        } else {
            args.users
        };
        let mailboxes: Vec<String> = requested
            .into_iter()
            .map(|user| user.trim().to_string())
            .filter(|user| !user.is_empty())
            .collect();
        if mailboxes.is_empty() {
            missing_mailboxes();
        }

        let mut client = graph_client(&env_file, refresh_margin)?;
        let mut resolver = FolderResolver::new();
        for mailbox in &mailboxes {
            let folders = resolver
                .list_folders(&mut client, mailbox)
                .await
                .with_context(|| format!("list folders for {mailbox}"))?;
            println!("{mailbox}");
            if folders.is_empty() {
                println!("  (no folders)");
            }
            for folder in folders {
                println!("  {}  {}", folder.display_name, folder.id);
            }
        }
        Ok(())
    }

    async fn handle_token(config: FileConfig, env_file: Option<PathBuf>) -> Result<()> {
        let refresh_margin = config.refresh_margin()?;
        let env_file = config.env_file_path(env_file);
        let (mut tokens, _) = token_manager(&env_file, refresh_margin)?;
        tokens.access_token().await?;

        match tokens.status() {
            Some(status) => {
                println!(
                    "Token issued at {}",
                    status.issued_at.to_rfc3339_opts(SecondsFormat::Secs, true)
                );
                println!(
                    "Expires at {} ({} min remaining)",
                    status.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                    status.remaining.num_minutes().max(0)
                );
                println!("Cached in {}", env_file.display());
            }
            None => println!("No token available."),
        }
        Ok(())
    }

    fn map_format(format: FormatArg) -> OutputFormat {
        match format {
            FormatArg::Table => OutputFormat::Table,
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Json => OutputFormat::Json,
        }
    }

    fn map_sort(sort: SortArg) -> SortOrder {
        match sort {
            SortArg::Earliest => SortOrder::Earliest,
            SortArg::Latest => SortOrder::Latest,
        }
    }

    fn map_strategy(strategy: StrategyArg) -> Strategy {
        match strategy {
            StrategyArg::Filter => Strategy::Filter,
            StrategyArg::Search => Strategy::Search,
        }
    }

    fn map_match_on(match_on: MatchOnArg) -> MatchOn {
        match match_on {
            MatchOnArg::Recipients => MatchOn::Recipients,
            MatchOnArg::Sender => MatchOn::Sender,
            MatchOnArg::Any => MatchOn::Any,
        }
    }

    fn map_timestamp_field(field: TimestampFieldArg) -> TimestampField {
        match field {
            TimestampFieldArg::Received => TimestampField::Received,
            TimestampFieldArg::Sent => TimestampField::Sent,
        }
    }
}
