use std::path::{Path, PathBuf};

use chrono::{Days, Duration, NaiveDate};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::filters::{normalize_domain_term, DateRange, DomainFilter, MatchOn};
use crate::graph::messages::{DEFAULT_MAX_PAGES, DEFAULT_MAX_PER_FOLDER, DEFAULT_PAGE_SIZE};
use crate::graph::token::{DEFAULT_REFRESH_MARGIN_SECS, TOKEN_LIFETIME_SECS};
use crate::graph::{FetchLimits, Strategy};
use crate::models::TimestampField;
use crate::output::{OutputFiles, SortOrder};
use crate::pipeline::RunRequest;

pub const DEFAULT_TIMEZONE: &str = "America/New_York";
pub const DEFAULT_LOOKBACK_DAYS: u64 = 10;
pub const DEFAULT_ENV_FILE: &str = ".env";
pub const DEFAULT_OUTPUT_DIR: &str = ".";

/// Run configuration file (TOML). Every section and key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub mailbox: MailboxSection,
    pub dates: DatesSection,
    pub folders: FoldersSection,
    pub filter: FilterSection,
    pub messages: MessagesSection,
    pub auth: AuthSection,
    pub output: OutputSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MailboxSection {
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatesSection {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FoldersSection {
    #[serde(default = "default_folders")]
    pub folders: Vec<String>,
}

impl Default for FoldersSection {
    fn default() -> Self {
        Self {
            folders: default_folders(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilterSection {
    pub domains: Vec<String>,
    /// One term per line; `#` comments and blank lines ignored.
    pub domains_file: Option<PathBuf>,
    pub match_on: MatchOn,
    pub org_domain: Option<String>,
    pub require_external: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesSection {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub timestamp_field: TimestampField,
    #[serde(default = "default_top")]
    pub top: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// `0` disables the per-folder ceiling.
    #[serde(default = "default_max_per_folder")]
    pub max_per_folder: usize,
}

impl Default for MessagesSection {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            timestamp_field: TimestampField::default(),
            top: default_top(),
            max_pages: default_max_pages(),
            max_per_folder: default_max_per_folder(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(default)]
    pub env_file: Option<PathBuf>,
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: i64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            env_file: None,
            refresh_margin_secs: default_refresh_margin_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSection {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub json: bool,
    #[serde(default = "default_csv")]
    pub csv: bool,
    #[serde(default)]
    pub sort: SortOrder,
    /// Most messages reported after sorting; `0` reports all.
    #[serde(default)]
    pub limit: usize,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: None,
            json: false,
            csv: default_csv(),
            sort: SortOrder::default(),
            limit: 0,
        }
    }
}

fn default_folders() -> Vec<String> {
    vec!["Inbox".to_string()]
}

fn default_top() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

fn default_max_per_folder() -> usize {
    DEFAULT_MAX_PER_FOLDER
}

fn default_refresh_margin_secs() -> i64 {
    DEFAULT_REFRESH_MARGIN_SECS
}

fn default_csv() -> bool {
    true
}

/// Values given on the command line. `Some`/non-empty wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub users: Vec<String>,
    pub folders: Vec<String>,
    pub domains: Vec<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub timezone: Option<String>,
    pub strategy: Option<Strategy>,
    pub match_on: Option<MatchOn>,
    pub timestamp_field: Option<TimestampField>,
    pub top: Option<u32>,
    pub max_pages: Option<u32>,
    pub max_per_folder: Option<usize>,
    pub org_domain: Option<String>,
    pub external_only: bool,
    pub output_dir: Option<PathBuf>,
    pub json_file: bool,
    pub no_files: bool,
    pub sort: Option<SortOrder>,
    pub limit: Option<usize>,
    pub env_file: Option<PathBuf>,
}

/// Fully merged settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub request: RunRequest,
    pub timezone: Tz,
    pub env_file: PathBuf,
    pub refresh_margin: Duration,
    pub output_dir: PathBuf,
    pub files: OutputFiles,
    pub sort: SortOrder,
    /// `None` reports every message.
    pub limit: Option<usize>,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mailscan").join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// A missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// `--env-file` first, then `[auth] env_file`, then `./.env`.
    pub fn env_file_path(&self, cli: Option<PathBuf>) -> PathBuf {
        cli.or_else(|| self.auth.env_file.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_FILE))
    }

    pub fn refresh_margin(&self) -> Result<Duration, ConfigError> {
        let secs = self.auth.refresh_margin_secs;
        if !(0..TOKEN_LIFETIME_SECS).contains(&secs) {
            return Err(ConfigError::Invalid(format!(
                "refresh_margin_secs must be between 0 and {}, got {secs}",
                TOKEN_LIFETIME_SECS - 1
            )));
        }
        Ok(Duration::seconds(secs))
    }

    /// Merge with command-line values. `today` anchors the default range.
    pub fn resolve(self, overrides: Overrides, today: NaiveDate) -> Result<Settings, ConfigError> {
        let refresh_margin = self.refresh_margin()?;
        let env_file = self.env_file_path(overrides.env_file.clone());

        let timezone_name = overrides
            .timezone
            .or(self.dates.timezone)
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone = parse_timezone(&timezone_name)?;

        let end = match overrides.until.or(self.dates.end_date) {
            Some(value) => parse_date(&value)?,
            None => today,
        };
        let start = match overrides.since.or(self.dates.start_date) {
            Some(value) => parse_date(&value)?,
            None => end
                .checked_sub_days(Days::new(DEFAULT_LOOKBACK_DAYS))
                .unwrap_or(end),
        };
        let date_range = DateRange::new(start, end, timezone)?;

        let mut domains = if overrides.domains.is_empty() {
            self.filter.domains
        } else {
            overrides.domains
        };
        if let Some(path) = &self.filter.domains_file {
            domains.extend(load_domains_file(path)?);
        }
        let match_on = overrides.match_on.unwrap_or(self.filter.match_on);

        let org_domain = overrides
            .org_domain
            .or(self.filter.org_domain)
            .map(|value| normalize_domain_term(&value))
            .filter(|value| !value.is_empty());
        let require_external = overrides.external_only || self.filter.require_external;
        if require_external && org_domain.is_none() {
            return Err(ConfigError::Invalid(
                "external-only filtering needs an organisation domain".to_string(),
            ));
        }

        let mailboxes = non_blank(if overrides.users.is_empty() {
            self.mailbox.users
        } else {
            overrides.users
        });
        let folders = non_blank(if overrides.folders.is_empty() {
            self.folders.folders
        } else {
            overrides.folders
        });
        if folders.is_empty() {
            return Err(ConfigError::Invalid("no folders configured".to_string()));
        }

        let limits = FetchLimits {
            page_size: overrides.top.unwrap_or(self.messages.top).max(1),
            max_pages: overrides.max_pages.unwrap_or(self.messages.max_pages).max(1),
            max_per_folder: FetchLimits::per_folder_from(
                overrides
                    .max_per_folder
                    .unwrap_or(self.messages.max_per_folder),
            ),
        };

        let sort = overrides.sort.unwrap_or(self.output.sort);
        let limit = Some(overrides.limit.unwrap_or(self.output.limit)).filter(|limit| *limit > 0);

        let files = if overrides.no_files {
            OutputFiles {
                csv: false,
                json: false,
            }
        } else {
            OutputFiles {
                csv: self.output.csv,
                json: overrides.json_file || self.output.json,
            }
        };

        Ok(Settings {
            request: RunRequest {
                mailboxes,
                folders,
                date_range: Some(date_range),
                domain_filter: DomainFilter::new(domains, match_on),
                strategy: overrides.strategy.unwrap_or(self.messages.strategy),
                timestamp_field: overrides
                    .timestamp_field
                    .unwrap_or(self.messages.timestamp_field),
                limits,
                org_domain,
                require_external,
            },
            timezone,
            env_file,
            refresh_margin,
            output_dir: overrides
                .output_dir
                .or(self.output.dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            files,
            sort,
            limit,
        })
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| ConfigError::Date {
        value: value.to_string(),
    })
}

pub fn parse_timezone(value: &str) -> Result<Tz, ConfigError> {
    value
        .trim()
        .parse::<Tz>()
        .map_err(|_| ConfigError::TimeZone(value.to_string()))
}

pub fn load_domains_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn non_blank(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}
