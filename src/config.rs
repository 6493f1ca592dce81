use anyhow::{Context, Result, anyhow};
use chrono::Duration;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "claude-sonnet";
pub const DEFAULT_USER: &str = "local";
pub const DEFAULT_PENDING_TTL_MINUTES: i64 = 10;
pub const DEFAULT_MAX_PAGE_CHARS: usize = 30_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub user_id: String,
    pub model: String,
    pub pending_ttl: Duration,
    pub max_page_chars: usize,
}

/// Values given on the command line; each one wins over the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub user_id: Option<String>,
    pub model: Option<String>,
}

impl Config {
    pub fn resolve(overrides: Overrides) -> Result<Self> {
        let data_dir = match overrides.data_dir.or_else(|| env::var_os("EVENTSCOPE_DATA_DIR").map(PathBuf::from)) {
            Some(dir) => dir,
            None => Self::default_data_dir(),
        };

        let user_id = overrides
            .user_id
            .or_else(|| env::var("EVENTSCOPE_USER").ok())
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_USER.to_string());

        let model = overrides
            .model
            .or_else(|| env::var("EVENTSCOPE_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let pending_ttl = match env::var("EVENTSCOPE_PENDING_TTL_MINUTES") {
            Ok(raw) => parse_pending_ttl(&raw).context("Invalid EVENTSCOPE_PENDING_TTL_MINUTES")?,
            Err(_) => Duration::minutes(DEFAULT_PENDING_TTL_MINUTES),
        };

        Ok(Self {
            data_dir,
            user_id,
            model,
            pending_ttl,
            max_page_chars: DEFAULT_MAX_PAGE_CHARS,
        })
    }

    /// Config rooted at an explicit directory with defaults everywhere else.
    #[cfg(test)]
    pub fn in_dir(data_dir: &std::path::Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            user_id: DEFAULT_USER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            pending_ttl: Duration::minutes(DEFAULT_PENDING_TTL_MINUTES),
            max_page_chars: DEFAULT_MAX_PAGE_CHARS,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("eventscope.db")
    }

    fn default_data_dir() -> PathBuf {
        // XDG data directory, or the working directory when there is no home
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "eventscope") {
            proj_dirs.data_dir().to_path_buf()
        } else {
            PathBuf::from(".")
        }
    }
}

/// Pending-marker lifetime in whole minutes; must be positive.
fn parse_pending_ttl(raw: &str) -> Result<Duration> {
    let minutes: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("not a number: {}", raw))?;
    if minutes <= 0 {
        return Err(anyhow!("must be a positive number of minutes, got {}", minutes));
    }
    Duration::try_minutes(minutes).ok_or_else(|| anyhow!("{} minutes is out of range", minutes))
}
