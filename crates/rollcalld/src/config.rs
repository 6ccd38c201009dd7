use rollcall_core::DEFAULT_MATCH_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_LOG_LIMIT: usize = 100;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("ROLLCALL_SECRET_KEY is not set; refusing to start without a QR token secret")]
    MissingSecret,
    #[error("cannot read config file {path}: {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    ParseFile {
        path: String,
        source: toml::de::Error,
    },
    #[error("match threshold must be a positive finite number, got {0}")]
    InvalidThreshold(f32),
}

/// Daemon configuration.
///
/// Resolved once at startup from `ROLLCALL_*` environment variables, layered
/// over an optional TOML file named by `ROLLCALL_CONFIG`.
#[derive(Clone)]
pub struct Config {
    /// Socket address the HTTP API binds to.
    pub listen_addr: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Shared secret for QR token encryption. Never logged.
    pub secret_key: String,
    /// Euclidean distance below which a face scan counts as a match.
    pub match_threshold: f32,
    /// Staff allowed to read scan logs (lower-cased).
    pub admin_emails: Vec<String>,
    /// Maximum number of scan log entries returned.
    pub log_limit: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("listen_addr", &self.listen_addr)
            .field("db_path", &self.db_path)
            .field("secret_key", &"<redacted>")
            .field("match_threshold", &self.match_threshold)
            .field("admin_emails", &self.admin_emails)
            .field("log_limit", &self.log_limit)
            .finish()
    }
}

/// Optional on-disk settings; every field may be overridden from the environment.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    listen_addr: Option<String>,
    db_path: Option<PathBuf>,
    secret_key: Option<String>,
    match_threshold: Option<f32>,
    admin_emails: Option<Vec<String>>,
    log_limit: Option<usize>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let file = match env("ROLLCALL_CONFIG") {
            Some(path) => load_file(Path::new(&path))?,
            None => FileConfig::default(),
        };

        let secret_key = env("ROLLCALL_SECRET_KEY")
            .or(file.secret_key)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSecret)?;

        let db_path = env("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| default_data_dir(&env).join("rollcall.db"));

        let match_threshold = parse_or(&env, "ROLLCALL_MATCH_THRESHOLD")
            .or(file.match_threshold)
            .unwrap_or(DEFAULT_MATCH_THRESHOLD);
        if !match_threshold.is_finite() || match_threshold <= 0.0 {
            return Err(ConfigError::InvalidThreshold(match_threshold));
        }

        let admin_emails = env("ROLLCALL_ADMIN_EMAILS")
            .map(|v| v.split(',').map(str::to_string).collect())
            .or(file.admin_emails)
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        Ok(Self {
            listen_addr: env("ROLLCALL_LISTEN_ADDR")
                .or(file.listen_addr)
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            db_path,
            secret_key,
            match_threshold,
            admin_emails,
            log_limit: parse_or(&env, "ROLLCALL_LOG_LIMIT")
                .or(file.log_limit)
                .unwrap_or(DEFAULT_LOG_LIMIT),
        })
    }
}

fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseFile {
        path: path.display().to_string(),
        source,
    })
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Parse a variable, ignoring values that do not parse.
fn parse_or<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable config value");
            None
        }
    }
}
