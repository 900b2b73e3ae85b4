use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    errors::Error,
    limits::{DEFAULT_MAX_DOWNLOAD, DEFAULT_MAX_UPLOAD},
    Result,
};

/// Typed configuration, loaded from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    // Bot API
    pub bot_token: String,
    /// Empty means everyone may use the bot.
    pub allowed_users: Vec<i64>,

    // User session (MTProto)
    pub api_id: i32,
    pub api_hash: String,
    pub session_string: String,

    // Files
    pub download_dir: PathBuf,
    pub log_file: PathBuf,

    // Dedup
    pub dedup_ttl: Duration,
    pub dedup_max_entries: usize,

    // Transfers
    pub retry_downloads: u32,
    pub max_download_size: u64,
    pub max_upload_size: u64,
    pub progress_interval: Duration,

    // Batches / cancellation
    pub batch_item_delay: Duration,
    pub killall_grace: Duration,
    /// How long in-flight downloads get to clean up on SIGINT/SIGTERM.
    pub shutdown_grace: Duration,

    pub debug_updates: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let str_of = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let num_of = |key: &str| str_of(key).and_then(|v| v.parse::<u64>().ok());

        let bot_token = str_of("BOT_TOKEN")
            .or_else(|| str_of("TELEGRAM_BOT_TOKEN"))
            .ok_or_else(|| Error::Config("BOT_TOKEN environment variable is required".to_string()))?;

        let api_id = str_of("API_ID")
            .ok_or_else(|| Error::Config("API_ID environment variable is required".to_string()))?
            .parse::<i32>()
            .map_err(|_| Error::Config("API_ID must be an integer".to_string()))?;
        let api_hash = str_of("API_HASH")
            .ok_or_else(|| Error::Config("API_HASH environment variable is required".to_string()))?;

        // Tolerate quoting left over from copy-paste.
        let session_string = str_of("SESSION_STRING")
            .map(|s| s.trim_matches(|c| c == '"' || c == '\'').to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::Config("SESSION_STRING environment variable is required".to_string())
            })?;

        let allowed_users = parse_csv_i64(str_of("ALLOWED_USERS"));

        Ok(Self {
            bot_token,
            allowed_users,
            api_id,
            api_hash,
            session_string,
            download_dir: PathBuf::from(str_of("DOWNLOAD_DIR").unwrap_or("downloads".to_string())),
            log_file: PathBuf::from(str_of("LOG_FILE").unwrap_or("logs.txt".to_string())),
            dedup_ttl: Duration::from_secs(num_of("DOWNLOAD_DEDUP_TTL").unwrap_or(900)),
            dedup_max_entries: num_of("DEDUP_MAX_ENTRIES").unwrap_or(200) as usize,
            retry_downloads: num_of("RETRY_DOWNLOADS").unwrap_or(2).min(10) as u32,
            max_download_size: num_of("MAX_DOWNLOAD_SIZE").unwrap_or(DEFAULT_MAX_DOWNLOAD),
            max_upload_size: num_of("MAX_UPLOAD_SIZE").unwrap_or(DEFAULT_MAX_UPLOAD),
            progress_interval: Duration::from_millis(
                num_of("PROGRESS_INTERVAL_MS").unwrap_or(3000).max(500),
            ),
            batch_item_delay: Duration::from_millis(num_of("BATCH_ITEM_DELAY_MS").unwrap_or(3000)),
            killall_grace: Duration::from_millis(num_of("KILLALL_GRACE_MS").unwrap_or(1000)),
            shutdown_grace: Duration::from_millis(num_of("SHUTDOWN_GRACE_MS").unwrap_or(5000)),
            debug_updates: str_of("DEBUG_UPDATES").is_some_and(|v| is_truthy(&v)),
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn is_truthy(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}
