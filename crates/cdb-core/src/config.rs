use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for the bridge, loaded from the environment
/// (with optional `.env` pickup for local runs).
#[derive(Clone, Debug)]
pub struct Config {
    // ContentAPI
    pub contentapi_domain: String,
    pub contentapi_token: String,

    // Discord
    pub discord_token: String,

    // Markup translation service
    pub markup_service_domain: String,

    // Persistence
    pub db_file: PathBuf,

    // Live connection tuning
    pub ping_interval: Duration,
    pub reconnect_delay: Duration,

    // Relay behavior
    pub avatar_size: u32,
    pub attachment_size_limit: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let contentapi_domain = require_env("CONTENTAPI_DOMAIN")?;
        let contentapi_token = require_env("CONTENTAPI_TOKEN")?;
        let discord_token = require_env("DISCORD_TOKEN")?;
        let markup_service_domain = require_env("MARKUP_SERVICE_DOMAIN")?;

        let db_file = env_path("DB_FILE").unwrap_or_else(|| PathBuf::from("bridge.db"));

        let ping_interval = Duration::from_secs(env_u64("BRIDGE_PING_INTERVAL_SECS").unwrap_or(30));
        let reconnect_delay =
            Duration::from_secs(env_u64("BRIDGE_RECONNECT_DELAY_SECS").unwrap_or(15));

        let avatar_size = env_u32("BRIDGE_AVATAR_SIZE").unwrap_or(100);
        // 25 MB, the rehosting cutoff for attachments.
        let attachment_size_limit = env_u64("BRIDGE_ATTACHMENT_SIZE_LIMIT").unwrap_or(25_000_000);

        Ok(Self {
            contentapi_domain,
            contentapi_token,
            discord_token,
            markup_service_domain,
            db_file,
            ping_interval,
            reconnect_delay,
            avatar_size,
            attachment_size_limit,
        })
    }

    /// Connection string for the cross-reference store, creating the
    /// database file on first run.
    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_file.display())
    }
}

fn require_env(key: &str) -> Result<String> {
    env_str(key)
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
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
