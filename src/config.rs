use crate::error::{AppError, Result};

pub const OAUTH_URL: &str = "https://{region}.battle.net";
pub const API_URL: &str = "https://{region}.api.blizzard.com";

/// Realms polled when REALMS is not set.
pub const DEFAULT_REALMS: &str =
    "eu:ragnaros,eu:argent-dawn,eu:twisting-nether,eu:aegwynn,eu:aerie-peak,eu:agamaggan,eu:aggramar";

/// Target wall-clock duration of one full poll round (seconds).
pub const POLL_INTERVAL_SECS: u64 = 60;

/// Rows bound into a single INSERT per persistence round-trip. The widest
/// row (a listing with its variant lookup) binds 14 parameters, so a full
/// chunk needs the host-parameter limit raised past SQLite's default 32766.
/// `.cargo/config.toml` builds the bundled SQLite with a limit of 250000.
pub const BATCH_CHUNK_SIZE: usize = 5000;

/// Timeout applied to every upstream HTTP call (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// How long a writer waits on a locked SQLite database before failing.
pub const DB_BUSY_TIMEOUT_SECS: u64 = 30;

pub const MAX_CONCURRENT_SHARDS: usize = 16;

/// Base URLs for the token authority and the data API. `{region}` is
/// substituted per request; a base without the placeholder is used verbatim.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub oauth_base: String,
    pub api_base: String,
}

impl Endpoints {
    pub fn oauth_url(&self, region: &str) -> String {
        self.oauth_base.replace("{region}", region)
    }

    pub fn api_url(&self, region: &str) -> String {
        self.api_base.replace("{region}", region)
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            oauth_base: OAUTH_URL.to_string(),
            api_base: API_URL.to_string(),
        }
    }
}

/// One configured realm to poll, e.g. `eu:ragnaros`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmRef {
    pub region: String,
    pub slug: String,
}

impl RealmRef {
    pub fn parse(s: &str) -> Result<Self> {
        let (region, slug) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| AppError::Config(format!("realm '{s}' must be region:slug")))?;
        let (region, slug) = (region.trim(), slug.trim());
        if region.is_empty() || slug.is_empty() {
            return Err(AppError::Config(format!("realm '{s}' must be region:slug")));
        }
        Ok(Self {
            region: region.to_lowercase(),
            slug: slug.to_lowercase(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    /// Region of the OAuth authority used for token exchange and validation (BLIZZARD_OAUTH_REGION)
    pub oauth_region: String,
    pub endpoints: Endpoints,
    pub locale: String,
    pub realms: Vec<RealmRef>,
    pub db_path: String,
    pub log_level: String,
    pub api_port: u16,
    pub poll_interval_secs: u64,
    pub batch_chunk_size: usize,
    pub max_concurrent_shards: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let realms = std::env::var("REALMS")
            .unwrap_or_else(|_| DEFAULT_REALMS.to_string())
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(RealmRef::parse)
            .collect::<Result<Vec<_>>>()?;

        let batch_chunk_size = parse_var("BATCH_CHUNK_SIZE", BATCH_CHUNK_SIZE)?;
        if batch_chunk_size == 0 {
            return Err(AppError::Config("BATCH_CHUNK_SIZE must be at least 1".to_string()));
        }

        Ok(Self {
            client_id: required_var("BLIZZARD_CLIENT_ID")?,
            client_secret: required_var("BLIZZARD_CLIENT_SECRET")?,
            oauth_region: std::env::var("BLIZZARD_OAUTH_REGION").unwrap_or_else(|_| "eu".to_string()),
            endpoints: Endpoints {
                oauth_base: std::env::var("BLIZZARD_OAUTH_URL")
                    .unwrap_or_else(|_| OAUTH_URL.to_string()),
                api_base: std::env::var("BLIZZARD_API_URL").unwrap_or_else(|_| API_URL.to_string()),
            },
            locale: std::env::var("LOCALE").unwrap_or_else(|_| "en_GB".to_string()),
            realms,
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "goblineer.db".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: parse_var("API_PORT", 3000u16)?,
            poll_interval_secs: parse_var("POLL_INTERVAL_SECS", POLL_INTERVAL_SECS)?,
            batch_chunk_size,
            max_concurrent_shards: parse_var("MAX_CONCURRENT_SHARDS", MAX_CONCURRENT_SHARDS)?.max(1),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Config(format!("{name} must be set")))
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}
