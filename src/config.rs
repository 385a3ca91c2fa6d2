//! Configuration surface (§6) plus the ambient pieces (§10.3): log level and
//! HTTP bind host. Loaded once at startup from the environment, with an
//! optional `.env` file picked up via `dotenvy`.

use std::env;
use std::fs;

use dotenvy::dotenv;
use serde::Deserialize;

use crate::domain::plan::IntervalOverrides;
use crate::error::{BrokerError, Result};

#[derive(Debug, Clone)]
pub struct RedisTarget {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub backoff_ms: u64,
    pub max_wait_ms: u64,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub mongodb_uri: String,
    pub mongodb_db_name: String,
    pub redis: RedisTarget,
    pub queue: QueueConfig,
    pub interval_overrides: IntervalOverrides,
    pub key_preload: Vec<(String, String)>,
    /// Set only when the preload source was a file path — the reconciler
    /// watches this path for live re-sync.
    pub watched_key_file: Option<std::path::PathBuf>,
    pub log_filter: String,
}

#[derive(Debug, Deserialize)]
struct PreloadKeyEntry {
    #[serde(alias = "subscriptionId")]
    id: String,
    plan: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let mongodb_uri = env::var("MONGODB_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let mongodb_db_name =
            env::var("MONGODB_DB_NAME").unwrap_or_else(|_| "mailtester".to_string());

        let redis = redis_target_from_env();

        let queue = QueueConfig {
            concurrency: env_parse("KEY_QUEUE_CONCURRENCY", 5),
            backoff_ms: env_parse("KEY_QUEUE_BACKOFF_MS", 1000),
            max_wait_ms: env_parse("KEY_QUEUE_MAX_WAIT_MS", 0),
            request_timeout_ms: env_parse("KEY_QUEUE_REQUEST_TIMEOUT_MS", 0),
        };

        let interval_overrides = IntervalOverrides {
            pro_interval_ms: env::var("MAILTESTER_PRO_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok()),
            ultimate_interval_ms: env::var("MAILTESTER_ULTIMATE_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok()),
        };

        let (key_preload, watched_key_file) = load_key_preload()?;

        let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| "keybroker=info,tower_http=info".into());

        Ok(Self {
            host,
            port,
            mongodb_uri,
            mongodb_db_name,
            redis,
            queue,
            interval_overrides,
            key_preload,
            watched_key_file,
            log_filter,
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn redis_target_from_env() -> RedisTarget {
    if let Ok(url) = env::var("REDIS_URL") {
        return RedisTarget { url };
    }

    let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
    let url = match env::var("REDIS_PASSWORD") {
        Ok(password) if !password.is_empty() => format!("redis://:{password}@{host}:{port}"),
        _ => format!("redis://{host}:{port}"),
    };
    RedisTarget { url }
}

/// First non-empty source wins, checked in the order named in §6. No
/// merging across sources — a later source is never consulted once an
/// earlier one yields anything.
fn load_key_preload() -> Result<(Vec<(String, String)>, Option<std::path::PathBuf>)> {
    if let Ok(raw) = env::var("MAILTESTER_KEYS_JSON") {
        if !raw.trim().is_empty() {
            return Ok((parse_keys_json(&raw)?, None));
        }
    }

    if let Ok(path) = env::var("MAILTESTER_KEYS_JSON_PATH") {
        if !path.trim().is_empty() {
            let raw = fs::read_to_string(&path).map_err(|e| {
                BrokerError::InvalidArgument(format!(
                    "could not read MAILTESTER_KEYS_JSON_PATH {path}: {e}"
                ))
            })?;
            return Ok((parse_keys_json(&raw)?, Some(std::path::PathBuf::from(path))));
        }
    }

    if let Ok(raw) = env::var("MAILTESTER_KEYS_WITH_PLAN") {
        if !raw.trim().is_empty() {
            return Ok((parse_keys_with_plan(&raw), None));
        }
    }

    if let Ok(raw) = env::var("MAILTESTER_KEYS") {
        if !raw.trim().is_empty() {
            let default_plan =
                env::var("MAILTESTER_DEFAULT_PLAN").unwrap_or_else(|_| "ultimate".to_string());
            let pairs = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|id| (id.to_string(), default_plan.clone()))
                .collect();
            return Ok((pairs, None));
        }
    }

    Ok((Vec::new(), None))
}

fn parse_keys_json(raw: &str) -> Result<Vec<(String, String)>> {
    let entries: Vec<PreloadKeyEntry> = serde_json::from_str(raw)
        .map_err(|e| BrokerError::InvalidArgument(format!("invalid key preload JSON: {e}")))?;
    Ok(entries.into_iter().map(|e| (e.id, e.plan)).collect())
}

fn parse_keys_with_plan(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|pair| {
            let (id, plan) = pair.split_once(':')?;
            Some((id.trim().to_string(), plan.trim().to_string()))
        })
        .collect()
}
