#![forbid(unsafe_code)]

//! Runtime configuration: environment variables, with an optional
//! `.env`-style file read at startup and CLI overrides for the settings an
//! operator most commonly wants to override without touching the
//! environment.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_CATALOG_DB: &str = "catalog.sqlite";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_TMDB_RPS: u32 = 47;
pub const DEFAULT_TMDB_RPS_FOREGROUND: u32 = 7;
pub const DEFAULT_BACKFILL_WORKERS: usize = 8;
pub const DEFAULT_BACKFILL_QUEUE_LIMIT: usize = 2000;
pub const DEFAULT_BACKFILL_TTL_SECS: u64 = 600;
pub const DEFAULT_RATE_LIMIT_RPS: f64 = 20.0;
pub const DEFAULT_RATE_LIMIT_BURST: f64 = 40.0;
pub const DEFAULT_CONN_TIMEOUT_S: u64 = 10;
pub const DEFAULT_WRITE_TIMEOUT_S: u64 = 10;
pub const DEFAULT_BROTLI_QUALITY: u32 = 5;

/// Fully resolved runtime configuration for the server binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub catalog_db: PathBuf,
    pub tmdb_api_key: Option<String>,
    pub tmdb_rps: u32,
    pub tmdb_rps_foreground: u32,
    pub backfill_workers: usize,
    pub backfill_queue_limit: usize,
    pub backfill_ttl_secs: u64,
    pub bind_addr: String,
    pub http_port: u16,
    pub cors_allow_hosts: Vec<String>,
    pub cors_allow_localhost: bool,
    pub rate_limit_rps: f64,
    pub rate_limit_burst: f64,
    pub conn_timeout_s: u64,
    pub write_timeout_s: u64,
    pub force_gzip: bool,
    pub brotli_quality: u32,
}

/// CLI-level overrides. `None` fields fall through to the environment / the
/// optional `.env` file / hard defaults, in that precedence order.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub catalog_db: Option<PathBuf>,
    pub bind_addr: Option<String>,
    pub http_port: Option<u16>,
    pub env_path: Option<PathBuf>,
    pub disable_dotenv: bool,
}

pub fn load_config() -> Result<Config> {
    resolve_config(ConfigOverrides::default())
}

pub fn resolve_config(overrides: ConfigOverrides) -> Result<Config> {
    let dotenv_disabled = overrides.disable_dotenv || env_flag("DISABLE_DOTENV").unwrap_or(false);
    let file_vars = if dotenv_disabled {
        HashMap::new()
    } else {
        let env_path = overrides
            .env_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
        read_env_file(&env_path)?
    };
    build_config(&file_vars, env_var_string, overrides)
}

fn build_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> Result<Config> {
    let get = |key: &str| lookup_value(key, file_vars, &env_lookup);
    let get_parsed = |key: &str, default: u32| {
        get(key)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(default)
    };
    let get_parsed_u64 = |key: &str, default: u64| {
        get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(default)
    };
    let get_parsed_f64 = |key: &str, default: f64| {
        get(key)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(default)
    };
    let get_bool = |key: &str, default: bool| {
        get(key)
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(default)
    };

    let catalog_db = overrides
        .catalog_db
        .or_else(|| get("CATALOG_DB").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG_DB));

    let bind_addr = overrides
        .bind_addr
        .or_else(|| get("BIND_ADDR"))
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

    let http_port = overrides
        .http_port
        .or_else(|| get("HTTP_PORT").and_then(|v| v.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_HTTP_PORT);

    let tmdb_api_key = get("TMDB_API_KEY").filter(|v| !v.trim().is_empty());

    let cors_allow_hosts = get("CORS_ALLOW_HOSTS")
        .map(|v| {
            v.split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(Config {
        catalog_db,
        tmdb_api_key,
        tmdb_rps: get_parsed("TMDB_RPS", DEFAULT_TMDB_RPS),
        tmdb_rps_foreground: get_parsed("TMDB_RPS_FOREGROUND", DEFAULT_TMDB_RPS_FOREGROUND),
        backfill_workers: get_parsed("BACKFILL_WORKERS", DEFAULT_BACKFILL_WORKERS as u32) as usize,
        backfill_queue_limit: get_parsed("BACKFILL_QUEUE_LIMIT", DEFAULT_BACKFILL_QUEUE_LIMIT as u32)
            as usize,
        backfill_ttl_secs: get_parsed_u64("BACKFILL_TTL_SECS", DEFAULT_BACKFILL_TTL_SECS),
        bind_addr,
        http_port,
        cors_allow_hosts,
        cors_allow_localhost: get_bool("CORS_ALLOW_LOCALHOST", true),
        rate_limit_rps: get_parsed_f64("RATE_LIMIT_RPS", DEFAULT_RATE_LIMIT_RPS),
        rate_limit_burst: get_parsed_f64("RATE_LIMIT_BURST", DEFAULT_RATE_LIMIT_BURST),
        conn_timeout_s: get_parsed_u64("CONN_TIMEOUT_S", DEFAULT_CONN_TIMEOUT_S),
        write_timeout_s: get_parsed_u64("WRITE_TIMEOUT_S", DEFAULT_WRITE_TIMEOUT_S),
        force_gzip: get_bool("FORCE_GZIP", false),
        brotli_quality: get_parsed("BROTLI_QUALITY", DEFAULT_BROTLI_QUALITY).min(11),
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_flag(key: &str) -> Option<bool> {
    env_var_string(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

/// Parses a `.env`-style file: blank lines and `#` comments are skipped, an
/// optional `export ` prefix is stripped, and values may be single- or
/// double-quoted.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
