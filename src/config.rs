use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::str::FromStr;

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_max_file_size() -> usize {
    // 20 MB in bytes
    20 * 1024 * 1024
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub max_file_size: usize,
    pub max_files_per_session: usize,
    pub session_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    pub preview_rows: usize,
    pub max_na_cells: usize,
    pub values_preview_limit: usize,
    pub max_result_values: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_file_size: default_max_file_size(),
            max_files_per_session: 20,
            session_ttl_secs: 30 * 60,
            cleanup_interval_secs: 60,
            preview_rows: 30,
            max_na_cells: 5000,
            values_preview_limit: 100,
            max_result_values: 2_000_000,
        }
    }
}

impl Config {
    pub fn new() -> Result<Self> {
        // Load .env file first
        dotenv().ok();

        let defaults = Config::default();
        Ok(Config {
            bind_addr: env_or("BIND_ADDR", defaults.bind_addr)?,
            max_file_size: env_or("MAX_FILE_SIZE", defaults.max_file_size)?,
            max_files_per_session: env_or("MAX_FILES_PER_SESSION", defaults.max_files_per_session)?,
            session_ttl_secs: env_or("SESSION_TTL_SECS", defaults.session_ttl_secs)?,
            cleanup_interval_secs: env_or("CLEANUP_INTERVAL_SECS", defaults.cleanup_interval_secs)?,
            preview_rows: env_or("PREVIEW_ROWS", defaults.preview_rows)?,
            max_na_cells: env_or("MAX_NA_CELLS", defaults.max_na_cells)?,
            values_preview_limit: env_or("VALUES_PREVIEW_LIMIT", defaults.values_preview_limit)?,
            max_result_values: env_or("MAX_RESULT_VALUES", defaults.max_result_values)?,
        })
    }

    /// Request body cap for uploads: a full session's worth of files plus form overhead.
    pub fn upload_body_limit(&self) -> usize {
        self.max_file_size
            .saturating_mul(self.max_files_per_session)
            .saturating_add(1024 * 1024)
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

pub fn load_config() -> Result<Config> {
    let config = Config::new()?;
    tracing::info!(
        "Loaded configuration: max_file_size={} bytes, max_files_per_session={}, session_ttl={}s",
        config.max_file_size,
        config.max_files_per_session,
        config.session_ttl_secs
    );
    Ok(config)
}
