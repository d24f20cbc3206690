use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub database_pool_size: u32,
    pub sui_rpc_url: String,
    pub packages: PackageIds,
    pub emission_controller_address: String,
    pub poll_interval_ms: u64,
    pub query_page_size: u32,
    pub max_delivery_attempts: u32,
    pub retry_delay_ms: u64,
    pub idle_watermark_lag_ms: u64,
}

/// Published package ids of the three contract domains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageIds {
    pub pair: String,
    pub farm: String,
    pub locker: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = required(&env_map, "DATABASE_PATH")?;
        let database_pool_size = parse_or(&env_map, "DATABASE_POOL_SIZE", 5u32)?;
        if database_pool_size == 0 {
            return Err(ConfigError::InvalidValue(
                "DATABASE_POOL_SIZE".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let sui_rpc_url = required(&env_map, "SUI_RPC_URL")?;
        if !(sui_rpc_url.starts_with("http://") || sui_rpc_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(
                "SUI_RPC_URL".to_string(),
                format!("must be an http(s) URL, got {}", sui_rpc_url),
            ));
        }

        let packages = PackageIds {
            pair: required(&env_map, "PAIR_PACKAGE_ID")?,
            farm: required(&env_map, "FARM_PACKAGE_ID")?,
            locker: required(&env_map, "LOCKER_PACKAGE_ID")?,
        };
        let emission_controller_address = required(&env_map, "EMISSION_CONTROLLER_ADDRESS")?;

        let poll_interval_ms = parse_or(&env_map, "POLL_INTERVAL_MS", 1000u64)?;
        let query_page_size = parse_or(&env_map, "QUERY_PAGE_SIZE", 50u32)?;
        if query_page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "QUERY_PAGE_SIZE".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let max_delivery_attempts = parse_or(&env_map, "MAX_DELIVERY_ATTEMPTS", 3u32)?;
        if max_delivery_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_DELIVERY_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let retry_delay_ms = parse_or(&env_map, "RETRY_DELAY_MS", 1000u64)?;
        let idle_watermark_lag_ms = parse_or(&env_map, "IDLE_WATERMARK_LAG_MS", 60_000u64)?;

        Ok(Config {
            database_path,
            database_pool_size,
            sui_rpc_url,
            packages,
            emission_controller_address,
            poll_interval_ms,
            query_page_size,
            max_delivery_attempts,
            retry_delay_ms,
            idle_watermark_lag_ms,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn parse_or<T>(env_map: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(
                key.to_string(),
                format!("must be a non-negative integer, got {}", raw),
            )
        }),
    }
}
