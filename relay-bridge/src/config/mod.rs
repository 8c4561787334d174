//! Bridge configuration, read from the process environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::credentials::SecretBinding;
use crate::publisher::{DEFAULT_CHUNK_BYTES, DEFAULT_MAX_MESSAGE_BYTES, PublisherLimits};
use crate::utils::expand_home;
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:relay_requests.db?mode=rwc";
pub const DEFAULT_INDEX_PRIMARY_URL: &str = "https://arweave-search.goldsky.com/graphql";
pub const DEFAULT_INDEX_FALLBACK_URL: &str = "https://arweave.net/graphql";
pub const DEFAULT_GATEWAY_URL: &str = "https://arweave.net";
pub const DEFAULT_MU_URL: &str = "https://mu.ao-testnet.xyz";
pub const DEFAULT_SECRET_NAMES: &str = "BREVO_API_KEY,OPENWEATHER_API_KEY";
pub const DEFAULT_PRICE_URL_PREFIX: &str = "https://GusHasTheBestPrices.com/api/v69/price/";

/// Price lookup handler settings. Present only when both the bearer token and
/// the quote service URL are configured.
#[derive(Debug, Clone)]
pub struct PriceConfig {
    pub url_prefix: String,
    pub bearer_token: String,
    pub quote_url: String,
    pub retry_limit: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub relay_process_id: String,
    pub scheduler_process_id: Option<String>,
    pub wallet_path: PathBuf,
    pub database_url: String,
    pub check_interval: Duration,
    pub max_index_failures: u32,
    pub index_failure_cooldown: Duration,
    pub index_primary_url: String,
    pub index_fallback_url: String,
    pub index_query_limit: u32,
    pub index_timeout: Duration,
    pub gateway_url: String,
    pub mu_url: String,
    pub limits: PublisherLimits,
    pub secrets: Vec<SecretBinding>,
    pub price: Option<PriceConfig>,
    pub log_dir: Option<PathBuf>,
}

impl BridgeConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`. Every missing required
    /// variable is reported in one error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut missing = Vec::new();
        let mut required = |key: &'static str| {
            let value = get(key);
            if value.is_none() {
                missing.push(key);
            }
            value.unwrap_or_default()
        };
        let relay_process_id = required("RELAY_PROCESS_ID");
        let wallet_path = required("WALLET_PATH");
        if !missing.is_empty() {
            return Err(Error::config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let number = |key: &'static str, default: u64| -> Result<u64> {
            match get(key) {
                None => Ok(default),
                Some(raw) => raw.parse::<u64>().map_err(|_| {
                    Error::config(format!("{key} must be a non-negative integer, got {raw:?}"))
                }),
            }
        };

        let limits = PublisherLimits {
            max_message_bytes: number("MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES as u64)?
                as usize,
            chunk_bytes: number("CHUNK_BYTES", DEFAULT_CHUNK_BYTES as u64)? as usize,
        };
        if limits.chunk_bytes == 0 || limits.chunk_bytes >= limits.max_message_bytes {
            return Err(Error::config(format!(
                "CHUNK_BYTES ({}) must be greater than 0 and smaller than MAX_MESSAGE_BYTES ({})",
                limits.chunk_bytes, limits.max_message_bytes
            )));
        }

        let max_index_failures = u32::try_from(number("MAX_INDEX_FAILURES", 3)?)
            .map_err(|_| Error::config("MAX_INDEX_FAILURES is too large"))?;
        if max_index_failures == 0 {
            return Err(Error::config("MAX_INDEX_FAILURES must be at least 1"));
        }

        let check_interval = number("CHECK_INTERVAL_MS", 60_000)?;
        if check_interval == 0 {
            return Err(Error::config("CHECK_INTERVAL_MS must be greater than 0"));
        }

        let secret_names = get("SECRET_NAMES").unwrap_or_else(|| DEFAULT_SECRET_NAMES.to_string());
        let secrets = secret_names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .filter_map(|name| {
                let placeholder = get(&format!("{name}_PLACEHOLDER"))?;
                Some(SecretBinding::new(name, placeholder, get(name)))
            })
            .collect();

        let price = match (get("PRICE_BEARER_TOKEN"), get("PRICE_QUOTE_URL")) {
            (Some(bearer_token), Some(quote_url)) => Some(PriceConfig {
                url_prefix: get("PRICE_URL_PREFIX")
                    .unwrap_or_else(|| DEFAULT_PRICE_URL_PREFIX.to_string()),
                bearer_token,
                quote_url,
                retry_limit: u32::try_from(number("PRICE_RETRY_LIMIT", 10)?)
                    .map_err(|_| Error::config("PRICE_RETRY_LIMIT is too large"))?,
                retry_delay: Duration::from_millis(number("PRICE_RETRY_DELAY_MS", 2000)?),
            }),
            _ => None,
        };

        Ok(Self {
            relay_process_id,
            scheduler_process_id: get("SCHEDULER_PROCESS_ID"),
            wallet_path: expand_home(&wallet_path),
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            check_interval: Duration::from_millis(check_interval),
            max_index_failures,
            index_failure_cooldown: Duration::from_millis(number(
                "INDEX_FAILURE_COOLDOWN_MS",
                120_000,
            )?),
            index_primary_url: get("INDEX_PRIMARY_URL")
                .unwrap_or_else(|| DEFAULT_INDEX_PRIMARY_URL.to_string()),
            index_fallback_url: get("INDEX_FALLBACK_URL")
                .unwrap_or_else(|| DEFAULT_INDEX_FALLBACK_URL.to_string()),
            index_query_limit: u32::try_from(number("INDEX_QUERY_LIMIT", 100)?)
                .map_err(|_| Error::config("INDEX_QUERY_LIMIT is too large"))?,
            index_timeout: Duration::from_millis(number("INDEX_TIMEOUT_MS", 15_000)?),
            gateway_url: get("GATEWAY_URL").unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            mu_url: get("MU_URL").unwrap_or_else(|| DEFAULT_MU_URL.to_string()),
            limits,
            secrets,
            price,
            log_dir: get("LOG_DIR").map(PathBuf::from),
        })
    }
}
