// =============================================================================
// CONFIGURATION MODULE
// =============================================================================
// Loads configuration from environment variables into a typed Config.
// Parsing errors surface at startup, not on the first request.
// =============================================================================

use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::auth::AdminAllowList;
use crate::catalog::SeatLayout;
use crate::retry::RetryConfig;

/// Knobs for the seat inventory and booking ledger
#[derive(Debug, Clone, PartialEq)]
pub struct BookingConfig {
    /// Reserve+commit attempts when another writer changed the seat map
    /// in between; after that the request fails with SeatConflict.
    pub reserve_max_attempts: u32,

    /// Longest wait for a showtime's critical section
    pub lock_timeout: Duration,

    /// Retry policy for transient storage failures
    pub storage_retry: RetryConfig,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            reserve_max_attempts: 3,
            lock_timeout: Duration::from_secs(5),
            storage_retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 5000)
    pub port: u16,

    /// PostgreSQL connection URL. Without it the service keeps its data in
    /// memory.
    pub database_url: Option<String>,

    /// Redis connection URL. Without it movie documents are not cached.
    pub redis_url: Option<String>,

    pub cache_ttl: Duration,

    /// Emails allowed to run catalog administration
    pub admins: AdminAllowList,

    /// Layout generated for new showtimes
    pub seat_layout: SeatLayout,

    /// Showtime labels created with every new movie
    pub default_showtimes: Vec<String>,

    pub booking: BookingConfig,
}

impl Config {
    /// Creates a Config from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Creates a Config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = parse_or(&get, "PORT", 5000u16)?;
        let cache_ttl_secs = parse_or(&get, "CACHE_TTL_SECS", 300u64)?;

        let rows = parse_or(&get, "SEAT_ROWS", 8u8)?;
        let columns = parse_or(&get, "SEAT_COLUMNS", 10u8)?;
        let seat_layout = SeatLayout::new(rows, columns)
            .with_context(|| format!("Invalid seat layout {rows}x{columns}"))?;

        let default_showtimes: Vec<String> = get("DEFAULT_SHOWTIMES")
            .unwrap_or_else(|| "10:00 AM,01:00 PM".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let reserve_max_attempts = parse_or(&get, "RESERVE_MAX_ATTEMPTS", 3u32)?;
        if reserve_max_attempts == 0 {
            bail!("RESERVE_MAX_ATTEMPTS must be at least 1");
        }
        let lock_timeout_ms = parse_or(&get, "SHOWTIME_LOCK_TIMEOUT_MS", 5000u64)?;
        let retry_attempts = parse_or(&get, "STORAGE_RETRY_ATTEMPTS", 3u32)?;
        if retry_attempts == 0 {
            bail!("STORAGE_RETRY_ATTEMPTS must be at least 1");
        }
        let retry_delay_ms = parse_or(&get, "STORAGE_RETRY_DELAY_MS", 100u64)?;

        Ok(Self {
            port,
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            admins: AdminAllowList::parse(&get("ADMIN_EMAILS").unwrap_or_default()),
            seat_layout,
            default_showtimes,
            booking: BookingConfig {
                reserve_max_attempts,
                lock_timeout: Duration::from_millis(lock_timeout_ms),
                storage_retry: RetryConfig {
                    max_attempts: retry_attempts,
                    initial_delay: Duration::from_millis(retry_delay_ms),
                    ..RetryConfig::default()
                },
            },
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Failed to parse {key}={raw:?}")),
        None => Ok(default),
    }
}
