use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key} ({value:?}): {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone)]
pub struct AppConfig {
    /// Database connection string. SQLite by default; a `postgres://` URL
    /// switches the durable store to Postgres.
    pub database_url: String,

    // =========================
    // Market data
    // =========================
    /// Single "simple price" endpoint polled every cycle.
    pub market_data_url: String,

    /// When non-empty, every endpoint is queried concurrently each cycle and
    /// the mean of the successful answers is used. Takes precedence over
    /// `market_data_url`.
    pub market_data_urls: Vec<String>,

    /// Asset key in the response body (`ethereum`).
    pub asset_id: String,

    /// Quote key under the asset (`usd`).
    pub quote_currency: String,

    /// Label recorded as `source` on stored points and relay messages.
    pub price_source: String,

    /// Cadence of the ingestion loop.
    ///
    /// Should exceed `fetch_timeout`; a cycle that runs long causes the
    /// following ticks to be skipped rather than queued.
    pub fetch_interval: Duration,

    /// Upper bound for one market data request.
    pub fetch_timeout: Duration,

    // =========================
    // Thresholds and pricing
    // =========================
    /// Relative change required before the distributor publishes (0.005 = 0.5%).
    pub price_change_threshold: f64,

    /// Relative change required before the updater spends gas. Independent of
    /// the distributor's threshold and compared against a different reference.
    pub updater_threshold: f64,

    /// Decimal places kept by normalization.
    pub price_precision: u32,

    // =========================
    // Storage
    // =========================
    /// Retention of cached history entries.
    pub cache_history_ttl: Duration,

    /// Age beyond which the cached latest price is reported stale.
    pub max_price_age: Duration,

    /// Durable rows older than this are pruned periodically. `None` keeps everything.
    pub record_retention: Option<Duration>,

    // =========================
    // Relay and settlement
    // =========================
    /// Messages buffered per relay subscriber before the oldest are dropped.
    pub relay_capacity: usize,

    /// Jobs buffered ahead of the submission worker.
    pub submission_queue_capacity: usize,

    /// Delay before retry `n` is `retry_base * 2^n`.
    pub retry_base: Duration,

    /// Retries after the first failed attempt before a job is abandoned.
    pub max_retries: u32,

    pub rpc_url: String,
    pub contract_address: String,
    pub private_key: String,
    pub gas_limit: u64,

    /// How long to wait for a receipt before the attempt counts as failed.
    pub confirmation_timeout: Duration,

    // =========================
    // Process
    // =========================
    /// Bound on the shutdown drain. Should exceed `confirmation_timeout` so an
    /// in-flight submission can report its receipt.
    pub shutdown_grace: Duration,

    /// JSON logs (production) instead of pretty output.
    pub json_logs: bool,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &redact_credentials(&self.database_url))
            .field("market_data_url", &self.market_data_url)
            .field("market_data_urls", &self.market_data_urls)
            .field("asset_id", &self.asset_id)
            .field("quote_currency", &self.quote_currency)
            .field("fetch_interval", &self.fetch_interval)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("price_change_threshold", &self.price_change_threshold)
            .field("updater_threshold", &self.updater_threshold)
            .field("rpc_url", &redact_endpoint(&self.rpc_url))
            .field("contract_address", &self.contract_address)
            .field("private_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source; unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let asset_id = get("ASSET_ID").unwrap_or_else(|| "ethereum".to_string());
        let quote_currency = get("QUOTE_CURRENCY").unwrap_or_else(|| "usd".to_string());

        let market_data_url = get("MARKET_DATA_URL").unwrap_or_else(|| {
            format!(
                "https://api.coingecko.com/api/v3/simple/price?ids={asset_id}&vs_currencies={quote_currency}"
            )
        });

        let market_data_urls = match lookup("MARKET_DATA_URLS") {
            None => Vec::new(),
            Some(raw) => {
                let urls: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
                if urls.is_empty() {
                    return Err(ConfigError::Invalid {
                        key: "MARKET_DATA_URLS",
                        value: raw,
                        reason: "no urls listed".into(),
                    });
                }
                urls
            }
        };

        let json_logs = get("APP_ENV").is_some_and(|v| v == "production")
            || get("LOG_JSON").is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes"));

        let record_retention = match get("RECORD_RETENTION") {
            None => None,
            Some(v) => Some(parse_duration("RECORD_RETENTION", &v)?).filter(|d| !d.is_zero()),
        };

        let cfg = Self {
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://oracle.db?mode=rwc".to_string()),

            market_data_url,
            market_data_urls,
            asset_id,
            quote_currency,
            price_source: get("PRICE_SOURCE").unwrap_or_else(|| "coingecko".to_string()),
            fetch_interval: duration_or(&get, "FETCH_INTERVAL", Duration::from_secs(30))?,
            fetch_timeout: duration_or(&get, "FETCH_TIMEOUT", Duration::from_secs(10))?,

            price_change_threshold: parse_or(&get, "PRICE_CHANGE_THRESHOLD", 0.005)?,
            updater_threshold: parse_or(&get, "UPDATER_THRESHOLD", 0.005)?,
            price_precision: parse_or(&get, "PRICE_PRECISION", crate::pricing::DEFAULT_PRECISION)?,

            cache_history_ttl: duration_or(&get, "CACHE_HISTORY_TTL", Duration::from_secs(24 * 3600))?,
            max_price_age: duration_or(&get, "MAX_PRICE_AGE", Duration::from_secs(300))?,
            record_retention,

            relay_capacity: parse_or(&get, "RELAY_CAPACITY", 256)?,
            submission_queue_capacity: parse_or(&get, "SUBMISSION_QUEUE_CAPACITY", 64)?,
            retry_base: duration_or(&get, "RETRY_BASE", Duration::from_secs(1))?,
            max_retries: parse_or(&get, "MAX_RETRIES", 5)?,

            rpc_url: get("BLOCKCHAIN_RPC_URL").unwrap_or_else(|| "http://127.0.0.1:8545".to_string()),
            contract_address: get("ORACLE_CONTRACT_ADDR")
                .ok_or(ConfigError::Missing("ORACLE_CONTRACT_ADDR"))?,
            private_key: get("BLOCKCHAIN_PRIVATE_KEY")
                .ok_or(ConfigError::Missing("BLOCKCHAIN_PRIVATE_KEY"))?,
            gas_limit: parse_or(&get, "GAS_LIMIT", 100_000)?,
            confirmation_timeout: duration_or(&get, "CONFIRMATION_TIMEOUT", Duration::from_secs(60))?,

            shutdown_grace: duration_or(&get, "SHUTDOWN_GRACE", Duration::from_secs(75))?,
            json_logs,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("PRICE_CHANGE_THRESHOLD", self.price_change_threshold),
            ("UPDATER_THRESHOLD", self.updater_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(key, value, "must be within [0, 1]"));
            }
        }

        for (key, value) in [
            ("FETCH_INTERVAL", self.fetch_interval),
            ("FETCH_TIMEOUT", self.fetch_timeout),
            ("CONFIRMATION_TIMEOUT", self.confirmation_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(key, format!("{value:?}"), "must be greater than zero"));
            }
        }

        if self.price_precision > 12 {
            return Err(invalid("PRICE_PRECISION", self.price_precision, "at most 12"));
        }

        if self.gas_limit == 0 {
            return Err(invalid("GAS_LIMIT", self.gas_limit, "must be greater than zero"));
        }

        Ok(())
    }

    /// Logs settings that are accepted but likely unintended.
    pub fn log_warnings(&self) {
        if self.fetch_interval <= self.fetch_timeout {
            warn!(
                interval_ms = self.fetch_interval.as_millis() as u64,
                timeout_ms = self.fetch_timeout.as_millis() as u64,
                "fetch interval does not exceed fetch timeout; slow cycles will skip ticks"
            );
        }

        if self.shutdown_grace < self.confirmation_timeout {
            warn!(
                grace_ms = self.shutdown_grace.as_millis() as u64,
                confirmation_ms = self.confirmation_timeout.as_millis() as u64,
                "shutdown grace shorter than confirmation timeout; an in-flight submission may be aborted"
            );
        }

        if self.updater_threshold < self.price_change_threshold {
            warn!(
                updater = self.updater_threshold,
                distributor = self.price_change_threshold,
                "updater threshold below distribution threshold has no effect on most prices"
            );
        }
    }
}

/// Splits `scheme://[userinfo@]host[:port]rest` into scheme, authority
/// without userinfo, whether userinfo was present, and the remainder.
fn split_url(url: &str) -> Option<(&str, &str, bool, &str)> {
    let scheme_end = url.find("://")?;
    let after = &url[scheme_end + 3..];
    let authority_end = after.find(['/', '?', '#']).unwrap_or(after.len());
    let (authority, rest) = after.split_at(authority_end);

    Some(match authority.rfind('@') {
        Some(at) => (&url[..scheme_end], &authority[at + 1..], true, rest),
        None => (&url[..scheme_end], authority, false, rest),
    })
}

/// Hides userinfo and query parameters; keeps host and path.
pub(crate) fn redact_credentials(url: &str) -> String {
    let Some((scheme, host, had_userinfo, rest)) = split_url(url) else {
        return url.to_string();
    };

    let userinfo = if had_userinfo { "***@" } else { "" };
    let rest = match rest.find('?') {
        Some(q) => format!("{}?***", &rest[..q]),
        None => rest.to_string(),
    };
    format!("{scheme}://{userinfo}{host}{rest}")
}

/// Keeps only scheme and host. RPC providers put API keys in the path.
pub(crate) fn redact_endpoint(url: &str) -> String {
    match split_url(url) {
        Some((scheme, host, had_userinfo, rest)) => {
            let userinfo = if had_userinfo { "***@" } else { "" };
            let tail = if rest.is_empty() || rest == "/" { "" } else { "/***" };
            format!("{scheme}://{userinfo}{host}{tail}")
        }
        None => "<redacted>".to_string(),
    }
}

fn invalid(key: &'static str, value: impl fmt::Display, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: v.clone(),
            reason: e.to_string(),
        }),
    }
}

fn duration_or<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(v) => parse_duration(key, &v),
    }
}

/// Accepts `500ms`, `30s`, `5m`, `24h`, `7d` or bare seconds.
pub fn parse_duration(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let s = raw.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(split);

    let n: u64 = num
        .parse()
        .map_err(|_| invalid(key, raw, "expected a number with optional unit"))?;

    let per_unit = match unit.trim() {
        "" | "s" => 1_000,
        "ms" => 1,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        other => return Err(invalid(key, raw, &format!("unknown unit `{other}`"))),
    };

    n.checked_mul(per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| invalid(key, raw, "duration overflows"))
}
