//! Runtime configuration from environment variables

use std::time::Duration;

/// Scheduling and extraction tuning knobs
///
/// All values have conservative defaults matching the deployed service; any
/// can be overridden through `MAILSPEND_*` environment variables.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// How often the sync orchestrator runs (default 5 minutes)
    pub sync_interval: Duration,
    /// How often the expired-token sweep runs (default hourly)
    pub token_sweep_interval: Duration,
    /// How often the materializer drains high-confidence candidates
    /// (default 2 minutes)
    pub materializer_interval: Duration,
    /// Maximum message ids fetched per account per run
    pub max_emails_per_run: usize,
    /// Bounded worker pool size for per-account fan-out
    pub worker_pool_size: usize,
    /// Minimum confidence for automatic ledger creation
    pub auto_create_threshold: f64,
    /// Lookback window for accounts without a sync-from date
    pub lookback_days: i64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(300),
            token_sweep_interval: Duration::from_secs(3600),
            materializer_interval: Duration::from_secs(120),
            max_emails_per_run: 1000,
            worker_pool_size: 5,
            auto_create_threshold: 0.8,
            lookback_days: 30,
        }
    }
}

impl ExtractionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sync_interval: env_secs("MAILSPEND_SYNC_INTERVAL_SECS", defaults.sync_interval),
            token_sweep_interval: env_secs(
                "MAILSPEND_TOKEN_SWEEP_INTERVAL_SECS",
                defaults.token_sweep_interval,
            ),
            materializer_interval: env_secs(
                "MAILSPEND_MATERIALIZER_INTERVAL_SECS",
                defaults.materializer_interval,
            ),
            max_emails_per_run: env_parse(
                "MAILSPEND_MAX_EMAILS_PER_RUN",
                defaults.max_emails_per_run,
            ),
            worker_pool_size: env_parse("MAILSPEND_WORKER_POOL_SIZE", defaults.worker_pool_size)
                .max(1),
            auto_create_threshold: env_parse(
                "MAILSPEND_AUTO_CREATE_THRESHOLD",
                defaults.auto_create_threshold,
            ),
            lookback_days: env_parse("MAILSPEND_LOOKBACK_DAYS", defaults.lookback_days),
        }
    }
}

/// OAuth client settings for one provider
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl OAuthConfig {
    /// Load `MAILSPEND_<PROVIDER>_CLIENT_ID` / `_CLIENT_SECRET` /
    /// `_REDIRECT_URI`. Returns None when the provider is not configured.
    pub fn from_env(provider: &str) -> Option<Self> {
        let prefix = format!("MAILSPEND_{}", provider.to_uppercase());
        Some(Self {
            client_id: std::env::var(format!("{}_CLIENT_ID", prefix)).ok()?,
            client_secret: std::env::var(format!("{}_CLIENT_SECRET", prefix)).ok()?,
            redirect_uri: std::env::var(format!("{}_REDIRECT_URI", prefix)).ok()?,
        })
    }
}

fn env_secs(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
