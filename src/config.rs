use std::env;

/// Deployment environment.
///
/// Development allows the market data service to fall back to deterministic
/// synthetic data when the upstream is unreachable; production surfaces the
/// upstream error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn is_development(&self) -> bool {
        matches!(self, AppEnv::Development)
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// HMAC key for bearer-token verification.
    pub jwt_secret: String,
    /// Path to the SQLite ledger database.
    pub database_path: String,
    /// Base URL of the upstream chart API.
    pub upstream_market_url: String,
    /// Deployment environment.
    pub env: AppEnv,
    /// Period of the live execution tick, in seconds.
    pub engine_tick_secs: u64,
    /// Timeout for a single upstream quote fetch, in seconds.
    pub quote_timeout_secs: u64,
    /// Symbol used when an algorithm is started with no symbols configured.
    pub default_symbol: String,
    /// Track running algorithms through database leases instead of process
    /// memory, for horizontally scaled deployments.
    pub lease_registry: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => AppEnv::Production,
            _ => AppEnv::Development,
        };

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3001),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "vellum-dev-secret".to_string()),
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "vellum.db".to_string()),
            upstream_market_url: env::var("UPSTREAM_MARKET_URL").unwrap_or_else(|_| {
                "https://query1.finance.yahoo.com/v8/finance".to_string()
            }),
            env,
            engine_tick_secs: env::var("ENGINE_TICK_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            quote_timeout_secs: env::var("QUOTE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            default_symbol: env::var("DEFAULT_SYMBOL").unwrap_or_else(|_| "SPY".to_string()),
            lease_registry: matches!(env::var("ENGINE_REGISTRY").as_deref(), Ok("lease")),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
