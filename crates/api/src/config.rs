//! Server configuration loaded from environment variables.

use std::time::Duration;

use crate::auth::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// JWT token configuration (secret, expiry).
    pub jwt: JwtConfig,

    /// Interval between hub heartbeat pings (default: `30`).
    pub ping_interval_secs: u64,
    /// How long an unauthenticated connection may stay open (default: `60`).
    pub auth_timeout_secs: u64,

    /// Worker pool concurrency cap (default: `4`).
    pub worker_concurrency: usize,
    /// Worker token-bucket burst (default: `2`).
    pub worker_burst: usize,
    /// Worker sustained execution rate per second (default: `0.5`).
    pub worker_rate_per_sec: f64,

    /// Claim lock duration in seconds (default: `600`).
    pub lock_duration_secs: u64,
    /// Largest per-attempt execution timeout a submission may request
    /// (default: `300`). Must stay below the lock duration or stall
    /// detection would reclaim still-live jobs.
    pub max_execution_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                 |
    /// |----------------------------|-------------------------|
    /// | `HOST`                     | `0.0.0.0`               |
    /// | `PORT`                     | `3000`                  |
    /// | `CORS_ORIGINS`             | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`     | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`    | `30`                    |
    /// | `PING_INTERVAL_SECS`       | `30`                    |
    /// | `AUTH_TIMEOUT_SECS`        | `60`                    |
    /// | `WORKER_CONCURRENCY`       | `4`                     |
    /// | `WORKER_BURST`             | `2`                     |
    /// | `WORKER_RATE_PER_SEC`      | `0.5`                   |
    /// | `LOCK_DURATION_SECS`       | `600`                   |
    /// | `MAX_EXECUTION_TIMEOUT_SECS` | `300`                 |
    ///
    /// # Panics
    ///
    /// Panics on unparseable values or when the lock duration does not
    /// exceed the maximum execution timeout — we want misconfiguration to
    /// fail fast at startup.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs = env_u64("REQUEST_TIMEOUT_SECS", 30);
        let shutdown_timeout_secs = env_u64("SHUTDOWN_TIMEOUT_SECS", 30);
        let ping_interval_secs = env_u64("PING_INTERVAL_SECS", 30);
        let auth_timeout_secs = env_u64("AUTH_TIMEOUT_SECS", 60);

        let worker_concurrency = env_u64("WORKER_CONCURRENCY", 4) as usize;
        let worker_burst = env_u64("WORKER_BURST", 2) as usize;
        let worker_rate_per_sec: f64 = std::env::var("WORKER_RATE_PER_SEC")
            .unwrap_or_else(|_| "0.5".into())
            .parse()
            .expect("WORKER_RATE_PER_SEC must be a valid f64");

        let lock_duration_secs = env_u64("LOCK_DURATION_SECS", 600);
        let max_execution_timeout_secs = env_u64("MAX_EXECUTION_TIMEOUT_SECS", 300);

        assert!(
            lock_duration_secs > max_execution_timeout_secs,
            "LOCK_DURATION_SECS ({lock_duration_secs}) must exceed \
             MAX_EXECUTION_TIMEOUT_SECS ({max_execution_timeout_secs})"
        );

        let jwt = JwtConfig::from_env();

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            jwt,
            ping_interval_secs,
            auth_timeout_secs,
            worker_concurrency,
            worker_burst,
            worker_rate_per_sec,
            lock_duration_secs,
            max_execution_timeout_secs,
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or_else(|_| panic!("{key} must be a valid u64"))
}
