//! Runtime configuration loaded from the process environment.

use std::collections::HashSet;
use std::str::FromStr;

use tracing::info;

use crate::util;

#[derive(Debug, Clone)]
pub struct Config {
    /// Listening port, shared by every shard via SO_REUSEPORT.
    pub port: u16,
    /// Number of reactor shards.
    pub io_threads: usize,
    /// Total worker threads across all shards.
    pub pool_size: usize,
    /// Per-worker task queue capacity.
    pub queue_capacity: usize,
    /// Exact-match CORS origin allowlist.
    pub cors_origins: HashSet<String>,
    /// Static bearer key for internal endpoints; empty disables the check.
    pub api_key: String,
    /// The only path a pre-auth token may be presented to.
    pub mfa_uri: String,
    /// Hard cap on a request's total size in bytes.
    pub max_request_size: usize,
    /// Idle connections older than this are swept.
    pub read_timeout_seconds: u64,
    pub jwt_secret: String,
    pub jwt_timeout_seconds: u64,
    pub jwt_mfa_timeout_seconds: u64,
    /// Instance identity reported by /version and /metrics.
    pub pod_name: String,
}

impl Config {
    /// Load configuration from environment variables, with `.env` support.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let cors_origins: HashSet<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if !cors_origins.is_empty() {
            info!("CORS enabled for {} origin(s)", cors_origins.len());
        }

        Self {
            port: parse_env("PORT", 8080),
            io_threads: parse_env("IO_THREADS", num_cpus::get()).max(1),
            pool_size: parse_env("POOL_SIZE", 16).max(1),
            queue_capacity: parse_env("QUEUE_CAPACITY", 1000).max(1),
            cors_origins,
            api_key: std::env::var("API_KEY").unwrap_or_default(),
            mfa_uri: std::env::var("MFA_URI").unwrap_or_else(|_| "/validate/totp".to_string()),
            max_request_size: parse_env("MAX_REQUEST_SIZE", 5 * 1024 * 1024),
            read_timeout_seconds: parse_env("READ_TIMEOUT_SECONDS", 60),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_default(),
            jwt_timeout_seconds: parse_env("JWT_TIMEOUT_SECONDS", 900),
            jwt_mfa_timeout_seconds: parse_env("JWT_MFA_TIMEOUT_SECONDS", 300),
            pod_name: std::env::var("POD_NAME").unwrap_or_else(|_| util::hostname()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            io_threads: num_cpus::get().max(1),
            pool_size: 16,
            queue_capacity: 1000,
            cors_origins: HashSet::new(),
            api_key: String::new(),
            mfa_uri: "/validate/totp".to_string(),
            max_request_size: 5 * 1024 * 1024,
            read_timeout_seconds: 60,
            jwt_secret: String::new(),
            jwt_timeout_seconds: 900,
            jwt_mfa_timeout_seconds: 300,
            pod_name: util::hostname(),
        }
    }
}

fn parse_env<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
