use std::env;

use minuet::Config;

// Environment variables are process-global, so defaults and overrides are
// exercised in one sequential test to avoid cross-test races.
#[test]
fn config_defaults_and_overrides() {
    for key in [
        "PORT",
        "IO_THREADS",
        "POOL_SIZE",
        "QUEUE_CAPACITY",
        "CORS_ORIGINS",
        "API_KEY",
        "MFA_URI",
        "MAX_REQUEST_SIZE",
        "READ_TIMEOUT_SECONDS",
        "JWT_SECRET",
        "JWT_TIMEOUT_SECONDS",
        "JWT_MFA_TIMEOUT_SECONDS",
        "POD_NAME",
    ] {
        env::remove_var(key);
    }

    let config = Config::from_env();
    assert_eq!(config.port, 8080);
    assert!(config.io_threads >= 1);
    assert_eq!(config.pool_size, 16);
    assert_eq!(config.queue_capacity, 1000);
    assert!(config.cors_origins.is_empty());
    assert!(config.api_key.is_empty());
    assert_eq!(config.mfa_uri, "/validate/totp");
    assert_eq!(config.max_request_size, 5 * 1024 * 1024);
    assert_eq!(config.read_timeout_seconds, 60);
    assert_eq!(config.jwt_timeout_seconds, 900);
    assert_eq!(config.jwt_mfa_timeout_seconds, 300);
    assert!(!config.pod_name.is_empty());

    env::set_var("PORT", "9090");
    env::set_var("IO_THREADS", "2");
    env::set_var("POOL_SIZE", "8");
    env::set_var("QUEUE_CAPACITY", "50");
    env::set_var("CORS_ORIGINS", "https://a.example, https://b.example");
    env::set_var("API_KEY", "k1");
    env::set_var("MFA_URI", "/mfa/check");
    env::set_var("MAX_REQUEST_SIZE", "1048576");
    env::set_var("READ_TIMEOUT_SECONDS", "5");
    env::set_var("JWT_SECRET", "s1");
    env::set_var("JWT_TIMEOUT_SECONDS", "120");
    env::set_var("JWT_MFA_TIMEOUT_SECONDS", "60");
    env::set_var("POD_NAME", "pod-7");

    let config = Config::from_env();
    assert_eq!(config.port, 9090);
    assert_eq!(config.io_threads, 2);
    assert_eq!(config.pool_size, 8);
    assert_eq!(config.queue_capacity, 50);
    assert!(config.cors_origins.contains("https://a.example"));
    assert!(config.cors_origins.contains("https://b.example"));
    assert_eq!(config.cors_origins.len(), 2);
    assert_eq!(config.api_key, "k1");
    assert_eq!(config.mfa_uri, "/mfa/check");
    assert_eq!(config.max_request_size, 1_048_576);
    assert_eq!(config.read_timeout_seconds, 5);
    assert_eq!(config.jwt_secret, "s1");
    assert_eq!(config.jwt_timeout_seconds, 120);
    assert_eq!(config.jwt_mfa_timeout_seconds, 60);
    assert_eq!(config.pod_name, "pod-7");

    // Malformed numerics fall back to defaults rather than aborting.
    env::set_var("PORT", "not-a-port");
    let config = Config::from_env();
    assert_eq!(config.port, 8080);

    for key in [
        "PORT",
        "IO_THREADS",
        "POOL_SIZE",
        "QUEUE_CAPACITY",
        "CORS_ORIGINS",
        "API_KEY",
        "MFA_URI",
        "MAX_REQUEST_SIZE",
        "READ_TIMEOUT_SECONDS",
        "JWT_SECRET",
        "JWT_TIMEOUT_SECONDS",
        "JWT_MFA_TIMEOUT_SECONDS",
        "POD_NAME",
    ] {
        env::remove_var(key);
    }
}
