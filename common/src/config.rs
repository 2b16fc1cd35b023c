//! Global application configuration manager.
//!
//! `AppConfig` is a lazily initialized, globally accessible singleton containing
//! runtime configuration values loaded from environment variables. It provides
//! thread-safe access and mutation for testing or overrides in runtime environments.
//!
//! Unlike the required-variable style of a web API, every key here has a
//! default so the intake daemon can start against a local SQLite file.

use std::env;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

/// Represents the complete application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub log_dir: String,
    pub log_to_stdout: bool,
    pub database_path: String,
    pub artifact_storage_root: String,
    pub catalog_path: String,
    pub host: String,
    pub port: u16,
    pub dispatch_url: String,
    pub dispatch_default_queue: String,
    /// Per-language queue overrides, `language -> queue`.
    pub dispatch_routes: Vec<(String, String)>,
    pub persist_timeout_ms: u64,
    pub publish_timeout_ms: u64,
    pub relay_interval_ms: u64,
    pub relay_batch_size: u64,
    pub relay_backoff_base_ms: u64,
    pub relay_backoff_max_ms: u64,
    pub max_upload_bytes: u64,
    pub max_uncompressed_bytes: u64,
    pub max_archive_entries: usize,
    pub retire_removed_assignments: bool,
}

/// Lazily-initialized, thread-safe singleton instance of `AppConfig`.
static CONFIG_INSTANCE: OnceLock<RwLock<AppConfig>> = OnceLock::new();

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.into())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses `java=jvm, cpp=native` into `[("java", "jvm"), ("cpp", "native")]`.
///
/// Malformed pairs are skipped.
pub fn parse_routes(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (lang, queue) = pair.split_once('=')?;
            let (lang, queue) = (lang.trim(), queue.trim());
            if lang.is_empty() || queue.is_empty() {
                None
            } else {
                Some((lang.to_lowercase(), queue.to_string()))
            }
        })
        .collect()
}

impl AppConfig {
    /// Loads the configuration from `.env` and environment variables.
    ///
    /// Missing or unparsable values fall back to their defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            env: var_or("APP_ENV", "development"),
            project_name: var_or("PROJECT_NAME", "railgun-intake"),
            log_level: var_or("LOG_LEVEL", "intake=info"),
            log_file: var_or("LOG_FILE", "intake.log"),
            log_dir: var_or("LOG_DIR", "logs"),
            log_to_stdout: var_or("LOG_TO_STDOUT", "false") == "true",
            database_path: var_or("DATABASE_PATH", "data/intake.db"),
            artifact_storage_root: var_or("ARTIFACT_STORAGE_ROOT", "data/artifacts"),
            catalog_path: var_or("CATALOG_PATH", "data/catalog.json"),
            host: var_or("HOST", "127.0.0.1"),
            port: parse_or("PORT", 3100),
            dispatch_url: var_or("DISPATCH_URL", "http://127.0.0.1:3001"),
            dispatch_default_queue: var_or("DISPATCH_DEFAULT_QUEUE", "default"),
            dispatch_routes: parse_routes(&var_or("DISPATCH_ROUTES", "")),
            persist_timeout_ms: parse_or("PERSIST_TIMEOUT_MS", 5_000),
            publish_timeout_ms: parse_or("PUBLISH_TIMEOUT_MS", 3_000),
            relay_interval_ms: parse_or("RELAY_INTERVAL_MS", 2_000),
            relay_batch_size: parse_or("RELAY_BATCH_SIZE", 50),
            relay_backoff_base_ms: parse_or("RELAY_BACKOFF_BASE_MS", 1_000),
            relay_backoff_max_ms: parse_or("RELAY_BACKOFF_MAX_MS", 300_000),
            max_upload_bytes: parse_or("MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
            max_uncompressed_bytes: parse_or("MAX_UNCOMPRESSED_BYTES", 50 * 1024 * 1024),
            max_archive_entries: parse_or("MAX_ARCHIVE_ENTRIES", 512),
            retire_removed_assignments: var_or("RETIRE_REMOVED_ASSIGNMENTS", "true") == "true",
        }
    }

    /// Returns a snapshot of the global configuration.
    ///
    /// A poisoned lock still yields the last written value.
    pub fn global() -> AppConfig {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        match lock.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Resets the configuration by reloading from environment variables.
    ///
    /// Useful in tests to clear overrides.
    pub fn reset() {
        AppConfig::set_field(|cfg| *cfg = AppConfig::from_env());
    }

    /// Generic internal setter for any field in the config.
    fn set_field<F>(setter: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        let mut guard = match lock.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        setter(&mut guard);
    }

    // --- Per-field setters below ---

    pub fn set_log_level(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.log_level = value.into());
    }

    pub fn set_log_to_stdout(value: bool) {
        AppConfig::set_field(|cfg| cfg.log_to_stdout = value);
    }

    pub fn set_database_path(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.database_path = value.into());
    }

    pub fn set_artifact_storage_root(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.artifact_storage_root = value.into());
    }

    pub fn set_catalog_path(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.catalog_path = value.into());
    }

    pub fn set_port(value: u16) {
        AppConfig::set_field(|cfg| cfg.port = value);
    }

    pub fn set_dispatch_url(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.dispatch_url = value.into());
    }

    pub fn set_dispatch_routes(value: Vec<(String, String)>) {
        AppConfig::set_field(|cfg| cfg.dispatch_routes = value);
    }

    pub fn set_publish_timeout_ms(value: u64) {
        AppConfig::set_field(|cfg| cfg.publish_timeout_ms = value);
    }

    pub fn set_relay_interval_ms(value: u64) {
        AppConfig::set_field(|cfg| cfg.relay_interval_ms = value);
    }

    pub fn set_max_upload_bytes(value: u64) {
        AppConfig::set_field(|cfg| cfg.max_upload_bytes = value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_are_parsed_and_normalised() {
        let routes = parse_routes("Java=jvm, cpp = native,broken,=x,python=");
        assert_eq!(
            routes,
            vec![
                ("java".to_string(), "jvm".to_string()),
                ("cpp".to_string(), "native".to_string()),
            ]
        );
    }

    #[test]
    fn setters_override_global_snapshot() {
        AppConfig::set_dispatch_url("http://broker.test:9000");
        AppConfig::set_port(4321);
        let cfg = AppConfig::global();
        assert_eq!(cfg.dispatch_url, "http://broker.test:9000");
        assert_eq!(cfg.port, 4321);
    }
}
