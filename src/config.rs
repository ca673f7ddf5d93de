//! Runtime configuration from environment variables.

use std::env;

/// Which store(s) receive the merged output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// Catalog store + best-effort relational mirror + throttled master
    /// snapshot.
    All,
    /// Catalog (key-value) store only.
    Catalog,
    /// Relational store only.
    Relational,
    /// Dated file export of the current batch; no store writes.
    Files,
}

impl ExportMode {
    pub fn parse(raw: &str) -> Option<ExportMode> {
        match raw.to_lowercase().as_str() {
            "all" => Some(ExportMode::All),
            "catalog" => Some(ExportMode::Catalog),
            "relational" => Some(ExportMode::Relational),
            "files" => Some(ExportMode::Files),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportMode::All => "all",
            ExportMode::Catalog => "catalog",
            ExportMode::Relational => "relational",
            ExportMode::Files => "files",
        }
    }
}

/// Configuration for one export run, loaded from environment variables
/// with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: ExportMode,
    pub lookback_days: u32,
    pub search_url: Option<String>,
    pub search_token: Option<String>,
    pub search_username: Option<String>,
    pub search_password: Option<String>,
    pub search_query_file: Option<String>,
    pub search_poll_interval_ms: u64,
    pub catalog_db_path: String,
    pub relational_db_path: Option<String>,
    pub export_dir: String,
    pub catalog_ttl_days: i64,
    pub scan_page_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// - `EXPORT_MODE` (default: all)
    /// - `LOOKBACK_DAYS` (default: 1)
    /// - `SEARCH_URL`, `SEARCH_TOKEN` or `SEARCH_USERNAME`/`SEARCH_PASSWORD`
    /// - `SEARCH_QUERY_FILE` (default: embedded query)
    /// - `SEARCH_POLL_INTERVAL_MS` (default: 500)
    /// - `CATALOG_DB_PATH` (default: /var/lib/iocflow/catalog.db)
    /// - `RELATIONAL_DB_PATH` (unset: relational export skipped)
    /// - `EXPORT_DIR` (default: /var/lib/iocflow/exports)
    /// - `CATALOG_TTL_DAYS` (default: 90)
    /// - `SCAN_PAGE_SIZE` (default: 100)
    pub fn from_env() -> Self {
        let mode = match env::var("EXPORT_MODE") {
            Ok(raw) => ExportMode::parse(&raw).unwrap_or_else(|| {
                log::warn!("⚠️  Unknown EXPORT_MODE '{}', defaulting to 'all'", raw);
                ExportMode::All
            }),
            Err(_) => ExportMode::All,
        };

        Self {
            mode,

            lookback_days: env::var("LOOKBACK_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),

            search_url: env::var("SEARCH_URL").ok(),
            search_token: env::var("SEARCH_TOKEN").ok(),
            search_username: env::var("SEARCH_USERNAME").ok(),
            search_password: env::var("SEARCH_PASSWORD").ok(),
            search_query_file: env::var("SEARCH_QUERY_FILE").ok(),

            search_poll_interval_ms: env::var("SEARCH_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),

            catalog_db_path: env::var("CATALOG_DB_PATH")
                .unwrap_or_else(|_| "/var/lib/iocflow/catalog.db".to_string()),

            relational_db_path: env::var("RELATIONAL_DB_PATH").ok(),

            export_dir: env::var("EXPORT_DIR")
                .unwrap_or_else(|_| "/var/lib/iocflow/exports".to_string()),

            catalog_ttl_days: env::var("CATALOG_TTL_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(90),

            scan_page_size: env::var("SCAN_PAGE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!(ExportMode::parse("all"), Some(ExportMode::All));
        assert_eq!(ExportMode::parse("CATALOG"), Some(ExportMode::Catalog));
        assert_eq!(ExportMode::parse("relational"), Some(ExportMode::Relational));
        assert_eq!(ExportMode::parse("files"), Some(ExportMode::Files));
        assert_eq!(ExportMode::parse("s3"), None);
    }

    #[test]
    fn test_custom_config_from_env() {
        env::set_var("EXPORT_MODE", "catalog");
        env::set_var("LOOKBACK_DAYS", "7");
        env::set_var("CATALOG_DB_PATH", "/tmp/test-catalog.db");
        env::set_var("CATALOG_TTL_DAYS", "30");

        let config = Config::from_env();

        assert_eq!(config.mode, ExportMode::Catalog);
        assert_eq!(config.lookback_days, 7);
        assert_eq!(config.catalog_db_path, "/tmp/test-catalog.db");
        assert_eq!(config.catalog_ttl_days, 30);
        assert_eq!(config.search_poll_interval_ms, 500);
        assert_eq!(config.scan_page_size, 100);

        env::remove_var("EXPORT_MODE");
        env::remove_var("LOOKBACK_DAYS");
        env::remove_var("CATALOG_DB_PATH");
        env::remove_var("CATALOG_TTL_DAYS");
    }
}
