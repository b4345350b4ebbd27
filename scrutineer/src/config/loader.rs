//! Configuration loading from files and environment variables.

use config::{Config as ConfigBuilder, Environment, File};

use crate::error::ConfigError;

use super::Config;

/// Environment variable naming the config file (without extension)
const CONFIG_PATH_VAR: &str = "SCRUTINEER_CONFIG";

/// Load configuration from the config file (if any) and env vars, then validate it
pub fn load_config() -> Result<Config, ConfigError> {
    let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| "config".to_string());
    load_config_from(&path)
}

pub(crate) fn load_config_from(path: &str) -> Result<Config, ConfigError> {
    let config: Config = ConfigBuilder::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("SCRUTINEER")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("portal.listing_pages")
                .with_list_parse_key("extraction.terms"),
        )
        .build()
        .map_err(|e| ConfigError::Load {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ConfigError::Load {
            message: format!("Failed to deserialize config: {}", e),
        })?;

    validate(&config)?;
    Ok(config)
}

/// Reject settings the pipelines cannot run with
pub(crate) fn validate(config: &Config) -> Result<(), ConfigError> {
    let mode = config.pipeline.mode;

    if config.fetch.max_attempts == 0 {
        return Err(invalid("fetch.max_attempts", "must be at least 1"));
    }
    if config.fetch.max_parallel_fetches == 0 {
        return Err(invalid("fetch.max_parallel_fetches", "must be at least 1"));
    }
    if config.extraction.workers == 0 {
        return Err(invalid("extraction.workers", "must be at least 1"));
    }
    if config.extraction.queue_capacity == 0 {
        return Err(invalid("extraction.queue_capacity", "must be at least 1"));
    }
    if config.extraction.dpi == 0 {
        return Err(invalid("extraction.dpi", "must be positive"));
    }
    if config.fetch.backoff_multiplier < 1.0 {
        return Err(invalid("fetch.backoff_multiplier", "must be at least 1.0"));
    }
    if mode.extracts() && config.extraction.terms.iter().all(|t| t.is_empty()) {
        return Err(invalid(
            "extraction.terms",
            "at least one non-empty term is required",
        ));
    }
    if mode.fetches() && config.portal.listing_pages.is_empty() {
        return Err(invalid(
            "portal.listing_pages",
            "at least one listing page is required",
        ));
    }

    Ok(())
}

fn invalid(key: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunMode;
    use std::io::Write;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.extraction.terms = vec!["annapurani".to_string()];
        config.portal.listing_pages = vec!["https://portal.example/ac31.html".to_string()];
        config
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = valid_config();
        config.extraction.workers = 0;
        let err = validate(&config).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "extraction.workers",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_terms_only_required_when_extracting() {
        let mut config = valid_config();
        config.extraction.terms.clear();
        assert!(validate(&config).is_err());

        config.pipeline.mode = RunMode::FetchOnly;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_validate_listing_pages_only_required_when_fetching() {
        let mut config = valid_config();
        config.portal.listing_pages.clear();
        assert!(validate(&config).is_err());

        config.pipeline.mode = RunMode::ExtractOnly;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_load_config_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scrutineer.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[pipeline]
mode = "extract_only"

[extraction]
terms = ["அன்னபூரணி", "அனுஷ்யா"]
workers = 3

[fetch]
max_attempts = 3
"#
        )
        .unwrap();

        let base = dir.path().join("scrutineer");
        let config = load_config_from(base.to_str().unwrap()).unwrap();
        assert_eq!(config.pipeline.mode, RunMode::ExtractOnly);
        assert_eq!(config.extraction.terms.len(), 2);
        assert_eq!(config.extraction.terms[0], "அன்னபூரணி");
        assert_eq!(config.extraction.workers, 3);
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(config.extraction.dpi, 300);
    }
}
