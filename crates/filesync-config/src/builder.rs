//! Configuration builder for layered configuration loading

use crate::{Config, ConfigError, ConfigResult};
use config::{ConfigBuilder as ConfigBuilderInner, Environment, File, FileFormat};
use globset::Glob;
use std::path::{Path, PathBuf};

/// Separates nested keys in environment variable names
const ENV_SEPARATOR: &str = "__";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration builder for loading configuration from multiple sources
#[derive(Debug)]
pub struct ConfigBuilder {
    inner: ConfigBuilderInner<config::builder::DefaultState>,
    sources: Vec<ConfigSource>,
}

#[derive(Debug, Clone)]
enum ConfigSource {
    File { path: PathBuf, format: FileFormat },
    Defaults,
    Environment { prefix: String },
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            inner: config::Config::builder(),
            sources: Vec::new(),
        }
    }

    /// Layer the built-in defaults at this position
    pub fn add_defaults(mut self) -> Self {
        self.sources.push(ConfigSource::Defaults);
        self
    }

    /// Add a configuration file source. Missing files are skipped.
    pub fn add_source_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let format = Self::detect_format(&path);
        self.sources.push(ConfigSource::File { path, format });
        self
    }

    /// Add environment variable source with prefix
    pub fn add_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.sources.push(ConfigSource::Environment {
            prefix: prefix.into(),
        });
        self
    }

    /// Build the configuration
    ///
    /// Later sources override earlier ones; keys no source sets keep their
    /// `Default` value.
    pub fn build(mut self) -> ConfigResult<Config> {
        for source in &self.sources {
            match source {
                ConfigSource::File { path, format } => {
                    if path.exists() {
                        self.inner = self
                            .inner
                            .add_source(File::from(path.clone()).format(*format));
                    }
                }
                ConfigSource::Environment { prefix } => {
                    self.inner = self.inner.add_source(
                        Environment::with_prefix(prefix).separator(ENV_SEPARATOR),
                    );
                }
                ConfigSource::Defaults => {
                    let defaults = serde_yaml::to_value(Config::default()).map_err(|e| {
                        ConfigError::other(format!("Failed to serialize defaults: {}", e))
                    })?;
                    self.inner = self
                        .inner
                        .add_source(config::Config::try_from(&defaults)?);
                }
            }
        }

        let config: Config = self.inner.build()?.try_deserialize()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Detect file format from extension
    pub(crate) fn detect_format(path: &Path) -> FileFormat {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Yaml,
        }
    }

    /// Validate the configuration
    pub fn validate(config: &Config) -> ConfigResult<()> {
        if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::validation(
                "Log level must be one of: trace, debug, info, warn, error",
            ));
        }

        if config.sync.max_hash_size == 0 {
            return Err(ConfigError::validation(
                "Maximum hash size must be greater than 0",
            ));
        }

        for pattern in &config.sync.exclude {
            Glob::new(pattern).map_err(|e| {
                ConfigError::validation(format!("Invalid exclude pattern '{}': {}", pattern, e))
            })?;
        }

        let share = &config.share;
        if share.connect_command.is_empty() != share.disconnect_command.is_empty() {
            return Err(ConfigError::validation(
                "Share connect and disconnect commands must be configured together",
            ));
        }
        if share
            .connect_command
            .iter()
            .chain(&share.disconnect_command)
            .next()
            .is_some_and(String::is_empty)
        {
            return Err(ConfigError::validation("Share command program must not be empty"));
        }

        Ok(())
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    #[test]
    fn test_builder_defaults() {
        let config = ConfigBuilder::new().add_defaults().build().unwrap();
        assert!(config.sync.detect_renames);
        assert_eq!(config.sync.apply_concurrency.get(), 1);
        assert_eq!(config.recycle.retention_days, 30);
    }

    #[test]
    fn test_builder_yaml_file() {
        let mut temp_file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            temp_file,
            r#"
sync:
  detect_renames: false
  apply_concurrency: 8
  exclude:
    - "*.tmp"
recycle:
  retention_days: 0
"#
        )
        .unwrap();

        let config = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(temp_file.path())
            .build()
            .unwrap();

        assert!(!config.sync.detect_renames);
        assert_eq!(config.sync.apply_concurrency.get(), 8);
        assert_eq!(config.sync.exclude, vec!["*.tmp".to_string()]);
        assert_eq!(config.recycle.retention_days, 0);
        assert!(config.sync.preserve_timestamps);
    }

    #[test]
    fn test_builder_toml_file() {
        let mut temp_file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            temp_file,
            r#"
[logging]
level = "debug"
json_format = true
"#
        )
        .unwrap();

        let config = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(temp_file.path())
            .build()
            .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_builder_validation() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
logging:
  level: loud
"#
        )
        .unwrap();

        let result = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(temp_file.path())
            .build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Log level must be one of"));
    }

    #[test]
    fn test_concurrency_out_of_range_is_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "sync:\n  apply_concurrency: 0").unwrap();

        let result = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(temp_file.path())
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_half_configured_share_is_rejected() {
        let mut config = Config::default();
        config.share.connect_command = vec!["net".to_string(), "use".to_string()];

        let err = ConfigBuilder::validate(&config).unwrap_err();
        assert!(err.to_string().contains("configured together"));
    }

    #[test]
    fn test_invalid_exclude_pattern_is_rejected() {
        let mut config = Config::default();
        config.sync.exclude = vec!["[unclosed".to_string()];

        assert!(ConfigBuilder::validate(&config).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = ConfigBuilder::new()
            .add_defaults()
            .add_source_file("/definitely/not/here/filesync.yaml")
            .build()
            .unwrap();

        assert_eq!(config.logging.level, "warn");
    }
}
