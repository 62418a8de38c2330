use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

/// Prefix for environment overrides, e.g. `FEATURES_PROCESSOR__WINDOW_SIZE=500`.
pub const ENV_PREFIX: &str = "FEATURES_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from `config/Config.toml` layered over defaults,
    /// with `FEATURES_`-prefixed environment variables taking precedence.
    ///
    /// A missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or environment cannot be parsed, or the
    /// resulting processor settings are invalid.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration from a specific TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or environment cannot be parsed, or the
    /// resulting processor settings are invalid.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        let config: AppConfig = Self::figment(path)
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        config.processor.validate()?;

        tracing::debug!(
            window_size = config.processor.window_size,
            batch_write_threshold = config.processor.batch_write_threshold,
            auto_flush_timeout_secs = config.processor.auto_flush_timeout_secs,
            "Configuration loaded"
        );

        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::load_from("does/not/exist.toml")
                .map_err(|e| e.to_string())?;
            assert_eq!(config.processor.window_size, 400);
            assert_eq!(config.redis.url, "redis://127.0.0.1:6379");
            Ok(())
        });
    }

    #[test]
    fn file_values_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "features.toml",
                r#"
                [processor]
                window_size = 50
                batch_write_threshold = 5

                [database]
                url = "postgresql://user:pw@db:5432/features"
                "#,
            )?;

            let config = ConfigLoader::load_from("features.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.processor.window_size, 50);
            assert_eq!(config.processor.batch_write_threshold, 5);
            assert_eq!(config.processor.auto_flush_timeout_secs, 10);
            assert_eq!(config.database.url, "postgresql://user:pw@db:5432/features");
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "features.toml",
                r#"
                [processor]
                window_size = 50
                "#,
            )?;
            jail.set_env("FEATURES_PROCESSOR__WINDOW_SIZE", "75");
            jail.set_env("FEATURES_REDIS__URL", "redis://cache:6379");

            let config = ConfigLoader::load_from("features.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.processor.window_size, 75);
            assert_eq!(config.redis.url, "redis://cache:6379");
            Ok(())
        });
    }

    #[test]
    fn invalid_window_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("FEATURES_PROCESSOR__WINDOW_SIZE", "0");
            assert!(ConfigLoader::load_from("features.toml").is_err());
            Ok(())
        });
    }
}
