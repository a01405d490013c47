//! Configuration management for docuseek.
//!
//! Settings are built from defaults, then an optional TOML file, then the
//! environment. The platform API key only ever comes from the environment
//! (`.env` files are honored via dotenvy in `main`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::enrich::EnrichConfig;
use crate::error::{Error, Result};
use crate::platform::RetryPolicy;

/// Default interval between scheduled reconciliation runs (12 hours).
pub const DEFAULT_RUN_INTERVAL_SECS: u64 = 12 * 60 * 60;

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Search index directory name, under the data directory.
    pub index_dirname: String,
    /// Platform API key.
    pub api_key: String,
    /// Seconds between scheduled runs.
    pub run_interval_secs: u64,
    /// Related videos attached to each entry.
    pub num_related: usize,
    /// Retry attempts per remote call.
    pub retry_max_attempts: u32,
    /// Base backoff delay in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Enrichment model settings.
    pub enrich: EnrichConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            database_filename: "docuseek.db".to_string(),
            index_dirname: "index".to_string(),
            api_key: String::new(),
            run_interval_secs: DEFAULT_RUN_INTERVAL_SECS,
            num_related: crate::sync::DEFAULT_NUM_RELATED,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
            enrich: EnrichConfig::default(),
        }
    }
}

impl Settings {
    /// Get the full path to the database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Get the full path to the search index directory.
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(&self.index_dirname)
    }

    /// Build the retry policy for remote calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(self.index_path())?;
        Ok(())
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target directory for data.
    #[serde(default)]
    pub target: Option<String>,
    /// Database filename.
    #[serde(default)]
    pub database: Option<String>,
    /// Seconds between scheduled runs.
    #[serde(default)]
    pub run_interval_secs: Option<u64>,
    /// Related videos attached to each entry.
    #[serde(default)]
    pub num_related: Option<usize>,
    /// Retry attempts per remote call.
    #[serde(default)]
    pub retry_max_attempts: Option<u32>,
    /// Base backoff delay in milliseconds.
    #[serde(default)]
    pub retry_base_delay_ms: Option<u64>,
    /// Enrichment model configuration.
    #[serde(default)]
    pub enrich: Option<EnrichConfig>,
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields the
    /// defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref target) = self.target {
            settings.data_dir = PathBuf::from(target);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(interval) = self.run_interval_secs {
            settings.run_interval_secs = interval;
        }
        if let Some(num_related) = self.num_related {
            settings.num_related = num_related;
        }
        if let Some(attempts) = self.retry_max_attempts {
            settings.retry_max_attempts = attempts;
        }
        if let Some(delay) = self.retry_base_delay_ms {
            settings.retry_base_delay_ms = delay;
        }
        if let Some(ref enrich) = self.enrich {
            settings.enrich = enrich.clone();
        }
    }
}

/// Build effective settings from an optional config file plus environment.
pub fn load_settings(config_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();

    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("docuseek.toml"));
    Config::load(&path)?.apply_to_settings(&mut settings);

    if let Ok(data_dir) = std::env::var("DOCUSEEK_DATA_DIR") {
        settings.data_dir = PathBuf::from(data_dir);
    }
    settings.api_key = std::env::var("YOUTUBE_API_KEY").unwrap_or_default();

    Ok(settings)
}

/// Settings for commands that actually talk to the platform.
pub fn require_api_key(settings: &Settings) -> Result<()> {
    if settings.api_key.is_empty() {
        return Err(Error::Config(
            "YOUTUBE_API_KEY is not set (put it in the environment or a .env file)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docuseek.toml");
        fs::write(
            &path,
            r#"
target = "/srv/docuseek"
run_interval_secs = 3600
retry_max_attempts = 5

[enrich]
enabled = true
model = "llama3.2:1b"
"#,
        )
        .unwrap();

        let mut settings = Settings::default();
        Config::load(&path).unwrap().apply_to_settings(&mut settings);

        assert_eq!(settings.data_dir, PathBuf::from("/srv/docuseek"));
        assert_eq!(settings.run_interval_secs, 3600);
        assert_eq!(settings.retry_max_attempts, 5);
        assert!(settings.enrich.enabled);
        assert_eq!(settings.enrich.model, "llama3.2:1b");
        // untouched defaults survive
        assert_eq!(settings.database_filename, "docuseek.db");
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let config = Config::load(Path::new("/definitely/not/here.toml")).unwrap();
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings);
        assert_eq!(settings.retry_max_attempts, 3);
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "run_interval_secs = \"not a number\"").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
