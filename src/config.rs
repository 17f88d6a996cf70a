use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::classify::DEFAULT_IMAGING_PREFIX;
use crate::domain::DEFAULT_EXTENSION;
use crate::error::FetchError;
use crate::poller::{DEFAULT_INTERVAL, DEFAULT_MAX_ATTEMPTS, Poller};
use crate::session::HttpSettings;

pub const CONFIG_FILE: &str = "paystub-fetch.json";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub start_url: Option<String>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub state_path: Option<String>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub poll_max_attempts: Option<u32>,
    #[serde(default)]
    pub file_extension: Option<String>,
    #[serde(default)]
    pub imaging_prefix: Option<String>,
    #[serde(default)]
    pub cookie: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub start_url: Option<Url>,
    pub output_dir: Utf8PathBuf,
    pub state_path: Utf8PathBuf,
    pub poller: Poller,
    pub file_extension: String,
    pub imaging_prefix: String,
    pub http: HttpSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Without an explicit path a missing `paystub-fetch.json` just means defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, FetchError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| FetchError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| FetchError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, FetchError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let start_url = config
            .start_url
            .map(|raw| {
                Url::parse(&raw).map_err(|err| FetchError::InvalidUrl(format!("{raw}: {err}")))
            })
            .transpose()?;

        let max_attempts = config.poll_max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(FetchError::ConfigParse(
                "poll_max_attempts must be at least 1".to_string(),
            ));
        }
        let interval = config
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_INTERVAL);

        let file_extension = config
            .file_extension
            .map(|ext| ext.trim_start_matches('.').to_string())
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        let is_valid_extension = !file_extension.is_empty()
            && file_extension.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !is_valid_extension {
            return Err(FetchError::ConfigParse(format!(
                "file_extension must be alphanumeric: {file_extension:?}"
            )));
        }

        let state_path = match config.state_path {
            Some(path) => Utf8PathBuf::from(path),
            None => default_state_path()?,
        };

        Ok(ResolvedConfig {
            schema_version,
            start_url,
            output_dir: Utf8PathBuf::from(
                config.output_dir.unwrap_or_else(|| "paystubs".to_string()),
            ),
            state_path,
            poller: Poller::new(interval, max_attempts),
            file_extension,
            imaging_prefix: config
                .imaging_prefix
                .unwrap_or_else(|| DEFAULT_IMAGING_PREFIX.to_string()),
            http: HttpSettings {
                cookie: config.cookie,
                timeout: Duration::from_secs(
                    config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
                ),
            },
        })
    }
}

pub fn default_state_path() -> Result<Utf8PathBuf, FetchError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(
                dirs.home_dir()
                    .join(".cache")
                    .join("paystub-fetch")
                    .join("state.json"),
            )
            .ok()
        })
        .ok_or_else(|| FetchError::Filesystem("unable to resolve state directory".to_string()))
}
