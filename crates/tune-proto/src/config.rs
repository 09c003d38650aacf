use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Transport status poll cadence.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long acquiring a sound may take before it counts as failed.
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CatalogSource {
    #[default]
    S3,
    M3u,
}

/// Where the track list comes from.  Credentials never live here; a bucket
/// that requires them is out of reach of the unsigned lister.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub source: CatalogSource,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Base for public object URLs.  Defaults to
    /// `https://{bucket}.s3.amazonaws.com`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Path or http(s) URL of an m3u playlist (`source = "m3u"`).
    #[serde(default)]
    pub m3u: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            load_timeout_secs: default_load_timeout_secs(),
            volume: default_volume(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            source: CatalogSource::default(),
            bucket: String::new(),
            prefix: default_prefix(),
            region: default_region(),
            endpoint: None,
            m3u: None,
        }
    }
}

impl CatalogConfig {
    /// Base URL objects are served from.
    pub fn public_base(&self) -> String {
        match self.endpoint.as_deref() {
            Some(endpoint) if !endpoint.is_empty() => endpoint.trim_end_matches('/').to_string(),
            _ => format!("https://{}.s3.amazonaws.com", self.bucket),
        }
    }

    /// ListObjectsV2 endpoint for the configured bucket.
    pub fn list_url(&self) -> String {
        format!("https://{}.s3.{}.amazonaws.com/", self.bucket, self.region)
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_load_timeout_secs() -> u64 {
    15
}

fn default_volume() -> f32 {
    0.8
}

fn default_prefix() -> String {
    "music/".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Config {
    /// Load the config file (writing defaults on first run) and apply
    /// environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            let config = Self::default();
            config.save()?;
            config
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Override catalog identity from the environment.  `lookup` is
    /// `std::env::var` in production.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bucket) = lookup("TUNE_BUCKET") {
            self.catalog.bucket = bucket;
        }
        if let Some(prefix) = lookup("TUNE_PREFIX") {
            self.catalog.prefix = prefix;
        }
        if let Some(region) = lookup("TUNE_REGION") {
            self.catalog.region = region;
        }
        if let Some(endpoint) = lookup("TUNE_ENDPOINT") {
            self.catalog.endpoint = Some(endpoint);
        }
        if let Some(m3u) = lookup("TUNE_M3U") {
            self.catalog.m3u = Some(m3u);
            self.catalog.source = CatalogSource::M3u;
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
