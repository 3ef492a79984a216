//! Layered configuration: built-in defaults, TOML file, environment, CLI flags.

use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use trackhound_core::{PipelineConfig, TimeoutPolicy};

/// Default base URL of the transfer service.
pub const DEFAULT_UPSTREAM_URL: &str = "http://localhost:5030";

const ENV_PREFIX: &str = "TRACKHOUND_";
const APP_DIR: &str = "trackhound";

/// TOML-backed file configuration; every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Download history database.
    pub db_path: Option<PathBuf>,
    /// Single-instance lock file.
    pub lock_file: Option<PathBuf>,
    /// Base URL of the transfer service.
    pub upstream_url: Option<String>,
    /// API key sent to the transfer service.
    pub upstream_api_key: Option<String>,
    /// Where the transfer service stores completed files.
    pub download_dir: Option<PathBuf>,
    /// Hours a cached search result stays valid.
    pub cache_ttl_hours: Option<u64>,
    /// Sweep expired cache rows on every cache read.
    pub cache_auto_cleanup: Option<bool>,
    /// Minimum spacing between upstream calls, in seconds.
    pub min_request_interval_secs: Option<f64>,
    /// Attempts per upstream search, including the first.
    pub max_retries: Option<u32>,
    /// Base delay for exponential retry backoff, in seconds.
    pub backoff_base_secs: Option<f64>,
    /// Pause after a rate-limit signal or repeated failures.
    pub overload_cooldown_secs: Option<u64>,
    /// Consecutive failures that trigger the overload cooldown.
    pub failure_threshold: Option<u32>,
    /// Age after which a lock file is stale.
    pub lock_timeout_secs: Option<u64>,
    /// Upper bound for monitoring one transfer.
    pub download_timeout_secs: Option<u64>,
    /// Interval between transfer status polls.
    pub poll_interval_secs: Option<u64>,
    /// Time a transfer may sit in the remote queue.
    pub remote_queue_grace_secs: Option<u64>,
    /// Similarity in `[0, 1]` required for a fuzzy duplicate.
    pub fuzzy_threshold: Option<f64>,
    /// Pause between lines that reached the upstream service.
    pub inter_download_pause_secs: Option<f64>,
    /// Time a search collects responses before they are read.
    pub search_wait_secs: Option<u64>,
    /// `assume_success` or `mark_error`.
    pub timeout_policy: Option<String>,
    /// Label written into the lock file.
    pub process_tag: Option<String>,
}

impl FileConfig {
    /// Parses TOML text, rejecting unknown keys.
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Reads and parses a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::parse(&raw)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))
    }

    /// Overrides keys from `TRACKHOUND_<KEY>` variables returned by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let lookup = |key: &str| {
            lookup(&format!("{ENV_PREFIX}{}", key.to_ascii_uppercase()))
                .filter(|value| !value.trim().is_empty())
        };
        env_override(&lookup, "db_path", &mut self.db_path)?;
        env_override(&lookup, "lock_file", &mut self.lock_file)?;
        env_override(&lookup, "upstream_url", &mut self.upstream_url)?;
        env_override(&lookup, "upstream_api_key", &mut self.upstream_api_key)?;
        env_override(&lookup, "download_dir", &mut self.download_dir)?;
        env_override(&lookup, "cache_ttl_hours", &mut self.cache_ttl_hours)?;
        env_override(&lookup, "cache_auto_cleanup", &mut self.cache_auto_cleanup)?;
        env_override(
            &lookup,
            "min_request_interval_secs",
            &mut self.min_request_interval_secs,
        )?;
        env_override(&lookup, "max_retries", &mut self.max_retries)?;
        env_override(&lookup, "backoff_base_secs", &mut self.backoff_base_secs)?;
        env_override(
            &lookup,
            "overload_cooldown_secs",
            &mut self.overload_cooldown_secs,
        )?;
        env_override(&lookup, "failure_threshold", &mut self.failure_threshold)?;
        env_override(&lookup, "lock_timeout_secs", &mut self.lock_timeout_secs)?;
        env_override(
            &lookup,
            "download_timeout_secs",
            &mut self.download_timeout_secs,
        )?;
        env_override(&lookup, "poll_interval_secs", &mut self.poll_interval_secs)?;
        env_override(
            &lookup,
            "remote_queue_grace_secs",
            &mut self.remote_queue_grace_secs,
        )?;
        env_override(&lookup, "fuzzy_threshold", &mut self.fuzzy_threshold)?;
        env_override(
            &lookup,
            "inter_download_pause_secs",
            &mut self.inter_download_pause_secs,
        )?;
        env_override(&lookup, "search_wait_secs", &mut self.search_wait_secs)?;
        env_override(&lookup, "timeout_policy", &mut self.timeout_policy)?;
        env_override(&lookup, "process_tag", &mut self.process_tag)?;
        Ok(())
    }

    /// Builds a validated [`PipelineConfig`] from defaults plus these values.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::default();
        if let Some(hours) = self.cache_ttl_hours {
            config.cache_ttl = Duration::from_secs(hours.saturating_mul(3600));
        }
        if let Some(value) = self.cache_auto_cleanup {
            config.cache_auto_cleanup = value;
        }
        if let Some(secs) = self.min_request_interval_secs {
            config.min_request_interval = fractional_secs("min_request_interval_secs", secs)?;
        }
        if let Some(value) = self.max_retries {
            config.max_retries = value;
        }
        if let Some(secs) = self.backoff_base_secs {
            config.backoff_base = fractional_secs("backoff_base_secs", secs)?;
        }
        if let Some(secs) = self.overload_cooldown_secs {
            config.overload_cooldown = Duration::from_secs(secs);
        }
        if let Some(value) = self.failure_threshold {
            config.failure_threshold = value;
        }
        if let Some(secs) = self.lock_timeout_secs {
            config.lock_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.download_timeout_secs {
            config.download_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.poll_interval_secs {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.remote_queue_grace_secs {
            config.remote_queue_grace = Duration::from_secs(secs);
        }
        if let Some(value) = self.fuzzy_threshold {
            config.fuzzy_threshold = value;
        }
        if let Some(secs) = self.inter_download_pause_secs {
            config.inter_download_pause = fractional_secs("inter_download_pause_secs", secs)?;
        }
        if let Some(secs) = self.search_wait_secs {
            config.search_wait = Duration::from_secs(secs);
        }
        if let Some(label) = &self.timeout_policy {
            config.timeout_policy = label.parse::<TimeoutPolicy>()?;
        }
        if let Some(tag) = &self.process_tag {
            if tag.trim().is_empty() {
                bail!("Invalid config value for `process_tag`: must not be empty");
            }
            config.process_tag = tag.trim().to_string();
        }
        config.download_dir.clone_from(&self.download_dir);

        config.validate()?;
        Ok(config)
    }
}

fn env_override<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut Option<T>,
) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(());
    };
    let value = raw.trim().parse::<T>().map_err(|e| {
        anyhow!(
            "Invalid value for {ENV_PREFIX}{}: '{raw}' ({e})",
            key.to_ascii_uppercase()
        )
    })?;
    *slot = Some(value);
    Ok(())
}

fn fractional_secs(field: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow!("Invalid config value for `{field}`: {secs}. Expected seconds >= 0"))
}

/// Values given on the command line; they win over every other layer.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub db_path: Option<PathBuf>,
    pub lock_file: Option<PathBuf>,
    pub upstream_url: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub timeout_policy: Option<TimeoutPolicy>,
}

/// Everything the binary needs to build the pipeline.
#[derive(Debug, Clone)]
pub struct Settings {
    pub pipeline: PipelineConfig,
    pub db_path: PathBuf,
    pub lock_file: PathBuf,
    pub upstream_url: String,
    pub upstream_api_key: Option<String>,
    /// Config file that was read, if any.
    pub config_path: Option<PathBuf>,
}

impl Settings {
    /// Resolves settings from a parsed file config, an environment lookup and
    /// CLI overrides.
    pub fn resolve(
        mut file: FileConfig,
        config_path: Option<PathBuf>,
        lookup: impl Fn(&str) -> Option<String>,
        overrides: CliOverrides,
    ) -> Result<Self> {
        file.apply_env(&lookup)?;
        if let Some(dir) = overrides.download_dir {
            file.download_dir = Some(dir);
        }

        let mut pipeline = file.pipeline_config()?;
        if let Some(policy) = overrides.timeout_policy {
            pipeline.timeout_policy = policy;
        }

        let db_path = overrides
            .db_path
            .or(file.db_path)
            .unwrap_or_else(|| default_data_dir(&lookup).join("trackhound.db"));
        let lock_file = overrides.lock_file.or(file.lock_file).unwrap_or_else(|| {
            db_path
                .parent()
                .map_or_else(|| PathBuf::from("trackhound.lock"), |dir| dir.join("trackhound.lock"))
        });
        let upstream_url = overrides
            .upstream_url
            .or(file.upstream_url)
            .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string());

        Ok(Self {
            pipeline,
            db_path,
            lock_file,
            upstream_url,
            upstream_api_key: file.upstream_api_key,
            config_path,
        })
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/trackhound/config.toml`
/// 2. `$HOME/.config/trackhound/config.toml`
pub fn resolve_default_config_path(lookup: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(xdg) = non_empty(lookup("XDG_CONFIG_HOME")) {
        return Some(PathBuf::from(xdg).join(APP_DIR).join("config.toml"));
    }
    let home = non_empty(lookup("HOME"))?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml"),
    )
}

/// `$XDG_DATA_HOME/trackhound`, `$HOME/.local/share/trackhound`, or `.`.
fn default_data_dir(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(xdg) = non_empty(lookup("XDG_DATA_HOME")) {
        return PathBuf::from(xdg).join(APP_DIR);
    }
    non_empty(lookup("HOME")).map_or_else(
        || PathBuf::from("."),
        |home| PathBuf::from(home).join(".local").join("share").join(APP_DIR),
    )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Loads settings for this process.
///
/// An explicit `--config` path must exist; the default path is optional.
pub fn load_settings(explicit: Option<&Path>, overrides: CliOverrides) -> Result<Settings> {
    let lookup = |key: &str| env::var(key).ok();
    let (file, path) = match explicit {
        Some(path) => (FileConfig::load(path)?, Some(path.to_path_buf())),
        None => match resolve_default_config_path(lookup) {
            Some(path) if path.exists() => (FileConfig::load(&path)?, Some(path)),
            _ => (FileConfig::default(), None),
        },
    };
    Settings::resolve(file, path, lookup, overrides)
}
