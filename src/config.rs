//! Configuration file for ~/.config/gator/config.toml.
//!
//! Read once at startup and handed to commands as part of their state.
//! `register` and `login` change `current_user_name` and write the file back.
//! A missing or empty file yields `Config::default()`.
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::DEFAULT_FETCH_TIMEOUT;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid interval '{0}': expected e.g. 30s, 5m, 1h30m or whole seconds")]
    InvalidInterval(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path. Defaults to `gator.db` beside the config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_url: Option<String>,

    /// User that `login`/`register` last selected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_user_name: Option<String>,

    pub agg: AggConfig,
}

/// `[agg]` table: scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggConfig {
    /// Time between ticks, in [`parse_interval`] syntax
    pub interval: String,

    /// Feeds ingested per tick
    pub feeds_per_tick: usize,

    /// Bound on a single feed fetch
    pub fetch_timeout_secs: u64,
}

impl Default for AggConfig {
    fn default() -> Self {
        Self {
            interval: "1m".to_string(),
            feeds_per_tick: 1,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
        }
    }
}

impl AggConfig {
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        parse_interval(&self.interval)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }
}

const KNOWN_KEYS: [&str; 3] = ["db_url", "current_user_name", "agg"];
const KNOWN_AGG_KEYS: [&str; 3] = ["interval", "feeds_per_tick", "fetch_timeout_secs"];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(&content)?;
        tracing::debug!(
            path = %path.display(),
            user = ?config.current_user_name,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Write the configuration to `path` atomically.
    ///
    /// The content goes to a uniquely named temp file in the same directory,
    /// is synced, then renamed over the destination, so readers see either the
    /// old file or the new one.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        use std::time::{SystemTime, UNIX_EPOCH};
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let temp_path = path.with_extension(format!("tmp.{:016x}", suffix));

        let result = (|| {
            let mut temp_file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)?;
            temp_file.write_all(content.as_bytes())?;
            temp_file.sync_all()?;
            drop(temp_file);

            #[cfg(windows)]
            if path.exists() {
                std::fs::remove_file(path)?;
            }

            std::fs::rename(&temp_path, path)
        })();

        if let Err(e) = result {
            let _ = std::fs::remove_file(&temp_path);
            return Err(ConfigError::Io(e));
        }

        tracing::debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Select `name` as the current user and persist the change.
    pub fn set_user(&mut self, name: &str, path: &Path) -> Result<(), ConfigError> {
        self.current_user_name = Some(name.to_string());
        self.save(path)
    }

    /// Database path: `db_url` if set, else `gator.db` next to the config file.
    pub fn db_path(&self, config_path: &Path) -> PathBuf {
        match &self.db_url {
            Some(url) if !url.trim().is_empty() => PathBuf::from(url),
            _ => config_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("gator.db"),
        }
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    for key in raw.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }
    if let Some(toml::Value::Table(agg)) = raw.get("agg") {
        for key in agg.keys() {
            if !KNOWN_AGG_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %format!("agg.{}", key), "Unknown key in config file, ignoring");
            }
        }
    }
}

/// Parse a human interval: `30s`, `5m`, `1h30m`, `250ms`, or whole seconds (`60`).
///
/// Zero-length intervals are rejected.
pub fn parse_interval(raw: &str) -> Result<Duration, ConfigError> {
    let s = raw.trim();
    let invalid = || ConfigError::InvalidInterval(raw.to_string());

    if s.is_empty() {
        return Err(invalid());
    }

    let total = if s.bytes().all(|b| b.is_ascii_digit()) {
        Duration::from_secs(s.parse().map_err(|_| invalid())?)
    } else {
        let mut total = Duration::ZERO;
        let mut rest = s;
        while !rest.is_empty() {
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            if digits == 0 {
                return Err(invalid());
            }
            let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
            rest = &rest[digits..];

            let unit_len = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
            let part = match &rest[..unit_len] {
                "ms" => Duration::from_millis(value),
                "s" => Duration::from_secs(value),
                "m" => Duration::from_secs(value.saturating_mul(60)),
                "h" => Duration::from_secs(value.saturating_mul(3600)),
                _ => return Err(invalid()),
            };
            rest = &rest[unit_len..];
            total = total.saturating_add(part);
        }
        total
    };

    if total.is_zero() {
        return Err(invalid());
    }
    Ok(total)
}

// ============================================================================
// Tests
// ============================================================================
