//! Application configuration.
//!
//! A JSON file resolved from `--config`, `$TIMECAPSULE_CONFIG`, or the
//! platform config directory. Keys are generated once by `timecapsule init`
//! and validated at startup; the process refuses to run without them.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use timecapsule_core::EngineConfig;

/// The two base64-encoded 256-bit keys.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeysSection {
    /// AES-256 key for field encryption.
    pub field_key: String,
    /// HMAC key for blind-index digests.
    pub index_key: String,
}

/// Top-level configuration file contents.
#[derive(Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path of the SQLite database file.
    pub database_path: String,
    /// Directory the outbox delivery adapter writes rendered emails to.
    pub outbox_dir: String,
    /// Key material.
    pub keys: KeysSection,
    /// Engine tunables.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Seconds between scheduler ticks in `watch` mode.
    #[serde(default = "default_watch_interval_secs")]
    pub watch_interval_secs: u64,
}

const fn default_watch_interval_secs() -> u64 {
    60
}

impl AppConfig {
    /// Resolve the configuration file path.
    #[must_use]
    pub fn path(explicit: Option<&Path>) -> PathBuf {
        explicit.map_or_else(
            || {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("timecapsule")
                    .join("config.json")
            },
            Path::to_path_buf,
        )
    }

    /// Load and parse the configuration file.
    ///
    /// # Errors
    ///
    /// Fails when the file is missing or not valid JSON.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = Self::path(explicit);
        let raw = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "could not read config at {} (run `timecapsule init` first)",
                path.display()
            )
        })?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }

    /// Generate keys and write a fresh configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file already exists (unless `force`) or cannot be
    /// written.
    pub fn init(explicit: Option<&Path>, force: bool) -> anyhow::Result<PathBuf> {
        let path = Self::path(explicit);
        if path.exists() && !force {
            bail!(
                "config already exists at {} (use --force to overwrite)",
                path.display()
            );
        }

        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("timecapsule");

        let config = Self {
            database_path: data_dir.join("timecapsule.db").to_string_lossy().into_owned(),
            outbox_dir: data_dir.join("outbox").to_string_lossy().into_owned(),
            keys: KeysSection {
                field_key: random_key(),
                index_key: random_key(),
            },
            engine: EngineConfig::default(),
            watch_interval_secs: default_watch_interval_secs(),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("could not create {}", parent.display()))?;
        }
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("could not create {}", data_dir.display()))?;

        let rendered = serde_json::to_string_pretty(&config)?;
        std::fs::write(&path, rendered)
            .with_context(|| format!("could not write {}", path.display()))?;

        Ok(path)
    }
}

/// Fresh random 256-bit key, base64-encoded.
fn random_key() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let path = AppConfig::path(Some(Path::new("/tmp/custom.json")));
        assert_eq!(path, PathBuf::from("/tmp/custom.json"));
    }

    #[test]
    fn random_keys_differ() {
        assert_ne!(random_key(), random_key());
    }

    #[test]
    fn generated_keys_decode_to_32_bytes() {
        let key = random_key();
        assert_eq!(BASE64.decode(key).unwrap().len(), 32);
    }

    #[test]
    fn init_then_load_round_trips() {
        let dir = std::env::temp_dir().join("timecapsule-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::remove_file(&path).ok();

        let written = AppConfig::init(Some(&path), false).unwrap();
        assert_eq!(written, path);

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_ne!(config.keys.field_key, config.keys.index_key);
        assert_eq!(config.watch_interval_secs, 60);

        // Second init without --force refuses to clobber
        assert!(AppConfig::init(Some(&path), false).is_err());
        assert!(AppConfig::init(Some(&path), true).is_ok());

        std::fs::remove_file(&path).ok();
    }
}
