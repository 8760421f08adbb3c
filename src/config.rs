// src/config.rs
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "figcomp.toml";

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub autosave: AutosaveConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AutosaveConfig {
    /// Fine tick: external-change detection.
    pub tick_ms: u64,
    /// Backup decisions run on every Nth fine tick.
    pub coarse_every: u32,
    /// Edits since the last backup that force a new one.
    pub edit_threshold: u64,
    /// Age of the last backup that forces a new one once anything changed.
    pub max_staleness_secs: i64,
    /// How long shutdown waits for an in-flight job before cancelling it.
    pub shutdown_wait_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            tick_ms:            2000,
            coarse_every:       10,
            edit_threshold:     10,
            max_staleness_secs: 120,
            shutdown_wait_ms:   2000,
        }
    }
}

impl AutosaveConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.shutdown_wait_ms)
    }

    pub fn max_staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_staleness_secs)
    }
}

impl Config {
    /// Missing file → defaults; unreadable or malformed file → error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(ConfigError::Read { path: path.to_path_buf(), source }),
        };
        let mut cfg: Config = toml::from_str(&raw)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        cfg.autosave.coarse_every = cfg.autosave.coarse_every.max(1);
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(cfg.autosave.coarse_every, 10);
        assert_eq!(cfg.autosave.edit_threshold, 10);
        assert_eq!(cfg.autosave.max_staleness(), chrono::Duration::seconds(120));
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[autosave]\ntick_ms = 500\ncoarse_every = 0\n").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.autosave.tick(), Duration::from_millis(500));
        assert_eq!(cfg.autosave.coarse_every, 1);
        assert_eq!(cfg.autosave.shutdown_wait_ms, 2000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[autosave\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }
}
