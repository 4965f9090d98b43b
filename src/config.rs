//! Configuration management for savekeeper
//!
//! `Settings` holds the immutable policy values the backup engine runs with.
//! `AppConfig` is the on-disk TOML file those settings come from, with
//! environment variables taking precedence over file values.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BLACKLIST: &str = r".*\.bak";
pub const DEFAULT_BACKUP_ROOT: &str = "backup-data";
pub const DEFAULT_MAX_BACKUP_FILE_COUNT: usize = 25;
pub const DEFAULT_BLOCK_TIME_MS: u64 = 2000;

/// Policy values shared by the coordinator and every backup manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Whether the feedback collaborator should make noise
    pub play_sounds: bool,
    /// Upper bound on retained snapshots per file (at least 1)
    pub max_backup_file_count: usize,
    /// Cooldown after an accepted backup
    pub backup_block_time_after_backup_ms: u64,
    /// Cooldown after a successful restore
    pub backup_block_time_after_restore_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            play_sounds: true,
            max_backup_file_count: DEFAULT_MAX_BACKUP_FILE_COUNT,
            backup_block_time_after_backup_ms: DEFAULT_BLOCK_TIME_MS,
            backup_block_time_after_restore_ms: DEFAULT_BLOCK_TIME_MS,
        }
    }
}

/// Everything persisted in `savekeeper.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub watch_dir: Option<PathBuf>,
    /// Semicolon separated regular expressions matched against bare file names
    pub file_name_blacklist: String,
    pub play_sounds: bool,
    pub max_backup_file_count: usize,
    pub backup_block_time_after_backup_ms: u64,
    pub backup_block_time_after_restore_ms: u64,
    pub backup_root: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            watch_dir: None,
            file_name_blacklist: DEFAULT_BLACKLIST.to_string(),
            play_sounds: settings.play_sounds,
            max_backup_file_count: settings.max_backup_file_count,
            backup_block_time_after_backup_ms: settings.backup_block_time_after_backup_ms,
            backup_block_time_after_restore_ms: settings.backup_block_time_after_restore_ms,
            backup_root: PathBuf::from(DEFAULT_BACKUP_ROOT),
        }
    }
}

impl AppConfig {
    /// Load the file at `path`, then apply environment overrides.
    ///
    /// Never fails: a missing or broken file falls back to defaults.
    pub fn load(path: &Path) -> Self {
        Self::load_with(path, unicode_vars(std::env::vars_os()))
    }

    fn load_with<I>(path: &Path, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = match Self::read_file(path) {
            Ok(Some(config)) => config,
            Ok(None) => {
                tracing::info!("No config file at {}, using defaults", path.display());
                Self::default()
            }
            Err(err) => {
                tracing::warn!("Could not read config from disk: {:#}", err);
                Self::default()
            }
        };
        config.apply_overrides(vars);
        config.normalize();
        config
    }

    fn read_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(config))
    }

    /// Write the effective configuration back so users can discover every key.
    pub fn save(&self, path: &Path) {
        if let Err(err) = self.write_file(path) {
            tracing::warn!("Could not write config to disk: {:#}", err);
        }
    }

    fn write_file(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, raw).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Apply `(name, value)` overrides. Names match field names ignoring case,
    /// blank values are skipped.
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match name.to_ascii_lowercase().as_str() {
                "watch_dir" => self.watch_dir = Some(PathBuf::from(value)),
                "file_name_blacklist" => self.file_name_blacklist = value.to_string(),
                "play_sounds" => override_parsed(&name, value, &mut self.play_sounds),
                "max_backup_file_count" => {
                    override_parsed(&name, value, &mut self.max_backup_file_count)
                }
                "backup_block_time_after_backup_ms" => {
                    override_parsed(&name, value, &mut self.backup_block_time_after_backup_ms)
                }
                "backup_block_time_after_restore_ms" => {
                    override_parsed(&name, value, &mut self.backup_block_time_after_restore_ms)
                }
                "backup_root" => self.backup_root = PathBuf::from(value),
                _ => {}
            }
        }
    }

    fn normalize(&mut self) {
        if self.file_name_blacklist.trim().is_empty() {
            self.file_name_blacklist = DEFAULT_BLACKLIST.to_string();
        }
    }

    /// Policy values for the engine. A zero backup count is raised to one.
    pub fn settings(&self) -> Settings {
        if self.max_backup_file_count == 0 {
            tracing::warn!("max_backup_file_count must be at least 1, using 1");
        }
        Settings {
            play_sounds: self.play_sounds,
            max_backup_file_count: self.max_backup_file_count.max(1),
            backup_block_time_after_backup_ms: self.backup_block_time_after_backup_ms,
            backup_block_time_after_restore_ms: self.backup_block_time_after_restore_ms,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_backup_file_count == 0 {
            return Err("max_backup_file_count must be greater than 0".to_string());
        }

        if self.backup_root.as_os_str().is_empty() {
            return Err("backup_root must not be empty".to_string());
        }

        Ok(())
    }
}

/// Environment entries that are valid Unicode; anything else cannot name a
/// setting and is skipped.
fn unicode_vars<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

fn override_parsed<T: FromStr>(name: &str, value: &str, slot: &mut T) {
    match value.parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!("Ignoring unparsable value '{}' for {}", value, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.max_backup_file_count, 25);
        assert_eq!(config.backup_block_time_after_backup_ms, 2000);
        assert_eq!(config.backup_block_time_after_restore_ms, 2000);
        assert_eq!(config.file_name_blacklist, r".*\.bak");
        assert!(config.play_sounds);
        assert!(config.watch_dir.is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        config.max_backup_file_count = 0;
        assert!(config.validate().is_err());
        assert_eq!(config.settings().max_backup_file_count, 1);
    }

    #[test]
    fn test_overrides_are_case_insensitive_and_skip_blank() {
        let mut config = AppConfig::default();
        config.apply_overrides(vars(&[
            ("MAX_BACKUP_FILE_COUNT", "7"),
            ("Play_Sounds", "false"),
            ("WATCH_DIR", "   "),
            ("BACKUP_BLOCK_TIME_AFTER_RESTORE_MS", "not-a-number"),
            ("UNRELATED", "x"),
        ]));

        assert_eq!(config.max_backup_file_count, 7);
        assert!(!config.play_sounds);
        assert!(config.watch_dir.is_none());
        assert_eq!(config.backup_block_time_after_restore_ms, 2000);
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("savekeeper.toml");

        let mut config = AppConfig::default();
        config.watch_dir = Some(dir.path().to_path_buf());
        config.max_backup_file_count = 3;
        config.save(&path);

        let loaded = AppConfig::read_file(&path)
            .expect("Failed to read config")
            .expect("Config file should exist");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("savekeeper.toml");
        std::fs::write(&path, "max_backup_file_count = 4\nfile_name_blacklist = \"\"\n").unwrap();

        let mut config = AppConfig::read_file(&path).unwrap().unwrap();
        config.normalize();

        assert_eq!(config.max_backup_file_count, 4);
        assert_eq!(config.backup_block_time_after_backup_ms, 2000);
        assert_eq!(config.file_name_blacklist, DEFAULT_BLACKLIST);
    }

    #[test]
    fn test_broken_file_falls_back_to_defaults() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("savekeeper.toml");
        std::fs::write(&path, "max_backup_file_count = \"many\"").unwrap();

        assert!(AppConfig::read_file(&path).is_err());
        let config = AppConfig::load_with(&path, Vec::new());
        assert_eq!(config.max_backup_file_count, 25);
    }

    #[test]
    fn test_environment_overrides_apply_after_file() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("savekeeper.toml");
        std::fs::write(&path, "max_backup_file_count = 4\nplay_sounds = true\n").unwrap();

        let config = AppConfig::load_with(&path, vars(&[("max_backup_file_count", "9")]));

        assert_eq!(config.max_backup_file_count, 9);
        assert!(config.play_sounds);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_unicode_environment_is_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let env = vec![
            (OsString::from_vec(b"JUNK_\xffVAR".to_vec()), OsString::from("1")),
            (OsString::from("MAX_BACKUP_FILE_COUNT"), OsString::from_vec(b"\xfe".to_vec())),
            (OsString::from("MAX_BACKUP_FILE_COUNT"), OsString::from("12")),
        ];

        let mut config = AppConfig::default();
        config.apply_overrides(unicode_vars(env));
        assert_eq!(config.max_backup_file_count, 12);
    }
}
