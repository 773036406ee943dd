// Validated runtime settings shared by every component of a store

use crate::error::{Result, StormError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const THROTTLE_RANGE: std::ops::RangeInclusive<u64> = 50..=3000;
pub const BACKUP_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 1..=24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Reject type mismatches instead of coercing.
    pub strict: bool,
    /// Stamp `_created` / `_updated` on documents.
    pub default_fields: bool,
    pub verbose: bool,
    pub data_directory: PathBuf,
    pub disk_write: bool,
    /// Debounce window for collection writes, in milliseconds.
    pub disk_write_throttle: u64,
    pub backup_files: bool,
    /// Minutes between backups.
    pub backup_interval: u64,
    pub max_backups: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            strict: true,
            default_fields: true,
            verbose: false,
            data_directory: PathBuf::from("./data"),
            disk_write: true,
            disk_write_throttle: 100,
            backup_files: true,
            backup_interval: 10,
            max_backups: 5,
        }
    }
}

impl Config {
    /// Check value ranges. Types are already guaranteed by the struct.
    pub fn validate(&self) -> Result<()> {
        if !THROTTLE_RANGE.contains(&self.disk_write_throttle) {
            return Err(StormError::Config(
                "Invalid value of \"diskWriteThrottle\". It should be between 50 and 3000 in milliseconds."
                    .into(),
            ));
        }
        if !BACKUP_INTERVAL_RANGE.contains(&self.backup_interval) {
            return Err(StormError::Config(
                "Invalid value of \"backupInterval\". It should be between 1 and 24 in minutes."
                    .into(),
            ));
        }
        if self.max_backups == 0 {
            return Err(StormError::Config(
                "Invalid value of \"maxBackups\". It should be at least 1.".into(),
            ));
        }
        Ok(())
    }

    pub fn backup_directory(&self) -> PathBuf {
        self.data_directory.join("backup")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionKind {
    Bool,
    Str,
    Int,
}

const ALLOWED: [(&str, OptionKind); 9] = [
    ("strict", OptionKind::Bool),
    ("defaultFields", OptionKind::Bool),
    ("verbose", OptionKind::Bool),
    ("dataDirectory", OptionKind::Str),
    ("diskWrite", OptionKind::Bool),
    ("diskWriteThrottle", OptionKind::Int),
    ("backupFiles", OptionKind::Bool),
    ("backupInterval", OptionKind::Int),
    ("maxBackups", OptionKind::Int),
];

fn canonical_key(key: &str) -> &str {
    match key {
        "dataFolder" => "dataDirectory",
        "throttle" => "diskWriteThrottle",
        other => other,
    }
}

fn allowed_keys() -> String {
    ALLOWED
        .iter()
        .map(|(k, _)| *k)
        .collect::<Vec<_>>()
        .join("\", \"")
}

/// Holder of the current [`Config`]. Every update is validated in full before
/// anything is replaced.
#[derive(Debug, Default)]
pub struct ConfigStore {
    current: RwLock<Config>,
}

impl ConfigStore {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(ConfigStore {
            current: RwLock::new(config),
        })
    }

    pub fn get_config(&self) -> Config {
        self.current.read().clone()
    }

    pub fn reset_config(&self) {
        *self.current.write() = Config::default();
    }

    /// Replace the configuration with the defaults overlaid by `options`.
    pub fn set_config(&self, options: &serde_json::Value) -> Result<()> {
        let options = options.as_object().ok_or_else(|| {
            StormError::Config("Invalid type of options. Expected type is \"object\"".into())
        })?;

        let mut next = Config::default();
        for (raw_key, value) in options {
            let key = canonical_key(raw_key);
            let kind = ALLOWED
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, kind)| *kind)
                .ok_or_else(|| {
                    StormError::Config(format!(
                        "Invalid \"{raw_key}\" key in options. Allowed keys: \"{}\"",
                        allowed_keys()
                    ))
                })?;
            apply_option(&mut next, key, kind, value)
                .ok_or_else(|| type_error(raw_key, kind))?;
        }
        next.validate()?;

        *self.current.write() = next;
        Ok(())
    }

    /// Apply an options file (YAML or JSON) through [`ConfigStore::set_config`].
    pub fn load_file(&self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        let options: serde_json::Value = serde_yaml::from_str(&content)?;
        self.set_config(&options)
    }
}

fn type_error(key: &str, kind: OptionKind) -> StormError {
    let expected = match kind {
        OptionKind::Bool => "boolean",
        OptionKind::Str => "string",
        OptionKind::Int => "integer",
    };
    StormError::Config(format!(
        "Invalid type of \"{key}\" key in options. Expected type is {expected}"
    ))
}

fn apply_option(
    config: &mut Config,
    key: &str,
    kind: OptionKind,
    value: &serde_json::Value,
) -> Option<()> {
    match kind {
        OptionKind::Bool => {
            let b = value.as_bool()?;
            match key {
                "strict" => config.strict = b,
                "defaultFields" => config.default_fields = b,
                "verbose" => config.verbose = b,
                "diskWrite" => config.disk_write = b,
                "backupFiles" => config.backup_files = b,
                _ => return None,
            }
        }
        OptionKind::Str => {
            config.data_directory = PathBuf::from(value.as_str()?);
        }
        OptionKind::Int => {
            let n = value.as_u64()?;
            match key {
                "diskWriteThrottle" => config.disk_write_throttle = n,
                "backupInterval" => config.backup_interval = n,
                "maxBackups" => config.max_backups = usize::try_from(n).ok()?,
                _ => return None,
            }
        }
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let store = ConfigStore::default();
        let config = store.get_config();
        assert!(config.strict);
        assert_eq!(config.disk_write_throttle, 100);
        assert_eq!(config.max_backups, 5);
    }

    #[test]
    fn test_set_config_replaces_wholesale() {
        let store = ConfigStore::default();
        store.set_config(&json!({ "strict": false })).unwrap();
        store.set_config(&json!({ "verbose": true })).unwrap();
        let config = store.get_config();
        assert!(config.strict, "earlier options are not carried over");
        assert!(config.verbose);
    }

    #[test]
    fn test_aliases() {
        let store = ConfigStore::default();
        store
            .set_config(&json!({ "dataFolder": "/tmp/x", "throttle": 250 }))
            .unwrap();
        let config = store.get_config();
        assert_eq!(config.data_directory, PathBuf::from("/tmp/x"));
        assert_eq!(config.disk_write_throttle, 250);
    }

    #[test]
    fn test_rejects_unknown_key_without_changes() {
        let store = ConfigStore::default();
        store.set_config(&json!({ "verbose": true })).unwrap();
        let err = store
            .set_config(&json!({ "strict": false, "colour": "blue" }))
            .unwrap_err();
        assert!(err.to_string().contains("colour"));
        let config = store.get_config();
        assert!(config.verbose);
        assert!(config.strict);
    }

    #[test]
    fn test_rejects_wrong_type() {
        let store = ConfigStore::default();
        assert!(store.set_config(&json!({ "strict": "yes" })).is_err());
        assert!(store.set_config(&json!({ "throttle": 100.5 })).is_err());
        assert!(store.set_config(&json!([1])).is_err());
    }

    #[test]
    fn test_rejects_out_of_range() {
        let store = ConfigStore::default();
        assert!(store.set_config(&json!({ "diskWriteThrottle": 10 })).is_err());
        assert!(store.set_config(&json!({ "diskWriteThrottle": 3001 })).is_err());
        assert!(store.set_config(&json!({ "backupInterval": 0 })).is_err());
        assert!(store.set_config(&json!({ "backupInterval": 25 })).is_err());
        assert!(store.set_config(&json!({ "maxBackups": 0 })).is_err());
        assert!(store.set_config(&json!({ "backupInterval": 24 })).is_ok());
    }

    #[test]
    fn test_reset_config() {
        let store = ConfigStore::default();
        store.set_config(&json!({ "strict": false })).unwrap();
        store.reset_config();
        assert_eq!(store.get_config(), Config::default());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stormdb.yaml");
        std::fs::write(&path, "strict: false\nmaxBackups: 3\n").unwrap();
        let store = ConfigStore::default();
        store.load_file(&path).unwrap();
        let config = store.get_config();
        assert!(!config.strict);
        assert_eq!(config.max_backups, 3);
    }
}
