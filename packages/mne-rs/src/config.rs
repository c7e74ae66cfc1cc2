//! Runtime configuration.
//!
//! Values come from the process environment first and then from a JSON file
//! stored under `~/.mne/mne-rs.json`. Setting `MNE_DONTWRITE_HOME` moves that
//! file into the system temp directory so test runs never touch `$HOME`.

use crate::error::Result;
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Stim channel used by `find_events` when nothing else is configured.
pub const DEFAULT_STIM_CHANNEL: &str = "STI 014";

const CONFIG_DIR_NAME: &str = ".mne";
const CONFIG_FILE_NAME: &str = "mne-rs.json";

/// Keys understood by the library. Others may still be stored.
pub const KNOWN_CONFIG_KEYS: &[&str] = &[
    "MNE_STIM_CHANNEL",
    "MNE_LOGGING_LEVEL",
    "MNE_DONTWRITE_HOME",
    "MNE_SKIP_TESTING_DATASET_TESTS",
    "MNE_DATA",
    "MNE_ROOT",
    "FREESURFER_HOME",
    "NEUROMAG2FT_ROOT",
];

/// Parse the boolean spellings accepted in environment variables.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Map an `MNE_LOGGING_LEVEL` value onto a `log` level filter.
pub fn logging_level_from_str(value: &str) -> log::LevelFilter {
    match value.trim().to_ascii_uppercase().as_str() {
        "DEBUG" => log::LevelFilter::Debug,
        "INFO" => log::LevelFilter::Info,
        "WARNING" | "WARN" => log::LevelFilter::Warn,
        "ERROR" | "CRITICAL" => log::LevelFilter::Error,
        "TRACE" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Warn,
    }
}

/// Directory holding the JSON config file.
pub fn config_dir() -> PathBuf {
    let dont_write_home = std::env::var("MNE_DONTWRITE_HOME")
        .map(|v| parse_bool(&v))
        .unwrap_or(false);

    if dont_write_home {
        return std::env::temp_dir().join("mne-rs");
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

fn read_config_file() -> Result<Map<String, Value>> {
    let path = config_path();
    if !path.exists() {
        return Ok(Map::new());
    }
    let content = std::fs::read_to_string(&path)?;
    if content.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(&content)? {
        Value::Object(map) => Ok(map),
        _ => {
            log::warn!("Ignoring malformed config file {:?}", path);
            Ok(Map::new())
        }
    }
}

/// Look up a configuration value. The environment wins over the file.
pub fn get_config(key: &str) -> Result<Option<String>> {
    if let Ok(value) = std::env::var(key) {
        return Ok(Some(value));
    }

    let map = read_config_file()?;
    Ok(map.get(key).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }))
}

/// Store `value` under `key` in the config file; `None` removes the key.
pub fn set_config(key: &str, value: Option<&str>) -> Result<()> {
    if !KNOWN_CONFIG_KEYS.contains(&key) {
        log::warn!("Setting non-standard config key: {}", key);
    }

    let mut map = read_config_file()?;
    match value {
        Some(v) => {
            map.insert(key.to_string(), Value::String(v.to_string()));
        }
        None => {
            map.remove(key);
        }
    }

    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(&Value::Object(map))?;
    std::fs::write(dir.join(CONFIG_FILE_NAME), json)?;
    Ok(())
}

/// Snapshot of every known setting.
#[derive(Debug, Clone)]
pub struct MneConfig {
    pub stim_channel: String,
    pub logging_level: Option<log::LevelFilter>,
    pub dont_write_home: bool,
    pub skip_testing_dataset_tests: bool,
    pub data_path: Option<PathBuf>,
    pub mne_root: Option<PathBuf>,
    pub freesurfer_home: Option<PathBuf>,
    pub neuromag2ft_root: Option<PathBuf>,
}

impl MneConfig {
    pub fn load() -> Result<Self> {
        Ok(Self {
            stim_channel: get_config("MNE_STIM_CHANNEL")?
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_STIM_CHANNEL.to_string()),
            logging_level: get_config("MNE_LOGGING_LEVEL")?
                .map(|s| logging_level_from_str(&s)),
            dont_write_home: get_config("MNE_DONTWRITE_HOME")?
                .map(|s| parse_bool(&s))
                .unwrap_or(false),
            skip_testing_dataset_tests: get_config("MNE_SKIP_TESTING_DATASET_TESTS")?
                .map(|s| parse_bool(&s))
                .unwrap_or(false),
            data_path: get_config("MNE_DATA")?.map(PathBuf::from),
            mne_root: get_config("MNE_ROOT")?.map(PathBuf::from),
            freesurfer_home: get_config("FREESURFER_HOME")?.map(PathBuf::from),
            neuromag2ft_root: get_config("NEUROMAG2FT_ROOT")?.map(PathBuf::from),
        })
    }

    /// Location of the testing dataset, or `None` when tests should skip it.
    pub fn testing_data_path(&self) -> Option<PathBuf> {
        if self.skip_testing_dataset_tests {
            return None;
        }
        let path = self.data_path.as_ref()?.join("MNE-testing-data");
        path.is_dir().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool(" 1 "));
        assert!(parse_bool("yes"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn test_logging_levels() {
        assert_eq!(logging_level_from_str("debug"), log::LevelFilter::Debug);
        assert_eq!(logging_level_from_str("INFO"), log::LevelFilter::Info);
        assert_eq!(logging_level_from_str("WARNING"), log::LevelFilter::Warn);
        assert_eq!(logging_level_from_str("critical"), log::LevelFilter::Error);
        assert_eq!(logging_level_from_str("bogus"), log::LevelFilter::Warn);
    }

    #[test]
    fn test_skip_flag_hides_testing_data() {
        let config = MneConfig {
            stim_channel: DEFAULT_STIM_CHANNEL.to_string(),
            logging_level: None,
            dont_write_home: true,
            skip_testing_dataset_tests: true,
            data_path: Some(std::env::temp_dir()),
            mne_root: None,
            freesurfer_home: None,
            neuromag2ft_root: None,
        };
        assert!(config.testing_data_path().is_none());
    }

    #[test]
    fn test_set_get_config_round_trip() {
        std::env::set_var("MNE_DONTWRITE_HOME", "true");
        assert!(config_dir().starts_with(std::env::temp_dir()));

        let key = "MNE_RS_CONFIG_ROUND_TRIP";
        std::env::remove_var(key);
        set_config(key, Some("from-file")).unwrap();
        assert!(config_path().is_file());
        assert_eq!(get_config(key).unwrap().as_deref(), Some("from-file"));

        std::env::set_var(key, "from-env");
        assert_eq!(get_config(key).unwrap().as_deref(), Some("from-env"));
        std::env::remove_var(key);

        set_config(key, None).unwrap();
        assert_eq!(get_config(key).unwrap(), None);
    }
}
