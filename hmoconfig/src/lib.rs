//! # HMOHome Configuration Module
//!
//! Configuration management for the HMOHome orchestrator:
//! - Loading configuration from a YAML file
//! - Merging with the embedded default configuration
//! - Environment variable overrides (`HMO_CONFIG__SECTION__KEY=value`)
//! - Typed getters and setters for the values the services need
//! - Thread-safe singleton access
//!
//! ## Usage
//!
//! ```no_run
//! use hmoconfig::get_config;
//!
//! let config = get_config();
//! let ffprobe = config.get_ffprobe_path();
//! let store_dir = config.get_managed_dir(&["playlists", "directory"], "playlists")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = include_str!("hmo.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load HMOHome configuration"));
}

const ENV_CONFIG_DIR: &str = "HMO_CONFIG";
const ENV_PREFIX: &str = "HMO_CONFIG__";
const CONFIG_DIR_NAME: &str = ".hmo";

const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;
const DEFAULT_STORE_KEY: &str = "playlists";
const DEFAULT_PERSIST_QUEUE: usize = 16;
const DEFAULT_FFPROBE: &str = "ffprobe";
const DEFAULT_HTTP_TIMEOUT_SECS: usize = 5;
const DEFAULT_BLUETOOTH_AGENT_URL: &str = "http://127.0.0.1:8765";

/// Generates a getter/setter pair for usize values with a default.
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> usize {
            match self.get_value($path) {
                Ok(Value::Number(n)) => n.as_u64().map(|v| v as usize).unwrap_or($default),
                Ok(Value::String(s)) => s.trim().parse().unwrap_or($default),
                _ => $default,
            }
        }

        pub fn $setter(&self, value: usize) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Generates a getter/setter pair for bool values with a default.
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> bool {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => b,
                _ => $default,
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Generates a getter/setter pair for string values with a default.
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> String {
            match self.get_value($path) {
                Ok(Value::String(s)) if !s.trim().is_empty() => s,
                _ => $default.to_string(),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Configuration manager.
///
/// Holds the merged YAML tree (embedded defaults, then `config.yaml`, then
/// environment overrides) and writes every change back to `config.yaml`.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    fn data(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        CONFIG_DIR_NAME.to_string()
    }

    /// Creates the directory if needed and checks it is readable and writable.
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory.
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `HMO_CONFIG` environment variable
    /// 3. `.hmo` in the current directory
    /// 4. `.hmo` in the user's home directory
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory.
    ///
    /// The embedded defaults are merged with `config.yaml` (if present), the
    /// `HMO_CONFIG__*` environment overrides are applied, and the merged
    /// result is saved back.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let path = Path::new(&config_dir)
            .join("config.yaml")
            .to_string_lossy()
            .to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            data
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        let external_value: Value = serde_yaml::from_slice(&yaml_data)?;
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = lower_keys_value(default_value);

        apply_env_overrides(&mut config_value, env::vars());

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Returns the directory the configuration was loaded from.
    pub fn dir(&self) -> &str {
        &self.config_dir
    }

    /// Saves the current configuration to `config.yaml`.
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.data())?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it.
    ///
    /// `path` is a list of keys, e.g. `&["probe", "ffprobe"]`.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data();
            set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    /// Gets a configuration value at the specified path.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data();
        get_value_internal(&data, path)
    }

    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<String> {
        let path = Path::new(dir_path);

        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(path)
        };

        if !absolute_path.exists() {
            fs::create_dir_all(&absolute_path)?;
            info!(directory = %absolute_path.display(), "Created managed directory");
        }

        Ok(absolute_path.to_string_lossy().to_string())
    }

    /// Returns a directory managed by the configuration, creating it if needed.
    ///
    /// Relative paths are resolved against the configuration directory. When
    /// the key is missing, `default` is stored and used.
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<String> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) => s,
            _ => {
                self.set_managed_dir(path, default.to_string())?;
                default.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    /// Sets a directory managed by the configuration.
    pub fn set_managed_dir(&self, path: &[&str], directory: String) -> Result<()> {
        self.set_value(path, Value::String(directory))
    }

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    impl_string_config!(
        get_playlist_store_key,
        set_playlist_store_key,
        &["playlists", "store_key"],
        DEFAULT_STORE_KEY
    );

    impl_usize_config!(
        get_persist_queue_capacity,
        set_persist_queue_capacity,
        &["playlists", "persist_queue"],
        DEFAULT_PERSIST_QUEUE
    );

    impl_string_config!(
        get_ffprobe_path,
        set_ffprobe_path,
        &["probe", "ffprobe"],
        DEFAULT_FFPROBE
    );

    impl_usize_config!(
        get_device_http_timeout_secs,
        set_device_http_timeout_secs,
        &["devices", "http_timeout_secs"],
        DEFAULT_HTTP_TIMEOUT_SECS
    );

    impl_string_config!(
        get_bluetooth_agent_url,
        set_bluetooth_agent_url,
        &["devices", "bluetooth_agent_url"],
        DEFAULT_BLUETOOTH_AGENT_URL
    );
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    if path.is_empty() {
        *data = value;
        return Ok(());
    }
    if let Value::Mapping(map) = data {
        let key_value = Value::String(path[0].to_lowercase());
        if path.len() == 1 {
            map.insert(key_value, value);
        } else {
            let entry = map
                .entry(key_value)
                .or_insert(Value::Mapping(Mapping::new()));
            set_value_internal(entry, &path[1..], value)?;
        }
        Ok(())
    } else {
        Err(anyhow!("Current node is not a map"))
    }
}

fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
    let mut current = data;
    for (i, key) in path.iter().enumerate() {
        if let Value::Mapping(map) = current {
            match map.get(&Value::String(key.to_lowercase())) {
                Some(next) => current = next,
                None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
            }
        } else {
            return Err(anyhow!("Path {} is not a map", path[..i].join(".")));
        }
    }
    Ok(current.clone())
}

fn apply_env_overrides<I>(config: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
            let key_path = stripped.split("__").collect::<Vec<_>>();
            if let Err(e) = set_value_internal(config, &key_path, convert_env_value(&value)) {
                warn!(env_var = %key, error = %e, "Ignoring configuration override");
            }
        }
    }
}

fn convert_env_value(value: &str) -> Value {
    serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                let key = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                new_map.insert(key, lower_keys_value(v));
            }
            Value::Mapping(new_map)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

/// Returns the global configuration instance, loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges an external YAML tree into the default one.
///
/// Mappings are merged key by key; scalars and sequences from `external`
/// replace the default value.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(dir: &tempfile::TempDir) -> Config {
        Config::load_config(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn defaults_are_available_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);

        assert_eq!(config.get_log_min_level(), "INFO");
        assert!(config.get_log_enable_console());
        assert_eq!(config.get_playlist_store_key(), "playlists");
        assert_eq!(config.get_persist_queue_capacity(), 16);
        assert_eq!(config.get_ffprobe_path(), "ffprobe");
        assert_eq!(config.get_device_http_timeout_secs(), 5);
        assert!(dir.path().join("config.yaml").exists());
    }

    #[test]
    fn external_file_is_merged_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "probe:\n  ffprobe: /opt/ffmpeg/bin/ffprobe\n",
        )
        .unwrap();

        let config = load(&dir);
        assert_eq!(config.get_ffprobe_path(), "/opt/ffmpeg/bin/ffprobe");
        // untouched sibling keys keep their defaults
        assert_eq!(config.get_playlist_store_key(), "playlists");
    }

    #[test]
    fn setters_persist_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);
        config.set_persist_queue_capacity(4).unwrap();

        let reloaded = load(&dir);
        assert_eq!(reloaded.get_persist_queue_capacity(), 4);
    }

    #[test]
    fn managed_dir_is_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);

        let managed = config
            .get_managed_dir(&["playlists", "directory"], "playlists")
            .unwrap();
        assert_eq!(Path::new(&managed), dir.path().join("playlists"));
        assert!(Path::new(&managed).is_dir());
    }

    #[test]
    fn env_overrides_follow_double_underscore_paths() {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG).unwrap();
        apply_env_overrides(
            &mut value,
            vec![
                ("HMO_CONFIG__DEVICES__HTTP_TIMEOUT_SECS".to_string(), "9".to_string()),
                ("UNRELATED".to_string(), "x".to_string()),
            ],
        );

        let timeout = get_value_internal(&value, &["devices", "http_timeout_secs"]).unwrap();
        assert_eq!(timeout.as_u64(), Some(9));
    }

    #[test]
    fn missing_path_is_an_error() {
        let value: Value = serde_yaml::from_str(DEFAULT_CONFIG).unwrap();
        assert!(get_value_internal(&value, &["nope", "deeper"]).is_err());
    }
}
