//! Read-only runtime settings.
//!
//! Settings are a flat map of dotted keys (`auth.store.file`) to string
//! values, anchored at a base folder that relative paths resolve against.
//! The schema of backend specific keys belongs to each backend.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use tracing::debug;

pub const PROVIDER_KEY: &str = "auth.provider";
pub const STORE_FILE_KEY: &str = "auth.store.file";
pub const RECONCILE_ALERT_THRESHOLD_KEY: &str = "auth.reconcile.alertThreshold";

pub const DEFAULT_PROVIDER: &str = "null";
pub const DEFAULT_STORE_FILE: &str = "${baseFolder}/users.db";
pub const DEFAULT_RECONCILE_ALERT_THRESHOLD: u32 = 5;

const BASE_FOLDER_VARIABLE: &str = "${baseFolder}";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read settings from {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings are not valid toml")]
    Parse(#[from] toml::de::Error),
    #[error("no authentication provider named {0:?} is registered")]
    UnknownProvider(String),
    #[error("setting {key} has invalid value {value:?}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    base_folder: PathBuf,
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn new(base_folder: impl Into<PathBuf>) -> Self {
        Self {
            base_folder: base_folder.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Parses toml, flattening nested tables into dotted keys. Arrays become
    /// space separated lists and other scalars their display form.
    pub fn from_toml_str(base_folder: impl Into<PathBuf>, text: &str) -> Result<Self, ConfigError> {
        let table = text.parse::<toml::Table>()?;

        let mut settings = Self::new(base_folder);
        flatten("", &table, &mut settings.values);
        Ok(settings)
    }

    /// Loads a settings file; its directory becomes the base folder.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let base_folder = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        debug!(path = %path.display(), "loading settings");
        Self::from_toml_str(base_folder, &text)
    }

    /// `AUTH_CONFIG` names a settings file. Without it the settings are empty
    /// and anchored at `AUTH_BASE_FOLDER`, or the working directory.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("AUTH_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let base_folder = match std::env::var("AUTH_BASE_FOLDER") {
            Ok(folder) => PathBuf::from(folder),
            Err(_) => std::env::current_dir().map_err(|source| ConfigError::Io {
                path: PathBuf::from("."),
                source,
            })?,
        };

        Ok(Self::new(base_folder))
    }

    pub fn base_folder(&self) -> &Path {
        &self.base_folder
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_string<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(invalid(key, value)),
            },
        }
    }

    pub fn get_u32(&self, key: &str, default: u32) -> Result<u32, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| invalid(key, value)),
        }
    }

    /// Path named by `key` (or `default`). `${baseFolder}` is substituted and
    /// relative paths are taken relative to the base folder.
    pub fn resolve_file_or_folder(&self, key: &str, default: &str) -> PathBuf {
        let value = self.get_string(key, default);
        let base = self.base_folder.to_string_lossy();
        let path = PathBuf::from(value.replace(BASE_FOLDER_VARIABLE, &base));

        if path.is_absolute() {
            path
        } else {
            self.base_folder.join(path)
        }
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
    }
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        match value {
            toml::Value::Table(table) => flatten(&key, table, out),
            toml::Value::Array(items) => {
                let items: Vec<String> = items.iter().map(scalar).collect();
                out.insert(key, items.join(" "));
            }
            value => {
                out.insert(key, scalar(value));
            }
        }
    }
}

fn scalar(value: &toml::Value) -> String {
    match value {
        toml::Value::String(value) => value.clone(),
        value => value.to_string(),
    }
}
