//! Layered TOML settings.
//!
//! Settings come from `/etc/armada/settings.toml`, then
//! `~/.config/armada/settings.toml`, merged table-wise with later files
//! winning. An explicit file replaces the layered lookup entirely.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SYSTEM_SETTINGS_PATH: &str = "/etc/armada/settings.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Endpoint of the runtime backing the implicit local ship.
    pub docker_url: String,
    pub localship_fqdn: String,
    pub data_volume_dir: PathBuf,
    pub config_volume_dir: PathBuf,
    pub lock_dir: PathBuf,
    /// Seconds the runtime waits for a graceful stop before killing.
    pub stop_timeout: u64,
    /// Host address external ports are bound to.
    pub bind_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_timeout: Option<u64>,
    /// Prefix for repositories declared without a `/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_namespace: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            docker_url: "http://localhost:2375".to_owned(),
            localship_fqdn: "localhost".to_owned(),
            data_volume_dir: PathBuf::from("~/.local/share/armada/data"),
            config_volume_dir: PathBuf::from("~/.local/share/armada/config"),
            lock_dir: PathBuf::from("~/.local/share/armada/locks"),
            stop_timeout: 2,
            bind_address: "0.0.0.0".to_owned(),
            http_timeout: None,
            docker_namespace: None,
        }
    }
}

impl Settings {
    /// Load settings from `explicit` if given, otherwise from the layered
    /// default locations. Missing default files are skipped.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SchemaError> {
        if let Some(path) = explicit {
            return Self::load_layered(&[path.to_path_buf()], true);
        }
        let mut paths = vec![PathBuf::from(SYSTEM_SETTINGS_PATH)];
        if let Ok(user) = user_config_path() {
            paths.push(user);
        }
        Self::load_layered(&paths, false)
    }

    /// Merge the given files in order. With `required`, a missing file is an
    /// error rather than being skipped.
    pub fn load_layered(paths: &[PathBuf], required: bool) -> Result<Self, SchemaError> {
        let mut merged = toml::Table::new();
        for path in paths {
            if !required && !path.exists() {
                tracing::trace!("settings file {} not present", path.display());
                continue;
            }
            let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Read {
                path: path.clone(),
                source,
            })?;
            tracing::debug!("loading settings from {}", path.display());
            let table: toml::Table = toml::from_str(&content)?;
            merge_tables(&mut merged, table);
        }
        let settings: Settings = toml::Value::Table(merged).try_into()?;
        Ok(settings.expanded())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SchemaError> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings.expanded())
    }

    pub fn to_toml_string(&self) -> Result<String, SchemaError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Qualify a bare repository name with the configured namespace.
    pub fn namespaced(&self, repository: &str) -> String {
        match &self.docker_namespace {
            Some(namespace) if !repository.contains('/') => format!("{namespace}/{repository}"),
            _ => repository.to_owned(),
        }
    }

    /// Replace a leading `~/` in every path setting with `$HOME`.
    #[must_use]
    pub fn expanded(mut self) -> Self {
        for path in [
            &mut self.data_volume_dir,
            &mut self.config_volume_dir,
            &mut self.lock_dir,
        ] {
            if let Some(s) = path.to_str() {
                *path = expand_tilde(s);
            }
        }
        self
    }
}

/// `~/.config/armada/settings.toml`.
pub fn user_config_path() -> Result<PathBuf, SchemaError> {
    let home = std::env::var("HOME").map_err(|_| SchemaError::NoHome)?;
    Ok(PathBuf::from(home).join(".config/armada/settings.toml"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
