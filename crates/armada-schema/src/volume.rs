use crate::settings::{expand_tilde, Settings};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A directory mounted into a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Volume {
    Data(DataVolume),
    Config(ConfigVolume),
}

/// Persistent host directory. Its contents belong to the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataVolume {
    #[serde(default = "default_data_name")]
    pub name: String,
    pub dest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ro: bool,
}

/// Read-only directory rebuilt from `files` on every render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigVolume {
    #[serde(default = "default_config_name")]
    pub name: String,
    pub dest: String,
    #[serde(default)]
    pub files: Vec<ConfigFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub name: String,
    #[serde(flatten)]
    pub content: FileContent,
}

/// How a config file's bytes are produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileContent {
    Text { text: String },
    Yaml { data: serde_yaml::Value },
    /// Rendered pretty-printed; object keys come out sorted.
    Json { data: serde_json::Value },
}

fn default_data_name() -> String {
    "data".to_owned()
}

fn default_config_name() -> String {
    "config".to_owned()
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

impl DataVolume {
    pub fn new(dest: &str) -> Self {
        Self {
            name: default_data_name(),
            dest: dest.to_owned(),
            path: None,
            ro: false,
        }
    }
}

impl ConfigVolume {
    pub fn new(dest: &str, files: Vec<ConfigFile>) -> Self {
        Self {
            name: default_config_name(),
            dest: dest.to_owned(),
            files,
        }
    }
}

impl ConfigFile {
    pub fn text(name: &str, text: &str) -> Self {
        Self {
            name: name.to_owned(),
            content: FileContent::Text {
                text: text.to_owned(),
            },
        }
    }

    pub fn yaml(name: &str, data: serde_yaml::Value) -> Self {
        Self {
            name: name.to_owned(),
            content: FileContent::Yaml { data },
        }
    }

    pub fn json(name: &str, data: serde_json::Value) -> Self {
        Self {
            name: name.to_owned(),
            content: FileContent::Json { data },
        }
    }

    /// The exact text written to disk for this file.
    pub fn render(&self) -> Result<String, SchemaError> {
        match &self.content {
            FileContent::Text { text } => Ok(text.clone()),
            FileContent::Yaml { data } => Ok(serde_yaml::to_string(data)?),
            FileContent::Json { data } => Ok(serde_json::to_string_pretty(data)?),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.content {
            FileContent::Text { .. } => "text",
            FileContent::Yaml { .. } => "yaml",
            FileContent::Json { .. } => "json",
        }
    }
}

impl Volume {
    pub fn name(&self) -> &str {
        match self {
            Volume::Data(v) => &v.name,
            Volume::Config(v) => &v.name,
        }
    }

    pub fn dest(&self) -> &str {
        match self {
            Volume::Data(v) => &v.dest,
            Volume::Config(v) => &v.dest,
        }
    }

    /// Config volumes are always mounted read-only.
    pub fn ro(&self) -> bool {
        match self {
            Volume::Data(v) => v.ro,
            Volume::Config(_) => true,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Volume::Config(_))
    }

    pub fn files(&self) -> &[ConfigFile] {
        match self {
            Volume::Data(_) => &[],
            Volume::Config(v) => &v.files,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Volume::Data(_) => "data",
            Volume::Config(_) => "config",
        }
    }

    /// Host directory bound to `dest` for the container named `container`.
    pub fn host_path(&self, container: &str, settings: &Settings) -> PathBuf {
        match self {
            Volume::Data(DataVolume {
                path: Some(path), ..
            }) => expand_tilde(path),
            Volume::Data(v) => settings.data_volume_dir.join(container).join(&v.name),
            Volume::Config(v) => settings.config_volume_dir.join(container).join(&v.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            data_volume_dir: PathBuf::from("/srv/data"),
            config_volume_dir: PathBuf::from("/srv/config"),
            ..Settings::default()
        }
    }

    #[test]
    fn data_volume_default_path() {
        let volume = Volume::Data(DataVolume::new("/var/lib/app"));
        assert_eq!(
            volume.host_path("web", &settings()),
            PathBuf::from("/srv/data/web/data")
        );
        assert!(!volume.ro());
    }

    #[test]
    fn data_volume_explicit_path_wins() {
        let volume = Volume::Data(DataVolume {
            path: Some("/mnt/disk".to_owned()),
            ..DataVolume::new("/var/lib/app")
        });
        assert_eq!(volume.host_path("web", &settings()), PathBuf::from("/mnt/disk"));
    }

    #[test]
    fn config_volume_is_read_only() {
        let volume = Volume::Config(ConfigVolume::new("/etc/app", vec![]));
        assert!(volume.ro());
        assert_eq!(
            volume.host_path("web", &settings()),
            PathBuf::from("/srv/config/web/config")
        );
    }

    #[test]
    fn json_renders_sorted_and_pretty() {
        let file = ConfigFile::json("a.json", serde_json::json!({"b": 1, "a": [true]}));
        assert_eq!(file.render().unwrap(), "{\n  \"a\": [\n    true\n  ],\n  \"b\": 1\n}");
    }

    #[test]
    fn yaml_renders_with_emitter() {
        let data: serde_yaml::Value = serde_yaml::from_str("port: 80\nhost: example").unwrap();
        let file = ConfigFile::yaml("a.yaml", data);
        let text = file.render().unwrap();
        assert!(text.contains("port: 80\n"));
        assert!(text.contains("host: example\n"));
    }

    #[test]
    fn volumes_parse_with_defaults() {
        let volumes: Vec<Volume> = serde_yaml::from_str(
            r"
- kind: data
  dest: /var/lib/app
- kind: config
  dest: /etc/app
  files:
    - name: app.conf
      type: text
      text: |
        a = 1
        b = 2
",
        )
        .unwrap();
        assert_eq!(volumes[0].name(), "data");
        assert_eq!(volumes[1].name(), "config");
        assert_eq!(volumes[1].files()[0].render().unwrap(), "a = 1\nb = 2\n");
    }

    #[test]
    fn unknown_file_type_is_rejected() {
        let result: Result<ConfigFile, _> =
            serde_yaml::from_str("name: x\ntype: template\ntext: hi\n");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_volume_kind_is_rejected() {
        let result: Result<Volume, _> = serde_yaml::from_str("kind: tmpfs\ndest: /tmp\n");
        assert!(result.is_err());
    }
}
