//! Runtime records, shaped like the Docker Engine API's JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry of a container listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ports: Vec<PortSummary>,
}

/// An exposed port of a listed container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortSummary {
    #[serde(default)]
    pub private_port: u16,
    /// Host port, when the port is published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_port: Option<u16>,
    #[serde(default, rename = "Type")]
    pub protocol: String,
}

impl ContainerSummary {
    /// Primary name without the leading `/`.
    pub fn name(&self) -> Option<&str> {
        self.names.first().map(|n| n.trim_start_matches('/'))
    }
}

/// Full inspection of one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Id of the image the container was created from.
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub config: ContainerConfig,
    #[serde(default)]
    pub host_config: HostConfig,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub state: ContainerState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    /// Image reference as given at create time.
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub env: Option<Vec<String>>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub exposed_ports: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub network_mode: String,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub port_bindings: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
    #[serde(default)]
    pub binds: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortBinding {
    #[serde(default)]
    pub host_ip: String,
    #[serde(default)]
    pub host_port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Mount {
    #[serde(default, rename = "Type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub source: String,
    pub destination: String,
    #[serde(default, rename = "RW")]
    pub rw: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub running: bool,
}

impl ContainerRecord {
    /// Container name without the leading `/`.
    pub fn name(&self) -> &str {
        self.name.trim_start_matches('/')
    }

    /// `Config.Env` as a map. Entries without `=` map to an empty value.
    pub fn env_map(&self) -> BTreeMap<String, String> {
        parse_env(self.config.env.as_deref().unwrap_or_default())
    }

    /// `Config.Cmd` joined by single spaces.
    pub fn command(&self) -> String {
        self.config.cmd.as_deref().unwrap_or_default().join(" ")
    }

    /// Repository part of `Config.Image`, without tag or digest.
    pub fn image_repository(&self) -> &str {
        strip_tag(&self.config.image)
    }

    /// First host port bound for each port spec. Specs whose binding list is
    /// empty map to `None`.
    pub fn host_ports(&self) -> BTreeMap<String, Option<u16>> {
        self.host_config
            .port_bindings
            .iter()
            .flatten()
            .map(|(spec, bindings)| {
                let port = bindings
                    .as_ref()
                    .and_then(|b| b.first())
                    .and_then(|b| b.host_port.parse().ok());
                (spec.clone(), port)
            })
            .collect()
    }

    /// Mounts ordered by destination.
    pub fn sorted_mounts(&self) -> Vec<&Mount> {
        let mut mounts: Vec<&Mount> = self.mounts.iter().collect();
        mounts.sort_by(|a, b| a.destination.cmp(&b.destination));
        mounts
    }
}

/// Split `KEY=value` entries into a map.
pub fn parse_env(entries: &[String]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((k, v)) => (k.to_owned(), v.to_owned()),
            None => (entry.clone(), String::new()),
        })
        .collect()
}

/// Drop a trailing `:tag` or `@digest`. A colon inside a registry host
/// (`host:5000/name`) is kept.
pub fn strip_tag(reference: &str) -> &str {
    let reference = reference.split_once('@').map_or(reference, |(r, _)| r);
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => repo,
        _ => reference,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageSummary {
    pub id: String,
    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
}

impl ImageSummary {
    pub fn tags(&self) -> &[String] {
        self.repo_tags.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageRecord {
    pub id: String,
    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
    #[serde(default)]
    pub config: ImageConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageConfig {
    #[serde(default)]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub env: Option<Vec<String>>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub exposed_ports: Option<BTreeMap<String, serde_json::Value>>,
}

impl ImageRecord {
    pub fn env_map(&self) -> BTreeMap<String, String> {
        parse_env(self.config.env.as_deref().unwrap_or_default())
    }

    pub fn command(&self) -> String {
        self.config.cmd.as_deref().unwrap_or_default().join(" ")
    }
}

/// Host side of one published port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBinding {
    pub host_ip: String,
    pub host_port: u16,
}

/// A host directory bound into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub host: String,
    pub dest: String,
    pub ro: bool,
}

impl Bind {
    /// `host:dest[:ro]`, the `HostConfig.Binds` form.
    pub fn spec(&self) -> String {
        if self.ro {
            format!("{}:{}:ro", self.host, self.dest)
        } else {
            format!("{}:{}", self.host, self.dest)
        }
    }

    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.splitn(3, ':');
        let host = parts.next()?.to_owned();
        let dest = parts.next()?.to_owned();
        let ro = parts
            .next()
            .is_some_and(|mode| mode.split(',').any(|m| m == "ro"));
        Some(Self { host, dest, ro })
    }
}

/// Port publications and directory binds applied when a container starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    /// Keyed by `<port>/<protocol>`.
    pub ports: BTreeMap<String, HostBinding>,
    pub binds: Vec<Bind>,
}

impl Bindings {
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty() && self.binds.is_empty()
    }

    /// `HostConfig.PortBindings` wire form.
    pub fn port_bindings(&self) -> BTreeMap<String, Option<Vec<PortBinding>>> {
        self.ports
            .iter()
            .map(|(spec, b)| {
                (
                    spec.clone(),
                    Some(vec![PortBinding {
                        host_ip: b.host_ip.clone(),
                        host_port: b.host_port.to_string(),
                    }]),
                )
            })
            .collect()
    }

    pub fn bind_specs(&self) -> Vec<String> {
        self.binds.iter().map(Bind::spec).collect()
    }
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateSpec {
    pub name: String,
    /// `<full repository>:<tag>`.
    pub image: String,
    pub hostname: String,
    pub cmd: Option<Vec<String>>,
    /// `KEY=value` entries.
    pub env: Vec<String>,
    pub memory: u64,
    /// Port specs (`<port>/<protocol>`) to expose.
    pub exposed_ports: Vec<String>,
    pub network_mode: String,
    pub user: Option<String>,
    pub privileged: bool,
    pub bindings: Bindings,
}

impl CreateSpec {
    /// Request body for `POST /containers/create`.
    pub fn body(&self) -> serde_json::Value {
        let exposed: serde_json::Map<String, serde_json::Value> = self
            .exposed_ports
            .iter()
            .map(|spec| (spec.clone(), serde_json::json!({})))
            .collect();
        let host_config = HostConfig {
            memory: self.memory,
            network_mode: self.network_mode.clone(),
            privileged: self.privileged,
            port_bindings: Some(self.bindings.port_bindings()),
            binds: Some(self.bindings.bind_specs()),
        };
        let mut body = serde_json::json!({
            "Hostname": self.hostname,
            "Image": self.image,
            "Env": self.env,
            "ExposedPorts": exposed,
            "AttachStdout": true,
            "AttachStderr": true,
            "HostConfig": host_config,
        });
        if let Some(cmd) = &self.cmd {
            body["Cmd"] = serde_json::json!(cmd);
        }
        if let Some(user) = &self.user {
            body["User"] = serde_json::json!(user);
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSPECT: &str = r#"{
        "Id": "c0ffee",
        "Name": "/web",
        "Image": "sha256:abc",
        "Config": {
            "Image": "registry.example.com:5000/team/app:1f2e",
            "Cmd": ["nginx", "-g", "daemon off;"],
            "Env": ["PATH=/usr/bin", "EMPTY", "MODE=a=b"],
            "User": "",
            "Hostname": "web-alpha"
        },
        "HostConfig": {
            "Memory": 0,
            "NetworkMode": "bridge",
            "Privileged": false,
            "PortBindings": {"80/tcp": [{"HostIp": "0.0.0.0", "HostPort": "8080"}], "53/udp": null},
            "Binds": ["/srv/config/web/config:/etc/nginx:ro"]
        },
        "Mounts": [
            {"Type": "volume", "Name": "e3b0", "Source": "/var/lib/docker/volumes/e3b0/_data", "Destination": "/var/cache", "RW": true},
            {"Type": "bind", "Source": "/srv/config/web/config", "Destination": "/etc/nginx", "RW": false}
        ],
        "State": {"Status": "running", "Running": true}
    }"#;

    #[test]
    fn inspect_record_helpers() {
        let record: ContainerRecord = serde_json::from_str(INSPECT).unwrap();
        assert_eq!(record.name(), "web");
        assert_eq!(record.command(), "nginx -g daemon off;");
        assert_eq!(record.image_repository(), "registry.example.com:5000/team/app");

        let env = record.env_map();
        assert_eq!(env["PATH"], "/usr/bin");
        assert_eq!(env["EMPTY"], "");
        assert_eq!(env["MODE"], "a=b");

        let ports = record.host_ports();
        assert_eq!(ports["80/tcp"], Some(8080));
        assert_eq!(ports["53/udp"], None);

        let mounts = record.sorted_mounts();
        assert_eq!(mounts[0].destination, "/etc/nginx");
        assert!(!mounts[0].rw);
    }

    #[test]
    fn null_collections_are_tolerated() {
        let record: ContainerRecord = serde_json::from_str(
            r#"{"Id":"x","Config":{"Cmd":null,"Env":null},"HostConfig":{"PortBindings":null}}"#,
        )
        .unwrap();
        assert_eq!(record.command(), "");
        assert!(record.env_map().is_empty());
        assert!(record.host_ports().is_empty());
    }

    #[test]
    fn strip_tag_keeps_registry_port() {
        assert_eq!(strip_tag("busybox:latest"), "busybox");
        assert_eq!(strip_tag("busybox"), "busybox");
        assert_eq!(strip_tag("host:5000/app"), "host:5000/app");
        assert_eq!(strip_tag("host:5000/app:v2"), "host:5000/app");
        assert_eq!(strip_tag("app@sha256:abcd"), "app");
    }

    #[test]
    fn bind_spec_round_trip() {
        let bind = Bind {
            host: "/srv/a".to_owned(),
            dest: "/a".to_owned(),
            ro: true,
        };
        assert_eq!(bind.spec(), "/srv/a:/a:ro");
        assert_eq!(Bind::parse(&bind.spec()), Some(bind));
        assert!(!Bind::parse("/x:/y:rw,z").unwrap().ro);
        assert!(Bind::parse("/only").is_none());
    }

    #[test]
    fn create_body_carries_host_config() {
        let mut spec = CreateSpec {
            name: "web".to_owned(),
            image: "nginx:latest".to_owned(),
            hostname: "web-alpha".to_owned(),
            cmd: Some(vec!["nginx".to_owned()]),
            env: vec!["A=1".to_owned()],
            memory: 1024,
            exposed_ports: vec!["80/tcp".to_owned()],
            network_mode: "bridge".to_owned(),
            ..CreateSpec::default()
        };
        spec.bindings.ports.insert(
            "80/tcp".to_owned(),
            HostBinding {
                host_ip: "0.0.0.0".to_owned(),
                host_port: 8080,
            },
        );
        let body = spec.body();
        assert_eq!(body["Image"], "nginx:latest");
        assert_eq!(body["Cmd"][0], "nginx");
        assert!(body["ExposedPorts"]["80/tcp"].is_object());
        assert_eq!(body["HostConfig"]["Memory"], 1024);
        assert_eq!(
            body["HostConfig"]["PortBindings"]["80/tcp"][0]["HostPort"],
            "8080"
        );
        assert!(body.get("User").is_none());
    }
}
