//! Declared container vs observed runtime record.
//!
//! The result is an ordered list of `(path, change)` entries. An empty diff
//! means the observed container fully satisfies the declaration. Entries are
//! produced in a fixed order (identity fields, command and env, ports,
//! volumes) so the same inputs always give the same output.

use crate::images::ImageFacts;
use crate::render::load_file;
use crate::CoreError;
use armada_runtime::{ContainerRecord, Mount};
use armada_schema::{split_command, Container, Settings, Volume};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    Changed { expected: String, actual: String },
    Missing { expected: String },
    Extraneous { actual: String },
    /// Differing file content, as the lines to remove and to add.
    Lines { lines: Vec<LineChange> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", content = "line", rename_all = "lowercase")]
pub enum LineChange {
    Removed(String),
    Added(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    /// Dotted field path, e.g. `env.PATH` or `volumes./etc/app.files.app.conf`.
    pub path: String,
    #[serde(flatten)]
    pub change: Change,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diff {
    entries: Vec<DiffEntry>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[DiffEntry] {
        &self.entries
    }

    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.path.as_str()).collect()
    }

    pub fn get(&self, path: &str) -> Option<&Change> {
        self.entries
            .iter()
            .find(|e| e.path == path)
            .map(|e| &e.change)
    }

    fn changed(&mut self, path: String, expected: impl ToString, actual: impl ToString) {
        self.entries.push(DiffEntry {
            path,
            change: Change::Changed {
                expected: expected.to_string(),
                actual: actual.to_string(),
            },
        });
    }

    fn compare<T: PartialEq + ToString>(&mut self, path: &str, expected: T, actual: T) {
        if expected != actual {
            self.changed(path.to_owned(), expected, actual);
        }
    }

    fn missing(&mut self, path: String, expected: impl ToString) {
        self.entries.push(DiffEntry {
            path,
            change: Change::Missing {
                expected: expected.to_string(),
            },
        });
    }

    fn extraneous(&mut self, path: String, actual: impl ToString) {
        self.entries.push(DiffEntry {
            path,
            change: Change::Extraneous {
                actual: actual.to_string(),
            },
        });
    }
}

fn shown(value: &str) -> &str {
    if value.is_empty() {
        "\"\""
    } else {
        value
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.entries.iter().map(|e| e.path.len()).max().unwrap_or(0);
        for entry in &self.entries {
            let path = &entry.path;
            match &entry.change {
                Change::Changed { expected, actual } => {
                    writeln!(f, "{path:<width$}  {} -> {}", shown(expected), shown(actual))?;
                }
                Change::Missing { expected } => {
                    writeln!(f, "{path:<width$}  {} -> \"\"", shown(expected))?;
                }
                Change::Extraneous { actual } => {
                    writeln!(f, "{path:<width$}  \"\" -> {}", shown(actual))?;
                }
                Change::Lines { lines } => {
                    writeln!(f, "{path}")?;
                    for line in lines {
                        match line {
                            LineChange::Removed(l) => writeln!(f, "  -{l}")?,
                            LineChange::Added(l) => writeln!(f, "  +{l}")?,
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Compare a declared container with the runtime's record of it.
///
/// `facts` describes the declared image as the runtime knows it. Command and
/// env are only compared when the observed container runs the declared image
/// id; otherwise the `image.id` entry already forces a replacement. Config
/// file contents are read from disk; nothing is written.
pub fn diff_container(
    desired: &Container,
    facts: &ImageFacts,
    observed: &ContainerRecord,
    settings: &Settings,
) -> Result<Diff, CoreError> {
    let mut diff = Diff::default();

    diff.compare("name", desired.name.as_str(), observed.name());
    if let Some(id) = &facts.id {
        diff.compare(
            "image.repo",
            desired.image.full_repository().as_str(),
            observed.image_repository(),
        );
        diff.compare("image.id", id.as_str(), observed.image.as_str());
    }
    diff.compare("memory", desired.memory, observed.host_config.memory);
    diff.compare(
        "network_mode",
        desired.network_mode.as_str(),
        observed.host_config.network_mode.as_str(),
    );
    let user = desired.user.as_deref().unwrap_or(&facts.user);
    diff.compare("user", user, observed.config.user.as_str());
    diff.compare(
        "privileged",
        desired.privileged,
        observed.host_config.privileged,
    );

    if facts.id.as_ref().is_some_and(|id| *id == observed.image.as_str()) {
        let command = match &desired.command {
            Some(command) => split_command(command).join(" "),
            None => facts.command.clone(),
        };
        diff.compare("command", command, observed.command());
        compare_env(&mut diff, desired, facts, &observed.env_map());
    }

    compare_ports(&mut diff, desired, observed);
    compare_volumes(&mut diff, desired, observed, settings)?;
    Ok(diff)
}

fn compare_env(
    diff: &mut Diff,
    desired: &Container,
    facts: &ImageFacts,
    actual: &BTreeMap<String, String>,
) {
    let mut expected = facts.env.clone();
    expected.extend(desired.env.iter().map(|(k, v)| (k.clone(), v.clone())));

    for (name, value) in actual {
        match expected.get(name) {
            None => diff.extraneous(format!("env.{name}"), value),
            Some(want) if want != value => diff.changed(format!("env.{name}"), want, value),
            Some(_) => {}
        }
    }
    for (name, value) in &expected {
        if !actual.contains_key(name) {
            diff.missing(format!("env.{name}"), value);
        }
    }
}

fn compare_ports(diff: &mut Diff, desired: &Container, observed: &ContainerRecord) {
    let actual = observed.host_ports();
    let doors = desired.doors();

    for door in &doors {
        match actual.get(&door.spec()) {
            None => diff.missing(format!("ports.{}", door.name), door.spec()),
            Some(host) => {
                let host = host.map(|p| p.to_string()).unwrap_or_default();
                diff.compare(
                    &format!("ports.{}.ext", door.name),
                    door.external.to_string(),
                    host,
                );
            }
        }
    }
    for spec in actual.keys() {
        if !doors.iter().any(|door| door.spec() == *spec) {
            diff.extraneous(format!("ports.{spec}"), spec);
        }
    }
}

/// Anonymous volumes are named by 64 hex digits.
fn is_anonymous_name(name: &str) -> bool {
    name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Mounts the runtime generates for anonymous volumes, whatever its data
/// root. Older engines only report the host path.
fn is_ephemeral(mount: &Mount) -> bool {
    const VFS_DIR: &str = "/var/lib/docker/vfs/dir/";
    const VOLUMES_DIR: &str = "/var/lib/docker/volumes/";
    if mount.kind == "volume" && mount.name.as_deref().is_some_and(is_anonymous_name) {
        return true;
    }
    if mount.source.starts_with(VFS_DIR) {
        return true;
    }
    mount
        .source
        .strip_prefix(VOLUMES_DIR)
        .and_then(|rest| rest.strip_suffix("/_data"))
        .is_some_and(is_anonymous_name)
}

fn compare_volumes(
    diff: &mut Diff,
    desired: &Container,
    observed: &ContainerRecord,
    settings: &Settings,
) -> Result<(), CoreError> {
    let mounts = observed.sorted_mounts();

    for mount in &mounts {
        let dest = &mount.destination;
        let Some(volume) = desired.volumes.iter().find(|v| v.dest() == dest.as_str()) else {
            if !is_ephemeral(mount) {
                diff.extraneous(format!("volumes.{dest}"), &mount.source);
            }
            continue;
        };
        compare_volume(diff, desired, volume, mount, settings)?;
    }

    for volume in &desired.volumes {
        if !mounts.iter().any(|m| m.destination == volume.dest()) {
            let path = volume.host_path(&desired.name, settings);
            diff.missing(format!("volumes.{}", volume.dest()), path.display());
        }
    }
    Ok(())
}

fn compare_volume(
    diff: &mut Diff,
    desired: &Container,
    volume: &Volume,
    mount: &Mount,
    settings: &Settings,
) -> Result<(), CoreError> {
    let dest = volume.dest();
    let path = volume.host_path(&desired.name, settings);
    let expected_path = path.display().to_string();
    if expected_path != mount.source {
        diff.changed(format!("volumes.{dest}.path"), expected_path, &mount.source);
        return Ok(());
    }

    for file in volume.files() {
        let expected = file.render()?;
        let actual = load_file(&path, &file.name)?;
        if expected != actual {
            diff.entries.push(DiffEntry {
                path: format!("volumes.{dest}.files.{}", file.name),
                change: Change::Lines {
                    lines: line_diff(&actual, &expected),
                },
            });
        }
    }

    diff.compare(&format!("volumes.{dest}.ro"), volume.ro(), !mount.rw);
    Ok(())
}

/// Lines removed from `old` and added from `new`, in document order.
/// Common lines (longest common subsequence) are left out. Only the region
/// between the common prefix and suffix goes through the LCS table.
pub fn line_diff(old: &str, new: &str) -> Vec<LineChange> {
    let a: Vec<&str> = old.split('\n').collect();
    let b: Vec<&str> = new.split('\n').collect();
    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let a = &a[prefix..a.len() - suffix];
    let b = &b[prefix..b.len() - suffix];
    let (n, m) = (a.len(), b.len());

    // lcs[i][j]: length of the common subsequence of a[i..] and b[j..].
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(LineChange::Removed(a[i].to_owned()));
            i += 1;
        } else {
            out.push(LineChange::Added(b[j].to_owned()));
            j += 1;
        }
    }
    out.extend(a[i..].iter().map(|l| LineChange::Removed((*l).to_owned())));
    out.extend(b[j..].iter().map(|l| LineChange::Added((*l).to_owned())));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_runtime::records::ContainerState;
    use armada_runtime::{ContainerConfig, HostConfig, PortBinding};
    use armada_schema::{ConfigFile, ConfigVolume, DataVolume, Image, ImageId, Ship};
    use std::path::PathBuf;
    use std::sync::Arc;

    const IMAGE_ID: &str = "sha256:1111";

    fn settings() -> Settings {
        Settings {
            data_volume_dir: PathBuf::from("/srv/data"),
            config_volume_dir: PathBuf::from("/srv/config"),
            ..Settings::default()
        }
    }

    fn desired() -> Container {
        let ship = Arc::new(Ship::new("alpha", "alpha.example.com"));
        let image = Arc::new(Image::new("nginx").with_tag("1.25"));
        let mut c = Container::new("web", ship, image);
        c.ports.insert("http".to_owned(), 80);
        c.extports.insert("http".to_owned(), 8080);
        c.env.insert("MODE".to_owned(), "prod".to_owned());
        c.volumes.push(Volume::Data(DataVolume::new("/var/lib/web")));
        c
    }

    fn facts() -> ImageFacts {
        ImageFacts {
            id: Some(ImageId::new(IMAGE_ID)),
            command: "nginx -g daemon off;".to_owned(),
            env: BTreeMap::from([("PATH".to_owned(), "/usr/bin".to_owned())]),
            user: String::new(),
        }
    }

    /// A record that exactly satisfies `desired()`.
    fn observed() -> ContainerRecord {
        ContainerRecord {
            id: "c0ffee".to_owned(),
            name: "/web".to_owned(),
            image: IMAGE_ID.to_owned(),
            config: ContainerConfig {
                image: "nginx:1.25".to_owned(),
                cmd: Some(vec![
                    "nginx".to_owned(),
                    "-g".to_owned(),
                    "daemon".to_owned(),
                    "off;".to_owned(),
                ]),
                env: Some(vec!["PATH=/usr/bin".to_owned(), "MODE=prod".to_owned()]),
                ..ContainerConfig::default()
            },
            host_config: HostConfig {
                network_mode: "bridge".to_owned(),
                port_bindings: Some(BTreeMap::from([(
                    "80/tcp".to_owned(),
                    Some(vec![PortBinding {
                        host_ip: "0.0.0.0".to_owned(),
                        host_port: "8080".to_owned(),
                    }]),
                )])),
                ..HostConfig::default()
            },
            mounts: vec![Mount {
                kind: "bind".to_owned(),
                name: None,
                source: "/srv/data/web/data".to_owned(),
                destination: "/var/lib/web".to_owned(),
                rw: true,
            }],
            state: ContainerState {
                status: "running".to_owned(),
                running: true,
            },
        }
    }

    fn diff(desired: &Container, observed: &ContainerRecord) -> Diff {
        diff_container(desired, &facts(), observed, &settings()).unwrap()
    }

    #[test]
    fn matching_container_has_empty_diff() {
        let d = diff(&desired(), &observed());
        assert!(d.is_empty(), "{d}");
    }

    #[test]
    fn identity_fields_come_first() {
        let mut o = observed();
        o.host_config.memory = 1024;
        o.host_config.privileged = true;
        o.config.user = "root".to_owned();
        o.config.env = Some(vec!["PATH=/usr/bin".to_owned()]);
        let d = diff(&desired(), &o);
        assert_eq!(d.paths(), vec!["memory", "user", "privileged", "env.MODE"]);
        assert_eq!(
            d.get("memory"),
            Some(&Change::Changed {
                expected: "0".to_owned(),
                actual: "1024".to_owned()
            })
        );
    }

    #[test]
    fn image_id_mismatch_skips_command_and_env() {
        let mut o = observed();
        o.image = "sha256:2222".to_owned();
        o.config.cmd = Some(vec!["other".to_owned()]);
        o.config.env = None;
        let d = diff(&desired(), &o);
        assert_eq!(d.paths(), vec!["image.id"]);
    }

    #[test]
    fn unknown_image_id_skips_image_fields() {
        let mut o = observed();
        o.config.image = "elsewhere/nginx:1.25".to_owned();
        let f = ImageFacts::default();
        let d = diff_container(&desired(), &f, &o, &settings()).unwrap();
        assert!(!d.paths().contains(&"image.repo"));
        assert!(!d.paths().contains(&"command"));
    }

    #[test]
    fn command_override_is_compared_as_words() {
        let mut c = desired();
        c.command = Some("nginx  -g 'daemon off;'".to_owned());
        let mut o = observed();
        o.config.cmd = Some(vec!["nginx".to_owned(), "-g".to_owned(), "daemon off;".to_owned()]);
        assert!(diff(&c, &o).is_empty());

        c.command = Some("nginx -t".to_owned());
        assert_eq!(diff(&c, &o).paths(), vec!["command"]);
    }

    #[test]
    fn env_three_way() {
        let mut c = desired();
        c.env.insert("ONLY_DECLARED".to_owned(), "1".to_owned());
        let mut o = observed();
        o.config.env = Some(vec![
            "PATH=/usr/bin".to_owned(),
            "MODE=dev".to_owned(),
            "ONLY_OBSERVED=x".to_owned(),
        ]);
        let d = diff(&c, &o);
        assert_eq!(
            d.paths(),
            vec!["env.MODE", "env.ONLY_OBSERVED", "env.ONLY_DECLARED"]
        );
        assert!(matches!(d.get("env.MODE"), Some(Change::Changed { .. })));
        assert!(matches!(
            d.get("env.ONLY_OBSERVED"),
            Some(Change::Extraneous { .. })
        ));
        assert!(matches!(
            d.get("env.ONLY_DECLARED"),
            Some(Change::Missing { .. })
        ));
    }

    #[test]
    fn container_env_overrides_image_env() {
        let mut c = desired();
        c.env.insert("PATH".to_owned(), "/opt/bin".to_owned());
        let mut o = observed();
        o.config.env = Some(vec!["PATH=/opt/bin".to_owned(), "MODE=prod".to_owned()]);
        assert!(diff(&c, &o).is_empty());
    }

    #[test]
    fn ports_missing_mismatched_and_extraneous() {
        let mut c = desired();
        c.ports.insert("admin".to_owned(), 9000);
        let mut o = observed();
        let bindings = o.host_config.port_bindings.as_mut().unwrap();
        bindings.get_mut("80/tcp").unwrap().as_mut().unwrap()[0].host_port = "8081".to_owned();
        bindings.insert("53/udp".to_owned(), None);

        let d = diff(&c, &o);
        assert_eq!(
            d.paths(),
            vec!["ports.admin", "ports.http.ext", "ports.53/udp"]
        );
        assert_eq!(
            d.get("ports.http.ext"),
            Some(&Change::Changed {
                expected: "8080".to_owned(),
                actual: "8081".to_owned()
            })
        );
    }

    #[test]
    fn udp_port_needs_matching_protocol() {
        let mut c = desired();
        c.portproto.insert("http".to_owned(), "udp".to_owned());
        let d = diff(&c, &observed());
        assert_eq!(d.paths(), vec!["ports.http", "ports.80/tcp"]);
    }

    #[test]
    fn anonymous_volumes_are_ignored() {
        let mut o = observed();
        o.mounts.push(Mount {
            kind: "volume".to_owned(),
            name: Some("a".repeat(64)),
            source: format!("/var/lib/docker/volumes/{}/_data", "a".repeat(64)),
            destination: "/cache".to_owned(),
            rw: true,
        });
        o.mounts.push(Mount {
            source: "/var/lib/docker/vfs/dir/abc".to_owned(),
            destination: "/tmp/x".to_owned(),
            ..o.mounts[0].clone()
        });
        assert!(diff(&desired(), &o).is_empty());

        o.mounts.push(Mount {
            source: "/var/lib/docker/volumes/named/_data".to_owned(),
            destination: "/named".to_owned(),
            ..o.mounts[0].clone()
        });
        assert_eq!(diff(&desired(), &o).paths(), vec!["volumes./named"]);
    }

    #[test]
    fn anonymous_volumes_under_any_data_root_are_ignored() {
        let hex = "0123456789abcdef".repeat(4);
        let mut o = observed();
        o.mounts.push(Mount {
            kind: "volume".to_owned(),
            name: Some(hex.clone()),
            source: format!("/home/ops/.local/share/docker/volumes/{hex}/_data"),
            destination: "/cache".to_owned(),
            rw: true,
        });
        assert!(diff(&desired(), &o).is_empty());

        o.mounts.push(Mount {
            kind: "volume".to_owned(),
            name: Some("shared".to_owned()),
            source: "/home/ops/.local/share/docker/volumes/shared/_data".to_owned(),
            destination: "/shared".to_owned(),
            rw: true,
        });
        assert_eq!(diff(&desired(), &o).paths(), vec!["volumes./shared"]);
    }

    #[test]
    fn volume_path_mismatch_hides_other_volume_fields() {
        let mut o = observed();
        o.mounts[0].source = "/elsewhere".to_owned();
        o.mounts[0].rw = false;
        let d = diff(&desired(), &o);
        assert_eq!(d.paths(), vec!["volumes./var/lib/web.path"]);
    }

    #[test]
    fn volume_ro_and_missing() {
        let mut c = desired();
        c.volumes.push(Volume::Data(DataVolume::new("/logs")));
        let mut o = observed();
        o.mounts[0].rw = false;
        let d = diff(&c, &o);
        assert_eq!(d.paths(), vec!["volumes./var/lib/web.ro", "volumes./logs"]);
        assert_eq!(
            d.get("volumes./logs"),
            Some(&Change::Missing {
                expected: "/srv/data/web/data".to_owned()
            })
        );
    }

    #[test]
    fn config_files_are_compared_with_disk() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings {
            config_volume_dir: dir.path().to_path_buf(),
            ..settings()
        };
        let mut c = desired();
        c.volumes = vec![Volume::Config(ConfigVolume::new(
            "/etc/app",
            vec![ConfigFile::text("app.conf", "a = 1\nb = 2\n")],
        ))];
        let host = dir.path().join("web/config");
        std::fs::create_dir_all(&host).unwrap();
        std::fs::write(host.join("app.conf"), "a = 1\nb = 3\n").unwrap();

        let mut o = observed();
        o.mounts = vec![Mount {
            kind: "bind".to_owned(),
            name: None,
            source: host.display().to_string(),
            destination: "/etc/app".to_owned(),
            rw: false,
        }];
        let d = diff_container(&c, &facts(), &o, &s).unwrap();
        assert_eq!(d.paths(), vec!["volumes./etc/app.files.app.conf"]);
        assert_eq!(
            d.get("volumes./etc/app.files.app.conf"),
            Some(&Change::Lines {
                lines: vec![
                    LineChange::Removed("b = 3".to_owned()),
                    LineChange::Added("b = 2".to_owned()),
                ]
            })
        );

        std::fs::write(host.join("app.conf"), "a = 1\nb = 2\n").unwrap();
        assert!(diff_container(&c, &facts(), &o, &s).unwrap().is_empty());
    }

    #[test]
    fn line_diff_keeps_only_changes() {
        assert!(line_diff("a\nb", "a\nb").is_empty());
        assert_eq!(
            line_diff("", "x"),
            vec![LineChange::Removed(String::new()), LineChange::Added("x".to_owned())]
        );
        assert_eq!(
            line_diff("a\nb\nc", "a\nc\nd"),
            vec![
                LineChange::Removed("b".to_owned()),
                LineChange::Added("d".to_owned())
            ]
        );
    }

    #[test]
    fn line_diff_of_large_files_with_one_change() {
        let old: Vec<String> = (0..20_000).map(|i| format!("line {i}")).collect();
        let mut new = old.clone();
        new[10_000] = "changed".to_owned();
        assert_eq!(
            line_diff(&old.join("\n"), &new.join("\n")),
            vec![
                LineChange::Removed("line 10000".to_owned()),
                LineChange::Added("changed".to_owned())
            ]
        );
        assert!(line_diff(&old.join("\n"), &old.join("\n")).is_empty());
    }

    #[test]
    fn display_aligns_paths() {
        let mut o = observed();
        o.host_config.memory = 64;
        o.config.env = Some(vec!["PATH=/usr/bin".to_owned()]);
        let text = diff(&desired(), &o).to_string();
        assert_eq!(text, "memory    0 -> 64\nenv.MODE  prod -> \"\"\n");
    }
}
