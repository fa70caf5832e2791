use crate::image::BuildSpec;
use crate::types::ImageTag;
use serde::Serialize;
use std::collections::BTreeMap;

/// Canonical form of a build definition. Field order is alphabetical and all
/// maps are `BTreeMap`, so the JSON encoding is byte-stable.
#[derive(Serialize)]
struct CanonicalBuild<'a> {
    command: Option<&'a str>,
    env: &'a BTreeMap<String, String>,
    files: BTreeMap<&'a str, String>,
    parent: CanonicalParent<'a>,
    ports: &'a [u16],
    repository: &'a str,
    steps: &'a [String],
    user: Option<&'a str>,
    volumes: &'a [String],
}

#[derive(Serialize)]
struct CanonicalParent<'a> {
    id: &'a str,
    registry: Option<&'a str>,
    repository: &'a str,
    tag: &'a str,
}

/// Content digest of one embedded file (blake3, lowercase hex).
pub fn file_digest(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

/// Derive the tag of a buildable image from its complete definition.
///
/// The digest covers the full repository name, the parent's identity
/// (registry, repository, tag, id), steps in order, command, user, env,
/// volumes, ports and the digest of every embedded file. Env is keyed, so
/// its declaration order does not matter; step order does.
pub fn derive_tag(repository: &str, build: &BuildSpec) -> ImageTag {
    let parent = &build.parent;
    let canonical = CanonicalBuild {
        command: build.command.as_deref(),
        env: &build.env,
        files: build
            .files
            .iter()
            .map(|(name, content)| (name.as_str(), file_digest(content)))
            .collect(),
        parent: CanonicalParent {
            id: parent.id.as_str(),
            registry: parent.registry.as_deref(),
            repository: &parent.repository,
            tag: parent.tag.as_str(),
        },
        ports: &build.ports,
        repository,
        steps: &build.steps,
        user: build.user.as_deref(),
        volumes: &build.volumes,
    };

    // Strings, integers and string-keyed maps always serialize.
    let bytes = serde_json::to_vec(&canonical).expect("canonical build definition serializes");
    ImageTag::new(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;
    use std::sync::Arc;

    fn base() -> BuildSpec {
        let parent = Arc::new(
            Image::new("debian")
                .with_tag("bookworm")
                .with_id("sha256:1111"),
        );
        let mut build = BuildSpec::new(parent);
        build.steps = vec!["apt-get update".to_owned(), "apt-get install -y curl".to_owned()];
        build.command = Some("/usr/bin/app --serve".to_owned());
        build.env.insert("A".to_owned(), "1".to_owned());
        build.env.insert("B".to_owned(), "2".to_owned());
        build.ports = vec![8080];
        build
            .files
            .insert("/etc/app.conf".to_owned(), b"listen=8080\n".to_vec());
        build
    }

    #[test]
    fn identical_definitions_give_identical_tags() {
        assert_eq!(derive_tag("team/app", &base()), derive_tag("team/app", &base()));
    }

    #[test]
    fn tag_is_lowercase_hex() {
        let tag = derive_tag("team/app", &base());
        assert_eq!(tag.len(), 64);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn one_byte_file_change_changes_tag() {
        let a = base();
        let mut b = base();
        b.files
            .insert("/etc/app.conf".to_owned(), b"listen=8081\n".to_vec());
        assert_ne!(derive_tag("team/app", &a), derive_tag("team/app", &b));
    }

    #[test]
    fn env_declaration_order_is_irrelevant() {
        let a = base();
        let mut b = BuildSpec::new(Arc::clone(&a.parent));
        b.steps.clone_from(&a.steps);
        b.command.clone_from(&a.command);
        b.ports.clone_from(&a.ports);
        b.files.clone_from(&a.files);
        b.env.insert("B".to_owned(), "2".to_owned());
        b.env.insert("A".to_owned(), "1".to_owned());
        assert_eq!(derive_tag("team/app", &a), derive_tag("team/app", &b));
    }

    #[test]
    fn step_order_matters() {
        let a = base();
        let mut b = base();
        b.steps.reverse();
        assert_ne!(derive_tag("team/app", &a), derive_tag("team/app", &b));
    }

    #[test]
    fn port_and_command_changes_change_tag() {
        let a = derive_tag("team/app", &base());
        let mut ports = base();
        ports.ports.push(9090);
        let mut command = base();
        command.command = None;
        assert_ne!(a, derive_tag("team/app", &ports));
        assert_ne!(a, derive_tag("team/app", &command));
    }

    #[test]
    fn parent_identity_is_part_of_tag() {
        let a = base();
        let mut b = base();
        b.parent = Arc::new(
            Image::new("debian")
                .with_tag("bookworm")
                .with_id("sha256:2222"),
        );
        assert_ne!(derive_tag("team/app", &a), derive_tag("team/app", &b));
    }

    #[test]
    fn repository_is_part_of_tag() {
        assert_ne!(derive_tag("team/app", &base()), derive_tag("team/other", &base()));
    }

    #[test]
    fn empty_step_list_is_valid() {
        let build = BuildSpec::new(Arc::new(Image::new("busybox")));
        let tag = derive_tag("team/empty", &build);
        assert_eq!(tag.len(), 64);
    }

    #[test]
    fn file_digest_is_content_addressed() {
        assert_eq!(file_digest(b"abc"), file_digest(b"abc"));
        assert_ne!(file_digest(b"abc"), file_digest(b"abd"));
    }
}
