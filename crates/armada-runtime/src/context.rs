//! Build contexts for buildable images.
//!
//! The context is an uncompressed tar holding a generated `Dockerfile` and
//! every embedded file. Headers are normalized (mtime 0, uid/gid 0), so the
//! same definition always yields the same bytes.

use crate::RuntimeError;
use armada_schema::Image;
use std::fmt::Write as _;

/// The Dockerfile for a buildable image, or `None` for a plain one.
pub fn dockerfile(image: &Image) -> Option<String> {
    let build = image.build.as_ref()?;
    let mut out = String::new();
    let _ = writeln!(out, "FROM {}", build.parent.reference());
    for (key, value) in &build.env {
        let quoted = serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""));
        let _ = writeln!(out, "ENV {key}={quoted}");
    }
    for step in &build.steps {
        let _ = writeln!(out, "RUN {step}");
    }
    for volume in &build.volumes {
        let _ = writeln!(out, "VOLUME {volume}");
    }
    for port in &build.ports {
        let _ = writeln!(out, "EXPOSE {port}");
    }
    if let Some(user) = &build.user {
        let _ = writeln!(out, "USER {user}");
    }
    for path in build.files.keys() {
        let _ = writeln!(out, "ADD {} {path}", archive_path(path));
    }
    if let Some(command) = &build.command {
        let _ = writeln!(out, "CMD {command}");
    }
    Some(out)
}

/// Tar build context for a buildable image.
pub fn build_context(image: &Image) -> Result<Vec<u8>, RuntimeError> {
    let Some(build) = image.build.as_ref() else {
        return Err(RuntimeError::Backend(format!(
            "{} has no build definition",
            image.reference()
        )));
    };
    let dockerfile = dockerfile(image).unwrap_or_default();

    let mut ar = tar::Builder::new(Vec::new());
    append(&mut ar, "Dockerfile", dockerfile.as_bytes())?;
    for (path, content) in &build.files {
        append(&mut ar, archive_path(path), content)?;
    }
    Ok(ar.into_inner()?)
}

fn archive_path(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn append(ar: &mut tar::Builder<Vec<u8>>, path: &str, data: &[u8]) -> Result<(), RuntimeError> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(0o644);
    header.set_size(data.len() as u64);
    header.set_cksum();
    ar.append_data(&mut header, path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_schema::BuildSpec;
    use std::io::Read;
    use std::sync::Arc;

    fn image() -> Image {
        let parent = Arc::new(Image::new("debian").with_tag("bookworm"));
        let mut build = BuildSpec::new(parent);
        build.env.insert("B".to_owned(), "two words".to_owned());
        build.env.insert("A".to_owned(), "1".to_owned());
        build.steps = vec!["apt-get update".to_owned(), "useradd app".to_owned()];
        build.volumes = vec!["/data".to_owned()];
        build.ports = vec![8080];
        build.user = Some("app".to_owned());
        build.command = Some("/usr/bin/app".to_owned());
        build
            .files
            .insert("/etc/app.conf".to_owned(), b"x = 1\n".to_vec());
        Image::buildable("team/app", build)
    }

    #[test]
    fn dockerfile_lists_instructions_in_order() {
        let text = dockerfile(&image()).unwrap();
        assert_eq!(
            text,
            "FROM debian:bookworm\n\
             ENV A=\"1\"\n\
             ENV B=\"two words\"\n\
             RUN apt-get update\n\
             RUN useradd app\n\
             VOLUME /data\n\
             EXPOSE 8080\n\
             USER app\n\
             ADD etc/app.conf /etc/app.conf\n\
             CMD /usr/bin/app\n"
        );
    }

    #[test]
    fn plain_image_has_no_dockerfile() {
        assert!(dockerfile(&Image::new("busybox")).is_none());
        assert!(build_context(&Image::new("busybox")).is_err());
    }

    #[test]
    fn context_is_deterministic_and_complete() {
        let a = build_context(&image()).unwrap();
        let b = build_context(&image()).unwrap();
        assert_eq!(a, b);

        let mut archive = tar::Archive::new(&a[..]);
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            if name == "etc/app.conf" {
                assert_eq!(body, "x = 1\n");
            }
            assert_eq!(entry.header().mtime().unwrap(), 0);
            names.push(name);
        }
        assert_eq!(names, vec!["Dockerfile", "etc/app.conf"]);
    }
}
