use crate::identity::derive_tag;
use crate::types::{ImageId, ImageTag};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_TAG: &str = "latest";

/// An image artifact: either referenced from a registry, or buildable from a
/// parent image plus a build definition.
///
/// Two images are the same artifact iff repository, tag and id match; see
/// [`Image::same_artifact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: ImageTag,
    /// Runtime content digest. Empty until resolved.
    pub id: ImageId,
    pub build: Option<BuildSpec>,
}

/// Everything a buildable image is made of. The image tag is derived from
/// this definition, never assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub parent: Arc<Image>,
    /// Shell steps, in order. Each one is a `RUN` line.
    pub steps: Vec<String>,
    pub command: Option<String>,
    pub user: Option<String>,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<String>,
    pub ports: Vec<u16>,
    /// Embedded files, keyed by destination path inside the image.
    pub files: BTreeMap<String, Vec<u8>>,
}

impl BuildSpec {
    pub fn new(parent: Arc<Image>) -> Self {
        Self {
            parent,
            steps: Vec::new(),
            command: None,
            user: None,
            env: BTreeMap::new(),
            volumes: Vec::new(),
            ports: Vec::new(),
            files: BTreeMap::new(),
        }
    }
}

impl Image {
    /// Reference an image by repository (optionally registry-qualified) at `latest`.
    pub fn new(repository: &str) -> Self {
        let (registry, repository) = split_repository(repository);
        Self {
            registry,
            repository,
            tag: ImageTag::new(DEFAULT_TAG),
            id: ImageId::default(),
            build: None,
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<ImageTag>) -> Self {
        self.tag = tag.into();
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<ImageId>) -> Self {
        self.id = id.into();
        self
    }

    /// A buildable image. Its tag is derived from `build`.
    pub fn buildable(repository: &str, build: BuildSpec) -> Self {
        let (registry, repository) = split_repository(repository);
        let mut image = Self {
            registry,
            repository,
            tag: ImageTag::default(),
            id: ImageId::default(),
            build: Some(build),
        };
        image.rederive_tag();
        image
    }

    pub fn is_buildable(&self) -> bool {
        self.build.is_some()
    }

    /// Recompute the derived tag of a buildable image. A changed tag names a
    /// different artifact, so any previously resolved id is dropped.
    pub fn rederive_tag(&mut self) {
        let Some(build) = &self.build else {
            return;
        };
        let tag = derive_tag(&self.full_repository(), build);
        if tag != self.tag {
            self.tag = tag;
            self.id = ImageId::default();
        }
    }

    /// Repository including the registry prefix, as the runtime names it.
    pub fn full_repository(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{registry}/{}", self.repository),
            None => self.repository.clone(),
        }
    }

    /// `<full repository>:<tag>`, the reference used to create containers.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.full_repository(), self.tag)
    }

    pub fn same_artifact(&self, other: &Image) -> bool {
        self.full_repository() == other.full_repository()
            && self.tag == other.tag
            && self.id == other.id
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference())?;
        if !self.id.is_empty() {
            write!(f, " ({})", self.id.short())?;
        }
        Ok(())
    }
}

/// Split `registry/name` into its registry and repository parts.
///
/// The first path segment is a registry when it looks like a host: it
/// contains a `.` or a `:`, or is `localhost`.
pub fn split_repository(repository: &str) -> (Option<String>, String) {
    if let Some((head, rest)) = repository.split_once('/') {
        if head.contains('.') || head.contains(':') || head == "localhost" {
            return (Some(head.to_owned()), rest.to_owned());
        }
    }
    (None, repository.to_owned())
}
