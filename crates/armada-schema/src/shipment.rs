//! The shipment: everything deployed together, and its YAML document form.
//!
//! Containers reference ships by name and images by alias. Loading resolves
//! those references into shared `Arc`s and derives the tag of every
//! buildable image, parents first. Observed container state never appears in
//! the document.

use crate::container::{Container, DEFAULT_NETWORK_MODE};
use crate::image::{BuildSpec, Image, DEFAULT_TAG};
use crate::settings::Settings;
use crate::ship::{Ship, LOCAL_SHIP};
use crate::types::{ImageId, ImageTag};
use crate::volume::{ConfigFile, Volume};
use crate::SchemaError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShipmentDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub armada_version: Option<String>,
    #[serde(default)]
    pub ships: BTreeMap<String, ShipDef>,
    #[serde(default)]
    pub images: BTreeMap<String, ImageDef>,
    #[serde(default)]
    pub containers: Vec<ContainerDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShipDef {
    pub fqdn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageDef {
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildDef {
    /// Alias of the parent image.
    pub parent: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    /// Destination path inside the image to file text.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, String>,
}

/// A container entry. Unknown keys (such as a stale `id` or `status`) are
/// ignored so observed state can never be loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerDef {
    pub name: String,
    #[serde(default = "default_ship")]
    pub ship: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub memory: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ports: BTreeMap<String, u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extports: BTreeMap<String, u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub portproto: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default = "default_network_mode")]
    pub network_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub privileged: bool,
}

fn default_ship() -> String {
    LOCAL_SHIP.to_owned()
}

fn default_network_mode() -> String {
    DEFAULT_NETWORK_MODE.to_owned()
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &u64) -> bool {
    *n == 0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

/// A named, versioned bundle of declared containers.
#[derive(Debug, Clone, Default)]
pub struct Shipment {
    pub name: String,
    pub version: Option<String>,
    pub author: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub armada_version: Option<String>,
    pub ships: BTreeMap<String, Arc<Ship>>,
    pub images: BTreeMap<String, Arc<Image>>,
    pub containers: Vec<Container>,
}

/// A volume together with the container that owns it.
#[derive(Debug, Clone, Copy)]
pub struct VolumeRef<'a> {
    pub container: &'a Container,
    pub volume: &'a Volume,
}

impl VolumeRef<'_> {
    /// `<ship>:<container>:<volume>`.
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.container.full_name(), self.volume.name())
    }
}

/// A config file together with its volume and container.
#[derive(Debug, Clone, Copy)]
pub struct FileRef<'a> {
    pub container: &'a Container,
    pub volume: &'a Volume,
    pub file: &'a ConfigFile,
}

impl FileRef<'_> {
    /// `<ship>:<container>:<volume>:<file>`.
    pub fn full_name(&self) -> String {
        format!(
            "{}:{}:{}",
            self.container.full_name(),
            self.volume.name(),
            self.file.name
        )
    }
}

impl Shipment {
    pub fn load(path: &Path, settings: &Settings) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content, settings)
    }

    pub fn from_yaml_str(content: &str, settings: &Settings) -> Result<Self, SchemaError> {
        let document: ShipmentDocument = serde_yaml::from_str(content)?;
        Self::from_document(document, settings)
    }

    pub fn from_document(doc: ShipmentDocument, settings: &Settings) -> Result<Self, SchemaError> {
        let mut ships: BTreeMap<String, Arc<Ship>> = BTreeMap::new();
        ships.insert(LOCAL_SHIP.to_owned(), Arc::new(Ship::local(settings)));
        for (name, def) in &doc.ships {
            let mut ship = Ship::new(name, &def.fqdn);
            if let Some(url) = &def.url {
                ship = ship.with_url(url);
            }
            ships.insert(name.clone(), Arc::new(ship));
        }

        let mut images = BTreeMap::new();
        for alias in doc.images.keys() {
            resolve_image(alias, &doc.images, settings, &mut images, &mut BTreeSet::new())?;
        }

        let mut seen = HashSet::new();
        let mut containers = Vec::with_capacity(doc.containers.len());
        for def in doc.containers {
            let ship = ships
                .get(&def.ship)
                .cloned()
                .ok_or_else(|| SchemaError::UnknownShip {
                    container: def.name.clone(),
                    ship: def.ship.clone(),
                })?;
            let image = images
                .get(&def.image)
                .cloned()
                .ok_or_else(|| SchemaError::UnknownImage {
                    container: def.name.clone(),
                    image: def.image.clone(),
                })?;
            if !seen.insert((def.ship.clone(), def.name.clone())) {
                return Err(SchemaError::DuplicateContainer {
                    name: def.name,
                    ship: def.ship,
                });
            }
            let mut container = Container::new(&def.name, ship, image);
            container.command = def.command;
            container.hostname = def.hostname;
            container.memory = def.memory;
            container.ports = def.ports;
            container.extports = def.extports;
            container.portproto = def.portproto;
            container.env = def.env;
            container.volumes = def.volumes;
            container.network_mode = def.network_mode;
            container.user = def.user;
            container.privileged = def.privileged;
            containers.push(container);
        }

        tracing::debug!(
            "loaded shipment '{}': {} ships, {} images, {} containers",
            doc.name,
            ships.len(),
            images.len(),
            containers.len()
        );

        Ok(Self {
            name: doc.name,
            version: doc.version,
            author: doc.author,
            timestamp: doc.timestamp,
            armada_version: doc.armada_version,
            ships,
            images,
            containers,
        })
    }

    pub fn to_document(&self) -> Result<ShipmentDocument, SchemaError> {
        let ships = self
            .ships
            .iter()
            .filter(|(_, ship)| !ship.islocal)
            .map(|(name, ship)| {
                let default_url = Ship::new(name, &ship.fqdn).url;
                let def = ShipDef {
                    fqdn: ship.fqdn.clone(),
                    url: (ship.url != default_url).then(|| ship.url.clone()),
                };
                (name.clone(), def)
            })
            .collect();

        let mut images = BTreeMap::new();
        for (alias, image) in &self.images {
            let build = match &image.build {
                Some(build) => Some(BuildDef {
                    parent: self.alias_of(&build.parent)?.to_owned(),
                    steps: build.steps.clone(),
                    command: build.command.clone(),
                    user: build.user.clone(),
                    env: build.env.clone(),
                    volumes: build.volumes.clone(),
                    ports: build.ports.clone(),
                    files: build
                        .files
                        .iter()
                        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
                        .collect(),
                }),
                None => None,
            };
            images.insert(
                alias.clone(),
                ImageDef {
                    repository: image.full_repository(),
                    tag: Some(image.tag.to_string()),
                    id: image.id.to_string(),
                    build,
                },
            );
        }

        let containers = self
            .containers
            .iter()
            .map(|c| self.container_def(c))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ShipmentDocument {
            name: self.name.clone(),
            version: self.version.clone(),
            author: self.author.clone(),
            timestamp: self.timestamp,
            armada_version: self.armada_version.clone(),
            ships,
            images,
            containers,
        })
    }

    pub fn to_yaml(&self) -> Result<String, SchemaError> {
        Ok(serde_yaml::to_string(&self.to_document()?)?)
    }

    /// Document form of one container. Observed state is dropped.
    pub fn container_def(&self, c: &Container) -> Result<ContainerDef, SchemaError> {
        Ok(ContainerDef {
            name: c.name.clone(),
            ship: c.ship.name.clone(),
            image: self.alias_of(&c.image)?.to_owned(),
            command: c.command.clone(),
            hostname: c.hostname.clone(),
            memory: c.memory,
            ports: c.ports.clone(),
            extports: c.extports.clone(),
            portproto: c.portproto.clone(),
            env: c.env.clone(),
            volumes: c.volumes.clone(),
            network_mode: c.network_mode.clone(),
            user: c.user.clone(),
            privileged: c.privileged,
        })
    }

    /// The alias under which `image` is registered, by pointer first and
    /// then by value.
    pub fn alias_of(&self, image: &Arc<Image>) -> Result<&str, SchemaError> {
        self.images
            .iter()
            .find(|(_, candidate)| Arc::ptr_eq(candidate, image))
            .or_else(|| {
                self.images
                    .iter()
                    .find(|(_, candidate)| candidate.as_ref() == image.as_ref())
            })
            .map(|(alias, _)| alias.as_str())
            .ok_or_else(|| SchemaError::DetachedImage(image.reference()))
    }

    /// Image aliases with every build parent before its children.
    pub fn build_order(&self) -> Result<Vec<String>, SchemaError> {
        fn visit(
            shipment: &Shipment,
            alias: &str,
            done: &mut BTreeSet<String>,
            order: &mut Vec<String>,
        ) -> Result<(), SchemaError> {
            if !done.insert(alias.to_owned()) {
                return Ok(());
            }
            if let Some(build) = shipment.images.get(alias).and_then(|i| i.build.as_ref()) {
                let parent = shipment.alias_of(&build.parent)?.to_owned();
                visit(shipment, &parent, done, order)?;
            }
            order.push(alias.to_owned());
            Ok(())
        }

        let mut done = BTreeSet::new();
        let mut order = Vec::with_capacity(self.images.len());
        for alias in self.images.keys() {
            visit(self, alias, &mut done, &mut order)?;
        }
        Ok(order)
    }

    /// Pass every image through `update`, parents first. Buildable images
    /// are re-pointed at their updated parent and their tag is re-derived
    /// before `update` sees them. Containers follow their image's alias.
    pub fn update_images<E>(
        &mut self,
        mut update: impl FnMut(&str, Image) -> Result<Image, E>,
    ) -> Result<(), E>
    where
        E: From<SchemaError>,
    {
        let order = self.build_order()?;
        let mut parents = BTreeMap::new();
        for (alias, image) in &self.images {
            if let Some(build) = &image.build {
                parents.insert(alias.clone(), self.alias_of(&build.parent)?.to_owned());
            }
        }
        let container_aliases = self
            .containers
            .iter()
            .map(|c| self.alias_of(&c.image).map(str::to_owned))
            .collect::<Result<Vec<_>, _>>()?;

        for alias in order {
            let Some(current) = self.images.get(&alias) else {
                continue;
            };
            let mut image = current.as_ref().clone();
            if let (Some(build), Some(parent)) = (image.build.as_mut(), parents.get(&alias)) {
                if let Some(updated) = self.images.get(parent) {
                    build.parent = Arc::clone(updated);
                }
            }
            image.rederive_tag();
            let image = update(&alias, image)?;
            self.images.insert(alias, Arc::new(image));
        }

        for (container, alias) in self.containers.iter_mut().zip(container_aliases) {
            if let Some(image) = self.images.get(&alias) {
                container.image = Arc::clone(image);
            }
        }
        Ok(())
    }

    pub fn volumes(&self) -> Vec<VolumeRef<'_>> {
        self.containers
            .iter()
            .flat_map(|container| {
                container
                    .volumes
                    .iter()
                    .map(move |volume| VolumeRef { container, volume })
            })
            .collect()
    }

    pub fn files(&self) -> Vec<FileRef<'_>> {
        self.volumes()
            .into_iter()
            .flat_map(|v| {
                v.volume.files().iter().map(move |file| FileRef {
                    container: v.container,
                    volume: v.volume,
                    file,
                })
            })
            .collect()
    }
}

fn resolve_image(
    alias: &str,
    defs: &BTreeMap<String, ImageDef>,
    settings: &Settings,
    resolved: &mut BTreeMap<String, Arc<Image>>,
    visiting: &mut BTreeSet<String>,
) -> Result<Arc<Image>, SchemaError> {
    if let Some(image) = resolved.get(alias) {
        return Ok(Arc::clone(image));
    }
    if !visiting.insert(alias.to_owned()) {
        return Err(SchemaError::ParentCycle(alias.to_owned()));
    }
    let Some(def) = defs.get(alias) else {
        return Err(SchemaError::DetachedImage(alias.to_owned()));
    };

    let mut image = Image::new(&settings.namespaced(&def.repository))
        .with_tag(def.tag.as_deref().unwrap_or(DEFAULT_TAG))
        .with_id(ImageId::new(def.id.clone()));

    if let Some(build) = &def.build {
        if !defs.contains_key(&build.parent) {
            return Err(SchemaError::UnknownParent {
                image: alias.to_owned(),
                parent: build.parent.clone(),
            });
        }
        let parent = resolve_image(&build.parent, defs, settings, resolved, visiting)?;
        let mut spec = BuildSpec::new(parent);
        spec.steps.clone_from(&build.steps);
        spec.command.clone_from(&build.command);
        spec.user.clone_from(&build.user);
        spec.env.clone_from(&build.env);
        spec.volumes.clone_from(&build.volumes);
        spec.ports.clone_from(&build.ports);
        spec.files = build
            .files
            .iter()
            .map(|(k, v)| (k.clone(), v.clone().into_bytes()))
            .collect();
        if def.tag.is_none() {
            image.tag = ImageTag::default();
        }
        image.build = Some(spec);
        image.rederive_tag();
    }

    visiting.remove(alias);
    let image = Arc::new(image);
    resolved.insert(alias.to_owned(), Arc::clone(&image));
    Ok(image)
}
