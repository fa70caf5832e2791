use crate::images::{BuildOptions, BuildOutcome, ImageResolver, Progress};
use crate::lifecycle::Reconciler;
use crate::{CoreError, RuntimeResultExt};
use armada_runtime::{ByteStream, ContainerRecord, ContainerSummary, Runtime, StreamLines};
use armada_schema::{Image, NamePattern, Settings, Ship, Shipment};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::debug;

struct Connection {
    runtime: Box<dyn Runtime>,
    images: ImageResolver,
}

/// Runtime connections of every ship, opened on first use.
///
/// Each ship gets its own image resolver, since image ids are only
/// meaningful on the runtime that reported them.
pub struct Fleet {
    settings: Settings,
    connections: BTreeMap<String, Connection>,
}

impl Fleet {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            connections: BTreeMap::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Use `runtime` for the ship named `ship` instead of connecting.
    #[must_use]
    pub fn with_runtime(mut self, ship: &str, runtime: Box<dyn Runtime>) -> Self {
        self.connections.insert(
            ship.to_owned(),
            Connection {
                runtime,
                images: ImageResolver::new(),
            },
        );
        self
    }

    fn connection(&mut self, ship: &Ship) -> Result<&Connection, CoreError> {
        if !self.connections.contains_key(&ship.name) {
            let timeout = self.settings.http_timeout.map(Duration::from_secs);
            debug!("connecting to {} at {}", ship.name, ship.url);
            let runtime = armada_runtime::connect(&ship.url, timeout)?;
            self.connections.insert(
                ship.name.clone(),
                Connection {
                    runtime,
                    images: ImageResolver::new(),
                },
            );
        }
        self.connections
            .get(&ship.name)
            .ok_or_else(|| CoreError::UnknownShip(ship.name.clone()))
    }

    pub fn runtime(&mut self, ship: &Ship) -> Result<&dyn Runtime, CoreError> {
        Ok(self.connection(ship)?.runtime.as_ref())
    }

    /// Runtime and image resolver of `ship`.
    pub fn images(&mut self, ship: &Ship) -> Result<(&dyn Runtime, &ImageResolver), CoreError> {
        let connection = self.connection(ship)?;
        Ok((connection.runtime.as_ref(), &connection.images))
    }

    /// Running containers of `ship` whose name matches `pattern`, declared
    /// in a shipment or not, sorted by name.
    pub fn ship_containers(
        &mut self,
        ship: &Ship,
        pattern: &NamePattern,
    ) -> Result<Vec<ContainerSummary>, CoreError> {
        let mut listed: Vec<ContainerSummary> = self
            .runtime(ship)?
            .list_containers(false)
            .op(&ship.name, "list")?
            .into_iter()
            .filter(|c| c.name().is_some_and(|name| pattern.matches(name)))
            .collect();
        listed.sort_by(|a, b| a.name().cmp(&b.name()));
        Ok(listed)
    }

    pub fn inspect_on(
        &mut self,
        ship: &Ship,
        container: &str,
    ) -> Result<ContainerRecord, CoreError> {
        self.runtime(ship)?
            .inspect(container)
            .op(container, "inspect")
    }

    pub fn logs_on(
        &mut self,
        ship: &Ship,
        container: &str,
        follow: bool,
    ) -> Result<StreamLines<ByteStream>, CoreError> {
        let stream = self
            .runtime(ship)?
            .logs(container, follow)
            .op(container, "logs")?;
        Ok(StreamLines::new(stream))
    }

    pub fn reconciler(&mut self, ship: &Ship) -> Result<Reconciler<'_>, CoreError> {
        self.connection(ship)?;
        let connection = self
            .connections
            .get(&ship.name)
            .ok_or_else(|| CoreError::UnknownShip(ship.name.clone()))?;
        Ok(Reconciler::new(
            connection.runtime.as_ref(),
            &connection.images,
            &self.settings,
        ))
    }

    /// Pin the id of every build parent on the local ship, parents first,
    /// so derived tags cover the parent artifact and not just its tag.
    ///
    /// With `fetch`, an absent parent is pulled, or built when it is itself
    /// buildable. Without it, a parent the local runtime does not hold keeps
    /// an empty id. Declared ids are never replaced.
    pub fn pin_parents(
        &mut self,
        shipment: &mut Shipment,
        fetch: bool,
        on_message: Progress<'_>,
    ) -> Result<(), CoreError> {
        let parents = shipment
            .images
            .values()
            .filter_map(|image| image.build.as_ref())
            .map(|build| shipment.alias_of(&build.parent).map(str::to_owned))
            .collect::<Result<BTreeSet<_>, _>>()?;
        if parents.is_empty() {
            return Ok(());
        }
        let local = Ship::local(&self.settings);
        let (runtime, images) = self.images(&local)?;
        shipment.update_images(|alias, mut image: Image| -> Result<Image, CoreError> {
            if !parents.contains(alias) || !image.id.is_empty() {
                return Ok(image);
            }
            let id = match (fetch, image.is_buildable()) {
                (false, _) => images.lookup(runtime, &image)?,
                (true, true) => Some(
                    images
                        .ensure_built(runtime, &image, BuildOptions::default(), &mut *on_message)?
                        .id()
                        .clone(),
                ),
                (true, false) => Some(images.resolve(runtime, &image, &mut *on_message)?),
            };
            match id {
                Some(id) => {
                    debug!("{alias}: pinned {} to {id}", image.reference());
                    image.id = id;
                }
                None => debug!("{alias}: {} is not present", image.reference()),
            }
            Ok(image)
        })
    }

    /// Resolve every image of `shipment` against the local ship.
    ///
    /// Plain images get their id (pulled when absent); buildable images get
    /// their derived tag, parents first, and are built and pushed when
    /// missing. The shipment is then stamped with the current time and
    /// Armada version.
    pub fn generate(
        &mut self,
        shipment: &mut Shipment,
        on_message: Progress<'_>,
    ) -> Result<(), CoreError> {
        let local = Ship::local(&self.settings);
        let (runtime, images) = self.images(&local)?;
        shipment.update_images(|alias, mut image: Image| -> Result<Image, CoreError> {
            image.id = if image.is_buildable() {
                let outcome =
                    images.ensure_built(runtime, &image, BuildOptions::default(), &mut *on_message)?;
                match outcome {
                    BuildOutcome::Cached(id) => id,
                    BuildOutcome::Built(id) => {
                        images.push(runtime, &image, &mut *on_message)?;
                        id
                    }
                }
            } else {
                images.resolve(runtime, &image, &mut *on_message)?
            };
            debug!("{alias}: {} is {}", image.reference(), image.id);
            Ok(image)
        })?;
        shipment.timestamp = Some(Utc::now());
        shipment.armada_version = Some(env!("CARGO_PKG_VERSION").to_owned());
        Ok(())
    }
}
