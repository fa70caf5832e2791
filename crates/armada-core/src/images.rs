//! Image id resolution and build, pull and push orchestration.

use crate::CoreError;
use armada_runtime::{build_context, drain_progress, ProgressMessage, Runtime, RuntimeError};
use armada_schema::{Image, ImageId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Callback receiving every progress message of a pull, push or build.
pub type Progress<'a> = &'a mut dyn FnMut(&ProgressMessage);

/// Caches the runtime id of `(full repository, tag)` pairs.
///
/// Entries are dropped whenever Armada pulls, pushes or builds the image,
/// since each of those can move the tag.
#[derive(Default)]
pub struct ImageResolver {
    cache: Mutex<HashMap<(String, String), ImageId>>,
}

/// What `ensure_built` had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Cached(ImageId),
    Built(ImageId),
}

impl BuildOutcome {
    pub fn id(&self) -> &ImageId {
        match self {
            BuildOutcome::Cached(id) | BuildOutcome::Built(id) => id,
        }
    }
}

/// How `ensure_built` treats an image that may already exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Build even when the derived tag is already present.
    pub rebuild: bool,
    /// Do not reuse cached layers.
    pub nocache: bool,
}

/// Runtime facts about a declared image that the differencer needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageFacts {
    /// `None` when the image is neither declared with an id nor present.
    pub id: Option<ImageId>,
    /// Default command joined by spaces.
    pub command: String,
    pub env: BTreeMap<String, String>,
    pub user: String,
}

fn key(image: &Image) -> (String, String) {
    (image.full_repository(), image.tag.to_string())
}

fn image_error(image: &Image) -> impl FnOnce(RuntimeError) -> CoreError + '_ {
    move |source| CoreError::Image {
        image: image.reference(),
        source,
    }
}

fn not_resolved(image: &Image) -> CoreError {
    CoreError::ImageNotResolved {
        repository: image.full_repository(),
        tag: image.tag.to_string(),
    }
}

impl ImageResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<(String, String), ImageId>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn invalidate(&self, image: &Image) {
        self.cache().remove(&key(image));
    }

    /// Id the runtime currently holds under the image's tag.
    fn find_tagged(&self, runtime: &dyn Runtime, image: &Image) -> Result<Option<ImageId>, CoreError> {
        let key = key(image);
        if let Some(id) = self.cache().get(&key) {
            return Ok(Some(id.clone()));
        }
        let reference = image.reference();
        debug!("looking up {reference}");
        let found = runtime
            .list_images(&key.0)
            .map_err(image_error(image))?
            .into_iter()
            .find(|summary| summary.tags().iter().any(|t| *t == reference))
            .map(|summary| ImageId::new(summary.id));
        if let Some(id) = &found {
            self.cache().insert(key, id.clone());
        }
        Ok(found)
    }

    /// The declared id, or the id of the locally tagged image.
    pub fn lookup(&self, runtime: &dyn Runtime, image: &Image) -> Result<Option<ImageId>, CoreError> {
        if !image.id.is_empty() {
            return Ok(Some(image.id.clone()));
        }
        self.find_tagged(runtime, image)
    }

    /// Like `lookup`, pulling the image once when it is not present.
    pub fn resolve(
        &self,
        runtime: &dyn Runtime,
        image: &Image,
        on_message: Progress<'_>,
    ) -> Result<ImageId, CoreError> {
        if let Some(id) = self.lookup(runtime, image)? {
            return Ok(id);
        }
        self.pull(runtime, image, on_message)?;
        self.find_tagged(runtime, image)?
            .ok_or_else(|| not_resolved(image))
    }

    pub fn pull(
        &self,
        runtime: &dyn Runtime,
        image: &Image,
        on_message: Progress<'_>,
    ) -> Result<(), CoreError> {
        info!("pulling {}", image.reference());
        self.invalidate(image);
        let stream = match runtime.pull(&image.full_repository(), image.tag.as_str()) {
            Ok(stream) => stream,
            Err(RuntimeError::NotFound(reason)) => {
                debug!("pull of {} refused: {reason}", image.reference());
                return Err(not_resolved(image));
            }
            Err(source) => return Err(image_error(image)(source)),
        };
        drain_progress(stream, "pull", &mut *on_message).map_err(image_error(image))?;
        Ok(())
    }

    pub fn push(
        &self,
        runtime: &dyn Runtime,
        image: &Image,
        on_message: Progress<'_>,
    ) -> Result<(), CoreError> {
        info!("pushing {}", image.reference());
        let stream = runtime
            .push(&image.full_repository(), image.tag.as_str())
            .map_err(image_error(image))?;
        let result = drain_progress(stream, "push", &mut *on_message).map_err(image_error(image));
        self.invalidate(image);
        result.map(|_| ())
    }

    /// Build a buildable image unconditionally and return its new id.
    pub fn build(
        &self,
        runtime: &dyn Runtime,
        image: &Image,
        nocache: bool,
        on_message: Progress<'_>,
    ) -> Result<ImageId, CoreError> {
        let reference = image.reference();
        let context = build_context(image).map_err(image_error(image))?;
        info!("building {reference} ({} bytes of context)", context.len());
        let stream = runtime
            .build(context, &reference, nocache)
            .map_err(image_error(image))?;
        let announced =
            drain_progress(stream, "build", &mut *on_message).map_err(image_error(image))?;
        self.invalidate(image);
        match self.find_tagged(runtime, image)? {
            Some(id) => Ok(id),
            None => announced.map(ImageId::new).ok_or_else(|| not_resolved(image)),
        }
    }

    /// Make the image present locally.
    ///
    /// A buildable image whose derived tag already exists is not rebuilt
    /// unless `options.rebuild` is set; its parent is made present first,
    /// never forcibly rebuilt. A plain image is pulled when absent.
    pub fn ensure_built(
        &self,
        runtime: &dyn Runtime,
        image: &Image,
        options: BuildOptions,
        on_message: Progress<'_>,
    ) -> Result<BuildOutcome, CoreError> {
        let Some(build) = &image.build else {
            if let Some(id) = self.find_tagged(runtime, image)? {
                return Ok(BuildOutcome::Cached(id));
            }
            self.pull(runtime, image, &mut *on_message)?;
            return self
                .find_tagged(runtime, image)?
                .map(BuildOutcome::Cached)
                .ok_or_else(|| not_resolved(image));
        };

        if !options.rebuild {
            if let Some(id) = self.find_tagged(runtime, image)? {
                debug!("{} already built", image.reference());
                return Ok(BuildOutcome::Cached(id));
            }
        }
        let parent = BuildOptions {
            rebuild: false,
            ..options
        };
        self.ensure_built(runtime, &build.parent, parent, &mut *on_message)?;
        self.build(runtime, image, options.nocache, on_message)
            .map(BuildOutcome::Built)
    }

    /// Id, default command, env and user of a declared image.
    pub fn facts(&self, runtime: &dyn Runtime, image: &Image) -> Result<ImageFacts, CoreError> {
        let Some(id) = self.lookup(runtime, image)? else {
            return Ok(ImageFacts::default());
        };
        let record = match runtime.inspect_image(id.as_str()) {
            Ok(record) => record,
            Err(RuntimeError::NotFound(_)) => {
                return Ok(ImageFacts {
                    id: Some(id),
                    ..ImageFacts::default()
                });
            }
            Err(source) => return Err(image_error(image)(source)),
        };
        Ok(ImageFacts {
            id: Some(id),
            command: record.command(),
            env: record.env_map(),
            user: record.config.user,
        })
    }
}
