//! Reconciliation engine for Armada deployments.
//!
//! This crate compares declared containers with what a runtime reports and
//! drives the runtime toward the declaration: the state differencer
//! (`diff`), the lifecycle reconciler (`lifecycle`), image id resolution and
//! build orchestration (`images`), config volume rendering (`render`),
//! per-container locking and cancellation (`concurrency`), and per-ship
//! runtime connections (`fleet`).

pub mod concurrency;
pub mod diff;
pub mod fleet;
pub mod images;
pub mod lifecycle;
pub mod render;

pub use concurrency::{install_signal_handler, shutdown_requested, ContainerLock};
pub use diff::{diff_container, Change, Diff, DiffEntry, LineChange};
pub use fleet::Fleet;
pub use images::{BuildOptions, BuildOutcome, ImageFacts, ImageResolver};
pub use lifecycle::{AttachSession, ContainerState, Reconciler, RunOutcome, StatusReport};
pub use render::{load_file, render_volume};

use armada_runtime::RuntimeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("definition error: {0}")]
    Definition(#[from] armada_schema::SchemaError),
    #[error("{container}: {operation} failed: {source}")]
    Runtime {
        container: String,
        operation: &'static str,
        source: RuntimeError,
    },
    #[error("image {image}: {source}")]
    Image { image: String, source: RuntimeError },
    #[error("image {repository}:{tag} could not be resolved")]
    ImageNotResolved { repository: String, tag: String },
    #[error("{container}: expected {expected} after {operation}, found {actual}")]
    UnexpectedState {
        container: String,
        operation: &'static str,
        expected: ContainerState,
        actual: ContainerState,
    },
    #[error("container {0} has not been created")]
    NotMaterialized(String),
    #[error("failed to write {path}: {source}")]
    Render {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("runtime error: {0}")]
    Connect(#[from] RuntimeError),
    #[error("unknown ship '{0}'")]
    UnknownShip(String),
}

impl CoreError {
    /// A name conflict reported by the runtime.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Runtime { source, .. } if source.is_conflict())
    }

    pub fn is_missing_image(&self) -> bool {
        matches!(self, CoreError::Runtime { source, .. } if source.is_missing_image())
    }

    /// Whether the error stems from the declaration rather than the runtime.
    pub fn is_definition(&self) -> bool {
        matches!(self, CoreError::Definition(_))
    }
}

/// Attach the container name and operation to a runtime failure.
pub(crate) trait RuntimeResultExt<T> {
    fn op(self, container: &str, operation: &'static str) -> Result<T, CoreError>;
}

impl<T> RuntimeResultExt<T> for Result<T, RuntimeError> {
    fn op(self, container: &str, operation: &'static str) -> Result<T, CoreError> {
        self.map_err(|source| CoreError::Runtime {
            container: container.to_owned(),
            operation,
            source,
        })
    }
}
