//! Container runtime boundary for Armada.
//!
//! The `Runtime` trait is the only way the reconciler talks to a container
//! engine. `DockerClient` speaks the Docker Engine HTTP API; `MockRuntime`
//! keeps containers and images in memory and records every call. `context`
//! produces deterministic build contexts for buildable images.

pub mod context;
pub mod docker;
pub mod mock;
pub mod records;
pub mod stream;

pub use context::{build_context, dockerfile};
pub use docker::DockerClient;
pub use mock::{Call, MockRuntime};
pub use records::{
    Bind, Bindings, ContainerConfig, ContainerRecord, ContainerSummary, CreateSpec, HostBinding,
    HostConfig, ImageConfig, ImageRecord, ImageSummary, Mount, PortBinding, PortSummary,
};
pub use stream::{drain_progress, FrameReader, ProgressMessage, StreamLines};

use std::io::Read;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("HTTP {status} for {url}: {message}")]
    Http {
        status: u16,
        url: String,
        message: String,
    },
    #[error("cannot reach {url}: {reason}")]
    Transport { url: String, reason: String },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("{operation} failed: {message}")]
    Stream { operation: String, message: String },
    #[error("unsupported runtime endpoint '{0}'")]
    UnsupportedEndpoint(String),
    #[error("runtime backend error: {0}")]
    Backend(String),
}

impl RuntimeError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RuntimeError::Conflict(_))
    }

    pub fn is_missing_image(&self) -> bool {
        matches!(self, RuntimeError::ImageNotFound(_))
    }
}

/// A blocking byte stream from the runtime (attach, logs, progress).
pub type ByteStream = Box<dyn Read + Send>;

/// Operations a container engine must provide.
///
/// Container arguments accept an id or a name. Every call is blocking.
pub trait Runtime: Send + Sync {
    fn name(&self) -> &str;

    /// Containers known to the runtime; `all` includes stopped ones.
    fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError>;

    fn inspect(&self, container: &str) -> Result<ContainerRecord, RuntimeError>;

    /// Create a container and return its id.
    fn create(&self, spec: &CreateSpec) -> Result<String, RuntimeError>;

    fn start(&self, container: &str, bindings: &Bindings) -> Result<(), RuntimeError>;

    fn stop(&self, container: &str, timeout: Duration) -> Result<(), RuntimeError>;

    fn remove(&self, container: &str, force: bool) -> Result<(), RuntimeError>;

    /// Images whose repository equals `repository`.
    fn list_images(&self, repository: &str) -> Result<Vec<ImageSummary>, RuntimeError>;

    fn inspect_image(&self, reference: &str) -> Result<ImageRecord, RuntimeError>;

    fn pull(&self, repository: &str, tag: &str) -> Result<ByteStream, RuntimeError>;

    fn push(&self, repository: &str, tag: &str) -> Result<ByteStream, RuntimeError>;

    /// Build from an uncompressed tar context and tag the result `tag`.
    /// With `nocache` no cached layer is reused.
    fn build(&self, context: Vec<u8>, tag: &str, nocache: bool)
        -> Result<ByteStream, RuntimeError>;

    /// Attach to stdout/stderr. The stream carries demultiplexed output.
    fn attach(&self, container: &str) -> Result<ByteStream, RuntimeError>;

    fn logs(&self, container: &str, follow: bool) -> Result<ByteStream, RuntimeError>;
}

/// Open a runtime for a ship endpoint.
///
/// `http://` and `https://` connect to a Docker engine; `mock://` returns a
/// fresh in-memory runtime.
pub fn connect(url: &str, timeout: Option<Duration>) -> Result<Box<dyn Runtime>, RuntimeError> {
    match url.split_once("://").map(|(scheme, _)| scheme) {
        Some("http" | "https") => Ok(Box::new(DockerClient::new(url, timeout))),
        Some("mock") => Ok(Box::new(MockRuntime::new())),
        _ => Err(RuntimeError::UnsupportedEndpoint(url.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_selects_backend_by_scheme() {
        assert_eq!(connect("http://localhost:2375", None).unwrap().name(), "docker");
        assert_eq!(connect("mock://test", None).unwrap().name(), "mock");
    }

    #[test]
    fn connect_rejects_unknown_schemes() {
        assert!(matches!(
            connect("unix:///var/run/docker.sock", None),
            Err(RuntimeError::UnsupportedEndpoint(_))
        ));
        assert!(connect("localhost", None).is_err());
    }

    #[test]
    fn error_classification() {
        assert!(RuntimeError::Conflict("x".into()).is_conflict());
        assert!(RuntimeError::ImageNotFound("x".into()).is_missing_image());
        assert!(!RuntimeError::NotFound("x".into()).is_missing_image());
    }
}
