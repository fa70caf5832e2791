//! Shipment model, image identity, settings, and document format for Armada.
//!
//! This crate defines the declarative layer: ships, images (plain and
//! buildable), volumes with their config files, containers, and the
//! shipment that bundles them. It also owns deterministic tag derivation for
//! buildable images (`derive_tag`), the YAML shipment document, TOML
//! settings, and name-pattern filtering used by the CLI.

pub mod container;
pub mod filter;
pub mod identity;
pub mod image;
pub mod settings;
pub mod ship;
pub mod shipment;
pub mod types;
pub mod volume;

pub use container::{split_command, Container, Door, NOT_FOUND};
pub use filter::{select, NamePattern};
pub use identity::{derive_tag, file_digest};
pub use image::{split_repository, BuildSpec, Image};
pub use settings::{expand_tilde, Settings};
pub use ship::{Ship, LOCAL_SHIP};
pub use shipment::{
    BuildDef, ContainerDef, FileRef, ImageDef, ShipDef, Shipment, ShipmentDocument, VolumeRef,
};
pub use types::{ContainerId, ImageId, ImageTag};
pub use volume::{ConfigFile, ConfigVolume, DataVolume, FileContent, Volume};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse settings: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("failed to serialize settings: {0}")]
    SerializeToml(#[from] toml::ser::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("container '{container}' references unknown ship '{ship}'")]
    UnknownShip { container: String, ship: String },
    #[error("container '{container}' references unknown image '{image}'")]
    UnknownImage { container: String, image: String },
    #[error("image '{image}' is built from unknown parent '{parent}'")]
    UnknownParent { image: String, parent: String },
    #[error("image build parents form a cycle through '{0}'")]
    ParentCycle(String),
    #[error("image {0} is not registered in the shipment")]
    DetachedImage(String),
    #[error("duplicate container '{name}' on ship '{ship}'")]
    DuplicateContainer { name: String, ship: String },
    #[error("container '{container}' has no volume named '{volume}'")]
    UnknownVolume { container: String, volume: String },
    #[error("invalid config file name '{0}': must be a plain file name")]
    InvalidFileName(String),
    #[error("invalid name pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("HOME is not set")]
    NoHome,
}
