//! Config volume projection onto the host.
//!
//! A config volume's host directory belongs to Armada: every render clears
//! it completely and writes the declared files again.

use crate::CoreError;
use armada_schema::{Container, SchemaError, Settings, Volume};
use std::path::{Path, PathBuf};
use tracing::debug;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CoreError + '_ {
    move |source| CoreError::Render {
        path: path.to_path_buf(),
        source,
    }
}

/// Reject names that would escape the volume directory.
fn check_file_name(name: &str) -> Result<(), SchemaError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(SchemaError::InvalidFileName(name.to_owned()));
    }
    Ok(())
}

/// Materialize `volume` for `container` and return its host directory.
///
/// Data volumes are left to the runtime.
pub fn render_volume(
    container: &Container,
    volume: &Volume,
    settings: &Settings,
) -> Result<PathBuf, CoreError> {
    let dir = volume.host_path(&container.name, settings);
    let Volume::Config(config) = volume else {
        return Ok(dir);
    };
    for file in &config.files {
        check_file_name(&file.name)?;
    }
    debug!(
        "rendering {} files into {}",
        config.files.len(),
        dir.display()
    );

    std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;
    for entry in std::fs::read_dir(&dir).map_err(io_error(&dir))? {
        let path = entry.map_err(io_error(&dir))?.path();
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        removed.map_err(io_error(&path))?;
    }
    for file in &config.files {
        let path = dir.join(&file.name);
        let content = file.render()?;
        std::fs::write(&path, content).map_err(io_error(&path))?;
    }
    Ok(dir)
}

/// Content of `name` inside `dir`; a missing file reads as empty.
pub fn load_file(dir: &Path, name: &str) -> Result<String, CoreError> {
    let path = dir.join(name);
    match std::fs::read(&path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(io_error(&path)(e)),
    }
}
