use super::{json_pretty, load_settings, EXIT_SUCCESS};
use armada_schema::settings::user_config_path;
use armada_schema::Settings;
use std::path::Path;
use tracing::debug;

pub fn dump(path: Option<&Path>, namespace: Option<&str>, json: bool) -> Result<u8, String> {
    let settings = load_settings(path, namespace)?;
    if json {
        println!("{}", json_pretty(&settings)?);
    } else {
        let text = settings
            .to_toml_string()
            .map_err(|e| format!("definition error: {e}"))?;
        print!("{text}");
    }
    Ok(EXIT_SUCCESS)
}

/// Write the default settings to `path`, or to the user settings file.
pub fn create(path: Option<&Path>, force: bool) -> Result<u8, String> {
    let target = match path {
        Some(p) => p.to_path_buf(),
        None => user_config_path().map_err(|e| e.to_string())?,
    };
    if target.exists() && !force {
        return Err(format!(
            "{} already exists; use --force to overwrite",
            target.display()
        ));
    }
    let text = Settings::default()
        .to_toml_string()
        .map_err(|e| format!("definition error: {e}"))?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
    }
    debug!("writing settings to {}", target.display());
    std::fs::write(&target, text)
        .map_err(|e| format!("failed to write {}: {e}", target.display()))?;
    println!("wrote {}", target.display());
    Ok(EXIT_SUCCESS)
}
