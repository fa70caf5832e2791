pub mod completions;
pub mod config;
pub mod container;
pub mod door;
pub mod file;
pub mod image;
pub mod ship;
pub mod shipment;
pub mod volume;

use armada_core::{CoreError, Fleet};
use armada_runtime::ProgressMessage;
use armada_schema::{Settings, Shipment};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DEFINITION_ERROR: u8 = 2;
pub const EXIT_RUNTIME_ERROR: u8 = 3;

/// Everything a shipment command works on.
pub struct Context {
    pub shipment: Shipment,
    pub fleet: Fleet,
    pub json: bool,
}

impl Context {
    pub fn load(
        shipment: &Path,
        settings: Option<&Path>,
        namespace: Option<&str>,
        json: bool,
    ) -> Result<Self, String> {
        let settings = load_settings(settings, namespace)?;
        let shipment =
            Shipment::load(shipment, &settings).map_err(|e| format!("definition error: {e}"))?;
        Ok(Self {
            shipment,
            fleet: Fleet::new(settings),
            json,
        })
    }

    pub fn settings(&self) -> &Settings {
        self.fleet.settings()
    }
}

/// Load settings; `namespace` overrides the configured docker namespace.
pub fn load_settings(path: Option<&Path>, namespace: Option<&str>) -> Result<Settings, String> {
    let mut settings = Settings::load(path).map_err(|e| format!("definition error: {e}"))?;
    if let Some(namespace) = namespace {
        settings.docker_namespace = Some(namespace.to_owned());
    }
    Ok(settings)
}

/// Message for a core failure, prefixed so the exit code can be chosen.
pub fn core_error(e: &CoreError) -> String {
    match e {
        CoreError::Definition(_) | CoreError::Connect(_) => e.to_string(),
        CoreError::Runtime { .. }
        | CoreError::Image { .. }
        | CoreError::ImageNotResolved { .. }
        | CoreError::UnexpectedState { .. }
        | CoreError::NotMaterialized(_)
        | CoreError::UnknownShip(_) => format!("runtime error: {e}"),
        CoreError::Render { .. } | CoreError::Io(_) => e.to_string(),
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn yaml(value: &impl serde::Serialize) -> Result<String, String> {
    serde_yaml::to_string(value).map_err(|e| format!("YAML serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Run `op` under a spinner labelled `action`, showing runtime progress
/// text as it arrives. No spinner is drawn for JSON output.
pub fn with_spinner<T>(
    json: bool,
    action: &str,
    op: impl FnOnce(&mut dyn FnMut(&ProgressMessage)) -> Result<T, CoreError>,
) -> Result<T, String> {
    let pb = (!json).then(|| spinner(action));
    let result = op(&mut |message: &ProgressMessage| {
        if let (Some(pb), Some(text)) = (&pb, message.text()) {
            pb.set_message(format!("{action}: {text}"));
        }
    });
    match result {
        Ok(value) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, action);
            }
            Ok(value)
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, action);
            }
            Err(core_error(&e))
        }
    }
}

/// Pin build parent ids on the local ship so child tags are derived from
/// the parent artifact present there. With `fetch` absent parents are
/// pulled or built; without it they keep an empty id.
pub fn pin_parents(ctx: &mut Context, fetch: bool) -> Result<(), String> {
    let Context {
        shipment,
        fleet,
        json,
    } = ctx;
    if fetch {
        with_spinner(*json, "resolving build parents", |on_message| {
            fleet.pin_parents(shipment, true, on_message)
        })
    } else {
        fleet
            .pin_parents(shipment, false, &mut |_| {})
            .map_err(|e| core_error(&e))
    }
}

/// Colorize a state word: green for healthy, yellow for drift, red for
/// anything not running.
pub fn colorize(text: &str, healthy: bool, drift: bool) -> String {
    use console::Style;
    let style = match (healthy, drift) {
        (true, false) => Style::new().green(),
        (true, true) => Style::new().yellow(),
        (false, _) => Style::new().red(),
    };
    style.apply_to(text).to_string()
}
