use super::{json_pretty, Context, EXIT_SUCCESS};
use armada_schema::{select, FileRef, NamePattern};
use tracing::warn;

pub fn list(ctx: &Context, pattern: &NamePattern) -> Result<u8, String> {
    let files = ctx.shipment.files();
    let settings = ctx.settings();
    let rows: Vec<(String, String)> = select(&files, pattern, FileRef::full_name)
        .into_iter()
        .map(|i| {
            let f = &files[i];
            let path = f
                .volume
                .host_path(&f.container.name, settings)
                .join(&f.file.name);
            (f.full_name(), path.display().to_string())
        })
        .collect();
    if ctx.json {
        let payload: Vec<_> = rows
            .iter()
            .map(|(name, path)| serde_json::json!({"name": name, "path": path}))
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for (name, path) in &rows {
            println!("{name:<60} {path}");
        }
    }
    Ok(EXIT_SUCCESS)
}

/// Print the matching files as deployed. A file that was never rendered
/// shows its declared content instead.
pub fn view(ctx: &Context, pattern: &NamePattern) -> Result<u8, String> {
    let files = ctx.shipment.files();
    let settings = ctx.settings();
    let selected = select(&files, pattern, FileRef::full_name);
    let mut views = Vec::with_capacity(selected.len());
    for i in selected {
        let f = &files[i];
        let path = f
            .volume
            .host_path(&f.container.name, settings)
            .join(&f.file.name);
        let rendered = path.is_file();
        let content = if rendered {
            std::fs::read_to_string(&path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?
        } else {
            warn!("{} is not rendered; showing declared content", f.full_name());
            f.file
                .render()
                .map_err(|e| format!("definition error: {e}"))?
        };
        views.push((f.full_name(), path, rendered, content));
    }

    if ctx.json {
        let payload: Vec<_> = views
            .iter()
            .map(|(name, path, rendered, content)| {
                serde_json::json!({
                    "name": name,
                    "path": path.display().to_string(),
                    "rendered": rendered,
                    "content": content,
                })
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }
    let headers = views.len() > 1;
    for (name, _, _, content) in &views {
        if headers {
            println!("==> {name} <==");
        }
        print!("{content}");
        if !content.is_empty() && !content.ends_with('\n') {
            println!();
        }
    }
    Ok(EXIT_SUCCESS)
}
