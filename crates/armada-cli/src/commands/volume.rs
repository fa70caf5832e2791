use super::{json_pretty, Context, EXIT_SUCCESS};
use armada_schema::{select, NamePattern, VolumeRef};

pub fn list(ctx: &Context, pattern: &NamePattern) -> Result<u8, String> {
    let volumes = ctx.shipment.volumes();
    let settings = ctx.settings();
    let rows: Vec<(String, &str, String)> = select(&volumes, pattern, VolumeRef::full_name)
        .into_iter()
        .map(|i| {
            let v = &volumes[i];
            let path = v.volume.host_path(&v.container.name, settings);
            (v.full_name(), v.volume.dest(), path.display().to_string())
        })
        .collect();
    if ctx.json {
        let payload: Vec<_> = rows
            .iter()
            .map(|(name, dest, path)| serde_json::json!({"name": name, "dest": dest, "path": path}))
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for (name, dest, path) in &rows {
            println!("{name:<30} {dest:<30} {path}");
        }
    }
    Ok(EXIT_SUCCESS)
}
