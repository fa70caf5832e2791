use super::{container, json_pretty, Context, EXIT_SUCCESS};
use armada_schema::NamePattern;

/// Doors of the matching containers and where each is reachable.
pub fn list(ctx: &Context, pattern: &NamePattern) -> Result<u8, String> {
    let mut rows = Vec::new();
    for i in container::select(&ctx.shipment, pattern) {
        let c = &ctx.shipment.containers[i];
        for door in c.doors() {
            let url = door.url(&c.ship.fqdn);
            rows.push((c.full_name(), door.name, url));
        }
    }
    if ctx.json {
        let payload: Vec<_> = rows
            .iter()
            .map(|(container, door, url)| {
                serde_json::json!({"container": container, "door": door, "url": url})
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for (container, door, url) in &rows {
            println!("{container:<30} {door:<20} {url}");
        }
    }
    Ok(EXIT_SUCCESS)
}
