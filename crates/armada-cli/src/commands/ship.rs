use super::{container, core_error, json_pretty, yaml, Context, EXIT_SUCCESS};
use armada_core::shutdown_requested;
use armada_runtime::ContainerSummary;
use armada_schema::{select, NamePattern, Ship};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Ships whose name matches, sorted by name.
fn select_ships(ctx: &Context, pattern: &NamePattern) -> Vec<Arc<Ship>> {
    let ships: Vec<&Arc<Ship>> = ctx.shipment.ships.values().collect();
    select(&ships, pattern, |s| s.name.clone())
        .into_iter()
        .map(|i| Arc::clone(ships[i]))
        .collect()
}

pub fn list(ctx: &Context, pattern: &NamePattern) -> Result<u8, String> {
    let selected = select_ships(ctx, pattern);
    if ctx.json {
        let payload: Vec<_> = selected
            .iter()
            .map(|s| {
                serde_json::json!({
                    "name": s.name,
                    "fqdn": s.fqdn,
                    "url": s.url,
                    "local": s.islocal,
                })
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for ship in selected {
            println!("{:<15} {}", ship.name, ship.fqdn);
        }
    }
    Ok(EXIT_SUCCESS)
}

/// Restart every declared container of the matching ships.
pub fn restart(ctx: &mut Context, pattern: &NamePattern) -> Result<u8, String> {
    let ships: BTreeSet<String> = select_ships(ctx, pattern)
        .iter()
        .map(|s| s.name.clone())
        .collect();
    let selected: Vec<usize> = container::select(&ctx.shipment, &NamePattern::any())
        .into_iter()
        .filter(|&i| ships.contains(&ctx.shipment.containers[i].ship.name))
        .collect();
    container::restart(ctx, &selected)
}

/// Running containers of the matching ships, declared or not.
fn running(
    ctx: &mut Context,
    ships: &NamePattern,
    containers: &NamePattern,
) -> Result<Vec<(Arc<Ship>, ContainerSummary)>, String> {
    let mut found = Vec::new();
    for ship in select_ships(ctx, ships) {
        let listed = ctx
            .fleet
            .ship_containers(&ship, containers)
            .map_err(|e| core_error(&e))?;
        found.extend(listed.into_iter().map(|c| (Arc::clone(&ship), c)));
    }
    Ok(found)
}

fn display_name(summary: &ContainerSummary) -> &str {
    summary.name().unwrap_or(summary.id.as_str())
}

pub fn container_list(
    ctx: &mut Context,
    ships: &NamePattern,
    containers: &NamePattern,
) -> Result<u8, String> {
    let found = running(ctx, ships, containers)?;
    if ctx.json {
        let payload: Vec<_> = found
            .iter()
            .map(|(ship, c)| {
                let ports: Vec<u16> = c.ports.iter().filter_map(|p| p.public_port).collect();
                serde_json::json!({
                    "ship": ship.name,
                    "name": display_name(c),
                    "id": c.id,
                    "image": c.image,
                    "status": c.status,
                    "ports": ports,
                })
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for (ship, c) in &found {
            let ports: Vec<String> = c
                .ports
                .iter()
                .filter_map(|p| p.public_port.map(|port| port.to_string()))
                .collect();
            println!(
                "{} {:<40} {:<15} {}",
                ship.name,
                display_name(c),
                c.status,
                ports.join(",")
            );
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn container_inspect(
    ctx: &mut Context,
    ships: &NamePattern,
    containers: &NamePattern,
) -> Result<u8, String> {
    let mut records = Vec::new();
    for (ship, c) in running(ctx, ships, containers)? {
        let record = ctx
            .fleet
            .inspect_on(&ship, &c.id)
            .map_err(|e| core_error(&e))?;
        records.push(serde_json::json!({"ship": ship.name, "container": record}));
    }
    if ctx.json {
        println!("{}", json_pretty(&records)?);
    } else {
        print!("{}", yaml(&records)?);
    }
    Ok(EXIT_SUCCESS)
}

pub fn container_log(
    ctx: &mut Context,
    ships: &NamePattern,
    containers: &NamePattern,
    follow: bool,
) -> Result<u8, String> {
    for (ship, c) in running(ctx, ships, containers)? {
        let lines = ctx
            .fleet
            .logs_on(&ship, &c.id, follow)
            .map_err(|e| core_error(&e))?;
        for line in lines {
            if shutdown_requested() {
                return Err("interrupted".to_owned());
            }
            println!("{}", line.map_err(|e| format!("runtime error: {e}"))?);
        }
    }
    Ok(EXIT_SUCCESS)
}
