use super::{colorize, core_error, json_pretty, yaml, Context, EXIT_SUCCESS};
use armada_core::{
    shutdown_requested, ContainerLock, ContainerState, CoreError, Reconciler, RunOutcome,
};
use armada_schema::{Container, NamePattern, Shipment};
use std::sync::Arc;
use tracing::warn;

/// Indices of the containers whose `ship:name` matches, sorted by it.
pub fn select(shipment: &Shipment, pattern: &NamePattern) -> Vec<usize> {
    armada_schema::select(&shipment.containers, pattern, Container::full_name)
}

/// Pin build parents when any selected container runs a buildable image.
fn pin_parents(ctx: &mut Context, selected: &[usize], fetch: bool) -> Result<(), String> {
    let buildable = selected
        .iter()
        .any(|&i| ctx.shipment.containers[i].image.is_buildable());
    if buildable {
        super::pin_parents(ctx, fetch)?;
    }
    Ok(())
}

/// Apply `op` to every selected container in order, stopping at the first
/// failure. With `lock`, the container lock is held for the duration of
/// `op`.
fn each<T>(
    ctx: &mut Context,
    selected: &[usize],
    lock: bool,
    mut op: impl FnMut(&Reconciler<'_>, &mut Container) -> Result<T, CoreError>,
) -> Result<Vec<(String, T)>, String> {
    let lock_dir = ctx.settings().lock_dir.clone();
    let mut results = Vec::with_capacity(selected.len());
    for &i in selected {
        if shutdown_requested() {
            return Err("interrupted".to_owned());
        }
        let container = &mut ctx.shipment.containers[i];
        let ship = Arc::clone(&container.ship);
        let _lock = if lock {
            Some(
                ContainerLock::acquire(&lock_dir, &ship.name, &container.name)
                    .map_err(|e| format!("lock: {e}"))?,
            )
        } else {
            None
        };
        let reconciler = ctx.fleet.reconciler(&ship).map_err(|e| core_error(&e))?;
        let value = op(&reconciler, &mut *container).map_err(|e| core_error(&e))?;
        results.push((container.full_name(), value));
    }
    Ok(results)
}

fn print_results<T: serde::Serialize + std::fmt::Display>(
    json: bool,
    results: &[(String, T)],
) -> Result<(), String> {
    if json {
        let payload: Vec<_> = results
            .iter()
            .map(|(name, value)| serde_json::json!({"name": name, "result": value}))
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for (name, value) in results {
            println!("{name}: {value}");
        }
    }
    Ok(())
}

pub fn list(ctx: &Context, selected: &[usize]) -> Result<u8, String> {
    let containers: Vec<&Container> = selected
        .iter()
        .map(|&i| &ctx.shipment.containers[i])
        .collect();
    if ctx.json {
        let payload: Vec<_> = containers
            .iter()
            .map(|c| {
                let doors: Vec<String> = c.doors().iter().map(|d| d.name.clone()).collect();
                serde_json::json!({
                    "name": c.full_name(),
                    "ship": c.ship.name,
                    "image": c.image.reference(),
                    "doors": doors,
                })
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for c in containers {
            println!("{}", c.full_name());
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn start(ctx: &mut Context, selected: &[usize]) -> Result<u8, String> {
    pin_parents(ctx, selected, true)?;
    let json = ctx.json;
    let results = each(ctx, selected, true, |reconciler, container| {
        reconciler.run(container)
    })?;
    print_results(json, &results)?;
    Ok(EXIT_SUCCESS)
}

pub fn restart(ctx: &mut Context, selected: &[usize]) -> Result<u8, String> {
    pin_parents(ctx, selected, true)?;
    let json = ctx.json;
    let results: Vec<(String, RunOutcome)> =
        each(ctx, selected, true, |reconciler, container| reconciler.restart(container))?;
    print_results(json, &results)?;
    Ok(EXIT_SUCCESS)
}

pub fn stop(ctx: &mut Context, selected: &[usize]) -> Result<u8, String> {
    let json = ctx.json;
    let results = each(ctx, selected, true, |reconciler, container| {
        if reconciler.check(container)? == ContainerState::Running {
            reconciler.stop(container)?;
        }
        Ok(ContainerState::from_status(&container.status))
    })?;
    print_results(json, &results)?;
    Ok(EXIT_SUCCESS)
}

pub fn remove(ctx: &mut Context, selected: &[usize]) -> Result<u8, String> {
    let json = ctx.json;
    let results = each(ctx, selected, true, |reconciler, container| {
        let state = reconciler.check(container)?;
        if state == ContainerState::Running {
            reconciler.stop(container)?;
        }
        if state != ContainerState::NotFound {
            reconciler.remove(container, false)?;
        }
        Ok(ContainerState::NotFound)
    })?;
    print_results(json, &results)?;
    Ok(EXIT_SUCCESS)
}

pub fn status(ctx: &mut Context, selected: &[usize], show_diff: bool) -> Result<u8, String> {
    pin_parents(ctx, selected, false)?;
    let json = ctx.json;
    let reports = each(ctx, selected, false, |reconciler, container| {
        reconciler.status(container)
    })?;
    if json {
        let payload: Vec<_> = reports
            .iter()
            .map(|(name, report)| {
                serde_json::json!({
                    "name": name,
                    "state": report.state,
                    "id": report.id,
                    "diff": report.diff,
                })
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    for (name, report) in &reports {
        let running = report.state == ContainerState::Running;
        let drift = report.diff.as_ref().is_some_and(|d| !d.is_empty());
        let id = report.id.get(..12).unwrap_or(&report.id);
        let line = format!("{name:<50} {id:<12} {}", report.state);
        println!("{}", colorize(&line, running, drift));
        if let (true, Some(diff)) = (show_diff, &report.diff) {
            for row in diff.to_string().lines() {
                println!("  {row}");
            }
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn log(ctx: &mut Context, selected: &[usize], follow: bool) -> Result<u8, String> {
    each(ctx, selected, false, |reconciler, container| {
        for line in reconciler.logs(container, follow)? {
            if shutdown_requested() {
                break;
            }
            println!("{}", line?);
        }
        Ok(())
    })?;
    Ok(EXIT_SUCCESS)
}

pub fn dump(ctx: &Context, selected: &[usize]) -> Result<u8, String> {
    let defs = selected
        .iter()
        .map(|&i| ctx.shipment.container_def(&ctx.shipment.containers[i]))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("definition error: {e}"))?;
    if ctx.json {
        println!("{}", json_pretty(&defs)?);
    } else {
        print!("{}", yaml(&defs)?);
    }
    Ok(EXIT_SUCCESS)
}

/// Run each container attached, printing its output. Unless `keep` is set
/// the container is removed once it stops.
pub fn exec(ctx: &mut Context, selected: &[usize], keep: bool) -> Result<u8, String> {
    pin_parents(ctx, selected, true)?;
    each(ctx, selected, true, |reconciler, container| {
        for line in reconciler.execute(container)? {
            println!("{}", line?);
        }
        if !keep {
            if let Err(e) = reconciler.remove(container, true) {
                warn!("failed to remove {}: {e}", container.full_name());
            }
        }
        Ok(())
    })?;
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_schema::Settings;

    const DOCUMENT: &str = r"
name: demo
ships:
  alpha:
    fqdn: alpha.example.com
    url: mock://alpha
images:
  nginx:
    repository: nginx
containers:
  - name: web
    ship: alpha
    image: nginx
  - name: db
    ship: alpha
    image: nginx
  - name: cache
    image: nginx
";

    #[test]
    fn select_sorts_by_full_name() {
        let shipment = Shipment::from_yaml_str(DOCUMENT, &Settings::default()).unwrap();
        let names: Vec<String> = select(&shipment, &NamePattern::any())
            .into_iter()
            .map(|i| shipment.containers[i].full_name())
            .collect();
        assert_eq!(names, vec!["alpha:db", "alpha:web", "localship:cache"]);
    }

    #[test]
    fn select_matches_from_the_start() {
        let shipment = Shipment::from_yaml_str(DOCUMENT, &Settings::default()).unwrap();
        let pattern = NamePattern::new("alpha:*", false).unwrap();
        assert_eq!(select(&shipment, &pattern).len(), 2);
        let pattern = NamePattern::new("web", false).unwrap();
        assert!(select(&shipment, &pattern).is_empty());
        let pattern = NamePattern::new("alpha:w", true).unwrap();
        assert_eq!(select(&shipment, &pattern).len(), 1);
    }
}
