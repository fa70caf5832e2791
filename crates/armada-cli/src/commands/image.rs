use super::{core_error, json_pretty, pin_parents, with_spinner, Context, EXIT_SUCCESS};
use armada_core::{BuildOptions, BuildOutcome};
use armada_schema::{NamePattern, Ship, Shipment};

/// Aliases of the buildable images whose repository matches, parents
/// before children.
pub fn select(shipment: &Shipment, pattern: &NamePattern) -> Result<Vec<String>, String> {
    let order = shipment
        .build_order()
        .map_err(|e| format!("definition error: {e}"))?;
    Ok(order
        .into_iter()
        .filter(|alias| {
            shipment
                .images
                .get(alias)
                .is_some_and(|image| image.is_buildable() && pattern.matches(&image.repository))
        })
        .collect())
}

pub fn list(ctx: &Context, selected: &[String]) -> Result<u8, String> {
    let images: Vec<_> = selected
        .iter()
        .filter_map(|alias| ctx.shipment.images.get(alias).map(|image| (alias, image)))
        .collect();
    if ctx.json {
        let payload: Vec<_> = images
            .iter()
            .map(|(alias, image)| {
                serde_json::json!({
                    "alias": alias,
                    "repository": image.full_repository(),
                    "tag": image.tag,
                    "id": image.id,
                })
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for (_, image) in images {
            println!("{}", image.repository);
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn build(ctx: &mut Context, selected: &[String], options: BuildOptions) -> Result<u8, String> {
    if selected.is_empty() {
        return Ok(EXIT_SUCCESS);
    }
    pin_parents(ctx, true)?;
    let local = Ship::local(ctx.settings());
    let json = ctx.json;
    let (runtime, images) = ctx.fleet.images(&local).map_err(|e| core_error(&e))?;
    let mut results = Vec::new();
    for alias in selected {
        let Some(image) = ctx.shipment.images.get(alias) else {
            continue;
        };
        let reference = image.reference();
        let outcome = with_spinner(json, &format!("building {reference}"), |on_message| {
            images.ensure_built(runtime, image, options, on_message)
        })?;
        let status = match outcome {
            BuildOutcome::Built(_) => "built",
            BuildOutcome::Cached(_) => "cached",
        };
        if !json {
            println!("{reference}: {status} {}", outcome.id().short());
        }
        results.push(serde_json::json!({
            "image": reference,
            "id": outcome.id(),
            "status": status,
        }));
    }
    if json {
        println!("{}", json_pretty(&results)?);
    }
    Ok(EXIT_SUCCESS)
}

pub fn push(ctx: &mut Context, selected: &[String]) -> Result<u8, String> {
    if selected.is_empty() {
        return Ok(EXIT_SUCCESS);
    }
    pin_parents(ctx, false)?;
    let local = Ship::local(ctx.settings());
    let json = ctx.json;
    let (runtime, images) = ctx.fleet.images(&local).map_err(|e| core_error(&e))?;
    let mut pushed = Vec::new();
    for alias in selected {
        let Some(image) = ctx.shipment.images.get(alias) else {
            continue;
        };
        let reference = image.reference();
        with_spinner(json, &format!("pushing {reference}"), |on_message| {
            images.push(runtime, image, on_message)
        })?;
        pushed.push(reference);
    }
    if json {
        println!("{}", json_pretty(&pushed)?);
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_schema::Settings;

    const DOCUMENT: &str = r"
name: demo
images:
  base:
    repository: busybox
  tools:
    repository: team/tools
    build:
      parent: base
      steps: [touch /tools]
  app:
    repository: team/app
    build:
      parent: tools
      steps: [touch /app]
";

    #[test]
    fn select_keeps_buildable_images_in_build_order() {
        let shipment = Shipment::from_yaml_str(DOCUMENT, &Settings::default()).unwrap();
        let all = select(&shipment, &NamePattern::any()).unwrap();
        assert_eq!(all, vec!["tools", "app"]);

        let pattern = NamePattern::new("team/a*", false).unwrap();
        assert_eq!(select(&shipment, &pattern).unwrap(), vec!["app"]);
    }
}
