use super::{json_pretty, with_spinner, Context, EXIT_SUCCESS};

pub fn list(ctx: &Context) -> Result<u8, String> {
    let shipment = &ctx.shipment;
    if ctx.json {
        let payload = serde_json::json!({
            "name": shipment.name,
            "version": shipment.version,
            "author": shipment.author,
            "timestamp": shipment.timestamp,
            "armada_version": shipment.armada_version,
            "ships": shipment.ships.len(),
            "images": shipment.images.len(),
            "containers": shipment.containers.len(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "{} {}",
            shipment.name,
            shipment.version.as_deref().unwrap_or("(unversioned)")
        );
        if let Some(author) = &shipment.author {
            println!("author:     {author}");
        }
        if let Some(timestamp) = &shipment.timestamp {
            println!("generated:  {}", timestamp.to_rfc3339());
        }
        println!("ships:      {}", shipment.ships.len());
        println!("images:     {}", shipment.images.len());
        println!("containers: {}", shipment.containers.len());
    }
    Ok(EXIT_SUCCESS)
}

pub fn dump(ctx: &Context) -> Result<u8, String> {
    print_document(ctx)
}

pub fn generate(ctx: &mut Context) -> Result<u8, String> {
    let Context {
        shipment,
        fleet,
        json,
    } = ctx;
    with_spinner(*json, "resolving images", |on_message| {
        fleet.generate(shipment, on_message)
    })?;
    print_document(ctx)
}

fn print_document(ctx: &Context) -> Result<u8, String> {
    if ctx.json {
        let document = ctx
            .shipment
            .to_document()
            .map_err(|e| format!("definition error: {e}"))?;
        println!("{}", json_pretty(&document)?);
    } else {
        let text = ctx
            .shipment
            .to_yaml()
            .map_err(|e| format!("definition error: {e}"))?;
        print!("{text}");
    }
    Ok(EXIT_SUCCESS)
}
