//! Status commands: services, systems and parameters.

use anyhow::Result;
use console::style;
use firecrest_client::Firecrest;

use super::common::print_json;

fn marker(status: &str) -> console::StyledObject<&'static str> {
    if status == "available" {
        style("●").green()
    } else {
        style("○").red()
    }
}

/// Execute the services command.
pub async fn services(client: &Firecrest, name: Option<&str>, json: bool) -> Result<()> {
    let services = match name {
        Some(name) => vec![client.service(name).await?],
        None => client.all_services().await?,
    };
    if json {
        return print_json(&services);
    }

    println!("{} Services:\n", style("FirecREST").cyan().bold());
    for service in &services {
        println!(
            "  {} {:<14} {}",
            marker(&service.status),
            style(&service.service).bold(),
            style(&service.description).dim()
        );
    }
    Ok(())
}

/// Execute the systems command.
pub async fn systems(client: &Firecrest, name: Option<&str>, json: bool) -> Result<()> {
    let systems = match name {
        Some(name) => vec![client.system(name).await?],
        None => client.all_systems().await?,
    };
    if json {
        return print_json(&systems);
    }

    println!("{} Systems:\n", style("FirecREST").cyan().bold());
    for system in &systems {
        println!(
            "  {} {:<14} {}",
            marker(&system.status),
            style(&system.system).bold(),
            style(&system.description).dim()
        );
    }
    Ok(())
}

/// Execute the parameters command. Always JSON.
pub async fn parameters(client: &Firecrest) -> Result<()> {
    print_json(&client.parameters().await?)
}
