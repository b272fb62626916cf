//! `nprec status`

use anyhow::Result;
use colored::Colorize;
use recommender_core::ComponentStatus;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, print_json, print_success, print_table, print_warning, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Failures")]
    failures: u32,
    #[tabled(rename = "Message")]
    message: String,
}

fn status_name(status: ComponentStatus) -> &'static str {
    match status {
        ComponentStatus::Healthy => "healthy",
        ComponentStatus::Degraded => "degraded",
        ComponentStatus::Unhealthy => "unhealthy",
    }
}

pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.status().await?;
    let health = client.health().await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "status": status.trim(),
            "health": health,
        }))?,
        OutputFormat::Table => {
            println!("{} {}", "Service:".bold(), color_status(status.trim()));

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(status_name(component.status)),
                    failures: component.consecutive_failures,
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();
            print_table(&rows);

            match health.status {
                ComponentStatus::Healthy => print_success("All components healthy"),
                ComponentStatus::Degraded => {
                    print_warning("Running on fallbacks; recommendations may use on-demand prices")
                }
                ComponentStatus::Unhealthy => print_warning("Service is unhealthy"),
            }
        }
    }

    Ok(())
}
