//! `nprec attributes`

use anyhow::Result;
use colored::Colorize;

use crate::client::ApiClient;
use crate::output::{print_info, print_json, OutputFormat};

pub async fn cpu_values(
    client: &ApiClient,
    provider: &str,
    region: &str,
    format: OutputFormat,
) -> Result<()> {
    let attributes = client.cpu_attributes(provider, region).await?;

    match format {
        OutputFormat::Json => print_json(&attributes)?,
        OutputFormat::Table => {
            if attributes.values.is_empty() {
                print_info(&format!("No instance types offered in {}/{}", provider, region));
                return Ok(());
            }
            let values: Vec<String> = attributes.values.iter().map(u32::to_string).collect();
            println!(
                "{} {}/{}: {}",
                "vCPU counts in".bold(),
                provider.cyan(),
                region.cyan(),
                values.join(", ")
            );
        }
    }

    Ok(())
}
