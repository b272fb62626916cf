//! `nprec recommend`

use anyhow::Result;
use colored::Colorize;
use recommender_core::{NodePool, RecommendationRequest, RecommendationResponse};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, format_bytes, format_hourly, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct NodePoolRow {
    #[tabled(rename = "Instance Type")]
    instance_type: String,
    #[tabled(rename = "Tier")]
    tier: String,
    #[tabled(rename = "Nodes")]
    count: u32,
    #[tabled(rename = "vCPU")]
    vcpus: u64,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "GPU")]
    gpus: u64,
    #[tabled(rename = "Unit Price")]
    unit_price: String,
    #[tabled(rename = "Subtotal")]
    subtotal: String,
}

impl From<&NodePool> for NodePoolRow {
    fn from(pool: &NodePool) -> Self {
        Self {
            instance_type: pool.instance_type.clone(),
            tier: color_status(&pool.tier.to_string()),
            count: pool.count,
            vcpus: pool.total_vcpus(),
            memory: format_bytes(pool.total_memory_bytes()),
            gpus: u64::from(pool.gpus) * u64::from(pool.count),
            unit_price: format_hourly(pool.unit_price),
            subtotal: format_hourly(pool.subtotal),
        }
    }
}

pub async fn recommend(
    client: &ApiClient,
    request: &RecommendationRequest,
    format: OutputFormat,
) -> Result<()> {
    let response = client.recommend(request).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => print_layout(request, &response),
    }

    Ok(())
}

fn print_layout(request: &RecommendationRequest, response: &RecommendationResponse) {
    println!(
        "{} {}/{}",
        "Recommended node pools for".bold(),
        response.provider.cyan(),
        response.region.cyan()
    );
    if !response.zones.is_empty() {
        println!("Zones: {}", response.zones.join(", "));
    }
    println!();

    let rows: Vec<NodePoolRow> = response.node_pools.iter().map(NodePoolRow::from).collect();
    print_table(&rows);
    println!();

    let achieved = &response.achieved;
    println!(
        "Nodes:        {} ({} instance types)",
        achieved.nodes,
        response.distinct_types()
    );
    println!(
        "vCPU:         {} of {} requested ({} on-demand)",
        achieved.cpu, request.requirement.cpu, achieved.on_demand_cpu
    );
    if request.requirement.memory_bytes > 0 {
        println!(
            "Memory:       {} of {} requested",
            format_bytes(achieved.memory_bytes),
            format_bytes(request.requirement.memory_bytes)
        );
    }
    if let Some(gpus) = request.requirement.gpus {
        println!("GPU:          {} of {} requested", achieved.gpus, gpus);
    }
    println!(
        "{}  {}",
        "Total price:".bold(),
        format_hourly(response.total_price).green().bold()
    );
}
