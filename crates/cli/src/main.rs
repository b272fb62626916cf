//! Node-pool recommender CLI
//!
//! A command-line tool for requesting node-pool recommendations, listing
//! catalog attributes and checking the health of the recommender service.

mod client;
mod commands;
mod config;
mod output;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use commands::{attributes, recommend, status};
use recommender_core::{NetworkTier, RecommendationRequest, ResourceRequirement, GIB};

/// Node-pool recommender CLI
#[derive(Parser)]
#[command(name = "nprec")]
#[command(author, version, about = "CLI for the node-pool recommender", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via NPREC_API_URL env var)
    #[arg(long, env = "NPREC_API_URL")]
    pub api_url: Option<String>,

    /// Bearer token for the recommender API
    #[arg(long, env = "NPREC_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Recommend the cheapest node pools for a capacity target
    Recommend(RecommendArgs),

    /// List the vCPU counts offered in a region
    Attributes {
        /// Cloud provider (defaults to the configured one)
        #[arg(long, short)]
        provider: Option<String>,

        /// Region (defaults to the configured one)
        #[arg(long, short)]
        region: Option<String>,
    },

    /// Show service status and component health
    Status,

    /// Manage persisted CLI defaults
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args)]
pub struct RecommendArgs {
    /// Cloud provider (defaults to the configured one)
    #[arg(long, short)]
    pub provider: Option<String>,

    /// Region (defaults to the configured one)
    #[arg(long, short)]
    pub region: Option<String>,

    /// Total vCPUs to provide
    #[arg(long)]
    pub cpu: f64,

    /// Total memory to provide in GiB
    #[arg(long)]
    pub memory_gib: Option<f64>,

    /// Total GPUs to provide
    #[arg(long)]
    pub gpu: Option<u32>,

    #[arg(long, default_value_t = 1)]
    pub min_nodes: u32,

    #[arg(long, default_value_t = 100)]
    pub max_nodes: u32,

    /// Percentage of vCPUs that must run on on-demand nodes (0-100)
    #[arg(long, default_value_t = 0.0)]
    pub on_demand_pct: f64,

    /// Zone to price spot capacity in (repeatable)
    #[arg(long = "zone")]
    pub zones: Vec<String>,

    /// Allowed network tier: low, moderate, high, very_high (repeatable)
    #[arg(long = "network-tier")]
    pub network_tiers: Vec<NetworkTier>,

    /// Instance type to leave out (repeatable)
    #[arg(long = "exclude")]
    pub excluded: Vec<String>,

    /// Supported vCPU count (repeatable)
    #[arg(long = "vcpu-bucket")]
    pub vcpu_buckets: Vec<u32>,

    /// Only consider current-generation instance types
    #[arg(long)]
    pub current_gen: bool,
}

impl RecommendArgs {
    fn into_request(self, provider: String, region: String) -> Result<RecommendationRequest> {
        if !(0.0..=100.0).contains(&self.on_demand_pct) {
            bail!("--on-demand-pct must be within 0-100, got {}", self.on_demand_pct);
        }
        let memory_bytes = match self.memory_gib {
            Some(gib) if gib < 0.0 => bail!("--memory-gib must not be negative"),
            Some(gib) => (gib * GIB as f64).round() as u64,
            None => 0,
        };

        let mut requirement = ResourceRequirement::new(self.cpu, memory_bytes);
        if let Some(gpus) = self.gpu {
            requirement = requirement.with_gpus(gpus);
        }

        let mut request = RecommendationRequest::new(provider, region, requirement)
            .with_node_bounds(self.min_nodes, self.max_nodes)
            .with_on_demand_ratio(self.on_demand_pct / 100.0)
            .with_zones(self.zones);
        request.network_tiers = self.network_tiers.into_iter().collect();
        request.excluded_types = self.excluded.into_iter().collect();
        request.vcpu_buckets = self.vcpu_buckets.into_iter().collect();
        request.current_generation_only = self.current_gen;

        Ok(request)
    }
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Persist defaults to ~/.config/nprec/config.json
    Set {
        #[arg(long)]
        api_url: Option<String>,

        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        region: Option<String>,
    },

    /// Show the persisted defaults
    Show,
}

fn configure(mut config: config::Config, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Set {
            api_url,
            provider,
            region,
        } => {
            config.api_url = api_url.or(config.api_url);
            config.provider = provider.or(config.provider);
            config.region = region.or(config.region);
            let path = config.save()?;
            output::print_success(&format!("Saved defaults to {}", path.display()));
        }
        ConfigCommands::Show => output::print_json(&config)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let connect = |config: &config::Config| {
        client::ApiClient::new(&config.api_url(cli.api_url.as_deref()), cli.token.clone())
    };

    match cli.command {
        Commands::Recommend(args) => {
            let client = connect(&config)?;
            let (provider, region) = config.location(args.provider.clone(), args.region.clone())?;
            let request = args.into_request(provider, region)?;
            recommend::recommend(&client, &request, cli.format).await?;
        }
        Commands::Attributes { provider, region } => {
            let client = connect(&config)?;
            let (provider, region) = config.location(provider, region)?;
            attributes::cpu_values(&client, &provider, &region, cli.format).await?;
        }
        Commands::Status => {
            let client = connect(&config)?;
            status::show_status(&client, cli.format).await?;
        }
        Commands::Config(command) => configure(config, command)?,
    }

    Ok(())
}
