//! Core data models for the node-pool recommender

use crate::error::RecommendError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Bytes in one GiB
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Network-performance tier as classified by the provider catalog
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NetworkTier {
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl NetworkTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkTier::Low => "low",
            NetworkTier::Moderate => "moderate",
            NetworkTier::High => "high",
            NetworkTier::VeryHigh => "very_high",
        }
    }
}

impl fmt::Display for NetworkTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "low" => Ok(NetworkTier::Low),
            "moderate" => Ok(NetworkTier::Moderate),
            "high" => Ok(NetworkTier::High),
            "very_high" => Ok(NetworkTier::VeryHigh),
            other => Err(format!("unknown network tier '{}'", other)),
        }
    }
}

fn default_true() -> bool {
    true
}

/// An instance type offered by a provider in one region
///
/// `spot_price` is only set once prices were resolved for a concrete zone set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceType {
    pub id: String,
    pub vcpus: u32,
    pub memory_bytes: u64,
    #[serde(default)]
    pub gpus: u32,
    pub network_tier: NetworkTier,
    pub on_demand_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_price: Option<f64>,
    #[serde(default = "default_true")]
    pub current_generation: bool,
}

impl InstanceType {
    /// Copy of this type carrying the given resolved spot price
    pub fn with_spot_price(&self, spot_price: Option<f64>) -> Self {
        Self {
            spot_price,
            ..self.clone()
        }
    }

    pub fn memory_gib(&self) -> f64 {
        self.memory_bytes as f64 / GIB as f64
    }
}

/// Aggregate capacity the recommended pools must cover
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    /// Total vCPUs
    pub cpu: f64,
    /// Total memory in bytes
    #[serde(default)]
    pub memory_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpus: Option<u32>,
}

impl ResourceRequirement {
    pub fn new(cpu: f64, memory_bytes: u64) -> Self {
        Self {
            cpu,
            memory_bytes,
            gpus: None,
        }
    }

    pub fn with_gpus(mut self, gpus: u32) -> Self {
        self.gpus = Some(gpus);
        self
    }

    pub fn gpu_target(&self) -> u32 {
        self.gpus.unwrap_or(0)
    }
}

fn default_min_nodes() -> u32 {
    1
}

fn default_max_nodes() -> u32 {
    100
}

/// A cluster recommendation request
///
/// Provider and region normally come from the request path and may be
/// omitted from the JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRequest {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub region: String,
    /// Zones to price spot capacity in; empty means every available zone
    #[serde(default)]
    pub zones: Vec<String>,
    pub requirement: ResourceRequirement,
    #[serde(default = "default_min_nodes")]
    pub min_nodes: u32,
    #[serde(default = "default_max_nodes")]
    pub max_nodes: u32,
    /// Fraction of the vCPU target that must run on on-demand capacity
    #[serde(default)]
    pub on_demand_ratio: f64,
    /// Allowed network tiers; empty means no restriction
    #[serde(default)]
    pub network_tiers: BTreeSet<NetworkTier>,
    #[serde(default)]
    pub excluded_types: BTreeSet<String>,
    /// Supported vCPU counts; empty means any
    #[serde(default)]
    pub vcpu_buckets: BTreeSet<u32>,
    #[serde(default)]
    pub current_generation_only: bool,
}

impl RecommendationRequest {
    pub fn new(
        provider: impl Into<String>,
        region: impl Into<String>,
        requirement: ResourceRequirement,
    ) -> Self {
        Self {
            provider: provider.into(),
            region: region.into(),
            zones: Vec::new(),
            requirement,
            min_nodes: default_min_nodes(),
            max_nodes: default_max_nodes(),
            on_demand_ratio: 0.0,
            network_tiers: BTreeSet::new(),
            excluded_types: BTreeSet::new(),
            vcpu_buckets: BTreeSet::new(),
            current_generation_only: false,
        }
    }

    pub fn with_node_bounds(mut self, min_nodes: u32, max_nodes: u32) -> Self {
        self.min_nodes = min_nodes;
        self.max_nodes = max_nodes;
        self
    }

    pub fn with_on_demand_ratio(mut self, ratio: f64) -> Self {
        self.on_demand_ratio = ratio;
        self
    }

    pub fn with_zones<I, S>(mut self, zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.zones = zones.into_iter().map(Into::into).collect();
        self
    }

    pub fn excluding(mut self, instance_type: impl Into<String>) -> Self {
        self.excluded_types.insert(instance_type.into());
        self
    }

    /// Whether any spot capacity may be recommended at all
    pub fn spot_allowed(&self) -> bool {
        self.on_demand_ratio < 1.0
    }

    /// Reject requests whose bounds or ratio are out of range
    pub fn validate(&self) -> Result<(), RecommendError> {
        if self.provider.trim().is_empty() {
            return Err(RecommendError::InvalidRequest(
                "provider must not be empty".to_string(),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(RecommendError::InvalidRequest(
                "region must not be empty".to_string(),
            ));
        }
        let cpu = self.requirement.cpu;
        if !cpu.is_finite() || cpu <= 0.0 {
            return Err(RecommendError::InvalidRequest(format!(
                "cpu target must be a positive number, got {}",
                cpu
            )));
        }
        if self.min_nodes == 0 {
            return Err(RecommendError::InvalidRequest(
                "min_nodes must be at least 1".to_string(),
            ));
        }
        if self.max_nodes == 0 {
            return Err(RecommendError::InvalidRequest(
                "max_nodes must be at least 1".to_string(),
            ));
        }
        if self.min_nodes > self.max_nodes {
            return Err(RecommendError::InvalidRequest(format!(
                "min_nodes ({}) is greater than max_nodes ({})",
                self.min_nodes, self.max_nodes
            )));
        }
        let ratio = self.on_demand_ratio;
        if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
            return Err(RecommendError::InvalidRequest(format!(
                "on_demand_ratio must be within [0, 1], got {}",
                ratio
            )));
        }
        if self.zones.iter().any(|z| z.trim().is_empty()) {
            return Err(RecommendError::InvalidRequest(
                "zone names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pricing tier of a node pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingTier {
    OnDemand,
    Spot,
}

impl fmt::Display for PricingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PricingTier::OnDemand => f.write_str("on_demand"),
            PricingTier::Spot => f.write_str("spot"),
        }
    }
}

/// A homogeneous group of nodes of one instance type and one pricing tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePool {
    pub instance_type: String,
    pub vcpus: u32,
    pub memory_bytes: u64,
    pub gpus: u32,
    pub tier: PricingTier,
    pub count: u32,
    pub unit_price: f64,
    pub subtotal: f64,
}

impl NodePool {
    pub fn total_vcpus(&self) -> u64 {
        u64::from(self.vcpus) * u64::from(self.count)
    }

    pub fn total_memory_bytes(&self) -> u64 {
        self.memory_bytes * u64::from(self.count)
    }
}

/// Capacity actually provided by a recommendation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievedCapacity {
    pub cpu: u64,
    pub memory_bytes: u64,
    pub gpus: u64,
    pub nodes: u32,
    pub on_demand_cpu: u64,
}

/// Recommended cluster layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub provider: String,
    pub region: String,
    /// Zones the spot prices were resolved for
    pub zones: Vec<String>,
    pub node_pools: Vec<NodePool>,
    pub total_price: f64,
    pub achieved: AchievedCapacity,
}

impl RecommendationResponse {
    pub fn distinct_types(&self) -> usize {
        self.node_pools
            .iter()
            .map(|p| p.instance_type.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}
