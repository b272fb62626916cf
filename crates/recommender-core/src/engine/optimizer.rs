//! Bounded-time node-pool allocation heuristic
//!
//! Sizes every candidate on its own, keeps the K cheapest as the working set,
//! splits the capacity across them inversely to their unit price and then
//! repairs the integer allocation: top up until covered, top up to the node
//! minimum, trim surplus nodes. The result is deterministic for a given
//! candidate set.

use crate::error::{ConstraintSummary, RecommendError};
use crate::models::{AchievedCapacity, InstanceType, NodePool, PricingTier, RecommendationRequest};
use crate::selector::Candidates;
use std::cmp::Ordering;
use tracing::debug;

const CPU_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of distinct instance types in a recommendation (K)
    pub diversification: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { diversification: 2 }
    }
}

/// Node pools chosen for one request
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub node_pools: Vec<NodePool>,
    pub total_price: f64,
    pub achieved: AchievedCapacity,
}

/// A candidate that can cover the request on its own within max_nodes
#[derive(Debug)]
struct Sizing<'a> {
    instance_type: &'a InstanceType,
    /// Spot price when spot-eligible, otherwise on-demand
    unit_price: f64,
    nodes: u32,
}

impl Sizing<'_> {
    fn id(&self) -> &str {
        &self.instance_type.id
    }

    fn capacity(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Cpu => f64::from(self.instance_type.vcpus),
            Dimension::Memory => self.instance_type.memory_bytes as f64,
            Dimension::Gpu => f64::from(self.instance_type.gpus),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Cpu,
    Memory,
    Gpu,
}

/// Requested totals
#[derive(Debug, Clone, Copy)]
struct Target {
    cpu: f64,
    memory_bytes: u64,
    gpus: u32,
}

impl Target {
    fn of(request: &RecommendationRequest) -> Self {
        Self {
            cpu: request.requirement.cpu,
            memory_bytes: request.requirement.memory_bytes,
            gpus: request.requirement.gpu_target(),
        }
    }

    fn wanted(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Cpu => self.cpu,
            Dimension::Memory => self.memory_bytes as f64,
            Dimension::Gpu => f64::from(self.gpus),
        }
    }

    fn dimensions(&self) -> impl Iterator<Item = Dimension> + '_ {
        [Dimension::Cpu, Dimension::Memory, Dimension::Gpu]
            .into_iter()
            .filter(|d| self.wanted(*d) > 0.0)
    }
}

/// Nodes of `instance_type` alone needed to cover the target
fn nodes_needed(instance_type: &InstanceType, target: &Target) -> Option<u64> {
    let mut nodes = (target.cpu / f64::from(instance_type.vcpus)).ceil() as u64;
    if target.memory_bytes > 0 {
        if instance_type.memory_bytes == 0 {
            return None;
        }
        nodes = nodes.max(target.memory_bytes.div_ceil(instance_type.memory_bytes));
    }
    if target.gpus > 0 {
        if instance_type.gpus == 0 {
            return None;
        }
        nodes = nodes.max(u64::from(target.gpus.div_ceil(instance_type.gpus)));
    }
    Some(nodes)
}

fn rank(a: &Sizing<'_>, b: &Sizing<'_>) -> Ordering {
    a.unit_price
        .total_cmp(&b.unit_price)
        .then_with(|| a.nodes.cmp(&b.nodes))
        .then_with(|| a.id().cmp(b.id()))
}

fn total(counts: &[u32]) -> u64 {
    counts.iter().map(|&n| u64::from(n)).sum()
}

/// Capacity provided by `counts` over `working`
fn provided(working: &[Sizing<'_>], counts: &[u32], dimension: Dimension) -> f64 {
    working
        .iter()
        .zip(counts)
        .map(|(t, n)| t.capacity(dimension) * f64::from(*n))
        .sum()
}

fn covered(working: &[Sizing<'_>], counts: &[u32], target: &Target) -> bool {
    target
        .dimensions()
        .all(|d| provided(working, counts, d) + CPU_EPSILON >= target.wanted(d))
}

/// The dimension with the largest relative shortfall, if any
fn largest_deficit(working: &[Sizing<'_>], counts: &[u32], target: &Target) -> Option<Dimension> {
    target
        .dimensions()
        .filter_map(|d| {
            let wanted = target.wanted(d);
            let missing = wanted - provided(working, counts, d);
            (missing > CPU_EPSILON).then_some((d, missing / wanted))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(d, _)| d)
}

#[derive(Debug, Clone)]
pub struct Optimizer {
    config: OptimizerConfig,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn diversification(&self) -> usize {
        self.config.diversification.max(1)
    }

    pub fn optimize(
        &self,
        candidates: &Candidates,
        request: &RecommendationRequest,
    ) -> Result<Layout, RecommendError> {
        let infeasible = |reason: &str| RecommendError::Infeasible {
            reason: reason.to_string(),
            constraints: ConstraintSummary {
                cpu: request.requirement.cpu,
                memory_bytes: request.requirement.memory_bytes,
                gpus: request.requirement.gpus,
                min_nodes: request.min_nodes,
                max_nodes: request.max_nodes,
                eligible_candidates: candidates.len(),
            },
        };

        if candidates.is_empty() {
            return Err(infeasible("no instance type matches the request filters"));
        }

        let target = Target::of(request);
        let mut sized: Vec<Sizing<'_>> = candidates
            .iter()
            .filter_map(|t| {
                let nodes = nodes_needed(t, &target)?;
                if nodes > u64::from(request.max_nodes) {
                    return None;
                }
                Some(Sizing {
                    instance_type: t,
                    unit_price: t.spot_price.unwrap_or(t.on_demand_price),
                    nodes: nodes as u32,
                })
            })
            .collect();

        if sized.is_empty() {
            return Err(infeasible(
                "every eligible instance type needs more than max_nodes nodes or lacks a requested GPU",
            ));
        }

        sized.sort_by(rank);
        sized.truncate(self.diversification());

        for k in (1..=sized.len()).rev() {
            let working = &sized[..k];
            if let Some(counts) = allocate(working, &target, request) {
                debug!(
                    working_set = k,
                    nodes = total(&counts),
                    "Allocation found"
                );
                let split = split_on_demand(working, &counts, request);
                let layout = assemble(working, &split);
                return self.verify(layout, &target, request).ok_or_else(|| {
                    infeasible("allocation does not cover the requested capacity")
                });
            }
        }

        Err(infeasible("no allocation within node bounds"))
    }

    fn verify(&self, layout: Layout, target: &Target, request: &RecommendationRequest) -> Option<Layout> {
        let achieved = &layout.achieved;
        let ok = achieved.cpu as f64 + CPU_EPSILON >= target.cpu
            && achieved.memory_bytes >= target.memory_bytes
            && achieved.gpus >= u64::from(target.gpus)
            && achieved.nodes >= request.min_nodes
            && achieved.nodes <= request.max_nodes;
        ok.then_some(layout)
    }
}

/// Integer node counts per working-set entry, or `None` outside the bounds
fn allocate(working: &[Sizing<'_>], target: &Target, request: &RecommendationRequest) -> Option<Vec<u32>> {
    let (mut counts, included) = proportional_split(working, target);
    let active: Vec<usize> = (0..working.len()).filter(|&i| included[i]).collect();
    let max_nodes = u64::from(request.max_nodes);

    // Cover the scarcest dimension with the type cheapest per unit of it.
    // Each pass closes one dimension and adding nodes never opens another.
    while let Some(dimension) = largest_deficit(working, &counts, target) {
        let pick = active
            .iter()
            .copied()
            .filter(|&i| working[i].capacity(dimension) > 0.0)
            .min_by(|&a, &b| {
                let per_unit = |i: usize| working[i].unit_price / working[i].capacity(dimension);
                per_unit(a)
                    .total_cmp(&per_unit(b))
                    .then_with(|| working[a].unit_price.total_cmp(&working[b].unit_price))
                    .then_with(|| working[a].id().cmp(working[b].id()))
            })?;

        let missing = target.wanted(dimension) - provided(working, &counts, dimension);
        let nodes = ((missing - CPU_EPSILON) / working[pick].capacity(dimension))
            .ceil()
            .max(1.0) as u64;
        if total(&counts) + nodes > max_nodes {
            return None;
        }
        counts[pick] += nodes as u32;
    }

    // Working set is ranked, so the first active entry is the cheapest
    let cheapest = *active.first()?;
    let missing = u64::from(request.min_nodes).saturating_sub(total(&counts));
    if total(&counts) + missing > max_nodes {
        return None;
    }
    counts[cheapest] += missing as u32;

    trim(working, &mut counts, target, request.min_nodes);

    let nodes = total(&counts);
    (nodes >= u64::from(request.min_nodes) && nodes <= max_nodes).then_some(counts)
}

/// Floor of the price-weighted share of each entry, renormalized over the
/// entries that keep a non-zero share
///
/// Returns the counts and which entries stay in the allocation. When no entry
/// gets a whole node only the cheapest one stays.
fn proportional_split(working: &[Sizing<'_>], target: &Target) -> (Vec<u32>, Vec<bool>) {
    let inverse: Vec<f64> = working
        .iter()
        .map(|t| 1.0 / t.unit_price.max(f64::MIN_POSITIVE))
        .collect();
    let mut included = vec![true; working.len()];

    loop {
        let norm: f64 = inverse
            .iter()
            .zip(&included)
            .filter(|(_, inc)| **inc)
            .map(|(w, _)| w)
            .sum();

        let counts: Vec<u32> = working
            .iter()
            .enumerate()
            .map(|(i, t)| {
                if !included[i] {
                    return 0;
                }
                let weight = inverse[i] / norm;
                target
                    .dimensions()
                    .map(|d| weight * target.wanted(d) / t.capacity(d))
                    .fold(0.0_f64, f64::max)
                    .floor() as u32
            })
            .collect();

        let zeroed: Vec<usize> = (0..working.len())
            .filter(|&i| included[i] && counts[i] == 0)
            .collect();
        if zeroed.is_empty() {
            return (counts, included);
        }

        let remaining = included.iter().filter(|inc| **inc).count() - zeroed.len();
        if remaining == 0 {
            let only_cheapest = (0..working.len()).map(|i| i == 0).collect();
            return (counts, only_cheapest);
        }
        for i in zeroed {
            included[i] = false;
        }
    }
}

/// Nodes of entry `i` that can go while every dimension stays covered and
/// at least one node of the entry is left
fn removable(working: &[Sizing<'_>], counts: &[u32], target: &Target, i: usize) -> u64 {
    let mut nodes = u64::from(counts[i].saturating_sub(1));
    for dimension in target.dimensions() {
        let capacity = working[i].capacity(dimension);
        if capacity <= 0.0 {
            continue;
        }
        let slack = provided(working, counts, dimension) - target.wanted(dimension) + CPU_EPSILON;
        nodes = nodes.min((slack / capacity).floor().max(0.0) as u64);
    }
    nodes
}

/// Remove surplus nodes while coverage and the minimum still hold, most
/// expensive entry first
fn trim(working: &[Sizing<'_>], counts: &mut [u32], target: &Target, min_nodes: u32) {
    loop {
        let surplus = total(counts).saturating_sub(u64::from(min_nodes));
        if surplus == 0 {
            return;
        }

        let pick = (0..working.len())
            .map(|i| (i, removable(working, counts, target, i)))
            .filter(|&(_, nodes)| nodes > 0)
            .max_by(|&(a, _), &(b, _)| {
                working[a]
                    .unit_price
                    .total_cmp(&working[b].unit_price)
                    .then_with(|| working[a].instance_type.vcpus.cmp(&working[b].instance_type.vcpus))
                    .then_with(|| working[b].id().cmp(working[a].id()))
            });

        match pick {
            // The entry stays the most expensive removable one until its
            // slack is used up, so its nodes go in one step
            Some((i, nodes)) => counts[i] -= nodes.min(surplus) as u32,
            None => return,
        }
    }
}

/// On-demand and spot counts per working-set entry
struct Split {
    on_demand: Vec<u32>,
    spot: Vec<u32>,
}

fn split_on_demand(working: &[Sizing<'_>], counts: &[u32], request: &RecommendationRequest) -> Split {
    let mut on_demand = vec![0; working.len()];
    let mut spot = vec![0; working.len()];

    for (i, t) in working.iter().enumerate() {
        if request.spot_allowed() && t.instance_type.spot_price.is_some() {
            spot[i] = counts[i];
        } else {
            on_demand[i] = counts[i];
        }
    }

    let required = request.on_demand_ratio * request.requirement.cpu;
    let mut on_demand_cpu: f64 = working
        .iter()
        .zip(&on_demand)
        .map(|(t, n)| f64::from(t.instance_type.vcpus) * f64::from(*n))
        .sum();

    // Smallest on-demand premium first
    let penalty = |i: usize| {
        let t = working[i].instance_type;
        t.on_demand_price - t.spot_price.unwrap_or(t.on_demand_price)
    };
    let mut order: Vec<usize> = (0..working.len()).filter(|&i| spot[i] > 0).collect();
    order.sort_by(|&a, &b| {
        penalty(a)
            .total_cmp(&penalty(b))
            .then_with(|| working[a].id().cmp(working[b].id()))
    });

    for i in order {
        let remaining = required - on_demand_cpu;
        if remaining <= CPU_EPSILON {
            break;
        }
        let vcpus = f64::from(working[i].instance_type.vcpus);
        let nodes = (((remaining - CPU_EPSILON) / vcpus).ceil() as u64).min(u64::from(spot[i])) as u32;
        spot[i] -= nodes;
        on_demand[i] += nodes;
        on_demand_cpu += vcpus * f64::from(nodes);
    }

    Split { on_demand, spot }
}

fn pool(instance_type: &InstanceType, tier: PricingTier, count: u32, unit_price: f64) -> NodePool {
    NodePool {
        instance_type: instance_type.id.clone(),
        vcpus: instance_type.vcpus,
        memory_bytes: instance_type.memory_bytes,
        gpus: instance_type.gpus,
        tier,
        count,
        unit_price,
        subtotal: unit_price * f64::from(count),
    }
}

/// Pools in working-set order, on-demand before spot
fn assemble(working: &[Sizing<'_>], split: &Split) -> Layout {
    let mut node_pools = Vec::new();
    for (i, t) in working.iter().enumerate() {
        let it = t.instance_type;
        if split.on_demand[i] > 0 {
            node_pools.push(pool(it, PricingTier::OnDemand, split.on_demand[i], it.on_demand_price));
        }
        if split.spot[i] > 0 {
            if let Some(spot_price) = it.spot_price {
                node_pools.push(pool(it, PricingTier::Spot, split.spot[i], spot_price));
            }
        }
    }

    let mut achieved = AchievedCapacity::default();
    for p in &node_pools {
        achieved.cpu += p.total_vcpus();
        achieved.memory_bytes += p.total_memory_bytes();
        achieved.gpus += u64::from(p.gpus) * u64::from(p.count);
        achieved.nodes += p.count;
        if p.tier == PricingTier::OnDemand {
            achieved.on_demand_cpu += p.total_vcpus();
        }
    }

    Layout {
        total_price: node_pools.iter().map(|p| p.subtotal).sum(),
        node_pools,
        achieved,
    }
}
