//! Candidate selection
//!
//! Pure filtering of a catalog snapshot against a request. No I/O happens
//! here; spot prices are attached from an already resolved price set.

use crate::models::{InstanceType, RecommendationRequest};
use crate::pricing::ResolvedPrices;
use std::cmp::Ordering;

/// Eligible instance types, each group sorted by its effective price
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    /// Types with a resolved spot price, cheapest spot price first
    pub spot_eligible: Vec<InstanceType>,
    /// Types priced on-demand only, cheapest on-demand price first
    pub on_demand_only: Vec<InstanceType>,
}

impl Candidates {
    pub fn is_empty(&self) -> bool {
        self.spot_eligible.is_empty() && self.on_demand_only.is_empty()
    }

    pub fn len(&self) -> usize {
        self.spot_eligible.len() + self.on_demand_only.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstanceType> {
        self.spot_eligible.iter().chain(self.on_demand_only.iter())
    }
}

fn is_eligible(instance_type: &InstanceType, request: &RecommendationRequest) -> bool {
    if !request.network_tiers.is_empty()
        && !request.network_tiers.contains(&instance_type.network_tier)
    {
        return false;
    }
    if request.excluded_types.contains(&instance_type.id) {
        return false;
    }
    if instance_type.vcpus == 0 {
        return false;
    }
    if !request.vcpu_buckets.is_empty() && !request.vcpu_buckets.contains(&instance_type.vcpus) {
        return false;
    }
    if request.current_generation_only && !instance_type.current_generation {
        return false;
    }
    true
}

/// Types of the snapshot that satisfy every filter of the request
///
/// An empty result is not an error.
pub fn filter_catalog(
    instance_types: &[InstanceType],
    request: &RecommendationRequest,
) -> Vec<InstanceType> {
    instance_types
        .iter()
        .filter(|t| is_eligible(t, request))
        .cloned()
        .collect()
}

fn by_price(price: impl Fn(&InstanceType) -> f64) -> impl Fn(&InstanceType, &InstanceType) -> Ordering {
    move |a, b| price(a).total_cmp(&price(b)).then_with(|| a.id.cmp(&b.id))
}

/// Split eligible types into spot-eligible and on-demand-only
///
/// With spot disallowed every type is on-demand-only, whatever was resolved.
pub fn partition(
    eligible: Vec<InstanceType>,
    prices: Option<&ResolvedPrices>,
    spot_allowed: bool,
) -> Candidates {
    let mut candidates = Candidates::default();

    for instance_type in eligible {
        let spot = if spot_allowed {
            prices.and_then(|p| p.get(&instance_type.id))
        } else {
            None
        };
        match spot {
            Some(price) => candidates
                .spot_eligible
                .push(instance_type.with_spot_price(Some(price))),
            None => candidates
                .on_demand_only
                .push(instance_type.with_spot_price(None)),
        }
    }

    candidates
        .spot_eligible
        .sort_by(by_price(|t| t.spot_price.unwrap_or(t.on_demand_price)));
    candidates
        .on_demand_only
        .sort_by(by_price(|t| t.on_demand_price));
    candidates
}

/// Filter and partition in one step
pub fn select(
    instance_types: &[InstanceType],
    request: &RecommendationRequest,
    prices: Option<&ResolvedPrices>,
) -> Candidates {
    partition(
        filter_catalog(instance_types, request),
        prices,
        request.spot_allowed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NetworkTier, ResourceRequirement, GIB};
    use crate::pricing::PriceSource;
    use std::collections::HashMap;
    use std::time::Duration;

    fn instance(id: &str, vcpus: u32, tier: NetworkTier, on_demand_price: f64) -> InstanceType {
        InstanceType {
            id: id.to_string(),
            vcpus,
            memory_bytes: u64::from(vcpus) * 2 * GIB,
            gpus: 0,
            network_tier: tier,
            on_demand_price,
            spot_price: None,
            current_generation: true,
        }
    }

    fn catalog() -> Vec<InstanceType> {
        let mut old = instance("m4.large", 2, NetworkTier::Moderate, 0.10);
        old.current_generation = false;
        vec![
            instance("c5.large", 2, NetworkTier::High, 0.085),
            instance("c5.xlarge", 4, NetworkTier::High, 0.17),
            instance("t3.nano", 0, NetworkTier::Low, 0.005),
            instance("r5.2xlarge", 8, NetworkTier::VeryHigh, 0.50),
            old,
        ]
    }

    fn request() -> RecommendationRequest {
        RecommendationRequest::new("aws", "eu-west-1", ResourceRequirement::new(8.0, 0))
    }

    fn prices(entries: &[(&str, f64)]) -> ResolvedPrices {
        ResolvedPrices {
            zones: vec!["eu-west-1a".to_string()],
            prices: entries
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<HashMap<_, _>>(),
            source: PriceSource::History,
            metrics_error: None,
            history_error: None,
            elapsed: Duration::ZERO,
        }
    }

    fn ids(types: &[InstanceType]) -> Vec<&str> {
        types.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_zero_vcpu_types_never_eligible() {
        let eligible = filter_catalog(&catalog(), &request());
        assert_eq!(eligible.len(), 4);
        assert!(eligible.iter().all(|t| t.id != "t3.nano"));
    }

    #[test]
    fn test_network_tier_filter() {
        let mut req = request();
        req.network_tiers.insert(NetworkTier::High);
        let eligible = filter_catalog(&catalog(), &req);
        assert_eq!(ids(&eligible), vec!["c5.large", "c5.xlarge"]);
    }

    #[test]
    fn test_exclusions_and_buckets() {
        let mut req = request().excluding("c5.large");
        req.vcpu_buckets.insert(2);
        req.vcpu_buckets.insert(8);
        let eligible = filter_catalog(&catalog(), &req);
        assert_eq!(ids(&eligible), vec!["r5.2xlarge", "m4.large"]);
    }

    #[test]
    fn test_current_generation_only() {
        let mut req = request();
        req.current_generation_only = true;
        let eligible = filter_catalog(&catalog(), &req);
        assert!(eligible.iter().all(|t| t.current_generation));
        assert_eq!(eligible.len(), 3);
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let req = request().excluding("c5.large").excluding("c5.xlarge");
        let mut req = req.excluding("r5.2xlarge").excluding("m4.large");
        req.current_generation_only = true;
        let candidates = select(&catalog(), &req, None);
        assert!(candidates.is_empty());
        assert_eq!(candidates.len(), 0);
    }

    #[test]
    fn test_partition_by_resolved_spot_price() {
        let resolved = prices(&[("c5.xlarge", 0.06), ("r5.2xlarge", 0.15), ("c5.large", 0.03)]);
        let candidates = select(&catalog(), &request(), Some(&resolved));

        assert_eq!(
            ids(&candidates.spot_eligible),
            vec!["c5.large", "c5.xlarge", "r5.2xlarge"]
        );
        assert_eq!(ids(&candidates.on_demand_only), vec!["m4.large"]);
        assert_eq!(candidates.spot_eligible[0].spot_price, Some(0.03));
        assert!(candidates.on_demand_only[0].spot_price.is_none());
    }

    #[test]
    fn test_spot_disallowed_is_all_on_demand() {
        let resolved = prices(&[("c5.xlarge", 0.06), ("c5.large", 0.03)]);
        let req = request().with_on_demand_ratio(1.0);
        let candidates = select(&catalog(), &req, Some(&resolved));

        assert!(candidates.spot_eligible.is_empty());
        assert_eq!(
            ids(&candidates.on_demand_only),
            vec!["c5.large", "m4.large", "c5.xlarge", "r5.2xlarge"]
        );
    }

    #[test]
    fn test_equal_prices_ordered_by_id() {
        let types = vec![
            instance("b.large", 2, NetworkTier::Low, 0.1),
            instance("a.large", 2, NetworkTier::Low, 0.1),
        ];
        let candidates = select(&types, &request(), None);
        assert_eq!(ids(&candidates.on_demand_only), vec!["a.large", "b.large"]);
        assert_eq!(
            candidates.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec!["a.large", "b.large"]
        );
    }
}
