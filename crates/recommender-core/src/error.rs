//! Error taxonomy for catalog, pricing and recommendation failures

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Constraints that could not be met by any allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSummary {
    pub cpu: f64,
    pub memory_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpus: Option<u32>,
    pub min_nodes: u32,
    pub max_nodes: u32,
    pub eligible_candidates: usize,
}

/// Errors surfaced to callers of the recommendation engine
#[derive(Debug, Error)]
pub enum RecommendError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("catalog for {provider}/{region} is unavailable: {reason}")]
    CatalogUnavailable {
        provider: String,
        region: String,
        reason: String,
    },

    #[error("provider {provider} has no offerings in region {region}")]
    EmptyCatalog { provider: String, region: String },

    #[error("no allocation satisfies the request: {reason}")]
    Infeasible {
        reason: String,
        constraints: ConstraintSummary,
    },

    #[error("recommendation timed out after {0:?}")]
    Timeout(Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RecommendError {
    /// Machine-readable kind
    pub fn code(&self) -> &'static str {
        match self {
            RecommendError::InvalidRequest(_) => "invalid_request",
            RecommendError::CatalogUnavailable { .. } => "catalog_unavailable",
            RecommendError::EmptyCatalog { .. } => "empty_catalog",
            RecommendError::Infeasible { .. } => "infeasible",
            RecommendError::Timeout(_) => "timeout",
            RecommendError::Internal(_) => "internal",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, RecommendError::InvalidRequest(_))
    }
}

impl From<tokio::task::JoinError> for RecommendError {
    fn from(err: tokio::task::JoinError) -> Self {
        RecommendError::Internal(format!("optimizer task failed: {}", err))
    }
}

/// Failures of the descriptive or spot-history provider APIs
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider API unreachable: {0}")]
    Unreachable(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("provider {0} is not supported")]
    UnsupportedProvider(String),
}

impl ProviderError {
    /// Normalize a descriptive-API failure for one provider/region
    pub fn into_catalog_error(self, provider: &str, region: &str) -> RecommendError {
        match self {
            ProviderError::UnsupportedProvider(p) => {
                RecommendError::InvalidRequest(format!("provider {} is not supported", p))
            }
            other => RecommendError::CatalogUnavailable {
                provider: provider.to_string(),
                region: region.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Unreachable(err.to_string())
        }
    }
}

/// Failures of the metrics backend; any of these degrades pricing to the
/// spot-history fallback
#[derive(Debug, Clone, Error)]
pub enum PricingError {
    #[error("metrics backend unreachable: {0}")]
    Unreachable(String),

    #[error("empty spot price series for {0}")]
    EmptySeries(String),

    #[error("malformed metrics response: {0}")]
    Malformed(String),

    #[error("spot price query for {0} timed out")]
    Timeout(String),
}

impl From<reqwest::Error> for PricingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PricingError::Malformed(err.to_string())
        } else {
            PricingError::Unreachable(err.to_string())
        }
    }
}
