//! Core library of the node-pool recommender
//!
//! This crate provides:
//! - Instance-type catalogs per provider/region, cached as immutable snapshots
//! - Spot price resolution from a metrics backend with a spot-history fallback
//! - Candidate selection and the cost-minimizing node-pool optimizer
//! - Health tracking and observability

pub mod catalog;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod pricing;
pub mod selector;

pub use catalog::{CatalogRegistry, HttpProviderApi, ProviderApi, RegistryConfig, StaticProviderApi};
pub use engine::{Engine, EngineConfig};
pub use error::{PricingError, ProviderError, RecommendError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{RecommenderMetrics, StructuredLogger};
pub use pricing::{PricingConfig, PrometheusSpotMetrics, SpotPriceMetrics};
