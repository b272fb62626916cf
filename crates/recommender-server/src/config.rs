//! Service configuration
//!
//! Read from the file named by `RECOMMENDER_CONFIG`, if set, then overlaid
//! with `RECOMMENDER_*` environment variables.

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::ConfigBuilder;
use recommender_core::catalog::RegistryConfig;
use recommender_core::engine::EngineConfig;
use recommender_core::pricing::PricingConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "RECOMMENDER_CONFIG";

/// Where instance-type catalogs come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogBackend {
    /// JSON catalog document on disk
    File,
    /// Product-info gateway over HTTP
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Prefix of every route
    #[serde(default = "default_base_path")]
    pub base_path: String,

    #[serde(default = "default_catalog_backend")]
    pub catalog_backend: CatalogBackend,

    #[serde(default)]
    pub catalog_file: Option<PathBuf>,

    #[serde(default)]
    pub productinfo_url: Option<String>,

    /// Providers served by the catalog backend
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,

    /// Prometheus address; spot history only when unset
    #[serde(default)]
    pub prometheus_url: Option<String>,

    #[serde(default = "default_catalog_ttl")]
    pub catalog_ttl_secs: u64,

    /// Background refresh period, 0 disables it
    #[serde(default = "default_catalog_refresh")]
    pub catalog_refresh_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_pricing_query_timeout")]
    pub pricing_query_timeout_ms: u64,

    #[serde(default = "default_pricing_fanout")]
    pub pricing_fanout: usize,

    #[serde(default = "default_diversification")]
    pub diversification: usize,

    /// Bearer token guarding the recommender API; open when unset
    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default = "default_cors_allow_all")]
    pub cors_allow_all: bool,
}

fn default_listen_port() -> u16 {
    9090
}

fn default_base_path() -> String {
    "/".to_string()
}

fn default_catalog_backend() -> CatalogBackend {
    CatalogBackend::File
}

fn default_providers() -> Vec<String> {
    vec!["aws".to_string()]
}

fn default_catalog_ttl() -> u64 {
    3600
}

fn default_catalog_refresh() -> u64 {
    600
}

fn default_request_timeout() -> u64 {
    30
}

fn default_pricing_query_timeout() -> u64 {
    5000
}

fn default_pricing_fanout() -> usize {
    8
}

fn default_diversification() -> usize {
    2
}

fn default_cors_allow_all() -> bool {
    true
}

impl ServerConfig {
    /// Load configuration from the optional config file and environment
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("RECOMMENDER")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("providers"),
        );
        Self::from_builder(builder)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: Self = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        match self.catalog_backend {
            CatalogBackend::File if self.catalog_file.is_none() => {
                bail!("catalog_file is required with the file catalog backend")
            }
            CatalogBackend::Http if self.productinfo_url.is_none() => {
                bail!("productinfo_url is required with the http catalog backend")
            }
            _ => {}
        }
        if !self.base_path.starts_with('/') {
            bail!("base_path must start with '/', got {}", self.base_path);
        }
        if self.providers.is_empty() {
            bail!("at least one provider must be configured");
        }
        Ok(())
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            providers: self.providers.iter().cloned().collect(),
            ttl: Duration::from_secs(self.catalog_ttl_secs),
            pricing: PricingConfig {
                fanout: self.pricing_fanout,
                query_timeout: Duration::from_millis(self.pricing_query_timeout_ms),
                ..PricingConfig::default()
            },
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            diversification: self.diversification,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}
