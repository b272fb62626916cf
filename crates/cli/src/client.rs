//! API client for the recommender service

use anyhow::{Context, Result};
use recommender_core::{HealthResponse, RecommendationRequest, RecommendationResponse};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Error body returned by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message} ({code}, HTTP {status})")]
    Service {
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("API error ({status}): {body}")]
    Unexpected { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeValues {
    pub attribute: String,
    pub values: Vec<u32>,
}

/// API client for the recommender service
pub struct ApiClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        // Keep a base path such as /recommender when joining relative paths
        let mut base_url = Url::parse(base_url).context("Invalid API URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.authorize(request)
            .send()
            .await
            .context("Failed to send request")
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.client.get(self.url(path)?)).await?;
        let response = check(response).await?;
        response.json().await.context("Failed to parse response")
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .send(self.client.post(self.url(path)?).json(body))
            .await?;
        let response = check(response).await?;
        response.json().await.context("Failed to parse response")
    }

    pub async fn recommend(&self, request: &RecommendationRequest) -> Result<RecommendationResponse> {
        let path = format!(
            "api/v1/recommender/{}/{}/cluster",
            request.provider, request.region
        );
        self.post(&path, request).await
    }

    pub async fn cpu_attributes(&self, provider: &str, region: &str) -> Result<AttributeValues> {
        let path = format!("api/v1/recommender/{}/{}/attributes/cpu", provider, region);
        self.get(&path).await
    }

    /// Plain-text service status
    pub async fn status(&self) -> Result<String> {
        let response = self.send(self.client.get(self.url("status")?)).await?;
        let response = check(response).await?;
        response.text().await.context("Failed to read response")
    }

    /// Health report; an unhealthy service still returns a report
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.send(self.client.get(self.url("healthz")?)).await?;
        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            return response.json().await.context("Failed to parse response");
        }
        let response = check(response).await?;
        response.json().await.context("Failed to parse response")
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let err = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(error) => ApiError::Service {
            status,
            code: error.code,
            message: error.message,
        },
        Err(_) => ApiError::Unexpected { status, body },
    };
    Err(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recommender_core::ResourceRequirement;

    const RESPONSE: &str = r#"{
        "provider": "aws",
        "region": "eu-west-1",
        "zones": ["eu-west-1a"],
        "node_pools": [
            {"instance_type": "m5.xlarge", "vcpus": 4, "memory_bytes": 17179869184, "gpus": 0,
             "tier": "spot", "count": 2, "unit_price": 0.1, "subtotal": 0.2}
        ],
        "total_price": 0.2,
        "achieved": {"cpu": 8, "memory_bytes": 34359738368, "gpus": 0, "nodes": 2, "on_demand_cpu": 0}
    }"#;

    #[tokio::test]
    async fn test_recommend_posts_to_cluster_route() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/recommender/aws/eu-west-1/cluster")
            .match_header("authorization", "Bearer secret")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"requirement": {"cpu": 8.0}}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(RESPONSE)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), Some("secret".to_string())).unwrap();
        let request = RecommendationRequest::new("aws", "eu-west-1", ResourceRequirement::new(8.0, 0));
        let response = client.recommend(&request).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.node_pools.len(), 1);
        assert_eq!(response.achieved.nodes, 2);
    }

    #[tokio::test]
    async fn test_service_error_is_decoded() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/recommender/aws/nowhere/attributes/cpu")
            .with_status(404)
            .with_body(r#"{"code": "empty_catalog", "message": "provider aws has no offerings in region nowhere"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), None).unwrap();
        let err = client.cpu_attributes("aws", "nowhere").await.unwrap_err();

        match err.downcast_ref::<ApiError>() {
            Some(ApiError::Service { status, code, .. }) => {
                assert_eq!(*status, StatusCode::NOT_FOUND);
                assert_eq!(code, "empty_catalog");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_base_path_is_kept() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/recommender/status")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let client = ApiClient::new(&format!("{}/recommender", server.url()), None).unwrap();
        assert_eq!(client.status().await.unwrap(), "ok");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unhealthy_report_is_returned() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_body(r#"{"status": "unhealthy", "components": {}}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), None).unwrap();
        let health = client.health().await.unwrap();
        assert_eq!(health.status, recommender_core::ComponentStatus::Unhealthy);
    }
}
