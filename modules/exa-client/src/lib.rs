pub mod error;

pub use error::{ExaError, Result};

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

const EXA_API_URL: &str = "https://api.exa.ai";

pub struct ExaClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExaResult {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExaResponse {
    results: Vec<ExaResult>,
}

impl ExaClient {
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, EXA_API_URL)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Neural web search via the /search endpoint.
    pub async fn search(&self, query: &str, num_results: usize) -> Result<Vec<ExaResult>> {
        debug!(query, "Exa search");

        let body = serde_json::json!({
            "query": query,
            "numResults": num_results,
            "type": "auto",
        });

        self.post("/search", &body).await
    }

    /// Fetch page text (and main image) for a URL via the /contents endpoint.
    pub async fn contents(&self, url: &str) -> Result<Option<ExaResult>> {
        debug!(url, "Exa contents");

        let body = serde_json::json!({
            "urls": [url],
            "text": true,
            "livecrawl": "fallback",
        });

        let mut results = self.post("/contents", &body).await?;
        if results.is_empty() {
            Ok(None)
        } else {
            Ok(Some(results.remove(0)))
        }
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<Vec<ExaResult>> {
        let endpoint = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .post(&endpoint)
            .header("x-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ExaError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ExaResponse = resp.json().await?;
        Ok(parsed.results)
    }
}
