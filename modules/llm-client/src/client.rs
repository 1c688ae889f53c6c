use anyhow::{anyhow, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::schema;
use crate::types::*;

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";

/// OpenRouter-backed client for chat completions, structured extraction,
/// and embeddings.
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    http: reqwest::Client,
    chat_model: String,
    embedding_model: String,
}

impl LlmClient {
    pub fn new(api_key: &str, chat_model: &str, embedding_model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
            chat_model: chat_model.to_string(),
            embedding_model: embedding_model.to_string(),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn send_chat(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", OPENROUTER_API_URL);

        debug!(model = %request.model, "OpenRouter chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("OpenRouter API error ({}): {}", status, error_text));
        }

        let chat_response: ChatResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("No response from OpenRouter"))
    }

    /// Free-form chat completion.
    pub async fn chat(&self, system: &str, prompt: &str) -> Result<String> {
        let request = ChatRequest::new(&self.chat_model)
            .message(ChatMessage::system(system))
            .message(ChatMessage::user(prompt));

        self.send_chat(&request).await
    }

    /// Structured extraction: the model is constrained to `T`'s JSON schema
    /// and the response is deserialized into it.
    pub async fn extract<T: JsonSchema + DeserializeOwned>(
        &self,
        system: &str,
        prompt: &str,
    ) -> Result<T> {
        let request = ChatRequest::new(&self.chat_model)
            .message(ChatMessage::system(system))
            .message(ChatMessage::user(prompt))
            .temperature(0.0)
            .json_schema(&schema::schema_name::<T>(), schema::strict_schema::<T>());

        let content = self.send_chat(&request).await?;

        serde_json::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse structured output: {} in {}", e, content))
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: serde_json::Value::String(text.to_string()),
        };

        let mut embeddings = self.send_embeddings(&request).await?;

        if embeddings.is_empty() {
            return Err(anyhow!("No embedding in response"));
        }
        Ok(embeddings.remove(0))
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: serde_json::Value::Array(
                texts
                    .iter()
                    .map(|t| serde_json::Value::String(t.clone()))
                    .collect(),
            ),
        };

        let embeddings = self.send_embeddings(&request).await?;

        if embeddings.len() != texts.len() {
            return Err(anyhow!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            ));
        }
        Ok(embeddings)
    }

    async fn send_embeddings(&self, request: &EmbeddingRequest) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", OPENROUTER_API_URL);

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!(
                "OpenRouter embedding error ({}): {}",
                status,
                error_text
            ));
        }

        let embed_response: EmbeddingResponse = response.json().await?;

        Ok(embed_response
            .data
            .into_iter()
            .map(|d| d.embedding)
            .collect())
    }
}
