//! Vertex AI `generateContent` client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{build_prompt, finalize_sql, SqlGenerator, SYSTEM_INSTRUCTION};
use crate::config::{GcpConfig, GeneratorConfig};
use crate::error::{AppError, AppResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl GenerateContentResponse {
    /// Text of the first part of the first candidate, if any.
    fn first_text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .first()?
            .text
            .as_deref()
    }
}

pub struct VertexGenerator {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl VertexGenerator {
    pub fn new(http: reqwest::Client, gcp: &GcpConfig, generator: &GeneratorConfig) -> Self {
        let endpoint = format!(
            "https://{region}-aiplatform.googleapis.com/v1/projects/{project}/locations/{region}/publishers/google/models/{model}:generateContent",
            region = gcp.region,
            project = gcp.project_id,
            model = generator.model,
        );
        Self {
            http,
            endpoint,
            access_token: gcp.access_token.clone(),
            temperature: generator.temperature,
            max_output_tokens: generator.max_output_tokens,
        }
    }

    /// Override the full `:generateContent` URL (emulators, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request(&self, description: &str, table: &str, column: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: Some(build_prompt(description, table, column)) }],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: Some(SYSTEM_INSTRUCTION.to_string()) }],
            },
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }
}

#[async_trait]
impl SqlGenerator for VertexGenerator {
    async fn generate(&self, description: &str, table: &str, column: &str) -> AppResult<String> {
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&self.request(description, table, column))
            .send()
            .await
            .map_err(|e| AppError::Generation(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AppError::Generation(e.to_string()))?;
        if !status.is_success() {
            return Err(AppError::Generation(format!(
                "Vertex AI returned {}: {}",
                status,
                body.trim()
            )));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|e| AppError::Generation(format!("invalid generateContent response: {}", e)))?;

        let sql = finalize_sql(parsed.first_text());
        tracing::debug!(table, column, "Generated rule SQL ({} chars)", sql.len());
        Ok(sql)
    }
}
