use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::options::GenerationOptions as OllamaOptions;
use ollama_rs::Ollama;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl GenerationOptions {
    pub fn with_max_new_tokens(max_new_tokens: u32) -> Self {
        Self {
            max_new_tokens: Some(max_new_tokens),
            ..Self::default()
        }
    }
}

/// Opaque text-generation capability. Returns one or more candidate replies.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Vec<String>>;

    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    async fn shut_down(&self) -> Result<()> {
        Ok(())
    }
}

pub struct HuggingFaceGenerator {
    api_key: Option<String>,
    endpoint: Url,
    model: String,
    client: Client,
}

impl HuggingFaceGenerator {
    pub fn new(api_key: Option<String>, endpoint: &str, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_key,
            endpoint: Url::parse(endpoint)?,
            model: model.into(),
            client: Client::new(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn model_url(&self) -> Result<Url> {
        Ok(self.endpoint.join(&self.model)?)
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| PipelineError::MissingApiToken("HUGGINGFACE_API_KEY".to_string()))
    }
}

#[async_trait]
impl TextGenerator for HuggingFaceGenerator {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Vec<String>> {
        let api_key = self.api_key()?;
        let url = self.model_url()?;
        debug!(model = %self.model, prompt_len = prompt.len(), "sending TGI request");

        let mut parameters = serde_json::to_value(options)?;
        parameters["return_full_text"] = json!(false);

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&json!({
                "inputs": prompt,
                "parameters": parameters,
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PipelineError::Generation(format!(
                "{}: {}",
                status,
                error_message(&body)
            )));
        }

        parse_tgi_replies(&serde_json::from_str::<Value>(&body)?)
    }

    async fn warm_up(&self) -> Result<()> {
        self.api_key()?;
        self.model_url()?;
        info!(model = %self.model, "Hugging Face generator ready");
        Ok(())
    }
}

/// Prefers the `error` field of a JSON body, else the raw body text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|data| data["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Accepts both the Inference API list shape and the bare TGI `/generate` object.
pub fn parse_tgi_replies(data: &Value) -> Result<Vec<String>> {
    if let Some(error) = data.get("error").and_then(Value::as_str) {
        return Err(PipelineError::Generation(error.to_string()));
    }

    let candidates = match data {
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        Value::Object(_) => vec![data],
        _ => Vec::new(),
    };

    candidates
        .into_iter()
        .map(|candidate| {
            candidate["generated_text"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| {
                    PipelineError::Generation("Failed to get generated_text from response".to_string())
                })
        })
        .collect()
}

pub struct OllamaGenerator {
    ollama: Ollama,
    model: String,
}

impl OllamaGenerator {
    pub fn new(host: impl Into<String>, port: u16, model: impl Into<String>) -> Self {
        Self {
            ollama: Ollama::new(host.into(), port),
            model: model.into(),
        }
    }
}

fn num_predict(max_new_tokens: u32) -> i32 {
    i32::try_from(max_new_tokens).unwrap_or(i32::MAX)
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Vec<String>> {
        debug!(model = %self.model, prompt_len = prompt.len(), "sending Ollama request");

        let mut request = GenerationRequest::new(self.model.clone(), prompt.to_string());
        if options.max_new_tokens.is_some() || options.temperature.is_some() {
            let mut ollama_options = OllamaOptions::default();
            if let Some(max_new_tokens) = options.max_new_tokens {
                ollama_options = ollama_options.num_predict(num_predict(max_new_tokens));
            }
            if let Some(temperature) = options.temperature {
                ollama_options = ollama_options.temperature(temperature);
            }
            request = request.options(ollama_options);
        }

        let response = self
            .ollama
            .generate(request)
            .await
            .map_err(|e| PipelineError::Generation(format!("Ollama request failed: {}", e)))?;

        Ok(vec![response.response])
    }

    async fn warm_up(&self) -> Result<()> {
        info!(model = %self.model, "Ollama generator ready");
        Ok(())
    }
}
