use std::env;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmBackend {
    #[default]
    HuggingFace,
    Ollama,
}

impl FromStr for LlmBackend {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "huggingface" | "hf" | "tgi" => Ok(LlmBackend::HuggingFace),
            "ollama" => Ok(LlmBackend::Ollama),
            other => Err(PipelineError::Config(format!("unknown LLM backend '{}'", other))),
        }
    }
}

#[derive(Clone)]
pub struct Configuration {
    pub backend: LlmBackend,
    pub huggingface_api_key: Option<String>,
    pub huggingface_endpoint: String,
    pub keyword_model: String,
    pub answer_model: String,
    pub ollama_host: String,
    pub ollama_port: u16,
    pub pubmed_tool: String,
    pub pubmed_email: String,
    pub ncbi_api_key: Option<String>,
    pub max_results: usize,
    pub max_new_tokens: u32,
}

fn default_huggingface_endpoint() -> String {
    "https://api-inference.huggingface.co/models/".to_string()
}

fn default_model() -> String {
    "mistralai/Mixtral-8x7B-Instruct-v0.1".to_string()
}

fn default_ollama_host() -> String {
    "http://localhost".to_string()
}

fn default_ollama_port() -> u16 {
    11434
}

fn default_pubmed_tool() -> String {
    "medqa".to_string()
}

fn default_pubmed_email() -> String {
    "medqa@example.com".to_string()
}

fn default_max_results() -> usize {
    1
}

fn default_max_new_tokens() -> u32 {
    500
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            backend: LlmBackend::default(),
            huggingface_api_key: None,
            huggingface_endpoint: default_huggingface_endpoint(),
            keyword_model: default_model(),
            answer_model: default_model(),
            ollama_host: default_ollama_host(),
            ollama_port: default_ollama_port(),
            pubmed_tool: default_pubmed_tool(),
            pubmed_email: default_pubmed_email(),
            ncbi_api_key: None,
            max_results: default_max_results(),
            max_new_tokens: default_max_new_tokens(),
        }
    }
}

fn mask(key: &Option<String>) -> Option<&'static str> {
    key.as_ref().map(|_| "***")
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("backend", &self.backend)
            .field("huggingface_api_key", &mask(&self.huggingface_api_key))
            .field("huggingface_endpoint", &self.huggingface_endpoint)
            .field("keyword_model", &self.keyword_model)
            .field("answer_model", &self.answer_model)
            .field("ollama_host", &self.ollama_host)
            .field("ollama_port", &self.ollama_port)
            .field("pubmed_tool", &self.pubmed_tool)
            .field("pubmed_email", &self.pubmed_email)
            .field("ncbi_api_key", &mask(&self.ncbi_api_key))
            .field("max_results", &self.max_results)
            .field("max_new_tokens", &self.max_new_tokens)
            .finish()
    }
}

const ENV_VARS: [&str; 13] = [
    "HUGGINGFACE_API_KEY",
    "LLM_BACKEND",
    "HUGGINGFACE_ENDPOINT",
    "KEYWORD_MODEL",
    "ANSWER_MODEL",
    "OLLAMA_HOST",
    "OLLAMA_PORT",
    "PUBMED_TOOL",
    "PUBMED_EMAIL",
    "NCBI_API_KEY",
    "PUBMED_MAX_RESULTS",
    "MAX_NEW_TOKENS",
    "RUST_LOG",
];

impl Configuration {
    /// Reads the process environment. A missing API key is not an error here;
    /// the Hugging Face generator rejects it when the pipeline warms up.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        for var in ENV_VARS {
            match lookup(var) {
                Some(value) => debug!(
                    "Found env var {}: {}",
                    var,
                    if var.contains("KEY") { "***" } else { value.as_str() }
                ),
                None => debug!("{} not set, using default", var),
            }
        }

        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let backend = match non_empty("LLM_BACKEND") {
            Some(value) => value.parse()?,
            None => defaults.backend,
        };

        Ok(Configuration {
            backend,
            huggingface_api_key: non_empty("HUGGINGFACE_API_KEY"),
            huggingface_endpoint: non_empty("HUGGINGFACE_ENDPOINT")
                .unwrap_or(defaults.huggingface_endpoint),
            keyword_model: non_empty("KEYWORD_MODEL").unwrap_or(defaults.keyword_model),
            answer_model: non_empty("ANSWER_MODEL").unwrap_or(defaults.answer_model),
            ollama_host: non_empty("OLLAMA_HOST").unwrap_or(defaults.ollama_host),
            ollama_port: parse_var("OLLAMA_PORT", non_empty("OLLAMA_PORT"))?
                .unwrap_or(defaults.ollama_port),
            pubmed_tool: non_empty("PUBMED_TOOL").unwrap_or(defaults.pubmed_tool),
            pubmed_email: non_empty("PUBMED_EMAIL").unwrap_or(defaults.pubmed_email),
            ncbi_api_key: non_empty("NCBI_API_KEY"),
            max_results: parse_var("PUBMED_MAX_RESULTS", non_empty("PUBMED_MAX_RESULTS"))?
                .unwrap_or(defaults.max_results),
            max_new_tokens: parse_var("MAX_NEW_TOKENS", non_empty("MAX_NEW_TOKENS"))?
                .unwrap_or(defaults.max_new_tokens),
        })
    }
}

fn parse_var<T: FromStr>(name: &str, value: Option<String>) -> Result<Option<T>> {
    value
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| PipelineError::Config(format!("{} must be a number, got '{}'", name, v)))
        })
        .transpose()
}
