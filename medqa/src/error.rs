use thiserror::Error;

use crate::assistant::state::PipelineStage;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0} environment variable not found - please add this to your .env file")]
    MissingApiToken(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Text generation failed: {0}")]
    Generation(String),

    #[error("Literature search failed: {0}")]
    Search(String),

    #[error("Generator returned no replies during {stage}")]
    EmptyReply { stage: PipelineStage },

    #[error("Pipeline must be warmed up before asking questions")]
    NotWarmedUp,
}
