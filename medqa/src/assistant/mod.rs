pub mod configuration;
pub mod document;
pub mod fetcher;
pub mod generator;
pub mod pipeline;
pub mod prompts;
pub mod pubmed;
pub mod state;
