use anyhow::Result;
use clap::Parser;
use tracing::error;

use medqa::{init, logging, Configuration, LlmBackend, QueryPipeline};

const EXAMPLE_QUESTION: &str =
    "What are the most current treatments for post-acute COVID aka PACS or long COVID?";

#[derive(Parser, Debug)]
#[command(name = "medqa", about = "Answer medical questions grounded in PubMed abstracts")]
struct Cli {
    /// Question to answer; defaults to an example about long COVID
    question: Vec<String>,

    /// Text generation backend (huggingface or ollama)
    #[arg(long, env = "LLM_BACKEND")]
    backend: Option<LlmBackend>,

    /// Articles fetched per keyword
    #[arg(long)]
    max_results: Option<usize>,

    /// Token limit for the final answer
    #[arg(long)]
    max_new_tokens: Option<u32>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment variables from .env
    init();

    let cli = Cli::parse();
    logging::init_logger(cli.verbose);

    let mut config = Configuration::from_env()?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(max_results) = cli.max_results {
        config.max_results = max_results;
    }
    if let Some(max_new_tokens) = cli.max_new_tokens {
        config.max_new_tokens = max_new_tokens;
    }

    let question = if cli.question.is_empty() {
        EXAMPLE_QUESTION.to_string()
    } else {
        cli.question.join(" ")
    };

    let mut pipeline = QueryPipeline::from_configuration(&config)?;
    pipeline.warm_up().await?;

    match pipeline.ask_and_shut_down(&question).await {
        Ok(answer) => {
            println!("{}", answer);
            Ok(())
        }
        Err(e) => {
            error!("Pipeline error: {}", e);
            Err(e.into())
        }
    }
}
