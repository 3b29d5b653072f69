use minijinja::context;
use std::sync::Arc;
use tokio::sync::broadcast::Sender;
use tracing::{debug, info, warn};

use super::configuration::{Configuration, LlmBackend};
use super::fetcher::DocumentFetcher;
use super::generator::{GenerationOptions, HuggingFaceGenerator, OllamaGenerator, TextGenerator};
use super::prompts::PromptBuilder;
use super::pubmed::{LiteratureSearch, PubMedClient};
use super::state::{Answer, PipelineRunOutput, PipelineStage, StatusUpdate};
use crate::error::{PipelineError, Result};

pub const DEFAULT_MAX_NEW_TOKENS: u32 = 500;

/// Keyword extraction, PubMed fetch, then grounded answer generation.
///
/// The two generators are independent instances even when they point at the
/// same model. Call [`QueryPipeline::warm_up`] once before [`QueryPipeline::ask`].
pub struct QueryPipeline {
    keyword_prompt: PromptBuilder,
    answer_prompt: PromptBuilder,
    keyword_llm: Arc<dyn TextGenerator>,
    llm: Arc<dyn TextGenerator>,
    fetcher: DocumentFetcher,
    answer_options: GenerationOptions,
    status_tx: Option<Sender<StatusUpdate>>,
    warmed_up: bool,
}

impl QueryPipeline {
    pub fn new(
        keyword_llm: Arc<dyn TextGenerator>,
        llm: Arc<dyn TextGenerator>,
        search: Arc<dyn LiteratureSearch>,
    ) -> Result<Self> {
        Ok(Self {
            keyword_prompt: PromptBuilder::keyword_prompt()?,
            answer_prompt: PromptBuilder::answer_prompt()?,
            keyword_llm,
            llm,
            fetcher: DocumentFetcher::new(search),
            answer_options: GenerationOptions::with_max_new_tokens(DEFAULT_MAX_NEW_TOKENS),
            status_tx: None,
            warmed_up: false,
        })
    }

    pub fn from_configuration(config: &Configuration) -> Result<Self> {
        let (keyword_llm, llm): (Arc<dyn TextGenerator>, Arc<dyn TextGenerator>) = match config.backend {
            LlmBackend::HuggingFace => (
                Arc::new(HuggingFaceGenerator::new(
                    config.huggingface_api_key.clone(),
                    &config.huggingface_endpoint,
                    &config.keyword_model,
                )?),
                Arc::new(HuggingFaceGenerator::new(
                    config.huggingface_api_key.clone(),
                    &config.huggingface_endpoint,
                    &config.answer_model,
                )?),
            ),
            LlmBackend::Ollama => (
                Arc::new(OllamaGenerator::new(
                    &config.ollama_host,
                    config.ollama_port,
                    &config.keyword_model,
                )),
                Arc::new(OllamaGenerator::new(
                    &config.ollama_host,
                    config.ollama_port,
                    &config.answer_model,
                )),
            ),
        };

        let search = PubMedClient::new(&config.pubmed_tool, &config.pubmed_email)?
            .with_api_key(config.ncbi_api_key.clone());

        Ok(Self::new(keyword_llm, llm, Arc::new(search))?
            .with_max_results(config.max_results)
            .with_max_new_tokens(config.max_new_tokens))
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.fetcher = self.fetcher.with_max_results(max_results);
        self
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: u32) -> Self {
        self.answer_options.max_new_tokens = Some(max_new_tokens);
        self
    }

    pub fn set_status_sender(&mut self, tx: Sender<StatusUpdate>) {
        self.fetcher.set_status_sender(tx.clone());
        self.status_tx = Some(tx);
    }

    pub fn is_warmed_up(&self) -> bool {
        self.warmed_up
    }

    pub async fn warm_up(&mut self) -> Result<()> {
        self.keyword_llm.warm_up().await?;
        self.llm.warm_up().await?;
        self.warmed_up = true;
        info!("Pipeline warmed up");
        Ok(())
    }

    pub async fn shut_down(self) -> Result<()> {
        self.keyword_llm.shut_down().await?;
        self.llm.shut_down().await?;
        info!("Pipeline shut down");
        Ok(())
    }

    /// Answers one question, then shuts the pipeline down. A shutdown failure
    /// is logged and never replaces the outcome of `ask`.
    pub async fn ask_and_shut_down(self, question: &str) -> Result<Answer> {
        let result = self.ask(question).await;
        if let Err(e) = self.shut_down().await {
            warn!(error = %e, "pipeline shutdown failed");
        }
        result
    }

    /// Answers one question. Upstream generation errors propagate unchanged;
    /// fetch failures only shrink the article list.
    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let output = self.run(question).await?;
        let answer = output
            .answer()
            .ok_or(PipelineError::EmptyReply {
                stage: PipelineStage::AnswerGenerated,
            })?
            .to_string();

        Ok(Answer {
            question: question.to_string(),
            answer,
            articles: output.fetch.articles,
        })
    }

    pub async fn run(&self, question: &str) -> Result<PipelineRunOutput> {
        if !self.warmed_up {
            return Err(PipelineError::NotWarmedUp);
        }

        let mut stage = PipelineStage::Start;
        self.send_status(stage, "Received question");

        let keyword_prompt = self.keyword_prompt.render(context! { question => question })?;
        self.advance(&mut stage, "Built keyword prompt");
        debug!(prompt = %keyword_prompt, "keyword prompt");

        let keyword_replies = self
            .keyword_llm
            .generate(&keyword_prompt, &GenerationOptions::default())
            .await?;
        let keyword_block = first_reply(&keyword_replies, PipelineStage::KeywordsGenerated)?.to_string();
        self.advance(&mut stage, &format!("Generated keywords:\n{}", keyword_block));

        let fetch = self.fetcher.fetch(&[keyword_block]).await;
        if !fetch.is_complete() {
            warn!(failures = fetch.failures.len(), "continuing with partial articles");
        }
        self.advance(&mut stage, &format!("Fetched {} articles", fetch.articles.len()));

        let answer_prompt = self.answer_prompt.render(context! {
            question => question,
            articles => &fetch.articles,
        })?;
        self.advance(&mut stage, "Built answer prompt");
        debug!(prompt = %answer_prompt, "answer prompt");

        let replies = self.llm.generate(&answer_prompt, &self.answer_options).await?;
        first_reply(&replies, PipelineStage::AnswerGenerated)?;
        self.advance(&mut stage, "Generated answer");

        self.advance(&mut stage, "Completed");

        Ok(PipelineRunOutput {
            keyword_prompt,
            keyword_replies,
            fetch,
            answer_prompt,
            replies,
        })
    }

    fn advance(&self, stage: &mut PipelineStage, message: &str) {
        if let Some(next) = stage.next() {
            *stage = next;
        }
        info!(stage = %stage, "{}", message.lines().next().unwrap_or_default());
        self.send_status(*stage, message);
    }

    fn send_status(&self, stage: PipelineStage, message: &str) {
        if let Some(tx) = &self.status_tx {
            if let Err(e) = tx.send(StatusUpdate::new(stage, message)) {
                debug!("Failed to send status update: {} (stage={})", e, stage);
            }
        }
    }
}

fn first_reply(replies: &[String], stage: PipelineStage) -> Result<&str> {
    replies
        .first()
        .map(String::as_str)
        .ok_or(PipelineError::EmptyReply { stage })
}
