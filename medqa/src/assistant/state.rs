use serde::Serialize;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use super::document::Document;
use super::fetcher::FetchResult;

/// Position of a single `ask` run in the fixed two-stage flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Start,
    KeywordPromptBuilt,
    KeywordsGenerated,
    ArticlesFetched,
    AnswerPromptBuilt,
    AnswerGenerated,
    Done,
}

impl PipelineStage {
    /// The stage that follows this one. `Done` is terminal.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Start => Some(Self::KeywordPromptBuilt),
            Self::KeywordPromptBuilt => Some(Self::KeywordsGenerated),
            Self::KeywordsGenerated => Some(Self::ArticlesFetched),
            Self::ArticlesFetched => Some(Self::AnswerPromptBuilt),
            Self::AnswerPromptBuilt => Some(Self::AnswerGenerated),
            Self::AnswerGenerated => Some(Self::Done),
            Self::Done => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::KeywordPromptBuilt => "keyword prompt",
            Self::KeywordsGenerated => "keyword generation",
            Self::ArticlesFetched => "article fetch",
            Self::AnswerPromptBuilt => "answer prompt",
            Self::AnswerGenerated => "answer generation",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub stage: PipelineStage,
    pub message: String,
    pub timestamp: u64,
}

impl StatusUpdate {
    pub fn new(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

/// Everything each stage of one run produced, in stage order.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunOutput {
    pub keyword_prompt: String,
    pub keyword_replies: Vec<String>,
    pub fetch: FetchResult,
    pub answer_prompt: String,
    pub replies: Vec<String>,
}

impl PipelineRunOutput {
    pub fn answer(&self) -> Option<&str> {
        self.replies.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    pub articles: Vec<Document>,
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.question, self.answer)
    }
}
