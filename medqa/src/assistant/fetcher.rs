use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::Sender;
use tracing::{debug, info, warn};

use super::document::{normalize, Document};
use super::pubmed::LiteratureSearch;
use super::state::{PipelineStage, StatusUpdate};

pub const DEFAULT_MAX_RESULTS: usize = 1;

/// Splits one keyword reply into per-keyword queries.
///
/// Blank lines are kept, so an empty reply becomes a single empty query.
pub fn query_batch(reply: &str) -> Vec<String> {
    reply
        .trim()
        .split('\n')
        .map(|line| line.trim().to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    pub batch: Vec<String>,
    pub query: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchResult {
    pub articles: Vec<Document>,
    pub failures: Vec<FetchFailure>,
}

impl FetchResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct DocumentFetcher {
    search: Arc<dyn LiteratureSearch>,
    max_results: usize,
    status_tx: Option<Sender<StatusUpdate>>,
}

impl DocumentFetcher {
    pub fn new(search: Arc<dyn LiteratureSearch>) -> Self {
        Self {
            search,
            max_results: DEFAULT_MAX_RESULTS,
            status_tx: None,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn set_status_sender(&mut self, tx: Sender<StatusUpdate>) {
        self.status_tx = Some(tx);
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Runs one search per keyword in `queries[0]`. Never fails: the first
    /// failing search ends the batch and is recorded in `failures`, and the
    /// documents gathered up to that point are returned.
    pub async fn fetch(&self, queries: &[String]) -> FetchResult {
        if queries.len() > 1 {
            debug!(ignored = queries.len() - 1, "only the first keyword block is used");
        }

        let batch = queries.first().map(|block| query_batch(block)).unwrap_or_default();
        let mut result = FetchResult::default();

        for query in &batch {
            match self.search.search(query, self.max_results).await {
                Ok(records) => {
                    debug!(query = %query, found = records.len(), "fetched articles");
                    result.articles.extend(records.into_iter().map(normalize));
                }
                Err(e) => {
                    warn!(error = %e, ?batch, "Couldn't fetch articles for queries");
                    self.send_status(&format!("Couldn't fetch articles for query '{}': {}", query, e));
                    result.failures.push(FetchFailure {
                        batch: batch.clone(),
                        query: query.clone(),
                        error: e.to_string(),
                    });
                    break;
                }
            }
        }

        info!(
            queries = batch.len(),
            articles = result.articles.len(),
            failed = !result.is_complete(),
            "article fetch finished"
        );
        result
    }

    fn send_status(&self, message: &str) {
        if let Some(tx) = &self.status_tx {
            if let Err(e) = tx.send(StatusUpdate::new(PipelineStage::ArticlesFetched, message)) {
                debug!("no status receivers: {}", e);
            }
        }
    }
}
