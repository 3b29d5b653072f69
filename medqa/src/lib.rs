pub mod assistant;
pub mod error;
pub mod logging;

pub use assistant::configuration::{Configuration, LlmBackend};
pub use assistant::document::{normalize, ArticleRecord, Document, DocumentMeta};
pub use assistant::fetcher::{DocumentFetcher, FetchFailure, FetchResult};
pub use assistant::generator::{GenerationOptions, TextGenerator};
pub use assistant::pipeline::QueryPipeline;
pub use assistant::pubmed::LiteratureSearch;
pub use assistant::state::{Answer, PipelineRunOutput, PipelineStage, StatusUpdate};
pub use error::{PipelineError, Result};

use dotenv::dotenv;

pub fn init() {
    dotenv().ok();
}
