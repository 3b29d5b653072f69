use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;
use url::Url;

use super::document::ArticleRecord;
use crate::error::{PipelineError, Result};

pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/";

/// NCBI allows 3 requests per second without an API key and 10 with one.
pub const REQUEST_INTERVAL: Duration = Duration::from_millis(334);
pub const REQUEST_INTERVAL_WITH_KEY: Duration = Duration::from_millis(100);

lazy_static! {
    static ref PUBMED_ARTICLE: Regex = Regex::new(
        r"(?s)<PubmedArticle>(.*?)</PubmedArticle>|<PubmedBookArticle>(.*?)</PubmedBookArticle>"
    ).expect("PUBMED_ARTICLE regex is valid");

    static ref PMID: Regex = Regex::new(r"<PMID[^>]*>\s*(\d+)\s*</PMID>")
        .expect("PMID regex is valid");

    static ref ARTICLE_TITLE: Regex = Regex::new(r"(?s)<ArticleTitle[^>]*>(.*?)</ArticleTitle>")
        .expect("ARTICLE_TITLE regex is valid");

    static ref BOOK_TITLE: Regex = Regex::new(r"(?s)<BookTitle[^>]*>(.*?)</BookTitle>")
        .expect("BOOK_TITLE regex is valid");

    static ref ABSTRACT_TEXT: Regex = Regex::new(r"(?s)<AbstractText(?:\s[^>]*)?>(.*?)</AbstractText>")
        .expect("ABSTRACT_TEXT regex is valid");

    static ref KEYWORD: Regex = Regex::new(r"(?s)<Keyword(?:\s[^>]*)?>(.*?)</Keyword>")
        .expect("KEYWORD regex is valid");

    static ref INLINE_TAG: Regex = Regex::new(r"<[^>]+>").expect("INLINE_TAG regex is valid");

    static ref NUMERIC_ENTITY: Regex = Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);")
        .expect("NUMERIC_ENTITY regex is valid");
}

/// Opaque literature search capability.
#[async_trait]
pub trait LiteratureSearch: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ArticleRecord>>;
}

/// NCBI E-utilities client: `esearch` for ids, then `efetch` for the article XML.
pub struct PubMedClient {
    client: Client,
    base_url: Url,
    tool: String,
    email: String,
    api_key: Option<String>,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl PubMedClient {
    pub fn new(tool: impl Into<String>, email: impl Into<String>) -> Result<Self> {
        Self::with_base_url(EUTILS_BASE_URL, tool, email)
    }

    pub fn with_base_url(
        base_url: &str,
        tool: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(base_url)?,
            tool: tool.into(),
            email: email.into(),
            api_key: None,
            min_interval: REQUEST_INTERVAL,
            last_request: Mutex::new(None),
        })
    }

    /// Also shortens the request interval when a key is given.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.min_interval = if api_key.is_some() {
            REQUEST_INTERVAL_WITH_KEY
        } else {
            REQUEST_INTERVAL
        };
        self.api_key = api_key;
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until `min_interval` has passed since the previous request.
    async fn pace(&self) {
        let mut last_request = self.last_request.lock().await;
        if let Some(last) = *last_request {
            sleep_until(last + self.min_interval).await;
        }
        *last_request = Some(Instant::now());
    }

    fn endpoint(&self, name: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base_url.join(name)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("db", "pubmed");
            for (key, value) in params {
                query.append_pair(key, value);
            }
            query.append_pair("tool", &self.tool);
            query.append_pair("email", &self.email);
            if let Some(api_key) = &self.api_key {
                query.append_pair("api_key", api_key);
            }
        }
        Ok(url)
    }

    async fn search_ids(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let retmax = limit.to_string();
        let url = self.endpoint(
            "esearch.fcgi",
            &[("term", query), ("retmax", retmax.as_str()), ("retmode", "json")],
        )?;

        self.pace().await;
        let response = self.client.get(url).send().await?.error_for_status()?;
        let data = response.json::<Value>().await?;
        parse_search_ids(&data)
    }

    async fn fetch_articles(&self, ids: &[String]) -> Result<Vec<ArticleRecord>> {
        let id_list = ids.join(",");
        let url = self.endpoint("efetch.fcgi", &[("id", id_list.as_str()), ("retmode", "xml")])?;

        self.pace().await;
        let response = self.client.get(url).send().await?.error_for_status()?;
        let xml = response.text().await?;
        Ok(parse_articles(&xml))
    }
}

#[async_trait]
impl LiteratureSearch for PubMedClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ArticleRecord>> {
        let ids = self.search_ids(query, limit).await?;
        debug!(query, found = ids.len(), "esearch complete");
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_articles(&ids).await
    }
}

pub fn parse_search_ids(data: &Value) -> Result<Vec<String>> {
    if let Some(error) = data["esearchresult"]["ERROR"]
        .as_str()
        .or_else(|| data["error"].as_str())
    {
        return Err(PipelineError::Search(error.to_string()));
    }

    let ids = data["esearchresult"]["idlist"]
        .as_array()
        .ok_or_else(|| PipelineError::Search("Failed to get idlist from esearch response".to_string()))?;

    Ok(ids
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

/// Extracts one record per `<PubmedArticle>` or `<PubmedBookArticle>`.
/// Missing elements become `None`.
pub fn parse_articles(xml: &str) -> Vec<ArticleRecord> {
    PUBMED_ARTICLE
        .captures_iter(xml)
        .filter_map(|article| article.get(1).or_else(|| article.get(2)))
        .map(|article| {
            let body = article.as_str();

            let abstract_sections: Vec<String> = ABSTRACT_TEXT
                .captures_iter(body)
                .map(|c| clean_text(&c[1]))
                .collect();

            ArticleRecord {
                pubmed_id: PMID.captures(body).map(|c| c[1].to_string()),
                title: ARTICLE_TITLE
                    .captures(body)
                    .or_else(|| BOOK_TITLE.captures(body))
                    .map(|c| clean_text(&c[1])),
                abstract_text: if abstract_sections.is_empty() {
                    None
                } else {
                    Some(abstract_sections.join("\n"))
                },
                keywords: KEYWORD
                    .captures_iter(body)
                    .map(|c| clean_text(&c[1]))
                    .collect(),
            }
        })
        .collect()
}

fn clean_text(raw: &str) -> String {
    let stripped = INLINE_TAG.replace_all(raw, "");
    let decoded = NUMERIC_ENTITY.replace_all(&stripped, |caps: &regex::Captures| {
        let code = &caps[1];
        let parsed = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        parsed
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });

    decoded
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}
