use serde::{Deserialize, Serialize};

/// A raw article as returned by a literature search, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub pubmed_id: Option<String>,
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub title: String,
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubmed_id: Option<String>,
}

/// Normalized article handed to the answer prompt.
///
/// Serializes as `{ content, meta: { title, keywords } }`, which is the shape the
/// answer template iterates over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    content: String,
    meta: DocumentMeta,
}

impl Document {
    pub fn new(content: impl Into<String>, meta: DocumentMeta) -> Self {
        Self {
            content: content.into(),
            meta,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn meta(&self) -> &DocumentMeta {
        &self.meta
    }

    pub fn title(&self) -> &str {
        &self.meta.title
    }

    pub fn keywords(&self) -> &[String] {
        &self.meta.keywords
    }
}

/// Absent fields become empty values; this never fails.
pub fn normalize(record: ArticleRecord) -> Document {
    Document {
        content: record.abstract_text.unwrap_or_default(),
        meta: DocumentMeta {
            title: record.title.unwrap_or_default(),
            keywords: record.keywords,
            pubmed_id: record.pubmed_id,
        },
    }
}
