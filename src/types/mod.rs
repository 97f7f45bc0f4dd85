use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel used by callers for "no product filter".
pub const UNSET_PRODUCT_ID: i64 = -1;

pub const DEFAULT_SEARCH_TOP_K: usize = 100;
pub const DEFAULT_RECOMMEND_TOP_K: usize = 5;

/// Product as returned by every search backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductRow {
    pub name: String,
    pub product_id: i64,
    pub amazon_id: Option<String>,
}

/// Comment/rating as returned by comment search and rating filters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentRow {
    pub product_id: i64,
    pub user_id: i64,
    pub rating: f64,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub product_id: i64,
    pub name: String,
    pub amazon_id: Option<String>,
    pub title_embedding: Option<Vec<f32>>,
}

impl NewProduct {
    pub fn new(product_id: i64, name: impl Into<String>) -> Self {
        Self {
            product_id,
            name: name.into(),
            amazon_id: None,
            title_embedding: None,
        }
    }

    pub fn with_amazon_id(mut self, amazon_id: impl Into<String>) -> Self {
        self.amazon_id = Some(amazon_id.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.title_embedding = Some(embedding);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRating {
    pub rating_id: i64,
    pub product_id: i64,
    pub user_id: i64,
    pub rating: f64,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub comment: String,
    pub doc_embedding: Option<Vec<f32>>,
}

impl NewRating {
    pub fn new(rating_id: i64, product_id: i64, user_id: i64, rating: f64) -> Self {
        Self {
            rating_id,
            product_id,
            user_id,
            rating,
            timestamp: DateTime::<Utc>::default(),
            title: String::new(),
            comment: String::new(),
            doc_embedding: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_text(mut self, title: impl Into<String>, comment: impl Into<String>) -> Self {
        self.title = title.into();
        self.comment = comment.into();
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.doc_embedding = Some(embedding);
        self
    }
}

/// Conjunctive rating filter; `None` fields are unconstrained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentFilter {
    pub product_id: Option<i64>,
    pub user_id: Option<i64>,
    pub rating_min: Option<f64>,
    pub rating_max: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub top_k: usize,
}

impl Default for CommentFilter {
    fn default() -> Self {
        Self {
            product_id: None,
            user_id: None,
            rating_min: None,
            rating_max: None,
            start_time: None,
            end_time: None,
            top_k: DEFAULT_SEARCH_TOP_K,
        }
    }
}

impl CommentFilter {
    pub fn validate(&self) -> Result<()> {
        validate_top_k(self.top_k)?;
        if let (Some(min), Some(max)) = (self.rating_min, self.rating_max) {
            if min > max {
                return Err(Error::invalid(format!(
                    "rating_min {} is greater than rating_max {}",
                    min, max
                )));
            }
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(Error::invalid(format!(
                    "start_time {} is after end_time {}",
                    start, end
                )));
            }
        }
        Ok(())
    }
}

/// Which physical store serves a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    Relational,
    FullText,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Relational => "relational",
            Backend::FullText => "full-text",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relational" | "psql" | "postgres" | "sql" => Ok(Backend::Relational),
            "full-text" | "fulltext" | "elastic" | "elasticsearch" => Ok(Backend::FullText),
            other => Err(Error::invalid(format!(
                "unknown backend '{}', expected 'relational' or 'full-text'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub keyword: String,
    pub exact: bool,
    /// Negative ids, including the `-1` sentinel, read as unset.
    #[serde(default, deserialize_with = "deserialize_product_id")]
    pub product_id: Option<i64>,
    pub backend: Backend,
    pub top_k: usize,
}

impl SearchRequest {
    pub fn products(keyword: impl Into<String>, backend: Backend) -> Self {
        Self {
            keyword: keyword.into(),
            exact: false,
            product_id: None,
            backend,
            top_k: DEFAULT_SEARCH_TOP_K,
        }
    }

    pub fn comments(keyword: impl Into<String>, product_id: i64) -> Self {
        Self {
            keyword: keyword.into(),
            exact: false,
            product_id: Some(product_id),
            backend: Backend::Relational,
            top_k: DEFAULT_SEARCH_TOP_K,
        }
    }

    /// Build a request from raw caller input: backend by name, `product_id` with
    /// the `-1` sentinel for "unset".
    pub fn from_raw(
        keyword: impl Into<String>,
        exact: bool,
        product_id: i64,
        backend: &str,
        top_k: usize,
    ) -> Result<Self> {
        Ok(Self {
            keyword: keyword.into(),
            exact,
            product_id: product_id_from_sentinel(product_id),
            backend: backend.parse()?,
            top_k,
        })
    }

    pub fn exact(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// The product whose comments are searched, if any.
    pub fn product_filter(&self) -> Option<i64> {
        self.product_id.and_then(product_id_from_sentinel)
    }

    pub fn validate(&self) -> Result<()> {
        validate_top_k(self.top_k)?;
        if self.keyword.trim().is_empty() {
            return Err(Error::invalid("keyword must not be empty"));
        }
        if self.backend == Backend::FullText && self.product_filter().is_some() {
            return Err(Error::invalid(
                "comment search (product_id set) is only supported by the relational backend",
            ));
        }
        Ok(())
    }
}

pub fn product_id_from_sentinel(product_id: i64) -> Option<i64> {
    (product_id >= 0).then_some(product_id)
}

fn deserialize_product_id<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.and_then(product_id_from_sentinel))
}

fn validate_top_k(top_k: usize) -> Result<()> {
    if top_k == 0 {
        return Err(Error::invalid("top_k must be at least 1"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SearchResults {
    Products(Vec<ProductRow>),
    Comments(Vec<CommentRow>),
}

impl SearchResults {
    pub fn len(&self) -> usize {
        match self {
            SearchResults::Products(rows) => rows.len(),
            SearchResults::Comments(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Recommendation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendMethod {
    /// Products rated by users who share a rated product with the target.
    Related,
    /// Products rated by the users with the closest user embeddings.
    RelatedEmbedding,
    /// Products whose title embedding is closest to the user embedding.
    #[default]
    Embedding,
}

impl RecommendMethod {
    /// Resolve a method name. Unknown names fall back to [`RecommendMethod::Embedding`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "related" => RecommendMethod::Related,
            "related_embedding" => RecommendMethod::RelatedEmbedding,
            "embedding" => RecommendMethod::Embedding,
            other => {
                tracing::debug!("Unknown recommendation method '{}', using embedding", other);
                RecommendMethod::Embedding
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendMethod::Related => "related",
            RecommendMethod::RelatedEmbedding => "related_embedding",
            RecommendMethod::Embedding => "embedding",
        }
    }
}

impl fmt::Display for RecommendMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendRequest {
    pub user_id: i64,
    pub method: String,
    #[serde(default = "default_recommend_top_k")]
    pub top_k: usize,
}

fn default_recommend_top_k() -> usize {
    DEFAULT_RECOMMEND_TOP_K
}

impl RecommendRequest {
    pub fn new(user_id: i64, method: impl Into<String>) -> Self {
        Self {
            user_id,
            method: method.into(),
            top_k: DEFAULT_RECOMMEND_TOP_K,
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_top_k(self.top_k)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendResponse {
    pub user_id: i64,
    pub method: String,
    pub recommendations: Vec<ProductRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CatalogCounts {
    pub products: u64,
    pub products_with_embeddings: u64,
    pub ratings: u64,
    pub ratings_with_embeddings: u64,
    pub users: u64,
}

/// Outcome of an embedding backfill run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EmbeddingBackfill {
    pub products: usize,
    pub ratings: usize,
    /// Rows left without an embedding because they have no text.
    pub skipped: usize,
}
