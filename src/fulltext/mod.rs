//! Full-text product search over an Elasticsearch index
//!
//! Only product search is served here; comment search stays relational.

use crate::config::FullTextConfig;
use crate::error::{Error, Result};
use crate::types::ProductRow;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FullTextIndex: Send + Sync {
    /// Exact searches match the keyword as a phrase; otherwise matching is fuzzy.
    async fn search_products(&self, keyword: &str, exact: bool, top_k: usize)
        -> Result<Vec<ProductRow>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: ProductDocument,
}

/// Indexed document; mirrors the product columns.
#[derive(Debug, Deserialize)]
struct ProductDocument {
    name: String,
    product_id: i64,
    #[serde(default)]
    amazon_id: Option<String>,
}

impl From<ProductDocument> for ProductRow {
    fn from(doc: ProductDocument) -> Self {
        ProductRow {
            name: doc.name,
            product_id: doc.product_id,
            amazon_id: doc.amazon_id,
        }
    }
}

pub struct ElasticsearchIndex {
    client: reqwest::Client,
    base_url: String,
    index: String,
}

impl ElasticsearchIndex {
    pub fn new(config: FullTextConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            index: config.index,
        })
    }

    fn search_url(&self) -> String {
        format!("{}/{}/_search", self.base_url, self.index)
    }
}

/// Request body for a product search.
pub fn build_query(keyword: &str, exact: bool, top_k: usize) -> Value {
    let matcher = if exact {
        json!({ "match_phrase": { "name": keyword } })
    } else {
        json!({ "match": { "name": { "query": keyword, "fuzziness": "AUTO" } } })
    };

    json!({
        "size": top_k,
        "query": matcher,
        "sort": [
            { "_score": { "order": "desc" } },
            { "product_id": { "order": "asc" } }
        ]
    })
}

/// Extract product rows from a search response body.
pub fn parse_hits(body: &str) -> Result<Vec<ProductRow>> {
    let response: SearchResponse = serde_json::from_str(body).map_err(|e| {
        Error::BackendUnavailable(format!("full-text index: malformed response: {}", e))
    })?;

    Ok(response
        .hits
        .hits
        .into_iter()
        .map(|hit| hit.source.into())
        .collect())
}

#[async_trait]
impl FullTextIndex for ElasticsearchIndex {
    async fn search_products(
        &self,
        keyword: &str,
        exact: bool,
        top_k: usize,
    ) -> Result<Vec<ProductRow>> {
        let body = build_query(keyword, exact, top_k);
        tracing::debug!("Full-text search on index '{}': {}", self.index, body);

        let response = self.client.post(self.search_url()).json(&body).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::BackendUnavailable(format!(
                "full-text index returned status {}: {}",
                status, text
            )));
        }

        parse_hits(&text)
    }
}
