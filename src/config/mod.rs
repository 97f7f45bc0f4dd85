use std::time::Duration;

/// Default embedding dimension (OpenAI `text-embedding-3-small`).
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// Runtime configuration for [`crate::SearchService`] and its collaborators.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Dimension every stored and query embedding must have
    pub embedding_dimension: usize,
    /// How long cached results stay valid
    pub cache_ttl: Duration,
    /// Upper bound on a single cache store call
    pub cache_timeout: Duration,
    /// Upper bound on one search or recommendation request
    pub request_timeout: Duration,
    /// How many nearest users feed collaborative filtering
    pub similar_users: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            cache_ttl: Duration::from_secs(3600), // 1 hour
            cache_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            similar_users: 5,
        }
    }
}

/// Connection settings for the Elasticsearch product index.
#[derive(Debug, Clone)]
pub struct FullTextConfig {
    pub base_url: String,
    pub index: String,
    pub timeout: Duration,
}

impl Default for FullTextConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9200".to_string(),
            index: "products".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}
