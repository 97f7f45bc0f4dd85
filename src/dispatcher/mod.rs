//! Request validation and routing
//!
//! [`SearchService`] is the single entry point: it validates a request before
//! any I/O, picks the backend, applies the cache and bounds the whole request
//! by the configured timeout.

use crate::cache::{Cache, CacheKey};
use crate::config::ServiceConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::fulltext::FullTextIndex;
use crate::query::QueryBuilder;
use crate::recommend::Recommender;
use crate::relational::CatalogStore;
use crate::types::{
    Backend, CommentFilter, CommentRow, ProductRow, RecommendMethod, RecommendRequest,
    RecommendResponse, SearchRequest, SearchResults,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct SearchService {
    catalog: Arc<dyn CatalogStore>,
    full_text: Option<Arc<dyn FullTextIndex>>,
    queries: QueryBuilder,
    recommender: Recommender,
    cache: Cache,
    request_timeout: Duration,
}

impl SearchService {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        cache: Cache,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            recommender: Recommender::new(catalog.clone(), config.similar_users),
            catalog,
            full_text: None,
            queries: QueryBuilder::new(embedder),
            cache,
            request_timeout: config.request_timeout,
        }
    }

    pub fn with_full_text(mut self, index: Arc<dyn FullTextIndex>) -> Self {
        self.full_text = Some(index);
        self
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Product search when `product_id` is unset, comment search otherwise.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResults> {
        request.validate()?;
        let full_text = match request.backend {
            Backend::FullText => Some(self.full_text_index()?),
            Backend::Relational => None,
        };

        tracing::debug!(
            "Search '{}' exact={} product_id={:?} backend={} top_k={}",
            request.keyword,
            request.exact,
            request.product_filter(),
            request.backend,
            request.top_k
        );

        self.bounded(async {
            match (request.product_filter(), full_text) {
                (Some(product_id), _) => self
                    .search_comments(product_id, request)
                    .await
                    .map(SearchResults::Comments),
                (None, Some(index)) => self
                    .search_products_full_text(index, request)
                    .await
                    .map(SearchResults::Products),
                (None, None) => self
                    .search_products_relational(request)
                    .await
                    .map(SearchResults::Products),
            }
        })
        .await
    }

    /// Ratings matching every filter field, newest first. Not cached.
    pub async fn filter_ratings(&self, filter: &CommentFilter) -> Result<Vec<CommentRow>> {
        filter.validate()?;
        self.bounded(self.catalog.filter_comments(filter)).await
    }

    pub async fn recommend(&self, request: &RecommendRequest) -> Result<RecommendResponse> {
        request.validate()?;
        let method = RecommendMethod::from_name(&request.method);

        let recommendations = self
            .bounded(async {
                let key = CacheKey::new("recommend")
                    .arg("user_id", request.user_id)
                    .arg("method", method.as_str())
                    .arg("top_k", request.top_k);
                let ids: Vec<i64> = self
                    .cache
                    .get_or_compute(&key, || {
                        self.recommender
                            .recommend(request.user_id, method, request.top_k)
                    })
                    .await?;
                self.catalog.products_by_ids(&ids).await
            })
            .await?;

        Ok(RecommendResponse {
            user_id: request.user_id,
            method: method.as_str().to_string(),
            recommendations,
        })
    }

    async fn search_products_relational(&self, request: &SearchRequest) -> Result<Vec<ProductRow>> {
        let key = search_key("search_products", request);
        self.cache
            .get_or_compute(&key, || async {
                let query = self
                    .queries
                    .build(&request.keyword, request.exact, request.top_k)
                    .await?;
                self.catalog.search_products(&query).await
            })
            .await
    }

    async fn search_products_full_text(
        &self,
        index: &Arc<dyn FullTextIndex>,
        request: &SearchRequest,
    ) -> Result<Vec<ProductRow>> {
        let key = search_key("search_products", request);
        self.cache
            .get_or_compute(&key, || {
                index.search_products(&request.keyword, request.exact, request.top_k)
            })
            .await
    }

    async fn search_comments(
        &self,
        product_id: i64,
        request: &SearchRequest,
    ) -> Result<Vec<CommentRow>> {
        let key = search_key("search_comments", request).arg("product_id", product_id);
        self.cache
            .get_or_compute(&key, || async {
                let query = self
                    .queries
                    .build(&request.keyword, request.exact, request.top_k)
                    .await?;
                self.catalog.search_comments(product_id, &query).await
            })
            .await
    }

    fn full_text_index(&self) -> Result<&Arc<dyn FullTextIndex>> {
        self.full_text
            .as_ref()
            .ok_or_else(|| Error::BackendUnavailable("full-text backend is not configured".into()))
    }

    async fn bounded<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.request_timeout, work)
            .await
            .map_err(|_| {
                Error::BackendUnavailable(format!(
                    "request timed out after {:?}",
                    self.request_timeout
                ))
            })?
    }
}

fn search_key(operation: &str, request: &SearchRequest) -> CacheKey {
    CacheKey::new(operation)
        .arg("keyword", request.keyword.as_str())
        .arg("exact", request.exact)
        .arg("backend", request.backend.as_str())
        .arg("top_k", request.top_k)
}
