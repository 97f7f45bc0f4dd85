//! Command-line interface for catalog-search
//!
//! Every command prints pretty JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use catalog_search::cache::{Cache, MemoryCacheStore};
use catalog_search::config::{FullTextConfig, ServiceConfig, DEFAULT_EMBEDDING_DIMENSION};
use catalog_search::embedding::{EmbeddingProvider, MockEmbeddingProvider, OpenAIEmbeddingProvider};
use catalog_search::fulltext::ElasticsearchIndex;
use catalog_search::relational::LibSqlCatalog;
use catalog_search::types::{
    CommentFilter, RecommendRequest, SearchRequest, DEFAULT_RECOMMEND_TOP_K, DEFAULT_SEARCH_TOP_K,
    UNSET_PRODUCT_ID,
};
use catalog_search::SearchService;

#[cfg(feature = "redis-cache")]
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// CLI arguments for catalog-search
#[derive(Parser, Debug)]
#[command(name = "catalog-search")]
#[command(version = catalog_search::VERSION)]
#[command(about = "Hybrid product and comment search with recommendations", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Catalog database path
    #[arg(short = 'b', long, env = "CATALOG_DATABASE", default_value = "catalog.db")]
    pub database: String,

    /// Elasticsearch base URL; the full-text backend is disabled without it
    #[arg(long, env = "CATALOG_ELASTICSEARCH_URL")]
    pub elasticsearch_url: Option<String>,

    /// Elasticsearch index holding product documents
    #[arg(long, env = "CATALOG_ELASTICSEARCH_INDEX", default_value = "products")]
    pub elasticsearch_index: String,

    /// Redis URL for the shared cache; an in-process cache is used without it
    #[arg(long, env = "CATALOG_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Cache TTL in seconds (0 disables caching)
    #[arg(long, env = "CATALOG_CACHE_TTL", default_value = "3600")]
    pub cache_ttl: u64,

    /// Per-request timeout in seconds
    #[arg(long, env = "CATALOG_REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout: u64,

    /// Embedding dimension stored vectors must have
    #[arg(long, env = "CATALOG_EMBEDDING_DIMENSION", default_value_t = DEFAULT_EMBEDDING_DIMENSION)]
    pub embedding_dimension: usize,

    /// OpenAI API key for embeddings (if not using mock provider)
    #[arg(long, env = "OPENAI_API_KEY")]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "CATALOG_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    pub embedding_model: String,

    #[arg(long, env = "CATALOG_EMBEDDING_URL", default_value = "https://api.openai.com/v1")]
    pub embedding_url: String,

    /// Use mock embedding provider for testing
    #[arg(long)]
    pub mock_embeddings: bool,

    #[arg(long, help = "Enable JSON output for logs")]
    pub json_logs: bool,

    #[arg(
        long,
        default_value = "info",
        help = "Log level (trace, debug, info, warn, error)"
    )]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the catalog schema
    Init,

    /// Search products, or a product's comments when --product-id is given
    Search {
        #[arg(short, long)]
        keyword: String,

        /// Literal substring match instead of semantic search
        #[arg(short, long)]
        exact: bool,

        #[arg(short, long, default_value_t = UNSET_PRODUCT_ID, allow_negative_numbers = true)]
        product_id: i64,

        /// relational or full-text (aliases: psql, elastic)
        #[arg(long, default_value = "relational")]
        backend: String,

        #[arg(short, long, default_value_t = DEFAULT_SEARCH_TOP_K)]
        top_k: usize,
    },

    /// Filter ratings; all filters are optional and combined
    Ratings {
        #[arg(long)]
        product_id: Option<i64>,

        #[arg(long)]
        user_id: Option<i64>,

        #[arg(long)]
        rating_min: Option<f64>,

        #[arg(long)]
        rating_max: Option<f64>,

        /// RFC 3339 timestamp
        #[arg(long)]
        start_time: Option<DateTime<Utc>>,

        /// RFC 3339 timestamp
        #[arg(long)]
        end_time: Option<DateTime<Utc>>,

        #[arg(short, long, default_value_t = DEFAULT_SEARCH_TOP_K)]
        top_k: usize,
    },

    /// Recommend products for a user
    Recommend {
        #[arg(short, long)]
        user_id: i64,

        /// related, related_embedding or embedding
        #[arg(short, long, default_value = "embedding")]
        method: String,

        #[arg(short, long, default_value_t = DEFAULT_RECOMMEND_TOP_K)]
        top_k: usize,
    },

    /// Embed product titles and comments that have no embedding yet
    Embed {
        /// Texts sent per embedding request
        #[arg(long, default_value = "50")]
        batch_size: usize,
    },

    /// Recompute user embeddings from comment embeddings
    RefreshUsers,

    /// Show catalog statistics
    Stats,
}

impl Args {
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            embedding_dimension: self.embedding_dimension,
            cache_ttl: Duration::from_secs(self.cache_ttl),
            request_timeout: Duration::from_secs(self.request_timeout),
            ..ServiceConfig::default()
        }
    }

    fn embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        if self.mock_embeddings {
            tracing::info!("Using mock embedding provider");
            return Ok(Arc::new(MockEmbeddingProvider::new_with_dimension(
                self.embedding_dimension,
            )));
        }

        let api_key = self
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY is required unless --mock-embeddings is set")?;
        let provider = OpenAIEmbeddingProvider::with_config(
            api_key,
            self.embedding_model.clone(),
            self.embedding_url.clone(),
            Duration::from_secs(self.request_timeout),
        )?
        .with_dimension(self.embedding_dimension);
        Ok(Arc::new(provider))
    }

    /// Build the result cache. An unreachable Redis degrades to the
    /// in-process store instead of failing the command.
    async fn cache(&self, config: &ServiceConfig) -> Cache {
        if self.cache_ttl == 0 {
            return Cache::disabled();
        }

        if let Some(url) = &self.redis_url {
            #[cfg(feature = "redis-cache")]
            match catalog_search::cache::RedisCacheStore::connect(url, REDIS_CONNECT_TIMEOUT).await
            {
                Ok(store) => {
                    return Cache::new(Arc::new(store), config.cache_ttl, config.cache_timeout);
                }
                Err(e) => tracing::warn!("{}; using in-process cache instead", e),
            }
            #[cfg(not(feature = "redis-cache"))]
            tracing::warn!(
                "Ignoring Redis URL {}: built without the redis-cache feature",
                url
            );
        }

        Cache::new(
            Arc::new(MemoryCacheStore::new()),
            config.cache_ttl,
            config.cache_timeout,
        )
    }

    async fn service(&self, catalog: Arc<LibSqlCatalog>) -> Result<SearchService> {
        let config = self.service_config();
        let cache = self.cache(&config).await;
        let mut service = SearchService::new(catalog, self.embedder()?, cache, &config);

        if let Some(base_url) = &self.elasticsearch_url {
            let index = ElasticsearchIndex::new(FullTextConfig {
                base_url: base_url.clone(),
                index: self.elasticsearch_index.clone(),
                ..FullTextConfig::default()
            })?;
            service = service.with_full_text(Arc::new(index));
        }

        Ok(service)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(args: Args) -> Result<()> {
    let catalog = Arc::new(
        LibSqlCatalog::open(&args.database, args.embedding_dimension)
            .await
            .with_context(|| format!("Failed to open catalog database {}", args.database))?,
    );

    match &args.command {
        Commands::Init => {
            catalog.initialize().await?;
            print_json(&serde_json::json!({ "initialized": args.database }))
        }
        Commands::Search {
            keyword,
            exact,
            product_id,
            backend,
            top_k,
        } => {
            let request = SearchRequest::from_raw(keyword.as_str(), *exact, *product_id, backend, *top_k)?;
            let service = args.service(catalog).await?;
            print_json(&service.search(&request).await?)
        }
        Commands::Ratings {
            product_id,
            user_id,
            rating_min,
            rating_max,
            start_time,
            end_time,
            top_k,
        } => {
            let filter = CommentFilter {
                product_id: *product_id,
                user_id: *user_id,
                rating_min: *rating_min,
                rating_max: *rating_max,
                start_time: *start_time,
                end_time: *end_time,
                top_k: *top_k,
            };
            let service = args.service(catalog).await?;
            print_json(&service.filter_ratings(&filter).await?)
        }
        Commands::Recommend {
            user_id,
            method,
            top_k,
        } => {
            let request = RecommendRequest::new(*user_id, method.as_str()).top_k(*top_k);
            let service = args.service(catalog).await?;
            print_json(&service.recommend(&request).await?)
        }
        Commands::Embed { batch_size } => {
            let embedder = args.embedder()?;
            let report = catalog
                .backfill_embeddings(embedder.as_ref(), *batch_size)
                .await
                .with_context(|| {
                    format!("Embedding backfill with {} failed", embedder.model_name())
                })?;
            print_json(&report)
        }
        Commands::RefreshUsers => {
            let users = catalog.refresh_user_embeddings().await?;
            print_json(&serde_json::json!({ "users_refreshed": users }))
        }
        Commands::Stats => print_json(&catalog.counts().await?),
    }
}
