//! Relational catalog store
//!
//! [`CatalogStore`] is the read interface the dispatcher and recommender
//! depend on. [`LibSqlCatalog`] implements it over libSQL/SQLite, keeping
//! embeddings as BLOBs and ranking them by cosine distance in process.

pub mod vector;

use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::query::{contains_folded, Matcher, TextQuery};
use crate::types::{
    CatalogCounts, CommentFilter, CommentRow, EmbeddingBackfill, NewProduct, NewRating, ProductRow,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params::Params;
use libsql::{Connection, Database, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Largest number of bound ids per `IN (...)` clause.
const MAX_IN_LIST: usize = 500;

/// Read operations over products, ratings and the derived users view.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Products whose name matches the query, at most `query.top_k`.
    async fn search_products(&self, query: &TextQuery) -> Result<Vec<ProductRow>>;

    /// Comments on one product whose title or body matches the query.
    ///
    /// Semantic queries skip comments without an embedding.
    async fn search_comments(&self, product_id: i64, query: &TextQuery) -> Result<Vec<CommentRow>>;

    /// Comments matching every supplied filter, newest first.
    async fn filter_comments(&self, filter: &CommentFilter) -> Result<Vec<CommentRow>>;

    /// Resolve ids to rows in the requested order; unknown ids are skipped.
    async fn products_by_ids(&self, product_ids: &[i64]) -> Result<Vec<ProductRow>>;

    /// Products the user has rated.
    async fn rated_products(&self, user_id: i64) -> Result<BTreeSet<i64>>;

    /// Users other than `exclude_user` who rated any of `product_ids`.
    async fn co_raters(
        &self,
        product_ids: &BTreeSet<i64>,
        exclude_user: i64,
    ) -> Result<BTreeSet<i64>>;

    /// Every product rated by any of `user_ids`.
    async fn products_rated_by(&self, user_ids: &BTreeSet<i64>) -> Result<BTreeSet<i64>>;

    /// The user's derived embedding, if one has been computed.
    async fn user_embedding(&self, user_id: i64) -> Result<Option<Vec<f32>>>;

    /// Users closest to `embedding` by cosine distance, excluding `exclude_user`.
    async fn nearest_users(
        &self,
        embedding: &[f32],
        exclude_user: i64,
        limit: usize,
    ) -> Result<Vec<i64>>;

    /// Products whose title embedding is closest to `embedding`.
    async fn nearest_products(&self, embedding: &[f32], limit: usize) -> Result<Vec<i64>>;
}

/// libSQL-backed catalog
///
/// Holds the shared [`Database`] handle; every operation opens its own
/// connection so concurrent requests never share a session.
pub struct LibSqlCatalog {
    db: Database,
    dimension: usize,
}

impl LibSqlCatalog {
    /// Open (or create) a local database file.
    pub async fn open(path: &str, dimension: usize) -> Result<Self> {
        let db = libsql::Builder::new_local(path).build().await?;
        tracing::info!("Opened catalog database at {}", path);
        Ok(Self { db, dimension })
    }

    /// Connect to a remote libSQL server.
    pub async fn open_remote(url: String, auth_token: String, dimension: usize) -> Result<Self> {
        let db = libsql::Builder::new_remote(url.clone(), auth_token)
            .build()
            .await?;
        tracing::info!("Connected to remote catalog at {}", url);
        Ok(Self { db, dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn connect(&self) -> Result<Connection> {
        Ok(self.db.connect()?)
    }

    /// Create tables and indexes. Safe to call repeatedly.
    pub async fn initialize(&self) -> Result<()> {
        let conn = self.connect()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                product_id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                amazon_id TEXT,
                title_embedding BLOB
            )
            "#,
            (),
        )
        .await?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS ratings (
                rating_id INTEGER PRIMARY KEY,
                product_id INTEGER NOT NULL REFERENCES products(product_id),
                user_id INTEGER NOT NULL,
                rating REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                comment TEXT NOT NULL DEFAULT '',
                doc_embedding BLOB
            )
            "#,
            (),
        )
        .await?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                user_embedding BLOB,
                refreshed_at INTEGER NOT NULL
            )
            "#,
            (),
        )
        .await?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ratings_product_id ON ratings(product_id)",
            (),
        )
        .await?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ratings_user_id ON ratings(user_id)",
            (),
        )
        .await?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ratings_timestamp ON ratings(timestamp)",
            (),
        )
        .await?;

        tracing::debug!("Catalog schema ready");
        Ok(())
    }

    pub async fn insert_product(&self, product: &NewProduct) -> Result<()> {
        let embedding = self.embedding_value(product.title_embedding.as_deref())?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO products (product_id, name, amazon_id, title_embedding) VALUES (?1, ?2, ?3, ?4)",
            Params::Positional(vec![
                Value::Integer(product.product_id),
                Value::Text(product.name.clone()),
                optional_text(product.amazon_id.as_deref()),
                embedding,
            ]),
        )
        .await?;
        Ok(())
    }

    pub async fn insert_rating(&self, rating: &NewRating) -> Result<()> {
        let embedding = self.embedding_value(rating.doc_embedding.as_deref())?;
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO ratings (rating_id, product_id, user_id, rating, timestamp, title, comment, doc_embedding)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            Params::Positional(vec![
                Value::Integer(rating.rating_id),
                Value::Integer(rating.product_id),
                Value::Integer(rating.user_id),
                Value::Real(rating.rating),
                Value::Integer(rating.timestamp.timestamp()),
                Value::Text(rating.title.clone()),
                Value::Text(rating.comment.clone()),
                embedding,
            ]),
        )
        .await?;
        Ok(())
    }

    /// Backfill the external identifier. Returns whether the product exists.
    pub async fn set_amazon_id(&self, product_id: i64, amazon_id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let updated = conn
            .execute(
                "UPDATE products SET amazon_id = ?1 WHERE product_id = ?2",
                Params::Positional(vec![
                    Value::Text(amazon_id.to_string()),
                    Value::Integer(product_id),
                ]),
            )
            .await?;
        Ok(updated > 0)
    }

    pub async fn set_product_embedding(&self, product_id: i64, embedding: &[f32]) -> Result<bool> {
        let value = self.embedding_value(Some(embedding))?;
        let conn = self.connect()?;
        let updated = conn
            .execute(
                "UPDATE products SET title_embedding = ?1 WHERE product_id = ?2",
                Params::Positional(vec![value, Value::Integer(product_id)]),
            )
            .await?;
        Ok(updated > 0)
    }

    pub async fn set_comment_embedding(&self, rating_id: i64, embedding: &[f32]) -> Result<bool> {
        let value = self.embedding_value(Some(embedding))?;
        let conn = self.connect()?;
        let updated = conn
            .execute(
                "UPDATE ratings SET doc_embedding = ?1 WHERE rating_id = ?2",
                Params::Positional(vec![value, Value::Integer(rating_id)]),
            )
            .await?;
        Ok(updated > 0)
    }

    /// Rebuild the users view: each user's embedding is the mean of their
    /// non-null comment embeddings. Users with none are left out.
    ///
    /// Returns the number of users written.
    pub async fn refresh_user_embeddings(&self) -> Result<usize> {
        let conn = self.connect()?;

        let mut per_user: BTreeMap<i64, Vec<Vec<f32>>> = BTreeMap::new();
        let mut rows = conn
            .query(
                "SELECT user_id, doc_embedding FROM ratings WHERE doc_embedding IS NOT NULL",
                (),
            )
            .await?;
        while let Some(row) = rows.next().await? {
            let user_id: i64 = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            per_user
                .entry(user_id)
                .or_default()
                .push(vector::bytes_to_embedding(&bytes)?);
        }
        drop(rows);

        let refreshed_at = Utc::now().timestamp();
        let tx = conn.transaction().await?;
        tx.execute("DELETE FROM users", ()).await?;

        let mut written = 0;
        for (user_id, embeddings) in per_user {
            let Some(mean) = vector::mean_embedding(&embeddings)? else {
                continue;
            };
            tx.execute(
                "INSERT INTO users (user_id, user_embedding, refreshed_at) VALUES (?1, ?2, ?3)",
                Params::Positional(vec![
                    Value::Integer(user_id),
                    Value::Blob(vector::embedding_to_bytes(&mean)),
                    Value::Integer(refreshed_at),
                ]),
            )
            .await?;
            written += 1;
        }
        tx.commit().await?;

        tracing::info!("Refreshed embeddings for {} users", written);
        Ok(written)
    }

    pub async fn counts(&self) -> Result<CatalogCounts> {
        let conn = self.connect()?;
        let (products, products_with_embeddings) = count_pair(
            &conn,
            "SELECT COUNT(*), COUNT(title_embedding) FROM products",
        )
        .await?;
        let (ratings, ratings_with_embeddings) = count_pair(
            &conn,
            "SELECT COUNT(*), COUNT(doc_embedding) FROM ratings",
        )
        .await?;
        let (users, _) = count_pair(&conn, "SELECT COUNT(*), 0 FROM users").await?;

        Ok(CatalogCounts {
            products,
            products_with_embeddings,
            ratings,
            ratings_with_embeddings,
            users,
        })
    }

    /// Products without a title embedding and with id above `after`, as
    /// `(product_id, name)` in id order.
    pub async fn products_missing_embeddings(
        &self,
        after: i64,
        limit: usize,
    ) -> Result<Vec<(i64, String)>> {
        self.missing_embeddings(
            r#"
            SELECT product_id, name FROM products
            WHERE title_embedding IS NULL AND product_id > ?1
            ORDER BY product_id
            LIMIT ?2
            "#,
            after,
            limit,
        )
        .await
    }

    /// Ratings without a comment embedding and with id above `after`, as
    /// `(rating_id, text)` where text is the title and comment joined.
    pub async fn ratings_missing_embeddings(
        &self,
        after: i64,
        limit: usize,
    ) -> Result<Vec<(i64, String)>> {
        self.missing_embeddings(
            r#"
            SELECT rating_id, trim(title || char(10) || comment) FROM ratings
            WHERE doc_embedding IS NULL AND rating_id > ?1
            ORDER BY rating_id
            LIMIT ?2
            "#,
            after,
            limit,
        )
        .await
    }

    async fn missing_embeddings(
        &self,
        sql: &str,
        after: i64,
        limit: usize,
    ) -> Result<Vec<(i64, String)>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                sql,
                Params::Positional(vec![Value::Integer(after), Value::Integer(limit as i64)]),
            )
            .await?;
        let mut missing = Vec::new();
        while let Some(row) = rows.next().await? {
            missing.push((row.get::<i64>(0)?, row.get::<String>(1)?));
        }
        Ok(missing)
    }

    /// Embed every product title and rating text that has no embedding yet,
    /// `batch_size` texts per provider call.
    ///
    /// Fails before writing anything if the provider is unhealthy or its
    /// dimension differs from the catalog's. Rows with blank text are skipped.
    pub async fn backfill_embeddings(
        &self,
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<EmbeddingBackfill> {
        if batch_size == 0 {
            return Err(Error::invalid("batch size must be at least 1"));
        }
        if provider.dimension() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: provider.dimension(),
            });
        }
        if !provider.health_check().await? {
            return Err(Error::EmbeddingUnavailable(format!(
                "model '{}' failed its health check",
                provider.model_name()
            )));
        }

        let mut report = EmbeddingBackfill::default();

        let mut after = i64::MIN;
        loop {
            let batch = self.products_missing_embeddings(after, batch_size).await?;
            let Some(&(last, _)) = batch.last() else {
                break;
            };
            after = last;
            let embedded = embed_rows(provider, batch, &mut report.skipped).await?;
            for (product_id, embedding) in embedded {
                if self.set_product_embedding(product_id, &embedding).await? {
                    report.products += 1;
                }
            }
            tracing::debug!("Embedded products up to id {}", after);
        }

        let mut after = i64::MIN;
        loop {
            let batch = self.ratings_missing_embeddings(after, batch_size).await?;
            let Some(&(last, _)) = batch.last() else {
                break;
            };
            after = last;
            let embedded = embed_rows(provider, batch, &mut report.skipped).await?;
            for (rating_id, embedding) in embedded {
                if self.set_comment_embedding(rating_id, &embedding).await? {
                    report.ratings += 1;
                }
            }
            tracing::debug!("Embedded ratings up to id {}", after);
        }

        tracing::info!(
            "Backfilled {} product and {} rating embeddings with {} ({} skipped)",
            report.products,
            report.ratings,
            provider.model_name(),
            report.skipped
        );
        Ok(report)
    }

    fn embedding_value(&self, embedding: Option<&[f32]>) -> Result<Value> {
        match embedding {
            Some(embedding) => {
                vector::validate_dimension(embedding, self.dimension)?;
                Ok(Value::Blob(vector::embedding_to_bytes(embedding)))
            }
            None => Ok(Value::Null),
        }
    }

    fn check_query_dimension(&self, embedding: &[f32]) -> Result<()> {
        vector::validate_dimension(embedding, self.dimension)
    }

    /// Run `{sql_prefix} (?, ...)` over `ids` in chunks, optionally excluding
    /// one user, and collect the first column.
    async fn ids_for(
        &self,
        sql_prefix: &str,
        ids: &BTreeSet<i64>,
        exclude_user: Option<i64>,
    ) -> Result<BTreeSet<i64>> {
        let conn = self.connect()?;
        let ids: Vec<i64> = ids.iter().copied().collect();
        let mut found = BTreeSet::new();

        for chunk in ids.chunks(MAX_IN_LIST) {
            let mut params: Vec<Value> = chunk.iter().map(|&id| Value::Integer(id)).collect();
            let mut sql = format!("{} ({})", sql_prefix, placeholders(chunk.len()));
            if let Some(user_id) = exclude_user {
                sql.push_str(" AND user_id != ?");
                params.push(Value::Integer(user_id));
            }

            let mut rows = conn.query(&sql, Params::Positional(params)).await?;
            while let Some(row) = rows.next().await? {
                found.insert(row.get::<i64>(0)?);
            }
        }

        Ok(found)
    }
}

#[async_trait]
impl CatalogStore for LibSqlCatalog {
    async fn search_products(&self, query: &TextQuery) -> Result<Vec<ProductRow>> {
        let conn = self.connect()?;

        match &query.matcher {
            Matcher::Substring(needle) => {
                // Folded in Rust; SQLite's lower() only folds ASCII
                let mut rows = conn
                    .query(
                        "SELECT name, product_id, amazon_id FROM products ORDER BY product_id",
                        (),
                    )
                    .await?;

                let mut products = Vec::new();
                while products.len() < query.top_k {
                    let Some(row) = rows.next().await? else {
                        break;
                    };
                    let product = read_product(&row)?;
                    if contains_folded(&product.name, needle) {
                        products.push(product);
                    }
                }
                Ok(products)
            }
            Matcher::Nearest(embedding) => {
                self.check_query_dimension(embedding)?;
                let mut rows = conn
                    .query(
                        r#"
                        SELECT name, product_id, amazon_id, title_embedding
                        FROM products
                        WHERE title_embedding IS NOT NULL
                        "#,
                        (),
                    )
                    .await?;

                let mut products = HashMap::new();
                let mut candidates = Vec::new();
                while let Some(row) = rows.next().await? {
                    let product = read_product(&row)?;
                    let bytes: Vec<u8> = row.get(3)?;
                    candidates.push((product.product_id, vector::bytes_to_embedding(&bytes)?));
                    products.insert(product.product_id, product);
                }

                let ranked = vector::rank_by_distance(embedding, candidates, query.top_k)?;
                Ok(ranked
                    .into_iter()
                    .filter_map(|(id, _)| products.remove(&id))
                    .collect())
            }
        }
    }

    async fn search_comments(&self, product_id: i64, query: &TextQuery) -> Result<Vec<CommentRow>> {
        let conn = self.connect()?;

        match &query.matcher {
            Matcher::Substring(needle) => {
                let mut rows = conn
                    .query(
                        r#"
                        SELECT product_id, user_id, rating, timestamp, title, comment
                        FROM ratings
                        WHERE product_id = ?1
                        ORDER BY rating_id
                        "#,
                        Params::Positional(vec![Value::Integer(product_id)]),
                    )
                    .await?;

                let mut comments = Vec::new();
                while comments.len() < query.top_k {
                    let Some(row) = rows.next().await? else {
                        break;
                    };
                    let comment = read_comment(&row)?;
                    if contains_folded(&comment.title, needle)
                        || contains_folded(&comment.comment, needle)
                    {
                        comments.push(comment);
                    }
                }
                Ok(comments)
            }
            Matcher::Nearest(embedding) => {
                self.check_query_dimension(embedding)?;
                let mut rows = conn
                    .query(
                        r#"
                        SELECT product_id, user_id, rating, timestamp, title, comment, doc_embedding, rating_id
                        FROM ratings
                        WHERE product_id = ?1 AND doc_embedding IS NOT NULL
                        "#,
                        Params::Positional(vec![Value::Integer(product_id)]),
                    )
                    .await?;

                let mut comments = HashMap::new();
                let mut candidates = Vec::new();
                while let Some(row) = rows.next().await? {
                    let comment = read_comment(&row)?;
                    let bytes: Vec<u8> = row.get(6)?;
                    let rating_id: i64 = row.get(7)?;
                    candidates.push((rating_id, vector::bytes_to_embedding(&bytes)?));
                    comments.insert(rating_id, comment);
                }

                let ranked = vector::rank_by_distance(embedding, candidates, query.top_k)?;
                Ok(ranked
                    .into_iter()
                    .filter_map(|(id, _)| comments.remove(&id))
                    .collect())
            }
        }
    }

    async fn filter_comments(&self, filter: &CommentFilter) -> Result<Vec<CommentRow>> {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(product_id) = filter.product_id {
            conditions.push("product_id = ?");
            params.push(Value::Integer(product_id));
        }
        if let Some(user_id) = filter.user_id {
            conditions.push("user_id = ?");
            params.push(Value::Integer(user_id));
        }
        if let Some(rating_min) = filter.rating_min {
            conditions.push("rating >= ?");
            params.push(Value::Real(rating_min));
        }
        if let Some(rating_max) = filter.rating_max {
            conditions.push("rating <= ?");
            params.push(Value::Real(rating_max));
        }
        if let Some(start_time) = filter.start_time {
            conditions.push("timestamp >= ?");
            params.push(Value::Integer(start_time.timestamp()));
        }
        if let Some(end_time) = filter.end_time {
            conditions.push("timestamp <= ?");
            params.push(Value::Integer(end_time.timestamp()));
        }

        let mut sql =
            "SELECT product_id, user_id, rating, timestamp, title, comment FROM ratings".to_string();
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp DESC, rating_id DESC LIMIT ?");
        params.push(Value::Integer(filter.top_k as i64));

        tracing::debug!("Filtering comments with {} conditions", conditions.len());

        let conn = self.connect()?;
        let mut rows = conn.query(&sql, Params::Positional(params)).await?;
        let mut comments = Vec::new();
        while let Some(row) = rows.next().await? {
            comments.push(read_comment(&row)?);
        }
        Ok(comments)
    }

    async fn products_by_ids(&self, product_ids: &[i64]) -> Result<Vec<ProductRow>> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.connect()?;
        let mut found = HashMap::new();
        for chunk in product_ids.chunks(MAX_IN_LIST) {
            let sql = format!(
                "SELECT name, product_id, amazon_id FROM products WHERE product_id IN ({})",
                placeholders(chunk.len())
            );
            let params = chunk.iter().map(|&id| Value::Integer(id)).collect();
            let mut rows = conn.query(&sql, Params::Positional(params)).await?;
            while let Some(row) = rows.next().await? {
                let product = read_product(&row)?;
                found.insert(product.product_id, product);
            }
        }

        Ok(product_ids
            .iter()
            .filter_map(|id| found.get(id).cloned())
            .collect())
    }

    async fn rated_products(&self, user_id: i64) -> Result<BTreeSet<i64>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT DISTINCT product_id FROM ratings WHERE user_id = ?1",
                Params::Positional(vec![Value::Integer(user_id)]),
            )
            .await?;

        let mut products = BTreeSet::new();
        while let Some(row) = rows.next().await? {
            products.insert(row.get::<i64>(0)?);
        }
        Ok(products)
    }

    async fn co_raters(
        &self,
        product_ids: &BTreeSet<i64>,
        exclude_user: i64,
    ) -> Result<BTreeSet<i64>> {
        if product_ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        self.ids_for(
            "SELECT DISTINCT user_id FROM ratings WHERE product_id IN",
            product_ids,
            Some(exclude_user),
        )
        .await
    }

    async fn products_rated_by(&self, user_ids: &BTreeSet<i64>) -> Result<BTreeSet<i64>> {
        if user_ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        self.ids_for(
            "SELECT DISTINCT product_id FROM ratings WHERE user_id IN",
            user_ids,
            None,
        )
        .await
    }

    async fn user_embedding(&self, user_id: i64) -> Result<Option<Vec<f32>>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT user_embedding FROM users WHERE user_id = ?1",
                Params::Positional(vec![Value::Integer(user_id)]),
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let bytes: Option<Vec<u8>> = row.get(0)?;
                bytes.map(|b| vector::bytes_to_embedding(&b)).transpose()
            }
            None => Ok(None),
        }
    }

    async fn nearest_users(
        &self,
        embedding: &[f32],
        exclude_user: i64,
        limit: usize,
    ) -> Result<Vec<i64>> {
        self.check_query_dimension(embedding)?;
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT user_id, user_embedding FROM users WHERE user_id != ?1 AND user_embedding IS NOT NULL",
                Params::Positional(vec![Value::Integer(exclude_user)]),
            )
            .await?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next().await? {
            let user_id: i64 = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            candidates.push((user_id, vector::bytes_to_embedding(&bytes)?));
        }

        Ok(vector::rank_by_distance(embedding, candidates, limit)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    async fn nearest_products(&self, embedding: &[f32], limit: usize) -> Result<Vec<i64>> {
        self.check_query_dimension(embedding)?;
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT product_id, title_embedding FROM products WHERE title_embedding IS NOT NULL",
                (),
            )
            .await?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next().await? {
            let product_id: i64 = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            candidates.push((product_id, vector::bytes_to_embedding(&bytes)?));
        }

        Ok(vector::rank_by_distance(embedding, candidates, limit)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn optional_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::Text(v.to_string()))
}

fn read_product(row: &libsql::Row) -> Result<ProductRow> {
    Ok(ProductRow {
        name: row.get(0)?,
        product_id: row.get(1)?,
        amazon_id: row.get(2)?,
    })
}

fn read_comment(row: &libsql::Row) -> Result<CommentRow> {
    let seconds: i64 = row.get(3)?;
    let timestamp = DateTime::<Utc>::from_timestamp(seconds, 0).ok_or_else(|| {
        Error::BackendUnavailable(format!("rating timestamp {} out of range", seconds))
    })?;

    Ok(CommentRow {
        product_id: row.get(0)?,
        user_id: row.get(1)?,
        rating: row.get(2)?,
        timestamp,
        title: row.get(4)?,
        comment: row.get(5)?,
    })
}

/// Embed the non-blank texts of `rows` in one provider call, pairing each
/// vector with its row id.
async fn embed_rows(
    provider: &dyn EmbeddingProvider,
    rows: Vec<(i64, String)>,
    skipped: &mut usize,
) -> Result<Vec<(i64, Vec<f32>)>> {
    let total = rows.len();
    let (ids, texts): (Vec<i64>, Vec<String>) = rows
        .into_iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .unzip();
    *skipped += total - ids.len();
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let embeddings = provider.embed_batch(&inputs).await?;
    if embeddings.len() != ids.len() {
        return Err(Error::EmbeddingUnavailable(format!(
            "expected {} embeddings, got {}",
            ids.len(),
            embeddings.len()
        )));
    }
    Ok(ids.into_iter().zip(embeddings).collect())
}

async fn count_pair(conn: &Connection, sql: &str) -> Result<(u64, u64)> {
    let mut rows = conn.query(sql, ()).await?;
    match rows.next().await? {
        Some(row) => {
            let total: i64 = row.get(0)?;
            let with_embeddings: i64 = row.get(1)?;
            Ok((total.max(0) as u64, with_embeddings.max(0) as u64))
        }
        None => Ok((0, 0)),
    }
}
