//! Shared fixtures for integration tests
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use catalog_search::embedding::EmbeddingProvider;
use catalog_search::relational::LibSqlCatalog;
use catalog_search::types::{NewProduct, NewRating};
use catalog_search::Error;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use tempfile::TempDir;

pub const DIMENSION: usize = 3;

/// Create an initialized catalog in a temporary directory.
///
/// Keep the returned `TempDir` alive for the duration of the test.
pub async fn create_test_catalog() -> Result<(LibSqlCatalog, TempDir)> {
    let temp_dir = tempfile::tempdir()?;
    let db_path = temp_dir.path().join("catalog.db");
    let catalog = LibSqlCatalog::open(&db_path.to_string_lossy(), DIMENSION).await?;
    catalog.initialize().await?;
    Ok((catalog, temp_dir))
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).unwrap()
}

/// Products 1 "red camera", 2 "blue camera", 3 "lamp", 4 "tripod" (no
/// embedding) with three comments on product 1.
pub async fn seed_cameras(catalog: &LibSqlCatalog) -> Result<()> {
    catalog
        .insert_product(
            &NewProduct::new(1, "red camera")
                .with_amazon_id("B0001")
                .with_embedding(vec![1.0, 0.0, 0.0]),
        )
        .await?;
    catalog
        .insert_product(&NewProduct::new(2, "Blue Camera").with_embedding(vec![0.9, 0.1, 0.0]))
        .await?;
    catalog
        .insert_product(&NewProduct::new(3, "lamp").with_embedding(vec![0.0, 0.0, 1.0]))
        .await?;
    catalog.insert_product(&NewProduct::new(4, "tripod")).await?;

    catalog
        .insert_rating(
            &NewRating::new(1, 1, 7, 5.0)
                .at(at(1_000))
                .with_text("Great camera", "The battery lasts all day")
                .with_embedding(vec![1.0, 0.0, 0.0]),
        )
        .await?;
    catalog
        .insert_rating(
            &NewRating::new(2, 1, 8, 2.0)
                .at(at(2_000))
                .with_text("Meh", "Battery died quickly")
                .with_embedding(vec![0.0, 1.0, 0.0]),
        )
        .await?;
    catalog
        .insert_rating(
            &NewRating::new(3, 1, 9, 4.0)
                .at(at(3_000))
                .with_text("Nice", "Sharp photos"),
        )
        .await?;

    Ok(())
}

/// User 1 rated {10, 20}, user 2 {20, 30}, user 3 {30, 40}.
///
/// Comment embeddings make user 2 the nearest neighbor of user 1, then
/// user 3. Title embeddings put 10 nearest user 1, then 30.
pub async fn seed_co_purchase(catalog: &LibSqlCatalog) -> Result<()> {
    let products = [
        (10, "camera body", vec![1.0, 0.0, 0.0]),
        (20, "camera lens", vec![0.0, 1.0, 0.0]),
        (30, "camera bag", vec![0.8, 0.2, 0.0]),
        (40, "desk lamp", vec![0.0, 0.0, 1.0]),
    ];
    for (id, name, embedding) in products {
        catalog
            .insert_product(&NewProduct::new(id, name).with_embedding(embedding))
            .await?;
    }

    let ratings = [
        (1, 10, 1, vec![1.0, 0.0, 0.0]),
        (2, 20, 1, vec![1.0, 0.0, 0.0]),
        (3, 20, 2, vec![0.9, 0.1, 0.0]),
        (4, 30, 2, vec![0.9, 0.1, 0.0]),
        (5, 30, 3, vec![0.0, 0.0, 1.0]),
        (6, 40, 3, vec![0.0, 0.0, 1.0]),
    ];
    for (rating_id, product_id, user_id, embedding) in ratings {
        catalog
            .insert_rating(
                &NewRating::new(rating_id, product_id, user_id, 4.0)
                    .at(at(rating_id * 100))
                    .with_text("ok", "fine")
                    .with_embedding(embedding),
            )
            .await?;
    }

    catalog.refresh_user_embeddings().await?;
    Ok(())
}

/// Embedding provider with a fixed vocabulary; unknown text fails.
pub struct KeywordEmbeddings {
    vectors: HashMap<String, Vec<f32>>,
}

impl KeywordEmbeddings {
    pub fn new() -> Self {
        let mut vectors = HashMap::new();
        vectors.insert("camera".to_string(), vec![1.0, 0.0, 0.0]);
        vectors.insert("light".to_string(), vec![0.0, 0.0, 1.0]);
        vectors.insert("battery".to_string(), vec![0.0, 1.0, 0.0]);
        Self { vectors }
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbeddings {
    async fn embed(&self, text: &str) -> catalog_search::Result<Vec<f32>> {
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| Error::EmbeddingUnavailable(format!("no vector for '{}'", text)))
    }

    async fn embed_batch(&self, texts: &[&str]) -> catalog_search::Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "keyword-fixture"
    }

    async fn health_check(&self) -> catalog_search::Result<bool> {
        Ok(true)
    }
}
