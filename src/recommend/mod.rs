//! Product recommendation strategies
//!
//! Every strategy returns product ids only; the dispatcher resolves them to
//! rows. An empty list is a valid answer (no ratings, no similar users, no
//! user embedding).

use crate::error::Result;
use crate::relational::CatalogStore;
use crate::types::RecommendMethod;
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct Recommender {
    catalog: Arc<dyn CatalogStore>,
    similar_users: usize,
}

impl Recommender {
    pub fn new(catalog: Arc<dyn CatalogStore>, similar_users: usize) -> Self {
        Self {
            catalog,
            similar_users,
        }
    }

    pub async fn recommend(
        &self,
        user_id: i64,
        method: RecommendMethod,
        top_k: usize,
    ) -> Result<Vec<i64>> {
        let recommendations = match method {
            RecommendMethod::Related => self.related(user_id, top_k).await?,
            RecommendMethod::RelatedEmbedding => self.related_embedding(user_id, top_k).await?,
            RecommendMethod::Embedding => self.embedding(user_id, top_k).await?,
        };

        tracing::debug!(
            "Recommended {} products for user {} via {}",
            recommendations.len(),
            user_id,
            method
        );
        Ok(recommendations)
    }

    /// Co-purchase: products rated by anyone who shares a rated product with
    /// the user, minus what the user already rated. Lowest ids first.
    pub async fn related(&self, user_id: i64, top_k: usize) -> Result<Vec<i64>> {
        let rated = self.catalog.rated_products(user_id).await?;
        if rated.is_empty() {
            return Ok(Vec::new());
        }

        let co_raters = self.catalog.co_raters(&rated, user_id).await?;
        if co_raters.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self.catalog.products_rated_by(&co_raters).await?;
        Ok(candidates
            .difference(&rated)
            .copied()
            .take(top_k)
            .collect())
    }

    /// Collaborative filtering over user embeddings.
    ///
    /// Walks the most similar users nearest first, collecting each one's
    /// unseen products in ascending id order until `top_k` is reached.
    pub async fn related_embedding(&self, user_id: i64, top_k: usize) -> Result<Vec<i64>> {
        let Some(embedding) = self.catalog.user_embedding(user_id).await? else {
            return Ok(Vec::new());
        };

        let rated = self.catalog.rated_products(user_id).await?;
        let neighbors = self
            .catalog
            .nearest_users(&embedding, user_id, self.similar_users)
            .await?;

        let mut seen = BTreeSet::new();
        let mut recommendations = Vec::new();

        'neighbors: for neighbor in neighbors {
            let products = self
                .catalog
                .products_rated_by(&BTreeSet::from([neighbor]))
                .await?;

            for product_id in products {
                if recommendations.len() >= top_k {
                    break 'neighbors;
                }
                if !rated.contains(&product_id) && seen.insert(product_id) {
                    recommendations.push(product_id);
                }
            }
        }

        recommendations.truncate(top_k);
        Ok(recommendations)
    }

    /// Products whose title embedding is nearest the user's embedding.
    pub async fn embedding(&self, user_id: i64, top_k: usize) -> Result<Vec<i64>> {
        let Some(embedding) = self.catalog.user_embedding(user_id).await? else {
            return Ok(Vec::new());
        };

        let mut seen = BTreeSet::new();
        Ok(self
            .catalog
            .nearest_products(&embedding, top_k)
            .await?
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect())
    }
}
