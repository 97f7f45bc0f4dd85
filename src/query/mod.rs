//! Lexical/vector query construction
//!
//! Turns a keyword into a backend-independent [`TextQuery`]: either a literal
//! case-insensitive substring match or a nearest-neighbor query around the
//! keyword's embedding. Nothing is cached here.

use crate::embedding::{embed_checked, EmbeddingProvider};
use crate::error::Result;
use std::sync::Arc;

/// How candidate rows are matched against the keyword.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// Case-insensitive substring; holds the lowercased keyword.
    Substring(String),
    /// Order by ascending cosine distance to this embedding.
    Nearest(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextQuery {
    pub matcher: Matcher,
    pub top_k: usize,
}

impl TextQuery {
    pub fn substring(keyword: &str, top_k: usize) -> Self {
        Self {
            matcher: Matcher::Substring(keyword.to_lowercase()),
            top_k,
        }
    }

    pub fn nearest(embedding: Vec<f32>, top_k: usize) -> Self {
        Self {
            matcher: Matcher::Nearest(embedding),
            top_k,
        }
    }

    pub fn is_semantic(&self) -> bool {
        matches!(self.matcher, Matcher::Nearest(_))
    }
}

/// Whether `text` contains `needle_lower` ignoring case.
///
/// `needle_lower` must already be lowercased, as in [`Matcher::Substring`].
/// Folding is Unicode-aware and the needle matches literally.
pub fn contains_folded(text: &str, needle_lower: &str) -> bool {
    text.to_lowercase().contains(needle_lower)
}

#[derive(Clone)]
pub struct QueryBuilder {
    embedder: Arc<dyn EmbeddingProvider>,
}

impl QueryBuilder {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub async fn build(&self, keyword: &str, exact: bool, top_k: usize) -> Result<TextQuery> {
        if exact {
            return Ok(TextQuery::substring(keyword, top_k));
        }

        let embedding = embed_checked(self.embedder.as_ref(), keyword).await?;
        tracing::debug!(
            "Embedded keyword with {} ({} dims)",
            self.embedder.model_name(),
            embedding.len()
        );
        Ok(TextQuery::nearest(embedding, top_k))
    }
}
