//! Vector encoding and cosine-distance ranking for the relational store
//!
//! Embeddings are persisted as little-endian `f32` BLOBs and compared in
//! process, so the store needs no vector extension.

use crate::error::{Error, Result};
use ndarray::{Array1, ArrayView1};
use std::cmp::Ordering;

/// Serialize an embedding into a BLOB.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize a BLOB written by [`embedding_to_bytes`].
pub fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::BackendUnavailable(format!(
            "corrupt embedding: byte length {} is not divisible by 4",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub fn validate_dimension(embedding: &[f32], expected: usize) -> Result<()> {
    if embedding.len() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(())
}

/// Cosine similarity in `[-1, 1]`. A zero vector has similarity 0 to everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);

    let dot_product = a.dot(&b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot_product / (norm_a * norm_b))
}

/// `1 - cosine_similarity`, in `[0, 2]`; smaller is closer.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    Ok(1.0 - cosine_similarity(a, b)?)
}

/// Element-wise mean, or `None` when there is nothing to average.
pub fn mean_embedding(embeddings: &[Vec<f32>]) -> Result<Option<Vec<f32>>> {
    let Some(first) = embeddings.first() else {
        return Ok(None);
    };

    let mut sum = Array1::<f32>::zeros(first.len());
    for embedding in embeddings {
        validate_dimension(embedding, first.len())?;
        sum += &ArrayView1::from(embedding.as_slice());
    }
    sum /= embeddings.len() as f32;

    Ok(Some(sum.to_vec()))
}

/// Rank `candidates` by ascending cosine distance to `query`, ties broken by
/// ascending key, and keep the first `limit`.
pub fn rank_by_distance<K: Ord + Copy>(
    query: &[f32],
    candidates: Vec<(K, Vec<f32>)>,
    limit: usize,
) -> Result<Vec<(K, f32)>> {
    let mut scored = candidates
        .into_iter()
        .map(|(key, embedding)| Ok((key, cosine_distance(query, &embedding)?)))
        .collect::<Result<Vec<_>>>()?;

    scored.sort_by(|a, b| compare_ranked(a, b));
    scored.truncate(limit);
    Ok(scored)
}

pub(crate) fn compare_ranked<K: Ord>(a: &(K, f32), b: &(K, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_bytes_round_trip() {
        let embedding = vec![1.0, -2.5, 3.25, 0.0];
        let recovered = bytes_to_embedding(&embedding_to_bytes(&embedding)).unwrap();
        assert_eq!(embedding, recovered);
    }

    #[test]
    fn test_invalid_embedding_bytes() {
        assert!(bytes_to_embedding(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_cosine_similarity() {
        let same = cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
        assert!((same - 1.0).abs() < 1e-6);

        let orthogonal = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(orthogonal.abs() < 1e-6);

        let opposite = cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert!((opposite - 2.0).abs() < 1e-6);

        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_dimension_mismatch() {
        let result = cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]);
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_mean_embedding() {
        let mean = mean_embedding(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![2.0, 2.0]])
            .unwrap()
            .unwrap();
        assert_eq!(mean, vec![1.0, 1.0]);
        assert!(mean_embedding(&[]).unwrap().is_none());
    }

    #[test]
    fn test_rank_by_distance_breaks_ties_by_key() {
        let candidates = vec![
            (3, vec![1.0, 0.0]),
            (1, vec![0.0, 1.0]),
            (2, vec![1.0, 0.0]),
            (4, vec![2.0, 0.0]),
        ];
        let ranked = rank_by_distance(&[1.0, 0.0], candidates, 3).unwrap();
        let keys: Vec<i64> = ranked.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![2, 3, 4]);
        assert!(ranked.windows(2).all(|w| w[0].1 <= w[1].1));
    }
}
