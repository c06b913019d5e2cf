// ============================================
// Vector Math Kernel
// ============================================
//
// Pure numeric primitives for embedding similarity:
// - Cosine similarity over f32 slices
// - Batched top-k nearest-neighbor over a candidate set
//
// Batching many candidates into one call is the throughput lever here;
// the inner loops are single-pass over contiguous slices so the
// compiler can vectorize them.

use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq)]
pub enum VectorMathError {
    #[error("dimension mismatch: query has {left} components, candidate has {right}")]
    DimensionMismatch { left: usize, right: usize },
}

pub type Result<T> = std::result::Result<T, VectorMathError>;

/// Cosine similarity of two equal-length vectors.
///
/// Zero-vector operands yield `0.0` by convention so downstream scoring
/// stays well-defined. The result is clamped to [-1, 1] and never NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(VectorMathError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !similarity.is_finite() {
        return Ok(0.0);
    }
    Ok(similarity.clamp(-1.0, 1.0))
}

/// Score `query` against every candidate and return the `k` highest by
/// similarity, descending. Ties keep candidate insertion order.
///
/// `k == 0` returns an empty vec; `k >= candidates.len()` returns all
/// candidates fully sorted. Candidates whose dimension does not match
/// the query are dropped from the result with a diagnostic rather than
/// failing the whole batch.
pub fn top_k(query: &[f32], candidates: &[(Uuid, &[f32])], k: usize) -> Vec<(Uuid, f32)> {
    if k == 0 || candidates.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(Uuid, f32)> = Vec::with_capacity(candidates.len());
    for (id, vector) in candidates {
        match cosine_similarity(query, vector) {
            Ok(score) => scored.push((*id, score)),
            Err(e) => {
                warn!(candidate_id = %id, error = %e, "Dropping candidate from top-k batch");
            }
        }
    }

    // Stable sort keeps insertion order for equal scores.
    // NaN cannot occur here; cosine_similarity is NaN-free.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}
